// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Call-time image resolution.
//!
//! History items may reference images by disk path (`ImagePart::File`).
//! Before input building, each file reference is read, mime-sniffed,
//! downscaled when oversized, and rewritten to an inline data URL.  Files
//! that fail to load are dropped with a warning rather than failing the
//! whole request.

use std::path::PathBuf;

use tracing::warn;

use tandem_protocol::{ConversationItem, ImagePart};

async fn resolve_part(part: ImagePart) -> Option<ImagePart> {
    match part {
        ImagePart::Url { .. } => Some(part),
        ImagePart::File { path, .. } => {
            let path_buf = PathBuf::from(&path);
            let result =
                tokio::task::spawn_blocking(move || tandem_image::prepare_image(&path_buf)).await;
            match result {
                Ok(Ok(img)) => Some(ImagePart::Url { url: img.to_data_url() }),
                Ok(Err(e)) => {
                    warn!(path = %path, error = %e, "dropping unreadable image");
                    None
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "image load task failed");
                    None
                }
            }
        }
    }
}

async fn resolve_parts(images: Option<Vec<ImagePart>>) -> Option<Vec<ImagePart>> {
    let parts = images?;
    let mut resolved = Vec::with_capacity(parts.len());
    for part in parts {
        if let Some(part) = resolve_part(part).await {
            resolved.push(part);
        }
    }
    if resolved.is_empty() {
        None
    } else {
        Some(resolved)
    }
}

/// Rewrite every file-based image in the history to an inline data URL.
pub async fn resolve_input_images(input: Vec<ConversationItem>) -> Vec<ConversationItem> {
    let mut out = Vec::with_capacity(input.len());
    for item in input {
        let item = match item {
            ConversationItem::User(mut m) => {
                m.images = resolve_parts(m.images).await;
                ConversationItem::User(m)
            }
            ConversationItem::ToolResult(mut r) => {
                r.images = resolve_parts(r.images).await;
                ConversationItem::ToolResult(r)
            }
            other => other,
        };
        out.push(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::UserMessageItem;

    #[tokio::test]
    async fn url_parts_pass_through() {
        let input = vec![ConversationItem::User(UserMessageItem::with_images(
            "look",
            vec![ImagePart::url("data:image/png;base64,AA==")],
        ))];
        let out = resolve_input_images(input.clone()).await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn missing_files_are_dropped() {
        let input = vec![ConversationItem::User(UserMessageItem::with_images(
            "look",
            vec![ImagePart::file("/nonexistent/image.png")],
        ))];
        let out = resolve_input_images(input).await;
        match &out[0] {
            ConversationItem::User(m) => assert!(m.images.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
