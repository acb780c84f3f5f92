// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Inline-image preparation for multimodal provider requests.
//!
//! User messages and tool results may reference images by disk path.  At
//! call time the adapter converts each into a data URL the wire protocol
//! accepts.  Provider APIs reject oversized inline payloads, so anything
//! whose encoded form would exceed [`MAX_INLINE_BYTES`] is downscaled until
//! it fits (halving the longest edge per pass, up to [`MAX_RESIZE_PASSES`]).
//!
//! Encoded results are cached in-process in an LRU keyed on the SHA-256 of
//! the raw file bytes, so repeated calls with the same content skip the
//! decode → resize → re-encode work.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use sha2::Digest as _;

pub use error::ImageError;

mod error;

/// Inline payload budget in raw bytes (~4.5 MB before base64 expansion).
pub const MAX_INLINE_BYTES: usize = 4_500_000;

/// Upper bound on downscale passes for pathological inputs.
const MAX_RESIZE_PASSES: u32 = 4;

/// Maximum number of encoded images held in the in-process LRU cache.
pub const CACHE_CAPACITY: usize = 32;

type CacheKey = [u8; 32]; // SHA-256 digest

fn image_cache() -> &'static Mutex<lru::LruCache<CacheKey, InlineImage>> {
    static CACHE: OnceLock<Mutex<lru::LruCache<CacheKey, InlineImage>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(lru::LruCache::new(
            NonZeroUsize::new(CACHE_CAPACITY).unwrap(),
        ))
    })
}

/// An image prepared for inline transmission.
#[derive(Debug, Clone)]
pub struct InlineImage {
    /// MIME type, e.g. `"image/png"` or `"image/jpeg"`.
    pub mime_type: String,
    /// Raw bytes of the (possibly downscaled) image.
    pub bytes: Vec<u8>,
}

impl InlineImage {
    /// Render as a data URL: `data:<mime>;base64,<b64>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, B64.encode(&self.bytes))
    }
}

/// Sniff the MIME type of raw image bytes, returning `None` for formats the
/// providers do not accept inline.
pub fn sniff_mime(raw: &[u8]) -> Option<&'static str> {
    match image::guess_format(raw).ok()? {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::Gif => Some("image/gif"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Bmp => Some("image/bmp"),
        image::ImageFormat::Tiff => Some("image/tiff"),
        _ => None,
    }
}

/// Load an image file and prepare it for inline transmission.
///
/// Files already within the inline budget are passed through unmodified
/// (original bytes, sniffed mime).  Oversized files are decoded, downscaled
/// until the re-encoded form fits, and re-encoded (PNG stays PNG, everything
/// else becomes JPEG).  If decoding fails the original bytes are sent
/// unmodified rather than dropping the image.
pub fn prepare_image(path: &Path) -> Result<InlineImage, ImageError> {
    let raw = std::fs::read(path).map_err(|e| ImageError::Io(path.display().to_string(), e))?;

    let key: CacheKey = sha2::Sha256::digest(&raw).into();
    if let Ok(mut cache) = image_cache().lock() {
        if let Some(cached) = cache.get(&key) {
            return Ok(cached.clone());
        }
    }

    let mime = sniff_mime(&raw)
        .map(str::to_string)
        .or_else(|| mime_from_extension(path))
        .ok_or_else(|| ImageError::UnsupportedFormat(path.display().to_string()))?;

    let result = if raw.len() <= MAX_INLINE_BYTES {
        InlineImage { mime_type: mime, bytes: raw }
    } else {
        match shrink_to_budget(&raw, &mime) {
            Ok(img) => img,
            // No usable decoder for this payload: send it unmodified and let
            // the provider decide.
            Err(_) => InlineImage { mime_type: mime, bytes: raw },
        }
    };

    if let Ok(mut cache) = image_cache().lock() {
        cache.put(key, result.clone());
    }

    Ok(result)
}

fn mime_from_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" | "tif" => "image/tiff",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Decode and repeatedly halve the longest edge until the re-encoded image
/// fits the inline budget.
fn shrink_to_budget(raw: &[u8], mime: &str) -> Result<InlineImage, ImageError> {
    let mut img = image::load_from_memory(raw)
        .map_err(|e| ImageError::Decode(mime.to_string(), e.to_string()))?;
    let keep_png = mime == "image/png";

    for _ in 0..MAX_RESIZE_PASSES {
        let (w, h) = (img.width(), img.height());
        let new_w = (w / 2).max(1);
        let new_h = (h / 2).max(1);
        img = img.resize(new_w, new_h, image::imageops::FilterType::Lanczos3);

        let encoded = encode(&img, keep_png)?;
        if encoded.bytes.len() <= MAX_INLINE_BYTES {
            return Ok(encoded);
        }
    }
    // Budget still exceeded after the pass cap: return the smallest attempt.
    encode(&img, keep_png)
}

fn encode(img: &image::DynamicImage, keep_png: bool) -> Result<InlineImage, ImageError> {
    let mut out = Cursor::new(Vec::new());
    if keep_png {
        img.write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        Ok(InlineImage { mime_type: "image/png".into(), bytes: out.into_inner() })
    } else {
        // JPEG has no alpha channel; flatten before encoding.
        let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
        rgb.write_to(&mut out, image::ImageFormat::Jpeg)
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        Ok(InlineImage { mime_type: "image/jpeg".into(), bytes: out.into_inner() })
    }
}

/// Parse a data URL and return `(mime_type, raw_bytes)`.
pub fn parse_data_url(data_url: &str) -> Result<(String, Vec<u8>), ImageError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| ImageError::InvalidDataUrl(data_url.to_string()))?;
    let (meta, b64) = rest
        .split_once(',')
        .ok_or_else(|| ImageError::InvalidDataUrl(data_url.to_string()))?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    let bytes = B64
        .decode(b64)
        .map_err(|e| ImageError::Base64(e.to_string()))?;
    Ok((mime, bytes))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
