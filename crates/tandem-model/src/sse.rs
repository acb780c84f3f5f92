// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Minimal server-sent-events framing.
//!
//! SSE lines can be split across TCP chunks, so the decoder carries a
//! remainder buffer forward.  Only complete lines (terminated by `\n`) are
//! surfaced; anything left over is prepended to the next chunk.

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one network chunk; returns the `data:` payloads of every line
    /// completed by it.  The `[DONE]` sentinel used by Chat Completions is
    /// filtered here.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                out.push(data.to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_event_in_one_chunk() {
        let mut d = SseDecoder::new();
        let got = d.push(b"data: {\"a\":1}\n\n");
        assert_eq!(got, vec![r#"{"a":1}"#]);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: {\"a\"").is_empty());
        let got = d.push(b":1}\ndata: {\"b\":2}\n");
        assert_eq!(got, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn crlf_lines_are_trimmed() {
        let mut d = SseDecoder::new();
        let got = d.push(b"data: x\r\n");
        assert_eq!(got, vec!["x"]);
    }

    #[test]
    fn non_data_lines_are_skipped() {
        let mut d = SseDecoder::new();
        let got = d.push(b"event: message_start\nid: 3\ndata: y\n");
        assert_eq!(got, vec!["y"]);
    }

    #[test]
    fn done_sentinel_is_filtered() {
        let mut d = SseDecoder::new();
        let got = d.push(b"data: {\"a\":1}\ndata: [DONE]\n");
        assert_eq!(got, vec![r#"{"a":1}"#]);
    }

    #[test]
    fn incomplete_tail_is_carried_forward() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: tail-without-newline").is_empty());
        let got = d.push(b"\n");
        assert_eq!(got, vec!["tail-without-newline"]);
    }
}
