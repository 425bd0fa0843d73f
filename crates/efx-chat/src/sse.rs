//! Line-level decoding of Server-Sent-Events chat streams.

use crate::types::StreamChunk;

const DATA_PREFIX: &str = "data:";
const DONE: &str = "[DONE]";

/// Meaning of one line of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// Blank, comment, non-`data:` or undecodable line.
    Skip,
    /// `data: [DONE]`.
    Done,
    /// A decoded chunk: its first non-empty content delta and whether it
    /// carried a finish reason.
    Chunk {
        delta: Option<String>,
        finished: bool,
    },
}

pub(crate) fn decode_line(line: &str) -> Frame {
    let Some(data) = line.trim().strip_prefix(DATA_PREFIX) else {
        return Frame::Skip;
    };
    let data = data.trim_start();
    if data == DONE {
        return Frame::Done;
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(_) => return Frame::Skip,
    };
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Frame::Chunk {
            delta: None,
            finished: false,
        };
    };
    Frame::Chunk {
        delta: choice.delta.content.filter(|content| !content.is_empty()),
        finished: choice.finish_reason.is_some(),
    }
}

/// Reassembles newline-terminated lines from arbitrarily split body chunks.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed bytes, returning every line they complete.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Whatever trails the last newline once the body has ended.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(content: &str) -> Frame {
        Frame::Chunk {
            delta: Some(content.to_string()),
            finished: false,
        }
    }

    #[test]
    fn test_non_data_lines_skipped() {
        assert_eq!(decode_line(""), Frame::Skip);
        assert_eq!(decode_line(": keep-alive"), Frame::Skip);
        assert_eq!(decode_line("event: message"), Frame::Skip);
    }

    #[test]
    fn test_done_sentinel() {
        assert_eq!(decode_line("data: [DONE]"), Frame::Done);
        assert_eq!(decode_line("data:[DONE]\r"), Frame::Done);
    }

    #[test]
    fn test_content_delta() {
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            delta("Hel")
        );
    }

    #[test]
    fn test_empty_delta_and_role_only() {
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#),
            Frame::Chunk {
                delta: None,
                finished: false
            }
        );
        assert_eq!(
            decode_line(r#"data: {"choices":[]}"#),
            Frame::Chunk {
                delta: None,
                finished: false
            }
        );
    }

    #[test]
    fn test_finish_reason_ends() {
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"content":"!"},"finish_reason":"stop"}]}"#),
            Frame::Chunk {
                delta: Some("!".to_string()),
                finished: true
            }
        );
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{},"finish_reason":null}]}"#),
            Frame::Chunk {
                delta: None,
                finished: false
            }
        );
    }

    #[test]
    fn test_malformed_json_skipped() {
        assert_eq!(decode_line("data: {not valid json}"), Frame::Skip);
    }

    #[test]
    fn test_splitter_handles_split_chunks() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"data: {\"a\"").is_empty());
        assert_eq!(splitter.push(b":1}\n\nda"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(splitter.push(b"ta: [DONE]"), Vec::<String>::new());
        assert_eq!(splitter.finish().as_deref(), Some("data: [DONE]"));
        assert_eq!(splitter.finish(), None);
    }
}
