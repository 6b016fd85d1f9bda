//! SSE decoding for streamed chat completions.
//!
//! - [`drain_data_lines`] pulls complete `data:` payloads out of a buffer
//! - [`sse_response_stream`] turns a `reqwest::Response` into a
//!   [`BoxStream`] of events using a payload parser

use crate::util::from_reqwest;
use lx_domain::error::Result;
use lx_domain::stream::{BoxStream, StreamEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by a blank line. `event:`, `id:` and `retry:`
/// lines are ignored. CRLF line endings are normalised on the way in.
///
/// The buffer is drained in place; a trailing partial event stays for the
/// next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }

    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a [`BoxStream`] from an SSE response and a payload parser.
///
/// The stream:
/// 1. buffers incoming chunks and drains complete events,
/// 2. stops reading once the parser yields `Done` or an error,
/// 3. flushes a trailing unterminated event when the body closes,
/// 4. yields a transport error as the final item,
/// 5. emits a fallback `Done` if the body ended without one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut finished = false;

        'read: loop {
            let data_lines = match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    drain_data_lines(&mut buffer)
                }
                Ok(None) => {
                    if buffer.trim().is_empty() {
                        break 'read;
                    }
                    buffer.push_str("\n\n");
                    let lines = drain_data_lines(&mut buffer);
                    if lines.is_empty() {
                        break 'read;
                    }
                    lines
                }
                Err(e) => {
                    finished = true;
                    yield Err(from_reqwest(e));
                    break 'read;
                }
            };

            for data in data_lines {
                for event in parse_data(&data) {
                    let terminal = matches!(&event, Ok(StreamEvent::Done { .. }) | Err(_));
                    yield event;
                    if terminal {
                        finished = true;
                        break 'read;
                    }
                }
            }
        }

        if !finished {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["payload"]);
    }

    #[test]
    fn drain_normalises_crlf() {
        let mut buf = String::from("data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["one", "two"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: {\"a\":");
        assert!(drain_data_lines(&mut buf).is_empty());

        buf.push_str("1}\n\ndata: [DONE]\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}", "[DONE]"]);
        assert!(buf.is_empty());
    }
}
