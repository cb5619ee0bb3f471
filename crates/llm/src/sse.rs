//! SSE streaming infrastructure for the chat-completion client.
//!
//! The upstream streams `data: <json>` frames separated by blank lines and
//! terminated by a `data: [DONE]` sentinel. This module owns the transport
//! mechanics: buffering chunks, draining complete `data:` payloads, and
//! flushing a trailing partial frame when the body closes. Payload
//! interpretation lives in a [`SseParser`] supplied by the client, which
//! keeps mutable assembly state (tool-call fragments) across frames.

use vox_domain::error::{Error, Result};
use vox_domain::stream::{BoxStream, StreamEvent};

/// Stateful parser for SSE `data:` payloads.
pub(crate) trait SseParser: Send + 'static {
    /// Interpret one `data:` payload; may yield zero or more events.
    fn data(&mut self, payload: &str) -> Vec<Result<StreamEvent>>;

    /// Called once when the response body closes. Must flush any pending
    /// assembly state and guarantee a terminal `Done` if none was emitted.
    fn finish(&mut self) -> Vec<Result<StreamEvent>>;
}

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Event blocks are delimited by `\n\n`; only `data:` lines matter here
/// (`event:`, `id:`, `retry:` are skipped). Consumed bytes are drained
/// in place; a trailing partial block stays in the buffer.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a [`BoxStream`] of [`StreamEvent`]s from an SSE `reqwest`
/// response and a parser.
///
/// Dropping the returned stream closes the upstream HTTP read, which is
/// how mid-stream cancellation propagates to the provider.
pub(crate) fn sse_event_stream<P: SseParser>(
    response: reqwest::Response,
    mut parser: P,
) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        for event in parser.data(&data) {
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed; force out any trailing partial frame.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parser.data(&data) {
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Transient(format!("reading SSE body: {e}")));
                    break;
                }
            }
        }

        for event in parser.finish() {
            yield event;
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["first", "second"]);
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        assert_eq!(drain_data_lines(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 7\nretry: 500\ndata: payload\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["payload"]);
    }

    #[test]
    fn drain_done_sentinel_preserved() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["[DONE]"]);
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        assert!(drain_data_lines(&mut buf).is_empty());
        buf.push_str("\n\ndata: chunk2\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["chunk1", "chunk2"]);
    }
}
