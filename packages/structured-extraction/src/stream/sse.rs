//! Server-sent-event decoding for extraction streams.
//!
//! Converts a caller-supplied byte stream into [`ExtractionChunk`] values,
//! and folds any chunk stream into [`AccumulatedExtraction`] snapshots.
//! Handles `data: [DONE]`, lines split across reads and multi-byte
//! characters split across reads.

use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use pin_project_lite::pin_project;

use crate::error::{ExtractionError, Result};
use crate::stream::accumulator::AccumulatedExtraction;
use crate::stream::delta::ExtractionChunk;

const DONE: &str = "[DONE]";

/// Stream adapter that converts raw SSE bytes into chunks.
pub struct ChunkStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    done: bool,
}

impl ChunkStream {
    pub fn new<S, E>(byte_stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Display + 'static,
    {
        let inner =
            byte_stream.map(|item| item.map_err(|e| ExtractionError::Transport(e.to_string())));
        Self {
            inner: Box::pin(inner),
            buffer: Vec::new(),
            done: false,
        }
    }
}

impl Stream for ChunkStream {
    type Item = Result<ExtractionChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match try_parse_line(&mut this.buffer) {
                Some(Line::Chunk(chunk)) => return Poll::Ready(Some(chunk)),
                Some(Line::Done) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                None => {}
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.done = true;
                    // Last line without a trailing newline
                    if this.buffer.iter().all(u8::is_ascii_whitespace) {
                        return Poll::Ready(None);
                    }
                    this.buffer.push(b'\n');
                    return match try_parse_line(&mut this.buffer) {
                        Some(Line::Chunk(chunk)) => Poll::Ready(Some(chunk)),
                        _ => Poll::Ready(None),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

enum Line {
    Chunk(Result<ExtractionChunk>),
    Done,
}

/// Extract and decode the next data line from the buffer.
/// Returns `None` if no complete data line is available yet.
fn try_parse_line(buffer: &mut Vec<u8>) -> Option<Line> {
    loop {
        let newline_pos = buffer.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = buffer.drain(..=newline_pos).collect();

        let line = match std::str::from_utf8(&raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                return Some(Line::Chunk(Err(ExtractionError::Decode(format!(
                    "invalid UTF-8 in stream: {e}"
                )))))
            }
        };

        // Blank lines separate events; "event:", "id:" and the like are skipped.
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == DONE {
            return Some(Line::Done);
        }

        return Some(Line::Chunk(serde_json::from_str(data).map_err(|e| {
            ExtractionError::Decode(format!(
                "failed to parse stream chunk: {e} (data: {})",
                truncate(data, 200)
            ))
        })));
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pin_project! {
    /// Stream of snapshots produced by folding chunks, one per chunk.
    pub struct AccumulatingStream<S> {
        #[pin]
        inner: S,
        current: AccumulatedExtraction,
    }
}

impl<S> AccumulatingStream<S> {
    pub fn new(inner: S, initial: AccumulatedExtraction) -> Self {
        Self {
            inner,
            current: initial,
        }
    }

    /// Latest snapshot.
    pub fn current(&self) -> &AccumulatedExtraction {
        &self.current
    }
}

impl<S> Stream for AccumulatingStream<S>
where
    S: Stream<Item = Result<ExtractionChunk>>,
{
    type Item = Result<AccumulatedExtraction>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match futures::ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                let next = this.current.next(&chunk);
                *this.current = next.clone();
                Poll::Ready(Some(Ok(next)))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => Poll::Ready(None),
        }
    }
}

/// Fold a chunk stream into snapshots.
pub trait AccumulateExt: Stream<Item = Result<ExtractionChunk>> + Sized {
    fn accumulate(self, initial: AccumulatedExtraction) -> AccumulatingStream<Self> {
        AccumulatingStream::new(self, initial)
    }
}

impl<S> AccumulateExt for S where S: Stream<Item = Result<ExtractionChunk>> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccumulatorConfig;
    use crate::stream::accumulator::ExtractionStatus;
    use serde_json::json;
    use std::convert::Infallible;

    fn make_sse_bytes(lines: &[&str]) -> Vec<std::result::Result<Bytes, Infallible>> {
        lines
            .iter()
            .map(|line| Ok(Bytes::from(format!("{line}\n"))))
            .collect()
    }

    #[tokio::test]
    async fn test_parse_chunks_until_done() {
        let data = make_sse_bytes(&[
            r#"data: {"choices":[{"delta":{"flat_parsed":{"name":"Ann"}}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"flat_parsed":{"age":3}},"finish_reason":"stop"}]}"#,
            "",
            "data: [DONE]",
            "",
            r#"data: {"choices":[]}"#,
        ]);

        let chunks: Vec<_> = ChunkStream::new(futures::stream::iter(data)).collect().await;
        assert_eq!(chunks.len(), 2);
        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.choices[0].delta.flat_parsed["name"], json!("Ann"));
    }

    #[tokio::test]
    async fn test_lines_and_characters_split_across_reads() {
        let line = "data: {\"choices\":[{\"delta\":{\"flat_parsed\":{\"city\":\"Zürich\"}}}]}\n\n";
        let bytes = line.as_bytes();
        let split = line.find('ü').unwrap() + 1;
        let parts: Vec<std::result::Result<Bytes, Infallible>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..10])),
            Ok(Bytes::copy_from_slice(&bytes[10..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];

        let mut stream = ChunkStream::new(futures::stream::iter(parts));
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.choices[0].delta.flat_parsed["city"], json!("Zürich"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_skips_non_data_lines_and_reads_unterminated_tail() {
        let parts: Vec<std::result::Result<Bytes, Infallible>> = vec![
            Ok(Bytes::from("event: delta\nid: 1\n: keep-alive\n")),
            Ok(Bytes::from(r#"data:{"choices":[{"delta":{"content":"x"}}]}"#)),
        ];

        let chunks: Vec<_> = ChunkStream::new(futures::stream::iter(parts)).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().choices[0].delta.content, "x");
    }

    #[tokio::test]
    async fn test_decode_error() {
        let data = make_sse_bytes(&["data: {not json"]);
        let mut stream = ChunkStream::new(futures::stream::iter(data));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ExtractionError::Decode(_)));
    }

    #[tokio::test]
    async fn test_transport_error() {
        let parts: Vec<std::result::Result<Bytes, String>> = vec![Err("connection reset".to_string())];
        let mut stream = ChunkStream::new(futures::stream::iter(parts));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ExtractionError::Transport(msg) if msg == "connection reset"));
    }

    #[tokio::test]
    async fn test_accumulate_stream_yields_snapshots() {
        let data = make_sse_bytes(&[
            r#"data: {"choices":[{"delta":{"flat_parsed":{"name":"Ann"}}}]}"#,
            r#"data: {"choices":[{"delta":{"flat_parsed":{"age":3}},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]);

        let initial = AccumulatedExtraction::untyped(AccumulatorConfig::default());
        let snapshots: Vec<_> = ChunkStream::new(futures::stream::iter(data))
            .accumulate(initial)
            .collect()
            .await;

        assert_eq!(snapshots.len(), 2);
        let first = snapshots[0].as_ref().unwrap();
        assert_eq!(first.parsed(), vec![&json!({"name": "Ann"})]);
        let last = snapshots[1].as_ref().unwrap();
        assert_eq!(last.status(), ExtractionStatus::Complete);
        assert_eq!(last.parsed(), vec![&json!({"name": "Ann", "age": 3})]);
    }
}
