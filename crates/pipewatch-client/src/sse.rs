//! Text event-stream framing.
//!
//! Bytes arrive in arbitrary chunks; the decoder buffers until it has whole
//! lines and emits a frame on every blank line.

use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::channel::FrameStream;
use crate::error::ClientError;

/// Event name used when a frame carries data but no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// Longest partial line buffered while waiting for its newline. Past this,
/// the line and the frame it belongs to are dropped.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One dispatched event: its name and the joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Incremental event-stream decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline.
    scanned: usize,
    /// Inside an oversized line; input is skipped up to its newline.
    skip_line: bool,
    /// The current frame lost a line and is dropped at its blank line.
    skip_frame: bool,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every frame it completes.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.skip_line {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.skip_line = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return frames,
            }
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            // Lines are only decoded once complete, so multi-byte characters
            // split across chunks survive.
            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            warn!(
                bytes = self.buffer.len(),
                limit = MAX_LINE_BYTES,
                "Dropping oversized event-stream line"
            );
            self.buffer.clear();
            self.scanned = 0;
            self.skip_line = true;
            self.skip_frame = true;
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry are not used by this client
            _ => {}
        }
        None
    }

    /// Frames with a name but no data are still dispatched; heartbeats look like that.
    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if std::mem::take(&mut self.skip_frame) {
            return None;
        }
        if event.is_none() && data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data: data.join("\n"),
        })
    }
}

/// Turn a stream of byte chunks into a stream of frames.
///
/// The frame stream ends when the byte stream ends and yields an error item
/// for every failed chunk.
pub fn decode_frames<S, B, E>(chunks: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let state = (Box::pin(chunks), SseDecoder::new(), VecDeque::new());
    let frames = futures_util::stream::unfold(state, |(mut chunks, mut decoder, mut pending)| async move {
        loop {
            if let Some(frame) = pending.pop_front() {
                return Some((Ok(frame), (chunks, decoder, pending)));
            }
            match chunks.next().await {
                Some(Ok(chunk)) => pending.extend(decoder.push(chunk.as_ref())),
                Some(Err(err)) => return Some((Err(err.into()), (chunks, decoder, pending))),
                None => return None,
            }
        }
    });
    Box::pin(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_event_with_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: task_update\ndata: {\"task\": {}}\n\n");
        assert_eq!(frames, vec![SseFrame::new("task_update", "{\"task\": {}}")]);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: conn").is_empty());
        assert!(decoder.push(b"ected\r\ndata: ok\r\n").is_empty());
        let frames = decoder.push(b"\r\n");
        assert_eq!(frames, vec![SseFrame::new("connected", "ok")]);
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: canción\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        assert_eq!(frames, vec![SseFrame::new(DEFAULT_EVENT, "canción")]);
    }

    #[test]
    fn test_heartbeat_without_data_is_dispatched() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: heartbeat\n\n");
        assert_eq!(frames, vec![SseFrame::new("heartbeat", "")]);
    }

    #[test]
    fn test_comments_and_unknown_fields_are_skipped() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\n\nid: 7\nretry: 1000\n\nevent: x\ndata: a\ndata: b\n\n");
        assert_eq!(frames, vec![SseFrame::new("x", "a\nb")]);
    }

    #[test]
    fn test_partial_line_is_not_rescanned() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: x\ndata: abc").is_empty());
        assert_eq!(decoder.buffer, b"data: abc");
        assert_eq!(decoder.scanned, decoder.buffer.len());

        let frames = decoder.push(b"def\n\n");
        assert_eq!(frames, vec![SseFrame::new("x", "abcdef")]);
        assert!(decoder.buffer.is_empty());
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn test_many_frames_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let chunk = "event: heartbeat\n\n".repeat(5_000);
        let frames = decoder.push(chunk.as_bytes());
        assert_eq!(frames.len(), 5_000);
        assert!(decoder.buffer.is_empty());
    }

    #[test]
    fn test_oversized_line_is_dropped_with_its_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: task_update\ndata: ").is_empty());
        let filler = vec![b'x'; 64 * 1024];
        for _ in 0..(MAX_LINE_BYTES / filler.len() + 1) {
            assert!(decoder.push(&filler).is_empty());
            assert!(decoder.buffer.len() <= MAX_LINE_BYTES);
        }
        assert!(decoder.skip_line);

        // The rest of the long line and its frame go away; the stream recovers.
        let frames = decoder.push(b"xxxx\ndata: tail\n\nevent: heartbeat\n\n");
        assert_eq!(frames, vec![SseFrame::new("heartbeat", "")]);
        assert!(!decoder.skip_line);
        assert!(decoder.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_decode_frames_from_chunk_stream() {
        let chunks: Vec<Result<&'static [u8], ClientError>> = vec![
            Ok(&b"event: connected\ndata: {}\n\nevent: heart"[..]),
            Ok(&b"beat\n\n"[..]),
            Err(ClientError::Stream("reset".to_string())),
        ];
        let mut frames = decode_frames(futures_util::stream::iter(chunks));

        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            SseFrame::new("connected", "{}")
        );
        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            SseFrame::new("heartbeat", "")
        );
        assert!(matches!(
            frames.next().await,
            Some(Err(ClientError::Stream(_)))
        ));
        assert!(frames.next().await.is_none());
    }
}
