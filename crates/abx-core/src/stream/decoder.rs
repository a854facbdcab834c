//! Incremental decoder for streamed agent responses.
//!
//! Accepts raw network chunks with arbitrary boundaries (a chunk may end
//! mid-line or mid-UTF-8-sequence) and yields complete [`StreamEvent`]s.
//! Decoding is boundary-invariant: splitting the same bytes differently
//! never changes the decoded event sequence.
//!
//! Two framings are supported. `Sse` handles `event:`/`data:` blocks
//! separated by blank lines; `JsonLines` treats every line as one JSON
//! event object. In both framings the literal payload `[DONE]` and
//! end-of-stream are terminal.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tracing::warn;

use crate::stream::events::StreamEvent;

/// How the byte stream frames events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// `event:`/`data:` lines with blank-line separators.
    #[default]
    Sse,
    /// One JSON event object per line.
    JsonLines,
}

/// Push-based stream decoder with carry-over buffering.
///
/// Feed chunks with [`push`](Self::push) and call
/// [`finish`](Self::finish) exactly once at end-of-stream; `finish`
/// flushes any pending block and synthesizes a terminal `Done` when the
/// stream ended without one.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    framing: Framing,
    buf: Vec<u8>,
    pending_event: Option<String>,
    pending_data: Vec<String>,
    done_seen: bool,
}

impl EventStreamDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            ..Self::default()
        }
    }

    /// Decodes one chunk, returning every event completed by it.
    ///
    /// Incomplete trailing lines are carried over to the next push, so a
    /// multi-byte UTF-8 sequence split across chunks decodes intact.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            self.decode_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Flushes the decoder at end-of-stream.
    ///
    /// A stream that ended without an explicit terminal event still yields
    /// exactly one `Done`, so consumers always observe a terminal event.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = self.flush();
        if !self.done_seen {
            self.done_seen = true;
            events.push(StreamEvent::Done);
        }
        events
    }

    /// Flushes carried-over input and any pending block, without
    /// synthesizing a terminal event.
    ///
    /// Used on abnormal stream ends (transport errors) where a terminal
    /// event is supplied by the caller instead.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&line);
            self.decode_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        self.flush_pending(&mut events);
        events
    }

    /// Whether a terminal `Done` or `Error` has been decoded.
    pub fn is_done(&self) -> bool {
        self.done_seen
    }

    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if self.done_seen {
            return;
        }

        match self.framing {
            Framing::JsonLines => {
                if line.is_empty() {
                    return;
                }
                self.decode_payload(line, None, events);
            }
            Framing::Sse => {
                if line.is_empty() {
                    self.flush_pending(events);
                } else if let Some(name) = line.strip_prefix("event:") {
                    // A new event line terminates any block still pending,
                    // even without the separating blank line.
                    self.flush_pending(events);
                    self.pending_event = Some(name.trim().to_string());
                } else if let Some(data) = line.strip_prefix("data:") {
                    self.pending_data
                        .push(data.strip_prefix(' ').unwrap_or(data).to_string());
                } else {
                    // Comments and unknown SSE fields (`id:`, `retry:`).
                }
            }
        }
    }

    fn flush_pending(&mut self, events: &mut Vec<StreamEvent>) {
        let name = self.pending_event.take();
        if self.pending_data.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.pending_data).join("\n");
        self.decode_payload(&data, name.as_deref(), events);
    }

    fn decode_payload(&mut self, data: &str, event_name: Option<&str>, events: &mut Vec<StreamEvent>) {
        if data == "[DONE]" {
            self.done_seen = true;
            events.push(StreamEvent::Done);
            return;
        }

        let mut value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "dropping malformed event payload");
                return;
            }
        };

        // The payload's own type tag wins; the SSE event name only fills in
        // when the payload has none.
        if value.get("type").is_none() {
            if let (Some(name), Some(object)) = (event_name, value.as_object_mut()) {
                object.insert(
                    "type".to_string(),
                    serde_json::Value::String(name.to_uppercase()),
                );
            }
        }

        match serde_json::from_value::<StreamEvent>(value) {
            Ok(event) => {
                if event.is_terminal() {
                    self.done_seen = true;
                }
                events.push(event);
            }
            Err(err) => warn!(%err, "dropping unrecognized event"),
        }
    }
}

/// Adapter turning a fallible byte stream into a stream of events.
///
/// Transport errors are surfaced as an `Error` event followed by the
/// decoder's flush, so the event stream always ends with a terminal event
/// and never panics the consumer.
pub struct EventStream<S> {
    inner: Option<S>,
    decoder: EventStreamDecoder,
    queue: VecDeque<StreamEvent>,
}

impl<S> EventStream<S> {
    pub fn new(inner: S, framing: Framing) -> Self {
        Self {
            inner: Some(inner),
            decoder: EventStreamDecoder::new(framing),
            queue: VecDeque::new(),
        }
    }
}

impl<S, B, E> Stream for EventStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Poll::Ready(Some(event));
            }

            let Some(inner) = self.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    let events = self.decoder.push(chunk.as_ref());
                    self.queue.extend(events);
                }
                Poll::Ready(Some(Err(err))) => {
                    let message = err.to_string();
                    self.inner = None;
                    let events = self.decoder.flush();
                    self.queue.extend(events);
                    if !self.decoder.is_done() {
                        self.decoder.done_seen = true;
                        self.queue.push_back(StreamEvent::Error { message });
                    }
                }
                Poll::Ready(None) => {
                    self.inner = None;
                    let events = self.decoder.finish();
                    self.queue.extend(events);
                }
            }
        }
    }
}
