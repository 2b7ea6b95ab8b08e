use crate::error::{LlmError, Result};
use crate::providers::ProviderId;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Lazily produced text chunks from one `stream_generate` call.
///
/// Chunks arrive in transport order. The stream ends when the vendor signals completion, or right
/// after the first `Err` item: a failure is yielded once at the point it occurs and nothing
/// follows it. Chunks yielded before the failure stay valid.
pub struct TextStream {
    inner: Option<Pin<Box<dyn Stream<Item = Result<String>> + Send>>>,
}

impl TextStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(stream)),
        }
    }

    /// True once the stream has completed or failed.
    pub fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }

    /// Drains the stream, concatenating every chunk.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(chunk) = self.next().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for TextStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.inner = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl fmt::Debug for TextStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextStream")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// One server-sent event. `event` defaults to `"message"` when the frame names none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

pub(crate) type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

/// Splits a response body into SSE frames. Bytes are buffered until a full frame is present, so
/// multi-byte characters split across network chunks decode correctly.
pub(crate) fn decode_sse<S>(provider: ProviderId, bytes_stream: S) -> SseStream
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let stream = futures_util::stream::unfold(
        (bytes_stream, Vec::<u8>::new(), false),
        move |(mut stream, mut buffer, mut finished)| async move {
            loop {
                if let Some(idx) = find_frame_end(&buffer) {
                    let raw: Vec<u8> = buffer.drain(..idx + 2).collect();
                    match parse_frame(&raw[..idx]) {
                        Some(ev) => return Some((Ok(ev), (stream, buffer, finished))),
                        None => continue,
                    }
                }

                if finished {
                    if buffer.is_empty() {
                        return None;
                    }
                    let raw = std::mem::take(&mut buffer);
                    match parse_frame(&raw) {
                        Some(ev) => return Some((Ok(ev), (stream, buffer, finished))),
                        None => return None,
                    }
                }

                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
                    }
                    Some(Err(e)) => {
                        finished = true;
                        buffer.clear();
                        return Some((
                            Err(LlmError::stream_transport(provider, e)),
                            (stream, buffer, finished),
                        ));
                    }
                    None => finished = true,
                }
            }
        },
    );
    Box::pin(stream)
}

/// What an adapter makes of one SSE event.
pub(crate) enum Step {
    Emit(String),
    Skip,
    Done,
    Fail(LlmError),
}

/// Vendor-specific interpretation of an SSE body.
pub(crate) trait EventDecoder: Send + 'static {
    fn on_event(&mut self, event: SseEvent) -> Step;

    /// Called once when the body ends; anything but `Fail` ends the stream cleanly.
    fn on_close(&mut self) -> Step;
}

/// Drives `decoder` over `sse`, yielding text chunks until completion or the first failure.
pub(crate) fn text_stream<D: EventDecoder>(
    provider: ProviderId,
    sse: SseStream,
    decoder: D,
) -> TextStream {
    let stream = futures_util::stream::unfold(
        (sse, decoder, false),
        move |(mut sse, mut decoder, done)| async move {
            if done {
                return None;
            }
            loop {
                let step = match sse.next().await {
                    Some(Ok(event)) => decoder.on_event(event),
                    Some(Err(e)) => Step::Fail(e),
                    None => match decoder.on_close() {
                        Step::Fail(e) => Step::Fail(e),
                        _ => Step::Done,
                    },
                };
                match step {
                    Step::Emit(text) => return Some((Ok(text), (sse, decoder, false))),
                    Step::Skip => continue,
                    Step::Done => return None,
                    Step::Fail(e) => {
                        tracing::warn!(%provider, error = %e, "stream ended with an error");
                        return Some((Err(e), (sse, decoder, true)));
                    }
                }
            }
        },
    );
    TextStream::new(stream)
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_frame(raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let mut event = String::new();
    let mut data_lines = Vec::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }

    if event.is_empty() && data_lines.is_empty() {
        return None;
    }
    if event.is_empty() {
        event = "message".to_string();
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}
