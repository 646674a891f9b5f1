//! Token stream decoder
//!
//! Turns the upstream NDJSON byte stream (`{"response": "...", "done": bool}`
//! per line) into ordered [`Fragment`]s. Chunks may split a line anywhere,
//! including inside a multi-byte UTF-8 character, so bytes are buffered until
//! a newline arrives and only complete lines are parsed.
//!
//! Every line must carry both `response` and `done`. Ollama reports a failure
//! mid-generation as `{"error": "..."}`; that line is a [`DecodeError`] like
//! any other malformed line.

use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use thiserror::Error;
use tracing::{debug, warn};

/// One decoded increment of generated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub is_final: bool,
}

/// Upstream line that could not be parsed; fatal to the run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed upstream line {line_number}: {message}")]
pub struct DecodeError {
    pub line_number: usize,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    response: Option<String>,
    done: Option<bool>,
    error: Option<String>,
}

impl GenerateLine {
    fn into_fragment(self) -> Result<Fragment, String> {
        if let Some(error) = self.error {
            return Err(format!("upstream reported error: {}", error));
        }
        match (self.response, self.done) {
            (Some(text), Some(is_final)) => Ok(Fragment { text, is_final }),
            (None, _) => Err("missing field `response`".to_string()),
            (_, None) => Err("missing field `done`".to_string()),
        }
    }
}

/// Incremental line decoder
///
/// Once a final fragment or an error has been produced the decoder is
/// finished and ignores any further input.
#[derive(Debug, Default)]
pub struct TokenDecoder {
    pending: Vec<u8>,
    lines_decoded: usize,
    finished: bool,
    /// Error hit after earlier lines of the same chunk decoded fine
    deferred_error: Option<DecodeError>,
}

impl TokenDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished && self.deferred_error.is_none()
    }

    /// True when the next `push` or `finish` will return an error
    pub fn has_pending_error(&self) -> bool {
        self.deferred_error.is_some()
    }

    /// Feed one chunk, returning the fragments of every line it completed.
    ///
    /// If a malformed line follows good ones in the same chunk, the good
    /// fragments are returned and the error is reported by the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Fragment>, DecodeError> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        if self.finished {
            return Ok(Vec::new());
        }
        self.pending.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            match self.decode_line(&line[..newline]) {
                Ok(Some(fragment)) => {
                    let is_final = fragment.is_final;
                    fragments.push(fragment);
                    if is_final {
                        self.finish_early();
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) if fragments.is_empty() => return Err(e),
                Err(e) => {
                    self.deferred_error = Some(e);
                    break;
                }
            }
        }
        Ok(fragments)
    }

    /// Signal end of input; a non-empty unterminated residual is decoded as the last line
    pub fn finish(&mut self) -> Result<Option<Fragment>, DecodeError> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        if self.finished {
            return Ok(None);
        }
        let residual = std::mem::take(&mut self.pending);
        let fragment = self.decode_line(&residual)?;
        self.finished = true;
        Ok(fragment)
    }

    fn finish_early(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                ignored_bytes = self.pending.len(),
                "Ignoring upstream bytes after final fragment"
            );
        }
        self.pending.clear();
        self.finished = true;
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<Option<Fragment>, DecodeError> {
        let line = trim_ascii_whitespace(line);
        if line.is_empty() {
            return Ok(None);
        }
        self.lines_decoded += 1;

        let decoded = serde_json::from_slice::<GenerateLine>(line)
            .map_err(|e| e.to_string())
            .and_then(GenerateLine::into_fragment);

        match decoded {
            Ok(fragment) => Ok(Some(fragment)),
            Err(message) => {
                self.pending.clear();
                self.finished = true;
                Err(DecodeError {
                    line_number: self.lines_decoded,
                    message,
                })
            }
        }
    }
}

fn trim_ascii_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Decode an upstream byte stream into a lazy fragment stream.
///
/// Ends after the final fragment, after the first decode error, or when the
/// upstream ends. A transport error from upstream is treated as the end of
/// the generation, not as a failure.
pub fn decode_stream<S, B, E>(
    upstream: S,
) -> impl Stream<Item = Result<Fragment, DecodeError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = TokenDecoder::new();
        let mut upstream = Box::pin(upstream);

        while let Some(chunk) = upstream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        error = %e,
                        "Upstream disconnected mid-stream, treating as end of generation"
                    );
                    break;
                }
            };

            match decoder.push(bytes.as_ref()) {
                Ok(fragments) => {
                    for fragment in fragments {
                        yield Ok(fragment);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            if decoder.has_pending_error() {
                if let Err(e) = decoder.finish() {
                    yield Err(e);
                }
                return;
            }

            if decoder.is_finished() {
                return;
            }
        }

        match decoder.finish() {
            Ok(Some(fragment)) => yield Ok(fragment),
            Ok(None) => {}
            Err(e) => yield Err(e),
        }
    }
}
