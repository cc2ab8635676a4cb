// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON Lines stages built on generator transforms.
//!
//! Each stage is an ordinary generator over its input handed to
//! [`jsonl_stream::from_generator`]:
//!
//! - [`split_lines`]: text chunks to lines
//! - [`parse_lines`]: lines to [`JsonValue`]s
//! - [`stringify_lines`]: [`JsonValue`]s to separator-terminated text
//!
//! [`parse_stream`] chains the first two over any text source.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use futures::{Stream, StreamExt};
use jsonl_config::StageConfig;
use jsonl_error::{BoxError, ErrorCode, StreamError};
use jsonl_stream::{ChunkReader, GeneratorTransform, QueuingPolicy, Sequence, TransformOutput};
use std::collections::VecDeque;
use tracing::warn;

/// Any JSON value.
pub type JsonValue = serde_json::Value;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Data format errors raised by codec stages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A line is not valid JSON.
    #[error("line {line}: {source}")]
    MalformedLine {
        /// 1-based line number within the stage input.
        line: usize,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

impl CodecError {
    /// Stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MalformedLine { .. } => ErrorCode::CodecMalformedLine,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Line terminator written by [`stringify_lines`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Separator {
    /// `\n`
    #[default]
    Lf,
    /// `\r\n`
    CrLf,
}

impl Separator {
    /// The terminator text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

/// Options shared by the codec stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineConfig {
    /// Terminator appended by [`stringify_lines`].
    pub separator: Separator,
    /// Queuing for both sides of the stage.
    pub stage: StageConfig,
}

// ---------------------------------------------------------------------------
// split_lines
// ---------------------------------------------------------------------------

struct Splitter {
    src: ChunkReader<String>,
    buf: String,
    lines: VecDeque<String>,
    done: bool,
}

impl Splitter {
    fn take_complete_lines(&mut self) {
        let Some(end) = self.buf.rfind('\n') else {
            return;
        };
        let rest = self.buf.split_off(end + 1);
        let complete = std::mem::replace(&mut self.buf, rest);
        self.lines.extend(
            complete
                .split_terminator('\n')
                .map(|line| line.strip_suffix('\r').unwrap_or(line).to_owned()),
        );
    }

    async fn next_line(mut self) -> Option<(Result<String, StreamError>, Self)> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Some((Ok(line), self));
            }
            if self.done {
                return None;
            }
            match self.src.next().await {
                Some(Ok(chunk)) => {
                    self.buf.push_str(&chunk);
                    self.take_complete_lines();
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some((Err(err), self));
                }
                None => {
                    self.done = true;
                    if !self.buf.is_empty() {
                        let mut rest = std::mem::take(&mut self.buf);
                        if rest.ends_with('\r') {
                            rest.pop();
                        }
                        self.lines.push_back(rest);
                    }
                }
            }
        }
    }
}

/// Split arbitrary text chunks into lines.
///
/// `\n` and `\r\n` both terminate a line; an unterminated tail is emitted at
/// end of input.
pub fn split_lines(
    config: &StageConfig,
) -> Result<GeneratorTransform<String, String>, StreamError> {
    jsonl_stream::from_generator(
        |src: ChunkReader<String>| {
            let splitter = Splitter {
                src,
                buf: String::new(),
                lines: VecDeque::new(),
                done: false,
            };
            Sequence::try_stream(futures::stream::unfold(splitter, Splitter::next_line))
        },
        Some(QueuingPolicy::byte_length_from_config(&config.input)),
        Some(QueuingPolicy::byte_length_from_config(&config.output)),
    )
}

// ---------------------------------------------------------------------------
// parse_lines
// ---------------------------------------------------------------------------

fn parse_line(
    line_no: usize,
    chunk: Result<String, StreamError>,
) -> Option<Result<JsonValue, BoxError>> {
    let line = match chunk {
        Ok(line) => line,
        Err(err) => return Some(Err(err.into())),
    };
    if line.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(&line).map_err(|source| {
        let err = CodecError::MalformedLine {
            line: line_no,
            source,
        };
        warn!(target: "jsonl.codec", line = line_no, error = %err, "malformed line");
        err.into()
    }))
}

/// Decode each line as one JSON value. Blank lines are skipped.
pub fn parse_lines(
    config: &StageConfig,
) -> Result<GeneratorTransform<String, JsonValue>, StreamError> {
    jsonl_stream::from_generator(
        |src: ChunkReader<String>| {
            Sequence::try_stream(
                src.enumerate()
                    .filter_map(|(idx, chunk)| futures::future::ready(parse_line(idx + 1, chunk))),
            )
        },
        Some(QueuingPolicy::byte_length_from_config(&config.input)),
        Some(QueuingPolicy::from_config(&config.output)?),
    )
}

// ---------------------------------------------------------------------------
// stringify_lines
// ---------------------------------------------------------------------------

/// Encode each value as compact JSON followed by the configured separator.
pub fn stringify_lines(
    config: &LineConfig,
) -> Result<GeneratorTransform<JsonValue, String>, StreamError> {
    let separator = config.separator.as_str();
    jsonl_stream::from_generator(
        move |src: ChunkReader<JsonValue>| {
            Sequence::try_stream(src.map(move |chunk| -> Result<String, BoxError> {
                let mut line = serde_json::to_string(&chunk?)?;
                line.push_str(separator);
                Ok(line)
            }))
        },
        Some(QueuingPolicy::from_config(&config.stage.input)?),
        Some(QueuingPolicy::byte_length_from_config(&config.stage.output)),
    )
}

// ---------------------------------------------------------------------------
// parse_stream
// ---------------------------------------------------------------------------

/// Split and parse a text source into JSON values.
///
/// Both stages run on spawned tasks fed from `source`; must be called within
/// a tokio runtime.
pub fn parse_stream<S>(
    source: S,
    config: &StageConfig,
) -> Result<TransformOutput<JsonValue>, StreamError>
where
    S: Stream<Item = String> + Send + 'static,
{
    let lines = split_lines(config)?.pipe_from(source);
    Ok(lines.pipe_through(parse_lines(config)?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
