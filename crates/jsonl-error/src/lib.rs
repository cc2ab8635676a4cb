// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy with stable error codes for jsonlines stream stages.
//!
//! Every failure a stage can surface is a [`StreamError`]. Each variant maps
//! to a stable [`ErrorCode`] (a machine-readable string tag) which in turn
//! belongs to a broad [`ErrorCategory`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Boxed error type produced by generator steps.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shareable error, so a terminal failure can be reported on both sides of a stage.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Stage lifecycle errors (step failures, cancellation, closed channels).
    Stream,
    /// Iteration protocol errors detected while wiring a stage.
    Protocol,
    /// Queuing policy / configuration errors.
    Config,
    /// Data format errors raised by codec stages.
    Codec,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stream => "stream",
            Self::Protocol => "protocol",
            Self::Config => "config",
            Self::Codec => "codec",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Stream --
    /// A generator step failed.
    StreamStepFailed,
    /// The downstream consumer cancelled the stage.
    StreamCancelled,
    /// The upstream producer aborted the input channel.
    StreamAborted,
    /// A chunk was written after the channel was closed.
    StreamClosed,

    // -- Protocol --
    /// The transform result supports neither async nor sync iteration.
    ProtocolIterationMissing,

    // -- Config --
    /// A queuing policy cannot be built from the given configuration.
    ConfigInvalidPolicy,

    // -- Codec --
    /// A line could not be decoded as JSON.
    CodecMalformedLine,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StreamStepFailed
            | Self::StreamCancelled
            | Self::StreamAborted
            | Self::StreamClosed => ErrorCategory::Stream,

            Self::ProtocolIterationMissing => ErrorCategory::Protocol,

            Self::ConfigInvalidPolicy => ErrorCategory::Config,

            Self::CodecMalformedLine => ErrorCategory::Codec,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"STREAM_STEP_FAILED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StreamStepFailed => "STREAM_STEP_FAILED",
            Self::StreamCancelled => "STREAM_CANCELLED",
            Self::StreamAborted => "STREAM_ABORTED",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::ProtocolIterationMissing => "PROTOCOL_ITERATION_MISSING",
            Self::ConfigInvalidPolicy => "CONFIG_INVALID_POLICY",
            Self::CodecMalformedLine => "CODEC_MALFORMED_LINE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CancelReason
// ---------------------------------------------------------------------------

/// Reason attached to a cancellation or abort.
///
/// Reasons are passed through untouched from the party that cancels to the
/// party that observes the cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CancelReason(Option<String>);

impl CancelReason {
    /// A cancellation without a reason.
    pub fn none() -> Self {
        Self(None)
    }

    /// A cancellation carrying a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(Some(reason.into()))
    }

    /// The reason text, if one was given.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(r) => f.write_str(r),
            None => f.write_str("no reason given"),
        }
    }
}

impl From<&str> for CancelReason {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CancelReason {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Option<String>> for CancelReason {
    fn from(value: Option<String>) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// StreamError
// ---------------------------------------------------------------------------

/// Errors surfaced by stream stages and their channels.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// The generator driving a stage failed while producing a value.
    #[error("generator step failed: {0}")]
    StepFailed(#[source] SharedError),

    /// The downstream consumer cancelled the stage.
    #[error("stream cancelled: {0}")]
    Cancelled(CancelReason),

    /// The upstream producer aborted the input channel.
    #[error("stream aborted: {0}")]
    Aborted(CancelReason),

    /// The transform returned a value with no iteration capability.
    #[error("transform result supports neither async nor sync iteration")]
    IterationProtocolMissing,

    /// A chunk was written after the channel was closed.
    #[error("channel is closed")]
    Closed,

    /// A queuing policy cannot be applied.
    #[error("invalid queuing policy: {reason}")]
    InvalidPolicy {
        /// Why the policy was rejected.
        reason: String,
    },
}

impl StreamError {
    /// Wrap a generator failure.
    pub fn step_failed(err: impl Into<BoxError>) -> Self {
        Self::StepFailed(Arc::from(err.into()))
    }

    /// Stable error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::StepFailed(_) => ErrorCode::StreamStepFailed,
            Self::Cancelled(_) => ErrorCode::StreamCancelled,
            Self::Aborted(_) => ErrorCode::StreamAborted,
            Self::IterationProtocolMissing => ErrorCode::ProtocolIterationMissing,
            Self::Closed => ErrorCode::StreamClosed,
            Self::InvalidPolicy { .. } => ErrorCode::ConfigInvalidPolicy,
        }
    }

    /// Shorthand for `self.code().category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// Returns `true` for errors caused by a consumer cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
