// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sequences produced by generator transforms.
//!
//! A transform may hand back an asynchronous stream or a plain iterator. The
//! capability is probed once when a stage is built ([`IntoSequence`]) and the
//! result is kept as a [`Sequence`], which every pull then steps the same way.

use futures::StreamExt;
use futures::stream::BoxStream;
use futures_core::Stream;
use jsonl_error::{BoxError, StreamError};
use std::task::{Context, Poll};

/// Boxed asynchronous steps.
pub type AsyncSteps<O> = BoxStream<'static, Result<O, BoxError>>;

/// Boxed synchronous steps.
pub type SyncSteps<O> = Box<dyn Iterator<Item = Result<O, BoxError>> + Send>;

/// A suspended generator, stepped one value at a time.
pub enum Sequence<O> {
    /// Steps complete asynchronously.
    Async(AsyncSteps<O>),
    /// Steps complete immediately.
    Sync(SyncSteps<O>),
}

impl<O> std::fmt::Debug for Sequence<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Async(_) => f.write_str("Sequence::Async(..)"),
            Self::Sync(_) => f.write_str("Sequence::Sync(..)"),
        }
    }
}

impl<O: Send + 'static> Sequence<O> {
    /// Infallible asynchronous sequence.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = O> + Send + 'static,
    {
        Self::Async(stream.map(Ok).boxed())
    }

    /// Fallible asynchronous sequence; an `Err` item fails the stage.
    pub fn try_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Async(stream.map(|step| step.map_err(Into::into)).boxed())
    }

    /// Infallible synchronous sequence.
    pub fn iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = O>,
        I::IntoIter: Send + 'static,
    {
        Self::Sync(Box::new(iter.into_iter().map(Ok)))
    }

    /// Fallible synchronous sequence; an `Err` item fails the stage.
    pub fn try_iter<I, E>(iter: I) -> Self
    where
        I: IntoIterator<Item = Result<O, E>>,
        I::IntoIter: Send + 'static,
        E: Into<BoxError>,
    {
        Self::Sync(Box::new(
            iter.into_iter().map(|step| step.map_err(Into::into)),
        ))
    }
}

impl<O> Sequence<O> {
    /// `true` for sequences whose steps may suspend.
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Advance one step.
    pub(crate) fn poll_step(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<O, BoxError>>> {
        match self {
            Self::Async(steps) => steps.poll_next_unpin(cx),
            Self::Sync(steps) => Poll::Ready(steps.next()),
        }
    }
}

// ---------------------------------------------------------------------------
// IntoSequence
// ---------------------------------------------------------------------------

/// Iteration capabilities of a transform's return value.
///
/// Both methods hand the value back unchanged when the capability is absent.
/// Asynchronous iteration is preferred whenever a value offers both.
pub trait IntoSequence<O>: Sized {
    /// Asynchronous iteration capability.
    fn into_async(self) -> Result<AsyncSteps<O>, Self> {
        Err(self)
    }

    /// Synchronous iteration capability.
    fn into_sync(self) -> Result<SyncSteps<O>, Self> {
        Err(self)
    }
}

impl<O> IntoSequence<O> for Sequence<O> {
    fn into_async(self) -> Result<AsyncSteps<O>, Self> {
        match self {
            Self::Async(steps) => Ok(steps),
            other => Err(other),
        }
    }

    fn into_sync(self) -> Result<SyncSteps<O>, Self> {
        match self {
            Self::Sync(steps) => Ok(steps),
            other => Err(other),
        }
    }
}

/// `None` has no iteration capability.
impl<O, T: IntoSequence<O>> IntoSequence<O> for Option<T> {
    fn into_async(self) -> Result<AsyncSteps<O>, Self> {
        match self {
            Some(inner) => inner.into_async().map_err(Some),
            None => Err(None),
        }
    }

    fn into_sync(self) -> Result<SyncSteps<O>, Self> {
        match self {
            Some(inner) => inner.into_sync().map_err(Some),
            None => Err(None),
        }
    }
}

/// Resolve the iteration capability of `value`, preferring async.
pub(crate) fn probe<O, T: IntoSequence<O>>(value: T) -> Result<Sequence<O>, StreamError> {
    match value.into_async() {
        Ok(steps) => Ok(Sequence::Async(steps)),
        Err(value) => value
            .into_sync()
            .map(Sequence::Sync)
            .map_err(|_| StreamError::IterationProtocolMissing),
    }
}
