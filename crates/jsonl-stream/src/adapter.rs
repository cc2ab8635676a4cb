// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generator-to-transform adapter.
//!
//! [`from_generator`] turns a function over an input stream into a transform
//! stage: a [`ChunkWriter`] that upstream producers feed and a
//! [`TransformOutput`] that downstream consumers drain. Pulling from the
//! output steps the generator, and the generator pulls from the input at its
//! own pace.
//!
//! ```
//! use futures::StreamExt;
//! use jsonl_stream::{ChunkReader, Sequence, from_generator};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let stage = from_generator(
//!     |src: ChunkReader<u32>| Sequence::try_stream(src.map(|chunk| chunk.map(|v| v * 100))),
//!     None,
//!     None,
//! )
//! .unwrap();
//! let out: Vec<u32> = stage
//!     .pipe_from(futures::stream::iter([0, 1, 2]))
//!     .map(|v| v.unwrap())
//!     .collect()
//!     .await;
//! assert_eq!(out, vec![0, 100, 200]);
//! # });
//! ```

use crate::channel::{CancelHandle, ChunkReader, ChunkWriter, channel};
use crate::queuing::QueuingPolicy;
use crate::sequence::{IntoSequence, Sequence, probe};
use futures_core::Stream;
use futures_core::stream::FusedStream;
use jsonl_config::StageConfig;
use jsonl_error::{BoxError, CancelReason, StreamError};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// StageState
// ---------------------------------------------------------------------------

/// Lifecycle of a generator-driven stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    /// Waiting for the next pull.
    Idle,
    /// An asynchronous step is in flight.
    Stepping,
    /// The generator finished, or the stage was cancelled.
    Closed,
    /// A step failed.
    Errored,
    /// The consumer cancelled; an in-flight step is still finishing.
    Cancelling,
}

impl StageState {
    /// `Closed` and `Errored` accept no further pulls.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Stepping => "stepping",
            Self::Closed => "closed",
            Self::Errored => "errored",
            Self::Cancelling => "cancelling",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Build a transform stage from a generator function.
///
/// `transform` is called immediately with the reading end of the input
/// channel and must return something with an iteration capability; it should
/// not consume input itself. Async iteration is preferred when the returned
/// value supports both. Without either capability construction fails with
/// [`StreamError::IterationProtocolMissing`].
///
/// Both policies default to one chunk of size 1.
pub fn from_generator<I, O, F, S>(
    transform: F,
    writable_policy: Option<QueuingPolicy<I>>,
    readable_policy: Option<QueuingPolicy<O>>,
) -> Result<GeneratorTransform<I, O>, StreamError>
where
    I: Send + 'static,
    F: FnOnce(ChunkReader<I>) -> S,
    S: IntoSequence<O>,
{
    let (writable, reader) = channel(writable_policy.unwrap_or_default());
    let input = reader.cancel_handle();
    let sequence = probe(transform(reader)).inspect_err(|err| {
        warn!(target: "jsonl.stream", error = %err, "transform returned no sequence");
    })?;
    let policy = readable_policy.unwrap_or_default();
    debug!(
        target: "jsonl.stream",
        is_async = sequence.is_async(),
        readable_hwm = policy.high_water_mark(),
        "stage constructed"
    );
    Ok(GeneratorTransform {
        writable,
        readable: TransformOutput {
            sequence: Some(sequence),
            queue: VecDeque::new(),
            queued_size: 0,
            policy,
            input,
            state: StageState::Idle,
            pending_error: None,
        },
    })
}

/// Builder for [`from_generator`] with policies taken from configuration.
pub struct TransformBuilder<I, O> {
    writable: Option<QueuingPolicy<I>>,
    readable: Option<QueuingPolicy<O>>,
}

impl<I, O> Default for TransformBuilder<I, O> {
    fn default() -> Self {
        Self {
            writable: None,
            readable: None,
        }
    }
}

impl<I, O> fmt::Debug for TransformBuilder<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformBuilder")
            .field("writable", &self.writable)
            .field("readable", &self.readable)
            .finish()
    }
}

impl<I: Send + 'static, O> TransformBuilder<I, O> {
    /// Create a builder with default policies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counting policies for both sides from `config`.
    pub fn with_config(config: &StageConfig) -> Result<Self, StreamError> {
        Ok(Self {
            writable: Some(QueuingPolicy::from_config(&config.input)?),
            readable: Some(QueuingPolicy::from_config(&config.output)?),
        })
    }

    /// Set the input-side policy.
    pub fn writable_policy(mut self, policy: QueuingPolicy<I>) -> Self {
        self.writable = Some(policy);
        self
    }

    /// Set the output-side policy.
    pub fn readable_policy(mut self, policy: QueuingPolicy<O>) -> Self {
        self.readable = Some(policy);
        self
    }

    /// Build the stage.
    pub fn build<F, S>(self, transform: F) -> Result<GeneratorTransform<I, O>, StreamError>
    where
        F: FnOnce(ChunkReader<I>) -> S,
        S: IntoSequence<O>,
    {
        from_generator(transform, self.writable, self.readable)
    }
}

// ---------------------------------------------------------------------------
// GeneratorTransform
// ---------------------------------------------------------------------------

/// A transform stage: writable input plus readable output.
#[derive(Debug)]
pub struct GeneratorTransform<I, O> {
    /// Upstream producers write input chunks here.
    pub writable: ChunkWriter<I>,
    /// Downstream consumers drain output chunks here.
    pub readable: TransformOutput<O>,
}

impl<I, O> GeneratorTransform<I, O> {
    /// Split into the writable and readable endpoints.
    pub fn into_parts(self) -> (ChunkWriter<I>, TransformOutput<O>) {
        (self.writable, self.readable)
    }
}

impl<I: Send + 'static, O> GeneratorTransform<I, O> {
    /// Feed `source` into this stage on a spawned task and return the
    /// readable side.
    pub fn pipe_from<S>(self, source: S) -> TransformOutput<O>
    where
        S: Stream<Item = I> + Send + 'static,
    {
        let (writable, readable) = self.into_parts();
        // The task ends on its own once the source ends or the stage cancels.
        drop(writable.spawn_pipe_from(source));
        readable
    }
}

// ---------------------------------------------------------------------------
// TransformOutput
// ---------------------------------------------------------------------------

/// Readable side of a generator-driven stage.
///
/// Each poll steps the generator at most until the output queue reaches its
/// high-water mark; a consumer that stops polling stops the generator.
/// Values are delivered in yield order. A failed step is delivered once as
/// `Err` after any values already queued; afterwards the stream ends and the
/// generator is never stepped again. Dropping the output cancels the input
/// without a reason.
pub struct TransformOutput<O> {
    sequence: Option<Sequence<O>>,
    queue: VecDeque<(O, usize)>,
    queued_size: usize,
    policy: QueuingPolicy<O>,
    input: CancelHandle,
    state: StageState,
    pending_error: Option<StreamError>,
}

impl<O> Unpin for TransformOutput<O> {}

impl<O> fmt::Debug for TransformOutput<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformOutput")
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<O> TransformOutput<O> {
    /// Current lifecycle state.
    pub fn state(&self) -> StageState {
        self.state
    }

    /// High-water mark minus queued size.
    pub fn desired_size(&self) -> isize {
        self.policy.high_water_mark() as isize - self.queued_size as isize
    }

    /// Cancel the stage.
    ///
    /// The reason is forwarded to the input channel first, so the upstream
    /// writer stops. A step that is already in flight is not interrupted: it
    /// is driven to completion and its result discarded. Queued values and a
    /// pending error are dropped, even when the generator already finished.
    /// Has no effect once the consumer has seen the end of the output.
    pub async fn cancel(&mut self, reason: impl Into<CancelReason>) {
        if self.state == StageState::Cancelling || self.is_terminated() {
            return;
        }
        let reason = reason.into();
        let in_flight = self.state == StageState::Stepping;
        self.state = StageState::Cancelling;
        self.queue.clear();
        self.queued_size = 0;
        self.pending_error = None;
        let forwarded = self.input.cancel(reason.clone());
        debug!(target: "jsonl.stream", %reason, forwarded, in_flight, "cancelling stage");

        if in_flight {
            if let Some(sequence) = self.sequence.as_mut() {
                let _ = std::future::poll_fn(|cx| sequence.poll_step(cx)).await;
            }
        }
        self.sequence = None;
        self.state = StageState::Closed;
    }

    /// Feed this output into `next` on a spawned task and return the
    /// readable side of `next`.
    ///
    /// A failure here aborts `next`'s input. When `next` stops reading, this
    /// stage is cancelled right away: with the same reason when `next` was
    /// cancelled, with the error text when `next` failed.
    pub fn pipe_through<P>(self, next: GeneratorTransform<O, P>) -> TransformOutput<P>
    where
        O: Send + 'static,
    {
        let (writable, readable) = next.into_parts();
        drop(tokio::spawn(forward(self, writable)));
        readable
    }

    fn wants_pull(&self) -> bool {
        if self.sequence.is_none() {
            return false;
        }
        let hwm = self.policy.high_water_mark();
        self.queue.is_empty() || (self.queued_size < hwm && self.queue.len() < hwm)
    }

    /// Step the generator while the queue has room.
    fn fill(&mut self, cx: &mut Context<'_>) {
        while self.wants_pull() {
            let Some(sequence) = self.sequence.as_mut() else {
                break;
            };
            match sequence.poll_step(cx) {
                Poll::Pending => {
                    self.state = StageState::Stepping;
                    break;
                }
                Poll::Ready(Some(Ok(value))) => {
                    self.state = StageState::Idle;
                    let size = self.policy.size_of(&value);
                    self.queued_size += size;
                    self.queue.push_back((value, size));
                }
                Poll::Ready(None) => {
                    self.finish();
                    break;
                }
                Poll::Ready(Some(Err(err))) => {
                    self.fail(err);
                    break;
                }
            }
        }
    }

    fn finish(&mut self) {
        debug!(target: "jsonl.stream", queued = self.queue.len(), "generator exhausted");
        self.sequence = None;
        self.state = StageState::Closed;
    }

    fn fail(&mut self, err: BoxError) {
        let err = StreamError::step_failed(err);
        warn!(target: "jsonl.stream", error = %err, "generator step failed");
        // Error the input before the generator (and its reader) is dropped.
        self.input.error(err.clone());
        self.sequence = None;
        self.pending_error = Some(err);
        self.state = StageState::Errored;
    }
}

/// Pump `upstream` into `writable` until either side ends.
async fn forward<O>(
    mut upstream: TransformOutput<O>,
    mut writable: ChunkWriter<O>,
) -> Result<(), StreamError> {
    loop {
        let stop = match writable.next_or_stopped(&mut upstream).await {
            Ok(Some(Ok(chunk))) => match writable.write(chunk).await {
                Ok(()) => continue,
                Err(err) => err,
            },
            Ok(Some(Err(err))) => {
                writable.abort(err.to_string());
                return Err(err);
            }
            Ok(None) => return writable.close(),
            Err(err) => err,
        };
        let reason = match &stop {
            StreamError::Cancelled(reason) => reason.clone(),
            StreamError::Closed => CancelReason::none(),
            other => CancelReason::new(other.to_string()),
        };
        debug!(target: "jsonl.stream", error = %stop, "downstream stopped, cancelling upstream");
        upstream.cancel(reason).await;
        return Err(stop);
    }
}

impl<O> Stream for TransformOutput<O> {
    type Item = Result<O, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state == StageState::Cancelling {
            return Poll::Ready(None);
        }
        this.fill(cx);
        if let Some((value, size)) = this.queue.pop_front() {
            this.queued_size -= size;
            return Poll::Ready(Some(Ok(value)));
        }
        if let Some(err) = this.pending_error.take() {
            return Poll::Ready(Some(Err(err)));
        }
        if this.sequence.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let queued = self.queue.len() + usize::from(self.pending_error.is_some());
        if self.sequence.is_none() {
            (queued, Some(queued))
        } else {
            (queued, None)
        }
    }
}

impl<O> FusedStream for TransformOutput<O> {
    fn is_terminated(&self) -> bool {
        self.sequence.is_none() && self.queue.is_empty() && self.pending_error.is_none()
    }
}

impl<O> Drop for TransformOutput<O> {
    fn drop(&mut self) {
        if self.sequence.is_some() && self.input.cancel(CancelReason::none()) {
            debug!(target: "jsonl.stream", "stage dropped before completion");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
