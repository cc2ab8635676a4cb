// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded chunk channel with a single writer and a single reader.
//!
//! The writer waits while the buffered cost is at the high-water mark of its
//! [`QueuingPolicy`], unless the reader is already waiting for a chunk, so a
//! high-water mark of zero still makes progress one chunk at a time.

use crate::queuing::QueuingPolicy;
use futures::StreamExt;
use futures::future::{Either, select};
use futures::task::AtomicWaker;
use futures_core::Stream;
use jsonl_error::{CancelReason, StreamError};
use std::collections::VecDeque;
use std::pin::{Pin, pin};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tracing::debug;

/// Create a channel governed by `policy`.
pub fn channel<T>(policy: QueuingPolicy<T>) -> (ChunkWriter<T>, ChunkReader<T>) {
    let shared = Arc::new(Shared {
        policy,
        state: Mutex::new(State {
            queue: VecDeque::new(),
            queued_size: 0,
            status: Status::Open,
            terminal_delivered: false,
            reader_waiting: false,
        }),
        reader_waker: AtomicWaker::new(),
        writer_waker: AtomicWaker::new(),
    });
    (
        ChunkWriter {
            shared: Arc::clone(&shared),
        },
        ChunkReader { shared },
    )
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

enum Status {
    Open,
    /// Writer finished; buffered chunks still drain.
    Closed,
    Aborted(CancelReason),
    Cancelled(CancelReason),
    Errored(StreamError),
    /// The reader went away without cancelling.
    Detached,
}

struct State<T> {
    queue: VecDeque<(T, usize)>,
    queued_size: usize,
    status: Status,
    /// The reader has seen the abort/error item.
    terminal_delivered: bool,
    reader_waiting: bool,
}

impl<T> State<T> {
    fn discard(&mut self) {
        self.queue.clear();
        self.queued_size = 0;
    }
}

/// Why a write cannot proceed, or `None` while the channel is open.
fn writer_error(status: &Status) -> Option<StreamError> {
    match status {
        Status::Open => None,
        Status::Closed | Status::Detached => Some(StreamError::Closed),
        Status::Cancelled(reason) => Some(StreamError::Cancelled(reason.clone())),
        Status::Aborted(reason) => Some(StreamError::Aborted(reason.clone())),
        Status::Errored(err) => Some(err.clone()),
    }
}

/// Why the reading side stopped, or `None` while it may still read.
fn reader_stop(status: &Status) -> Option<StreamError> {
    match status {
        Status::Cancelled(reason) => Some(StreamError::Cancelled(reason.clone())),
        Status::Errored(err) => Some(err.clone()),
        Status::Detached => Some(StreamError::Closed),
        Status::Open | Status::Closed | Status::Aborted(_) => None,
    }
}

struct Shared<T> {
    policy: QueuingPolicy<T>,
    state: Mutex<State<T>>,
    reader_waker: AtomicWaker,
    writer_waker: AtomicWaker,
}

impl<T> Shared<T> {
    /// State stays consistent across every critical section, so a poisoned
    /// lock is still usable.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_both(&self) {
        self.reader_waker.wake();
        self.writer_waker.wake();
    }

    fn close(&self) -> Result<(), StreamError> {
        let mut st = self.lock();
        match writer_error(&st.status) {
            None => {
                st.status = Status::Closed;
                drop(st);
                debug!(target: "jsonl.channel", "writer closed");
                self.wake_both();
                Ok(())
            }
            Some(StreamError::Closed) => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn abort(&self, reason: CancelReason) {
        let mut st = self.lock();
        if matches!(st.status, Status::Open | Status::Closed) {
            debug!(target: "jsonl.channel", %reason, "writer aborted");
            st.status = Status::Aborted(reason);
            st.discard();
            drop(st);
            self.wake_both();
        }
    }

    fn cancel(&self, reason: CancelReason) -> bool {
        let mut st = self.lock();
        let live = match st.status {
            Status::Open | Status::Detached => true,
            Status::Closed => !st.queue.is_empty(),
            _ => false,
        };
        if !live {
            return false;
        }
        debug!(target: "jsonl.channel", %reason, "reader cancelled");
        st.status = Status::Cancelled(reason);
        st.discard();
        drop(st);
        self.wake_both();
        true
    }

    fn error(&self, err: StreamError) {
        let mut st = self.lock();
        if matches!(st.status, Status::Open | Status::Closed | Status::Detached) {
            debug!(target: "jsonl.channel", error = %err, "channel errored");
            st.status = Status::Errored(err);
            st.discard();
            drop(st);
            self.wake_both();
        }
    }

    fn detach(&self) {
        let mut st = self.lock();
        if matches!(st.status, Status::Open | Status::Closed) {
            debug!(target: "jsonl.channel", discarded = st.queue.len(), "reader detached");
            st.status = Status::Detached;
            st.discard();
            drop(st);
            self.writer_waker.wake();
        }
    }
}

/// Control surface of a channel that does not depend on its chunk type.
trait ChannelControl: Send + Sync {
    fn cancel(&self, reason: CancelReason) -> bool;
    fn error(&self, err: StreamError);
}

impl<T: Send> ChannelControl for Shared<T> {
    fn cancel(&self, reason: CancelReason) -> bool {
        Shared::cancel(self, reason)
    }

    fn error(&self, err: StreamError) {
        Shared::error(self, err)
    }
}

/// Type-erased handle that can cancel or error the reading side of a channel.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<dyn ChannelControl>,
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

impl CancelHandle {
    /// Cancel the channel. Returns `true` only for the call that took effect.
    pub fn cancel(&self, reason: impl Into<CancelReason>) -> bool {
        self.inner.cancel(reason.into())
    }

    /// Mark the channel as failed so the writer stops producing.
    pub fn error(&self, err: StreamError) {
        self.inner.error(err)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Producing end of a chunk channel. Dropping it closes the channel.
pub struct ChunkWriter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> std::fmt::Debug for ChunkWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("desired_size", &self.desired_size())
            .finish()
    }
}

impl<T> ChunkWriter<T> {
    /// High-water mark minus buffered size.
    ///
    /// `None` once the reading side is gone or the channel was aborted.
    pub fn desired_size(&self) -> Option<isize> {
        let st = self.shared.lock();
        match st.status {
            Status::Open => {
                Some(self.shared.policy.high_water_mark() as isize - st.queued_size as isize)
            }
            Status::Closed => Some(0),
            _ => None,
        }
    }

    /// Cancellation reason, if the reading side cancelled.
    ///
    /// A reader dropped without cancelling leaves this `None`; writes then
    /// fail with [`StreamError::Closed`].
    pub fn cancellation(&self) -> Option<CancelReason> {
        match &self.shared.lock().status {
            Status::Cancelled(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        let st = self.shared.lock();
        if let Some(err) = writer_error(&st.status) {
            return Poll::Ready(Err(err));
        }
        if st.queued_size < self.shared.policy.high_water_mark() || st.reader_waiting {
            Poll::Ready(Ok(()))
        } else {
            self.shared.writer_waker.register(cx.waker());
            Poll::Pending
        }
    }

    fn poll_stopped(&self, cx: &mut Context<'_>) -> Poll<StreamError> {
        let st = self.shared.lock();
        match reader_stop(&st.status) {
            Some(err) => Poll::Ready(err),
            None => {
                self.shared.writer_waker.register(cx.waker());
                Poll::Pending
            }
        }
    }

    /// Wait until the channel can take another chunk without exceeding its
    /// high-water mark.
    pub async fn ready(&self) -> Result<(), StreamError> {
        std::future::poll_fn(|cx| self.poll_ready(cx)).await
    }

    /// Resolves once the reading side cancels, errors, or goes away.
    ///
    /// Shares its wake slot with [`ChunkWriter::ready`]; await one at a time.
    pub async fn stopped(&self) -> StreamError {
        std::future::poll_fn(|cx| self.poll_stopped(cx)).await
    }

    /// Next item of `source`, unless the reading side stops first.
    pub(crate) async fn next_or_stopped<S>(
        &self,
        source: &mut S,
    ) -> Result<Option<S::Item>, StreamError>
    where
        S: Stream + Unpin,
    {
        let stopped = pin!(self.stopped());
        match select(source.next(), stopped).await {
            Either::Left((item, _)) => Ok(item),
            Either::Right((err, _)) => Err(err),
        }
    }

    /// Wait for capacity, then enqueue `chunk`.
    pub async fn write(&mut self, chunk: T) -> Result<(), StreamError> {
        self.ready().await?;
        let size = self.shared.policy.size_of(&chunk);
        let mut st = self.shared.lock();
        // The reading side may have cancelled since `ready` resolved.
        if let Some(err) = writer_error(&st.status) {
            return Err(err);
        }
        st.queue.push_back((chunk, size));
        st.queued_size += size;
        st.reader_waiting = false;
        drop(st);
        self.shared.reader_waker.wake();
        Ok(())
    }

    /// Signal end of input. Buffered chunks are still delivered.
    pub fn close(&mut self) -> Result<(), StreamError> {
        self.shared.close()
    }

    /// Discard buffered chunks and fail the reader with `reason`.
    pub fn abort(self, reason: impl Into<CancelReason>) {
        self.shared.abort(reason.into());
    }

    /// Forward every item of `source`, then close.
    pub async fn pipe_from<S>(self, source: S) -> Result<(), StreamError>
    where
        S: Stream<Item = T>,
    {
        self.pipe_results_from(source.map(Ok)).await
    }

    /// Forward every item of a fallible `source`, then close.
    ///
    /// An upstream error aborts this channel with the error text as reason.
    /// The pipe stops as soon as the reading side cancels, errors, or goes
    /// away, even while `source` has nothing to offer; `source` is dropped.
    pub async fn pipe_results_from<S>(mut self, source: S) -> Result<(), StreamError>
    where
        S: Stream<Item = Result<T, StreamError>>,
    {
        let mut source = pin!(source);
        loop {
            let item = match self.next_or_stopped(&mut source).await {
                Ok(item) => item,
                Err(err) => {
                    debug!(target: "jsonl.channel", error = %err, "pipe stopped by reader");
                    return Err(err);
                }
            };
            match item {
                Some(Ok(chunk)) => {
                    if let Err(err) = self.write(chunk).await {
                        debug!(target: "jsonl.channel", error = %err, "pipe stopped");
                        return Err(err);
                    }
                }
                Some(Err(err)) => {
                    self.abort(err.to_string());
                    return Err(err);
                }
                None => return self.close(),
            }
        }
    }
}

impl<T: Send + 'static> ChunkWriter<T> {
    /// Run [`ChunkWriter::pipe_from`] on a spawned tokio task.
    pub fn spawn_pipe_from<S>(self, source: S) -> tokio::task::JoinHandle<Result<(), StreamError>>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        tokio::spawn(self.pipe_from(source))
    }

    /// Run [`ChunkWriter::pipe_results_from`] on a spawned tokio task.
    pub fn spawn_pipe_results_from<S>(
        self,
        source: S,
    ) -> tokio::task::JoinHandle<Result<(), StreamError>>
    where
        S: Stream<Item = Result<T, StreamError>> + Send + 'static,
    {
        tokio::spawn(self.pipe_results_from(source))
    }
}

impl<T> Drop for ChunkWriter<T> {
    fn drop(&mut self) {
        let _ = self.shared.close();
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Consuming end of a chunk channel.
///
/// Yields chunks in write order, then ends when the writer closes. An abort
/// or error is yielded once as `Err` before the stream ends. Dropping the
/// reader without cancelling detaches it: buffered chunks are discarded and
/// later writes fail with [`StreamError::Closed`], but no cancellation is
/// reported to the writer.
pub struct ChunkReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> std::fmt::Debug for ChunkReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader").finish_non_exhaustive()
    }
}

impl<T> ChunkReader<T> {
    /// Cancel the channel. Returns `true` only for the call that took effect.
    pub fn cancel(&mut self, reason: impl Into<CancelReason>) -> bool {
        self.shared.cancel(reason.into())
    }
}

impl<T: Send + 'static> ChunkReader<T> {
    /// Handle that cancels this channel without owning the reader.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            inner: Arc::clone(&self.shared) as Arc<dyn ChannelControl>,
        }
    }
}

impl<T> Stream for ChunkReader<T> {
    type Item = Result<T, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut st = self.shared.lock();
        if let Some((chunk, size)) = st.queue.pop_front() {
            st.queued_size -= size;
            st.reader_waiting = false;
            drop(st);
            self.shared.writer_waker.wake();
            return Poll::Ready(Some(Ok(chunk)));
        }

        if matches!(st.status, Status::Open) {
            st.reader_waiting = true;
            self.shared.reader_waker.register(cx.waker());
            drop(st);
            self.shared.writer_waker.wake();
            return Poll::Pending;
        }

        let terminal = match writer_error(&st.status) {
            None | Some(StreamError::Closed) | Some(StreamError::Cancelled(_)) => {
                return Poll::Ready(None);
            }
            Some(err) => err,
        };
        if st.terminal_delivered {
            Poll::Ready(None)
        } else {
            st.terminal_delivered = true;
            Poll::Ready(Some(Err(terminal)))
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.shared.lock().queue.len(), None)
    }
}

impl<T> Drop for ChunkReader<T> {
    fn drop(&mut self) {
        self.shared.detach();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
