// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Generator-to-transform adapter.
pub mod adapter;
/// Bounded single-writer, single-reader chunk channel.
pub mod channel;
/// Queuing policies.
pub mod queuing;
/// Sync and async sequences produced by generators.
pub mod sequence;

pub use adapter::{
    GeneratorTransform, StageState, TransformBuilder, TransformOutput, from_generator,
};
pub use channel::{CancelHandle, ChunkReader, ChunkWriter, channel};
pub use jsonl_error::{BoxError, CancelReason, StreamError};
pub use queuing::QueuingPolicy;
pub use sequence::{AsyncSteps, IntoSequence, Sequence, SyncSteps};
