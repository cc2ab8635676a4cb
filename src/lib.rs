// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// JSON Lines stages.
pub use jsonl_codec as codec;
/// Stage configuration.
pub use jsonl_config as config;
/// Error taxonomy.
pub use jsonl_error as error;
/// Generator-to-transform adapter and chunk channels.
pub use jsonl_stream as stream;

pub use jsonl_codec::{
    JsonValue, LineConfig, Separator, parse_lines, parse_stream, split_lines, stringify_lines,
};
pub use jsonl_config::StageConfig;
pub use jsonl_error::{CancelReason, StreamError};
pub use jsonl_stream::{
    ChunkReader, ChunkWriter, GeneratorTransform, QueuingPolicy, Sequence, StageState,
    TransformBuilder, TransformOutput, from_generator,
};
