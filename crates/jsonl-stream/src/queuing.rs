// SPDX-License-Identifier: MIT OR Apache-2.0
//! Queuing policies: how much unconsumed data a channel may hold before it
//! signals backpressure.

use jsonl_config::{QueuingConfig, SizeStrategy};
use jsonl_error::StreamError;
use std::sync::Arc;

type SizeFn<T> = Arc<dyn Fn(&T) -> usize + Send + Sync>;

enum Sizer<T> {
    Count,
    Custom(SizeFn<T>),
}

impl<T> Clone for Sizer<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Count => Self::Count,
            Self::Custom(f) => Self::Custom(Arc::clone(f)),
        }
    }
}

/// High-water mark plus a per-chunk cost function.
///
/// A channel signals backpressure once the summed cost of its buffered chunks
/// reaches the high-water mark.
pub struct QueuingPolicy<T> {
    high_water_mark: usize,
    sizer: Sizer<T>,
}

impl<T> Clone for QueuingPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            high_water_mark: self.high_water_mark,
            sizer: self.sizer.clone(),
        }
    }
}

impl<T> std::fmt::Debug for QueuingPolicy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size = match self.sizer {
            Sizer::Count => "count",
            Sizer::Custom(_) => "custom",
        };
        f.debug_struct("QueuingPolicy")
            .field("high_water_mark", &self.high_water_mark)
            .field("size", &size)
            .finish()
    }
}

/// One chunk of size 1.
impl<T> Default for QueuingPolicy<T> {
    fn default() -> Self {
        Self::count(jsonl_config::DEFAULT_HIGH_WATER_MARK)
    }
}

impl<T> QueuingPolicy<T> {
    /// Every chunk costs 1; backpressure after `high_water_mark` chunks.
    pub fn count(high_water_mark: usize) -> Self {
        Self {
            high_water_mark,
            sizer: Sizer::Count,
        }
    }

    /// Policy with a custom cost function.
    pub fn new<F>(high_water_mark: usize, size: F) -> Self
    where
        F: Fn(&T) -> usize + Send + Sync + 'static,
    {
        Self {
            high_water_mark,
            sizer: Sizer::Custom(Arc::new(size)),
        }
    }

    /// Build a counting policy from configuration.
    ///
    /// Fails for [`SizeStrategy::ByteLength`], which needs byte-sized chunks;
    /// see [`QueuingPolicy::byte_length_from_config`].
    pub fn from_config(config: &QueuingConfig) -> Result<Self, StreamError> {
        match config.strategy() {
            SizeStrategy::Count => Ok(Self::count(config.high_water_mark())),
            SizeStrategy::ByteLength => Err(StreamError::InvalidPolicy {
                reason: "byte_length strategy requires chunks that expose their bytes".into(),
            }),
        }
    }

    /// The configured high-water mark.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Cost of `chunk` under this policy.
    pub fn size_of(&self, chunk: &T) -> usize {
        match &self.sizer {
            Sizer::Count => 1,
            Sizer::Custom(f) => f(chunk),
        }
    }
}

impl<T: AsRef<[u8]> + 'static> QueuingPolicy<T> {
    /// A chunk costs its length in bytes.
    pub fn byte_length(high_water_mark: usize) -> Self {
        Self::new(high_water_mark, |chunk: &T| chunk.as_ref().len())
    }

    /// Build a policy from configuration, honouring either strategy.
    pub fn byte_length_from_config(config: &QueuingConfig) -> Self {
        match config.strategy() {
            SizeStrategy::Count => Self::count(config.high_water_mark()),
            SizeStrategy::ByteLength => Self::byte_length(config.high_water_mark()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one_chunk_of_size_one() {
        let policy = QueuingPolicy::<String>::default();
        assert_eq!(policy.high_water_mark(), 1);
        assert_eq!(policy.size_of(&"a long chunk".to_string()), 1);
    }

    #[test]
    fn byte_length_measures_bytes() {
        let policy = QueuingPolicy::<String>::byte_length(16);
        assert_eq!(policy.size_of(&"héllo".to_string()), 6);
    }

    #[test]
    fn custom_size_function() {
        let policy = QueuingPolicy::<Vec<u32>>::new(10, |v| v.len() * 2);
        assert_eq!(policy.size_of(&vec![1, 2, 3]), 6);
        let cloned = policy.clone();
        assert_eq!(cloned.size_of(&vec![1]), 2);
    }

    #[test]
    fn from_config_rejects_byte_length_for_opaque_chunks() {
        let cfg = QueuingConfig {
            high_water_mark: Some(64),
            strategy: Some(SizeStrategy::ByteLength),
        };
        let err = QueuingPolicy::<u64>::from_config(&cfg).unwrap_err();
        assert!(matches!(err, StreamError::InvalidPolicy { .. }));

        let policy = QueuingPolicy::<Vec<u8>>::byte_length_from_config(&cfg);
        assert_eq!(policy.high_water_mark(), 64);
        assert_eq!(policy.size_of(&vec![0; 5]), 5);
    }

    #[test]
    fn from_config_defaults() {
        let policy = QueuingPolicy::<u64>::from_config(&QueuingConfig::default()).unwrap();
        assert_eq!(policy.high_water_mark(), 1);
        assert_eq!(format!("{policy:?}"), "QueuingPolicy { high_water_mark: 1, size: \"count\" }");
    }
}
