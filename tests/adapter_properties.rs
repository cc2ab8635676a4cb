// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property-based tests for generator-driven stages.

use futures::StreamExt;
use jsonlines::{ChunkReader, QueuingPolicy, Sequence, TransformBuilder, from_generator};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ── Helpers ─────────────────────────────────────────────────────────────

fn fast_config() -> ProptestConfig {
    ProptestConfig {
        cases: 48,
        ..ProptestConfig::default()
    }
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(fut)
}

fn arb_chunks() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(any::<i64>(), 0..64)
}

/// Run `items` through a stage mapping each input with `f`.
async fn run_map<F>(items: Vec<i64>, input_hwm: usize, output_hwm: usize, f: F) -> Vec<i64>
where
    F: Fn(i64) -> i64 + Send + Sync + 'static,
{
    let stage = TransformBuilder::new()
        .writable_policy(QueuingPolicy::count(input_hwm))
        .readable_policy(QueuingPolicy::count(output_hwm))
        .build(move |src: ChunkReader<i64>| {
            Sequence::try_stream(src.map(move |chunk| chunk.map(&f)))
        })
        .expect("stage");
    stage
        .pipe_from(futures::stream::iter(items))
        .map(|v| v.expect("value"))
        .collect()
        .await
}

// ── Properties ──────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(fast_config())]

    #[test]
    fn identity_preserves_every_chunk(items in arb_chunks()) {
        let out = block_on(run_map(items.clone(), 1, 1, |v| v));
        prop_assert_eq!(out, items);
    }

    #[test]
    fn map_preserves_order(
        items in arb_chunks(),
        input_hwm in 0usize..4,
        output_hwm in 0usize..4,
    ) {
        let out = block_on(run_map(items.clone(), input_hwm, output_hwm, |v| v.wrapping_mul(3)));
        let expected: Vec<i64> = items.iter().map(|v| v.wrapping_mul(3)).collect();
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn sync_generator_yields_in_order(items in arb_chunks()) {
        let expected = items.clone();
        let out: Vec<i64> = block_on(async move {
            let stage = from_generator(
                move |_src: ChunkReader<()>| Sequence::iter(items),
                None,
                None,
            )
            .expect("stage");
            let (_writer, output) = stage.into_parts();
            output.map(|v| v.expect("value")).collect().await
        });
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn generator_runs_at_most_a_queue_ahead(
        total in 1usize..40,
        pulls in 0usize..40,
        output_hwm in 0usize..6,
    ) {
        let pulls = pulls.min(total);
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&steps);
        block_on(async move {
            let stage = from_generator(
                move |_src: ChunkReader<()>| {
                    Sequence::iter((0..total).inspect(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }))
                },
                None,
                Some(QueuingPolicy::count(output_hwm)),
            )
            .expect("stage");
            let (_writer, mut output) = stage.into_parts();
            for expected in 0..pulls {
                assert_eq!(output.next().await.expect("value").expect("ok"), expected);
            }
        });
        let taken = steps.load(Ordering::SeqCst);
        prop_assert!(taken >= pulls);
        prop_assert!(
            taken <= pulls + output_hwm.max(1),
            "took {} steps for {} pulls",
            taken,
            pulls
        );
    }
}
