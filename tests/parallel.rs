//! Parallel fan-out wrapper

mod common;

use common::BUDGET;
use phaseflow::config::ParallelSettings;
use phaseflow::pipeline::nodes::{
    collect, filter, for_each, generate, map, reverse, try_map, Collected,
};
use phaseflow::pipeline::{parallel, OrderMode, ParallelOptions, PipelineError, VirtualChunk};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn squares(order: OrderMode) -> Vec<u64> {
    let out = Collected::new();
    let options = ParallelOptions::default()
        .workers(4)
        .batch_size(17)
        .order(order);
    let mut pipeline = (generate(1000, |i| i + 1)
        | parallel(|| VirtualChunk::new(map(|x: u64| x * x)), options)
        | collect(&out))
    .build()
    .unwrap();
    pipeline.run(BUDGET).unwrap();
    out.take()
}

#[test]
fn test_preserve_keeps_input_order() {
    let expected: Vec<u64> = (1..=1000u64).map(|x| x * x).collect();
    assert_eq!(squares(OrderMode::Preserve), expected);
}

#[test]
fn test_arbitrary_keeps_every_item() {
    let mut result = squares(OrderMode::Arbitrary);
    result.sort_unstable();
    let expected: Vec<u64> = (1..=1000u64).map(|x| x * x).collect();
    assert_eq!(result, expected);
}

#[test]
fn test_single_worker_single_item_batches() {
    let out = Collected::new();
    let options = ParallelOptions::default()
        .workers(1)
        .batch_size(1)
        .in_flight_per_worker(1);
    let mut pipeline = (generate(50, |i| i)
        | parallel(
            || VirtualChunk::new(filter(|x: &u64| x % 5 == 0)),
            options,
        )
        | collect(&out))
    .build()
    .unwrap();
    pipeline.run(BUDGET).unwrap();
    assert_eq!(out.take(), vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45]);
}

#[test]
fn test_worker_error_aborts_run() {
    let out = Collected::<u64>::new();
    let options = ParallelOptions::default().workers(3).batch_size(8);
    let mut pipeline = (generate(200, |i| i)
        | parallel(
            || {
                VirtualChunk::new(try_map(|x: u64| {
                    if x == 123 {
                        Err(PipelineError::message("bad item"))
                    } else {
                        Ok(x)
                    }
                }))
            },
            options,
        )
        .name("squares")
        | collect(&out))
    .build()
    .unwrap();

    let err = pipeline.run(BUDGET).unwrap_err();
    let PipelineError::Node { source, .. } = err else {
        panic!("unexpected {err:?}");
    };
    match *source {
        PipelineError::Worker { node, source, .. } => {
            assert_eq!(node, "squares");
            assert!(source.to_string().contains("bad item"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_worker_panic_is_reported() {
    let out = Collected::<u64>::new();
    let options = ParallelOptions::default().workers(2).batch_size(4);
    let mut pipeline = (generate(40, |i| i)
        | parallel(
            || {
                VirtualChunk::new(map(|x: u64| {
                    if x == 30 {
                        panic!("worker blew up");
                    }
                    x
                }))
            },
            options,
        )
        | collect(&out))
    .build()
    .unwrap();

    let err = pipeline.run(BUDGET).unwrap_err();
    let PipelineError::Node { source, .. } = err else {
        panic!("unexpected {err:?}");
    };
    assert!(matches!(*source, PipelineError::WorkerPanicked { .. }));
}

#[test]
fn test_worker_residuals_follow_batches() {
    // Each worker reverses what it saw and emits it from `end`.
    let out = Collected::new();
    let options = ParallelOptions::default().workers(1).batch_size(3);
    let mut pipeline = (generate(7, |i| i)
        | parallel(|| VirtualChunk::new(reverse()), options)
        | collect(&out))
    .build()
    .unwrap();
    pipeline.run(BUDGET).unwrap();
    assert_eq!(out.take(), vec![6, 5, 4, 3, 2, 1, 0]);
}

#[test]
fn test_parallel_pipeline_can_run_twice() {
    let out = Collected::new();
    let options = ParallelOptions::default().workers(2).batch_size(5);
    let mut pipeline = (generate(20, |i| i)
        | parallel(|| VirtualChunk::new(map(|x: u64| x + 1)), options)
        | collect(&out))
    .build()
    .unwrap();

    pipeline.run(BUDGET).unwrap();
    let first = out.take();
    pipeline.run(BUDGET).unwrap();
    assert_eq!(out.take(), first);
    assert_eq!(first, (1..=20).collect::<Vec<u64>>());
}

#[test]
fn test_push_blocks_at_in_flight_limit() {
    let workers = 2;
    let per_worker = 1;
    let limit = workers * per_worker;
    let produced = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    // Workers wait on the gate until `open` is dropped.
    let (open, gate) = crossbeam_channel::unbounded::<()>();

    let run = {
        let produced = Arc::clone(&produced);
        let received = Arc::clone(&received);
        let seen = Arc::clone(&received);
        let peak = Arc::clone(&peak);
        thread::spawn(move || {
            let options = ParallelOptions::default()
                .workers(workers)
                .batch_size(1)
                .in_flight_per_worker(per_worker)
                .order(OrderMode::Arbitrary);
            let source = generate(20, move |i| {
                let outstanding = produced
                    .load(Ordering::SeqCst)
                    .saturating_sub(seen.load(Ordering::SeqCst));
                peak.fetch_max(outstanding, Ordering::SeqCst);
                produced.fetch_add(1, Ordering::SeqCst);
                i
            });
            let chunk = move || {
                let gate = gate.clone();
                VirtualChunk::new(map(move |x: u64| {
                    let _ = gate.recv();
                    x
                }))
            };
            let sink = for_each(move |_x: u64| {
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            let mut pipeline = (source | parallel(chunk, options) | sink).build().unwrap();
            pipeline.run(BUDGET).unwrap();
        })
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    while produced.load(Ordering::SeqCst) <= limit && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(50));
    // `limit` batches sit behind the gate and the next push is stuck.
    assert_eq!(produced.load(Ordering::SeqCst), limit + 1);
    assert_eq!(received.load(Ordering::SeqCst), 0);

    drop(open);
    run.join().unwrap();
    assert_eq!(produced.load(Ordering::SeqCst), 20);
    assert_eq!(received.load(Ordering::SeqCst), 20);
    assert_eq!(peak.load(Ordering::SeqCst), limit);
}

#[test]
fn test_options_from_settings() {
    let settings = ParallelSettings {
        workers: 3,
        batch_size: 64,
        in_flight_per_worker: 2,
        order: OrderMode::Arbitrary,
    };
    let options = ParallelOptions::from_settings(&settings);
    assert_eq!(options.workers, 3);
    assert_eq!(options.batch_size, 64);
    assert_eq!(options.in_flight_per_worker, 2);
    assert_eq!(options.order, OrderMode::Arbitrary);
}
