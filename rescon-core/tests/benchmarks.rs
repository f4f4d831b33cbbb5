//! Performance benchmarks for Rescon Core.
//!
//! These tests measure timing for the hot paths and check that they stay
//! within generous bounds. Run with:
//!
//! ```sh
//! cargo test -p rescon-core --test benchmarks -- --ignored --nocapture
//! ```

use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Instant;

use rescon_core::io::{AsyncIoAdapter, IoOp};
use rescon_core::{
    current, ContainerConfig, ContainerRegistry, FileDispatcher, IoDispatchGate,
    ResourceContainer, ResourceProfile,
};

/// Adapter that runs work inline on the calling thread.
struct InlineAdapter;

impl AsyncIoAdapter for InlineAdapter {
    fn is_active(&self) -> bool {
        true
    }

    fn execute(&self, _op: IoOp, work: &mut (dyn FnMut() + Send)) -> std::io::Result<()> {
        work();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Container creation benchmark
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn bench_container_creation() {
    const ITERATIONS: usize = 10_000;
    let registry = ContainerRegistry::new();

    let start = Instant::now();
    let containers: Vec<_> = (0..ITERATIONS)
        .map(|_| {
            ResourceContainer::create_in(
                &registry,
                ContainerConfig::new().with_profile(ResourceProfile::Standard),
                rescon_core::container::accounting::UsageCounters::new(),
            )
        })
        .collect();
    let elapsed = start.elapsed();

    let per_op = elapsed / ITERATIONS as u32;
    println!(
        "Container creation: {ITERATIONS} iterations in {:?} ({:?}/op)",
        elapsed, per_op
    );
    assert_eq!(registry.len(), ITERATIONS + 1);
    assert!(per_op.as_micros() < 100, "creation too slow: {:?}/op", per_op);
    drop(containers);
}

// ---------------------------------------------------------------------------
// run() benchmarks
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn bench_run_attach_detach() {
    const ITERATIONS: usize = 100_000;
    let container = ResourceContainer::create(ContainerConfig::new());

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        container.run(|| std::hint::black_box(1)).unwrap();
    }
    let elapsed = start.elapsed();

    let per_op = elapsed / ITERATIONS as u32;
    println!("run() from root: {ITERATIONS} iterations in {:?} ({:?}/op)", elapsed, per_op);
    assert!(current().is_root());
    assert!(per_op.as_micros() < 10, "run() too slow: {:?}/op", per_op);
}

#[test]
#[ignore]
fn bench_run_reentrant() {
    const ITERATIONS: usize = 100_000;
    let container = ResourceContainer::create(ContainerConfig::new());

    let elapsed = container
        .run(|| {
            let start = Instant::now();
            for _ in 0..ITERATIONS {
                container.run(|| std::hint::black_box(1)).unwrap();
            }
            start.elapsed()
        })
        .unwrap();

    let per_op = elapsed / ITERATIONS as u32;
    println!("Re-entrant run(): {ITERATIONS} iterations in {:?} ({:?}/op)", elapsed, per_op);
    assert!(per_op.as_micros() < 5, "re-entrant run() too slow: {:?}/op", per_op);
}

#[test]
#[ignore]
fn bench_run_contended_threads() {
    const THREADS: usize = 8;
    const ITERATIONS: usize = 20_000;
    let container = ResourceContainer::create(ContainerConfig::new());

    let start = Instant::now();
    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..ITERATIONS {
                    container.run(|| std::hint::black_box(1)).unwrap();
                }
            });
        }
    });
    let elapsed = start.elapsed();

    let total = THREADS * ITERATIONS;
    println!("Contended run(): {total} operations in {:?}", elapsed);
    assert_eq!(container.attached_units(), 0);
    assert!(elapsed.as_secs() < 5, "contended run() too slow: {:?}", elapsed);
}

// ---------------------------------------------------------------------------
// Dispatch gate benchmarks
// ---------------------------------------------------------------------------

fn bench_pread(dispatcher: &FileDispatcher, label: &str) -> std::time::Duration {
    const ITERATIONS: usize = 20_000;
    let file = tempfile::tempfile().unwrap();
    dispatcher.write(file.as_fd(), &[7u8; 4096]).unwrap();

    let mut buf = [0u8; 512];
    let start = Instant::now();
    for i in 0..ITERATIONS {
        let offset = ((i * 512) % 4096) as u64;
        dispatcher.pread(file.as_fd(), &mut buf, offset).unwrap();
    }
    let elapsed = start.elapsed();
    println!("{label}: {ITERATIONS} preads in {:?}", elapsed);
    elapsed
}

#[test]
#[ignore]
fn bench_dispatch_overhead() {
    let direct = FileDispatcher::with_gate(IoDispatchGate::new());
    let gate = IoDispatchGate::new();
    gate.install(Arc::new(InlineAdapter));
    let gated = FileDispatcher::with_gate(gate.clone());

    let direct_time = bench_pread(&direct, "Direct");
    let gated_time = bench_pread(&gated, "Inline adapter");

    let snapshot = gate.metrics().snapshot();
    println!(
        "Offload average: {:.2}us over {} ops",
        snapshot.avg_offload_us, snapshot.offloaded_ops
    );
    assert!(
        gated_time < direct_time * 4,
        "gate overhead too high: {:?} vs {:?}",
        gated_time,
        direct_time
    );
}
