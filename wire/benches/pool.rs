use bench_matrix::{
  criterion_runner::sync_suite::SyncBenchmarkSuite, AbstractCombination, MatrixCellValue,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fibre_wire::future::FuturePool;
use fibre_wire::observe::NoopObserver;
use fibre_wire::pool::Pool;

// --- Config, State ---
#[derive(Debug, Clone)]
struct PoolBenchConfig {
  op_type: String,
  capacity: usize,
  num_ops: usize,
  concurrency: usize,
}

struct PoolState {
  buffers: Arc<Pool<Vec<u8>>>,
  futures: FuturePool<u64>,
}

type BenchContext = ();

fn extract_config(combo: &AbstractCombination) -> Result<PoolBenchConfig, String> {
  Ok(PoolBenchConfig {
    op_type: combo.get_string(0)?.to_string(),
    capacity: combo.get_u64(1)? as usize,
    num_ops: combo.get_u64(2)? as usize,
    concurrency: combo.get_u64(3)? as usize,
  })
}

fn setup_fn(cfg: &PoolBenchConfig) -> Result<(BenchContext, PoolState), String> {
  let buffers = Pool::builder(|| Vec::with_capacity(4096))
    .capacity(cfg.capacity)
    .pre_initialize(true)
    .observer(Arc::new(NoopObserver))
    .build()
    .map_err(|e| e.to_string())?;
  let futures = FuturePool::builder()
    .capacity(cfg.capacity)
    .pre_initialize(true)
    .observer(Arc::new(NoopObserver))
    .build()
    .map_err(|e| e.to_string())?;
  Ok((
    (),
    PoolState {
      buffers: Arc::new(buffers),
      futures,
    },
  ))
}

fn run_ops(state: &PoolState, op_type: &str, num_ops: usize) {
  match op_type {
    "BorrowRelease" => {
      for i in 0..num_ops {
        let mut buf = state.buffers.borrow();
        buf.push(i as u8);
        state.buffers.release(black_box(buf));
      }
    }
    "RentComplete" => {
      for i in 0..num_ops {
        let (completer, mut reply) = state.futures.rent();
        completer.complete(i as u64).unwrap();
        black_box(reply.try_result());
      }
    }
    _ => unreachable!("unknown op_type {}", op_type),
  }
}

fn benchmark_logic(
  ctx: BenchContext,
  state: PoolState,
  cfg: &PoolBenchConfig,
) -> (BenchContext, PoolState, Duration) {
  let ops_per_thread = cfg.num_ops / cfg.concurrency;
  let start_time = Instant::now();

  if cfg.concurrency == 1 {
    run_ops(&state, &cfg.op_type, ops_per_thread);
  } else {
    thread::scope(|s| {
      for _ in 0..cfg.concurrency {
        s.spawn(|| run_ops(&state, &cfg.op_type, ops_per_thread));
      }
    });
  }

  (ctx, state, start_time.elapsed())
}

fn pool_benches(c: &mut Criterion) {
  let parameter_axes = vec![
    vec![
      MatrixCellValue::String("BorrowRelease".to_string()),
      MatrixCellValue::String("RentComplete".to_string()),
    ], // Operation
    vec![MatrixCellValue::Unsigned(16), MatrixCellValue::Unsigned(256)], // Pool capacity
    vec![MatrixCellValue::Unsigned(100_000)], // NumOps
    vec![
      MatrixCellValue::Unsigned(1), // Concurrency
      MatrixCellValue::Unsigned(4),
      MatrixCellValue::Unsigned(8),
    ],
  ];
  let parameter_names = vec![
    "Op".to_string(),
    "Cap".to_string(),
    "Ops".to_string(),
    "Threads".to_string(),
  ];

  SyncBenchmarkSuite::new(
    c,
    "Pool".to_string(),
    Some(parameter_names),
    parameter_axes,
    Box::new(extract_config),
    setup_fn,
    benchmark_logic,
    |_, _, _| {}, // Teardown
  )
  .throughput(|cfg: &PoolBenchConfig| Throughput::Elements(cfg.num_ops as u64))
  .run();
}

criterion_group!(benches, pool_benches);
criterion_main!(benches);
