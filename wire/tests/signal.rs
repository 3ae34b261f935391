mod common;
use common::*;

use fibre_wire::error::WaitError;
use fibre_wire::observe::CountingObserver;
use fibre_wire::signal::{wait_or_cancel, AutoResetSignal, QueueSignal, SlimSignal, SpinSignal};

use futures_util::task::noop_waker_ref;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

fn noop_cx() -> Context<'static> {
  Context::from_waker(noop_waker_ref())
}

fn poll_once<F: Future + ?Sized>(fut: &mut Pin<Box<F>>) -> Poll<F::Output> {
  fut.as_mut().poll(&mut noop_cx())
}

// --- Shared behavior, run against every strategy ---

fn banked_signal_is_capped_at_one<S: AutoResetSignal>(signal: S) {
  for _ in 0..5 {
    signal.set();
  }
  let released = (0..5).filter(|_| signal.try_wait()).count();
  assert_eq!(released, 1);
}

fn each_set_releases_exactly_one_waiter<S: AutoResetSignal>(signal: S) {
  let mut waits: Vec<_> = (0..ITEMS_LOW).map(|_| Box::pin(signal.wait_async())).collect();
  for wait in waits.iter_mut() {
    assert!(poll_once(wait).is_pending());
  }

  while !waits.is_empty() {
    signal.set();
    let before = waits.len();
    waits.retain_mut(|wait| poll_once(wait).is_pending());
    assert_eq!(before - waits.len(), 1, "one set must release exactly one waiter");
    assert!(!signal.try_wait(), "a handed-off signal must not stay banked");
  }
}

fn dropping_a_pending_wait_leaves_others_queued<S: AutoResetSignal>(signal: S) {
  let mut first = Box::pin(signal.wait_async());
  let mut second = Box::pin(signal.wait_async());
  let mut third = Box::pin(signal.wait_async());
  assert!(poll_once(&mut first).is_pending());
  assert!(poll_once(&mut second).is_pending());
  assert!(poll_once(&mut third).is_pending());

  drop(second);
  signal.set();
  let mut pending = vec![first, third];
  pending.retain_mut(|wait| poll_once(wait).is_pending());
  assert_eq!(pending.len(), 1);

  signal.set();
  assert!(poll_once(&mut pending[0]).is_ready());
}

fn dropping_a_woken_wait_forwards_the_signal<S: AutoResetSignal>(signal: S) {
  let mut first = Box::pin(signal.wait_async());
  let mut second = Box::pin(signal.wait_async());
  assert!(poll_once(&mut first).is_pending());
  assert!(poll_once(&mut second).is_pending());

  signal.set();
  drop(first);
  assert!(poll_once(&mut second).is_ready());
}

fn back_to_back_sets_release_both_waiters<S: AutoResetSignal>(signal: S) {
  let mut first = Box::pin(signal.wait_async());
  let mut second = Box::pin(signal.wait_async());
  assert!(poll_once(&mut first).is_pending());
  assert!(poll_once(&mut second).is_pending());

  signal.set();
  signal.set();
  assert!(poll_once(&mut first).is_ready());
  assert!(poll_once(&mut second).is_ready());
  assert!(!signal.try_wait());
}

fn sets_beyond_waiters_bank_one<S: AutoResetSignal>(signal: S) {
  let mut first = Box::pin(signal.wait_async());
  let mut second = Box::pin(signal.wait_async());
  assert!(poll_once(&mut first).is_pending());
  assert!(poll_once(&mut second).is_pending());

  for _ in 0..4 {
    signal.set();
  }
  assert!(poll_once(&mut first).is_ready());
  assert!(poll_once(&mut second).is_ready());
  assert!(signal.try_wait());
  assert!(!signal.try_wait());
}

fn cancelled_wait_reports_cancellation<S: AutoResetSignal>(signal: S) {
  let outcome = futures_util::FutureExt::now_or_never(wait_or_cancel(&signal, async {}));
  assert_eq!(outcome, Some(Err(WaitError::Cancelled)));

  // The cancelled wait left nothing behind; the next set is banked normally.
  signal.set();
  assert!(signal.try_wait());
  assert!(!signal.try_wait());
}

async fn tasks_all_release_under_repeated_sets<S: AutoResetSignal + 'static>(signal: Arc<S>) {
  let released = Arc::new(AtomicUsize::new(0));
  let mut handles = Vec::new();
  for _ in 0..ITEMS_MEDIUM {
    let signal = signal.clone();
    let released = released.clone();
    handles.push(tokio::spawn(async move {
      signal.wait_async().await;
      released.fetch_add(1, Ordering::AcqRel);
    }));
  }

  let deadline = Instant::now() + STRESS_TIMEOUT;
  let mut sets = 0usize;
  while released.load(Ordering::Acquire) < ITEMS_MEDIUM {
    assert!(Instant::now() < deadline, "waiters were not all released");
    signal.set();
    sets += 1;
    tokio::task::yield_now().await;
    assert!(released.load(Ordering::Acquire) <= sets);
  }
  for handle in handles {
    handle.await.unwrap();
  }
  assert_eq!(released.load(Ordering::Acquire), ITEMS_MEDIUM);
}

macro_rules! signal_suite {
  ($name:ident, $make:expr) => {
    mod $name {
      use super::*;

      #[test]
      fn banked_cap() {
        banked_signal_is_capped_at_one($make);
      }

      #[test]
      fn one_release_per_set() {
        each_set_releases_exactly_one_waiter($make);
      }

      #[test]
      fn drop_pending_wait() {
        dropping_a_pending_wait_leaves_others_queued($make);
      }

      #[test]
      fn drop_woken_wait() {
        dropping_a_woken_wait_forwards_the_signal($make);
      }

      #[test]
      fn back_to_back_sets() {
        back_to_back_sets_release_both_waiters($make);
      }

      #[test]
      fn surplus_sets_bank_one() {
        sets_beyond_waiters_bank_one($make);
      }

      #[test]
      fn cancel() {
        cancelled_wait_reports_cancellation($make);
      }

      #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
      async fn many_tasks() {
        tasks_all_release_under_repeated_sets(Arc::new($make)).await;
      }
    }
  };
}

signal_suite!(queue, QueueSignal::new());
signal_suite!(spin, SpinSignal::new());
signal_suite!(slim, SlimSignal::new());

// --- Strategy-specific behavior ---

#[test]
fn queue_signal_releases_in_arrival_order() {
  let signal = QueueSignal::new();
  let mut waits: Vec<_> = (0..5).map(|_| Box::pin(signal.wait_async())).collect();
  for wait in waits.iter_mut() {
    assert!(poll_once(wait).is_pending());
  }
  for i in 0..5 {
    signal.set();
    for (j, wait) in waits.iter_mut().enumerate().skip(i) {
      let ready = poll_once(wait).is_ready();
      assert_eq!(ready, i == j, "waiter {} released out of order", j);
    }
  }
}

#[test]
fn spin_signal_lets_a_fresh_caller_barge() {
  let signal = SpinSignal::new();
  let mut queued = Box::pin(signal.wait_async());
  assert!(poll_once(&mut queued).is_pending());

  signal.set();
  // A caller that never queued takes the permit meant for `queued`.
  assert!(signal.try_wait());
  assert!(poll_once(&mut queued).is_pending());

  // The queued waiter is not starved by the next set.
  signal.set();
  assert!(poll_once(&mut queued).is_ready());
}

#[test]
fn cancellations_are_observed() {
  let observer = Arc::new(CountingObserver::new());
  let queue = QueueSignal::with_observer(observer.clone());
  let spin = SpinSignal::with_observer(observer.clone());
  let slim = SlimSignal::with_observer(observer.clone());

  cancelled_wait_reports_cancellation(queue);
  cancelled_wait_reports_cancellation(spin);
  cancelled_wait_reports_cancellation(slim);
  assert_eq!(observer.snapshot().waits_cancelled, 3);
}

#[tokio::test]
async fn cancellation_by_timer() {
  let signal = QueueSignal::new();
  let outcome = wait_or_cancel(&signal, tokio::time::sleep(Duration::from_millis(20))).await;
  assert_eq!(outcome, Err(WaitError::Cancelled));
  assert_eq!(signal.waiters(), 0);
}

#[test]
fn slim_signal_blocking_threads_all_wake() {
  let signal = Arc::new(SlimSignal::new());
  let released = Arc::new(AtomicUsize::new(0));
  let threads = 4;
  let handles: Vec<_> = (0..threads)
    .map(|_| {
      let signal = signal.clone();
      let released = released.clone();
      thread::spawn(move || {
        assert!(signal.wait_timeout(STRESS_TIMEOUT));
        released.fetch_add(1, Ordering::AcqRel);
      })
    })
    .collect();

  let deadline = Instant::now() + LONG_TIMEOUT;
  while released.load(Ordering::Acquire) < threads {
    assert!(Instant::now() < deadline);
    signal.set();
    thread::sleep(Duration::from_millis(1));
  }
  for handle in handles {
    handle.join().unwrap();
  }
}

#[test]
fn queue_signal_blocking_wait_times_out() {
  let signal = QueueSignal::new();
  let start = Instant::now();
  assert!(!signal.wait_timeout(SHORT_TIMEOUT / 10));
  assert!(start.elapsed() >= SHORT_TIMEOUT / 10);
  assert_eq!(signal.waiters(), 0);
}
