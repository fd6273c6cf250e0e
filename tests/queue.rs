use std::{
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use atomic_task_queue::{
	AsyncClosureTask, AtomicTaskQueue, ClosureTask, ConcurrencyPolicy, ProgressSnapshot,
	QueueOptions, Status, TaskQueue, Termination, WaitOutcome, Weight,
};
use rand::Rng;
use tokio::time::sleep;
use tracing_test::traced_test;

fn options(policy: ConcurrencyPolicy) -> QueueOptions {
	QueueOptions {
		policy,
		..QueueOptions::default()
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn serial_fifo_preserves_dispatch_order() {
	let queue = AtomicTaskQueue::new(options(ConcurrencyPolicy::SerialFifo), Vec::new());

	for i in 1..=100u32 {
		queue.dispatch(move |access| access.mutate(|list| list.push(i)));
	}

	queue.wait().await;

	assert_eq!(
		queue.with_value(|list| list.clone()),
		(1..=100).collect::<Vec<_>>()
	);
	assert_eq!(queue.task_count(), 0);
	assert_eq!(queue.status(), Status::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn every_policy_runs_every_task() {
	for policy in [
		ConcurrencyPolicy::SerialFifo,
		ConcurrencyPolicy::ConcurrentAutomatic,
		ConcurrencyPolicy::Concurrent { max: 4 },
	] {
		let queue = TaskQueue::new(options(policy));
		let counter = Arc::new(AtomicUsize::new(0));

		for _ in 0..50 {
			let counter = Arc::clone(&counter);
			queue.dispatch_fn(move || {
				counter.fetch_add(1, Ordering::Relaxed);
			});
		}

		queue.wait().await;

		assert_eq!(counter.load(Ordering::Relaxed), 50, "{policy:?}");
		assert_eq!(queue.task_count(), 0, "{policy:?}");
		assert_eq!(queue.status(), Status::Idle, "{policy:?}");
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn suspended_queue_holds_tasks_until_resumed() {
	let queue = TaskQueue::new(QueueOptions {
		policy: ConcurrencyPolicy::ConcurrentAutomatic,
		initially_suspended: true,
		..QueueOptions::default()
	});
	let counter = Arc::new(AtomicUsize::new(0));

	for _ in 0..20 {
		let counter = Arc::clone(&counter);
		queue.dispatch_fn(move || {
			counter.fetch_add(1, Ordering::Relaxed);
		});
	}

	sleep(Duration::from_millis(100)).await;

	assert_eq!(counter.load(Ordering::Relaxed), 0);
	assert_eq!(queue.task_count(), 20);
	assert_eq!(queue.status(), Status::Paused);

	queue.resume();
	queue.wait().await;

	assert_eq!(counter.load(Ordering::Relaxed), 20);
	assert_eq!(queue.status(), Status::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn wait_timeout_returns_instead_of_hanging() {
	let queue = TaskQueue::new(options(ConcurrencyPolicy::ConcurrentAutomatic));

	let handle = queue.dispatch_interactive(|ctl| {
		while !ctl.should_abort() {
			std::thread::sleep(Duration::from_millis(5));
		}
	});

	assert_eq!(
		queue.wait_timeout(Duration::from_millis(50)).await,
		WaitOutcome::TimedOut
	);

	queue.cancel_all();
	queue.wait().await;

	assert!(matches!(handle.await, Ok(Termination::Cancelled)));
	assert_eq!(queue.status(), Status::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn cancelled_before_start_still_reaches_finished_progress() {
	let queue = TaskQueue::new(QueueOptions {
		policy: ConcurrencyPolicy::ConcurrentAutomatic,
		initially_suspended: true,
		..QueueOptions::default()
	});
	let counter = Arc::new(AtomicUsize::new(0));

	let handles = (0..5)
		.map(|_| {
			let counter = Arc::clone(&counter);
			queue.dispatch_fn(move || {
				counter.fetch_add(1, Ordering::Relaxed);
			})
		})
		.collect::<Vec<_>>();

	queue.cancel_all();
	queue.resume();
	queue.wait().await;

	assert_eq!(counter.load(Ordering::Relaxed), 0);

	for handle in handles {
		let snapshot = handle.progress().expect("leaf tasks have progress nodes");
		assert!(snapshot.is_finished());
		assert_eq!(snapshot.completed_units, snapshot.total_units);
		assert!(matches!(handle.await, Ok(Termination::Cancelled)));
	}

	assert_eq!(queue.status(), Status::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn barrier_splits_the_queue_in_two() {
	let queue = AtomicTaskQueue::new(
		options(ConcurrencyPolicy::ConcurrentAutomatic),
		Vec::<u32>::new(),
	);

	for i in 0..10 {
		queue.dispatch(move |access| {
			std::thread::sleep(Duration::from_millis(
				rand::thread_rng().gen_range(1..20),
			));
			access.mutate(|list| list.push(i));
		});
	}

	let seen_at_barrier = Arc::new(AtomicUsize::new(usize::MAX));
	let barrier_done = Arc::new(AtomicBool::new(false));

	{
		let seen_at_barrier = Arc::clone(&seen_at_barrier);
		let barrier_done = Arc::clone(&barrier_done);
		queue.dispatch_barrier(move |access| {
			access.mutate(|list| seen_at_barrier.store(list.len(), Ordering::SeqCst));
			barrier_done.store(true, Ordering::SeqCst);
		});
	}

	let late_starts_before_barrier = Arc::new(AtomicUsize::new(0));
	for _ in 0..5 {
		let barrier_done = Arc::clone(&barrier_done);
		let late_starts_before_barrier = Arc::clone(&late_starts_before_barrier);
		queue.dispatch(move |_access| {
			if !barrier_done.load(Ordering::SeqCst) {
				late_starts_before_barrier.fetch_add(1, Ordering::SeqCst);
			}
		});
	}

	queue.wait().await;

	assert_eq!(seen_at_barrier.load(Ordering::SeqCst), 10);
	assert_eq!(late_starts_before_barrier.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn weighted_fraction_never_decreases() {
	let fractions = Arc::new(Mutex::new(Vec::<f64>::new()));

	let queue = TaskQueue::new(QueueOptions {
		policy: ConcurrencyPolicy::SerialFifo,
		status_handler: Some(Box::new({
			let fractions = Arc::clone(&fractions);
			move |new: &Status, _old: &Status| {
				if let Status::InProgress { fraction, .. } = new {
					fractions.lock().unwrap().push(*fraction);
				}
			}
		})),
		..QueueOptions::default()
	});

	for _ in 0..5 {
		queue.dispatch_interactive(|ctl| {
			ctl.set_total_units(2);
			ctl.add_completed_units(1);
			ctl.add_completed_units(1);
		});
	}

	queue.wait().await;
	sleep(Duration::from_millis(50)).await;

	let recorded = fractions.lock().unwrap().clone();
	assert!(
		recorded.windows(2).all(|pair| pair[0] <= pair[1]),
		"fractions went backwards: {recorded:?}"
	);
	assert_eq!(queue.status(), Status::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn explicit_dependency_gates_the_start() {
	let queue = TaskQueue::new(options(ConcurrencyPolicy::ConcurrentAutomatic));
	let first_finished = Arc::new(AtomicBool::new(false));

	let first = queue.dispatch_fn({
		let first_finished = Arc::clone(&first_finished);
		move || {
			std::thread::sleep(Duration::from_millis(50));
			first_finished.store(true, Ordering::SeqCst);
		}
	});

	let started_in_order = Arc::new(AtomicBool::new(false));
	let second = queue.dispatch_with_dependencies(
		ClosureTask::new({
			let first_finished = Arc::clone(&first_finished);
			let started_in_order = Arc::clone(&started_in_order);
			move || started_in_order.store(first_finished.load(Ordering::SeqCst), Ordering::SeqCst)
		}),
		vec![first.dependency()],
	);

	assert!(matches!(second.await, Ok(Termination::Completed)));
	assert!(started_in_order.load(Ordering::SeqCst));

	queue.wait().await;
	assert!(matches!(first.await, Ok(Termination::Completed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn async_bodies_go_through_the_same_state_machine() {
	let queue = TaskQueue::new(options(ConcurrencyPolicy::SerialFifo));
	let counter = Arc::new(AtomicUsize::new(0));

	for _ in 0..10 {
		let counter = Arc::clone(&counter);
		queue.dispatch(AsyncClosureTask::new(move || async move {
			sleep(Duration::from_millis(1)).await;
			counter.fetch_add(1, Ordering::Relaxed);
		}));
	}

	queue.wait().await;

	assert_eq!(counter.load(Ordering::Relaxed), 10);
	assert_eq!(queue.status(), Status::Idle);
}

#[test]
#[should_panic(expected = "task weight must be positive")]
fn zero_weight_is_rejected() {
	let _ = Weight::Units(0).units();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn drained_queue_debounces_back_to_baseline() {
	let queue = TaskQueue::new(QueueOptions {
		policy: ConcurrencyPolicy::ConcurrentAutomatic,
		reset_when_idle: true,
		..QueueOptions::default()
	});

	queue.dispatch_fn(|| {});
	queue.dispatch_fn(|| {});
	queue.wait().await;

	assert_eq!(
		queue.progress_snapshot(),
		ProgressSnapshot {
			completed_units: 200,
			total_units: 200,
		}
	);

	// A quick follow-up dispatch abandons the pending reset.
	queue.dispatch_fn(|| {});
	queue.wait().await;

	sleep(Duration::from_millis(50)).await;
	assert_eq!(queue.progress_snapshot().total_units, 100);

	sleep(Duration::from_millis(350)).await;
	assert_eq!(
		queue.progress_snapshot(),
		ProgressSnapshot {
			completed_units: 1,
			total_units: 1,
		}
	);
}
