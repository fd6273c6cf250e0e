use std::time::Duration;

use atomic_task_queue::{AtomicTaskQueue, ConcurrencyPolicy, Error, QueueOptions, Status};
use rand::Rng;
use tracing_test::traced_test;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[traced_test]
async fn concurrent_increments_land_exactly_once_each() {
	let queue = AtomicTaskQueue::new(
		QueueOptions {
			policy: ConcurrencyPolicy::Concurrent { max: 8 },
			..QueueOptions::default()
		},
		0u64,
	);

	for _ in 0..100 {
		queue.dispatch(|access| {
			std::thread::sleep(Duration::from_micros(
				rand::thread_rng().gen_range(1..500),
			));
			access.mutate(|value| *value += 1);
		});
	}

	queue.wait().await;

	assert_eq!(queue.with_value(|value| *value), 100);
	assert_eq!(queue.status(), Status::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn access_forwards_the_closure_result() {
	let queue = AtomicTaskQueue::new(QueueOptions::default(), 21u32);

	let access = queue.access();
	assert_eq!(access.with(|value| *value * 2), Ok(42));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn proxies_do_not_outlive_their_queue() {
	let queue = AtomicTaskQueue::new(QueueOptions::default(), 5u32);
	let access = queue.access();

	drop(queue);

	// The queue is gone: mutation is a no-op, fallible access reports it.
	access.mutate(|value| *value += 1);
	assert_eq!(access.with(|value| *value), Err(Error::ValueReleased));
}
