use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Worker {
    name: String,
    lifecycle: AgentLifecycle,
    stops: Arc<AtomicU32>,
}

impl Worker {
    fn new(name: &str, stops: Arc<AtomicU32>) -> Arc<Self> {
        let lifecycle = AgentLifecycle::new();
        lifecycle.ready.fire();
        Arc::new(Self {
            name: name.to_string(),
            lifecycle,
            stops,
        })
    }
}

#[async_trait]
impl Agent for Worker {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> &Signal {
        &self.lifecycle.ready
    }

    fn completed(&self) -> &Signal {
        &self.lifecycle.completed
    }

    fn stopping(&self) -> &Signal {
        &self.lifecycle.stopping
    }

    fn stopped(&self) -> &Signal {
        &self.lifecycle.stopped
    }

    async fn stop(&self, _reason: &str) {
        self.lifecycle.stopping.fire();
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.lifecycle.finish();
    }
}

#[tokio::test]
async fn test_signal_wait_after_fire_returns() {
    let signal = Signal::new();
    assert!(!signal.is_fired());

    signal.fire();
    signal.fire();

    signal.wait().await;
    assert!(signal.clone().is_fired());
}

#[tokio::test]
async fn test_signal_wakes_waiters() {
    let signal = Signal::new();
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        })
        .collect();

    tokio::task::yield_now().await;
    signal.fire();

    for waiter in waiters {
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_stops_children_in_parallel() {
    let stops = Arc::new(AtomicU32::new(0));
    let supervisor = Supervisor::new("root");
    supervisor.add(Worker::new("a", stops.clone()));
    supervisor.add(Worker::new("b", stops.clone()));
    assert_eq!(supervisor.child_count(), 2);

    let started = tokio::time::Instant::now();
    supervisor.stop("shutdown").await;

    assert_eq!(stops.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() < Duration::from_millis(200));
    assert!(supervisor.completed().is_fired());
    assert_eq!(supervisor.child_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_completed_child_is_removed() {
    let stops = Arc::new(AtomicU32::new(0));
    let supervisor = Supervisor::new("root");
    let child = Worker::new("a", stops.clone());
    supervisor.add(child.clone());
    supervisor.add(Worker::new("b", stops.clone()));

    child.stop("done").await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(supervisor.child_count(), 1);
}
