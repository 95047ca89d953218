use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A running poll loop owned by whoever holds the lease.
///
/// The first tick fires immediately. Dropping or releasing the lease cancels
/// the loop; a tick already in progress runs to completion.
pub struct PollLease {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollLease {
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if tick().await.is_break() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("poll lease ended");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .handle
                .as_ref()
                .map_or(false, |handle| !handle.is_finished())
    }

    /// Cancels the loop and waits for the current tick, if any, to finish.
    pub async fn release(mut self) {
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "poll lease task failed");
            }
        }
    }
}

impl Drop for PollLease {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_lease_stops_the_timer() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();

    let lease = PollLease::spawn(Duration::from_millis(10), move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        }
    });

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(lease.is_active());
    drop(lease);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let after_drop = ticks.load(Ordering::SeqCst);
    assert!(after_drop >= 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
}

#[tokio::test(flavor = "multi_thread")]
async fn a_break_ends_the_loop() {
    let lease = PollLease::spawn(Duration::from_millis(5), || async { ControlFlow::Break(()) });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!lease.is_active());

    lease.release().await;
}
