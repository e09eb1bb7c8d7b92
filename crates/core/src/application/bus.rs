// Notification Bus - best-effort pub/sub between contexts
//
// Every subscriber owns an unbounded queue drained by its own task. Publishing
// never waits on a subscriber and never retries.

use crate::domain::{MessageType, NotificationMessage, Topic};
use crate::error::Result;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

struct Subscriber {
    id: u64,
    topic: Topic,
    tx: mpsc::UnboundedSender<NotificationMessage>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|s| s.id != id);
    }
}

/// Cloneable handle to a shared bus
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `handler` for every message matching `topic`.
    ///
    /// Handler errors are logged at warn, panics at error; neither affects
    /// other subscribers or later deliveries. Must be called inside a tokio
    /// runtime.
    pub fn subscribe<F, Fut>(&self, topic: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(NotificationMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let topic = topic.into();
        let (id, mut rx) = self.register(topic);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let kind = msg.kind;
                let job_id = msg.job_id.clone();
                let delivery = AssertUnwindSafe(async { handler(msg).await }).catch_unwind();
                match delivery.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(subscriber = id, kind = %kind, job_id = ?job_id, error = %e, "Subscriber failed");
                    }
                    Err(panic) => {
                        error!(
                            subscriber = id,
                            kind = %kind,
                            job_id = ?job_id,
                            panic_msg = %panic_message(panic.as_ref()),
                            "Subscriber panicked"
                        );
                    }
                }
            }
            debug!(subscriber = id, "Subscriber delivery task stopped");
        });

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Raw receiver for consumers that want to pull (streams, tests)
    pub fn subscribe_channel(&self, topic: impl Into<Topic>) -> MessageReceiver {
        let (id, rx) = self.register(topic.into());
        MessageReceiver {
            rx,
            _subscription: Subscription {
                id,
                bus: Arc::downgrade(&self.inner),
            },
        }
    }

    /// Fire-and-forget publish. Returns how many subscribers accepted it.
    pub fn publish(&self, message: NotificationMessage) -> usize {
        let mut subscribers = self.inner.lock();
        let mut delivered = 0;
        subscribers.retain(|s| {
            if !s.topic.matches(message.kind) {
                return true;
            }
            match s.tx.send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // Receiver gone: prune
                Err(_) => false,
            }
        });

        if delivered == 0 {
            debug!(kind = %message.kind, "Published with no listener");
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    fn register(&self, topic: Topic) -> (u64, mpsc::UnboundedReceiver<NotificationMessage>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().push(Subscriber { id, topic, tx });
        (id, rx)
    }
}

/// Removes its subscriber when dropped
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

/// Pull-style subscription
pub struct MessageReceiver {
    rx: mpsc::UnboundedReceiver<NotificationMessage>,
    _subscription: Subscription,
}

impl MessageReceiver {
    pub async fn recv(&mut self) -> Option<NotificationMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<NotificationMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next message of `kind`, skipping others
    pub async fn recv_kind(&mut self, kind: MessageType) -> Option<NotificationMessage> {
        while let Some(msg) = self.rx.recv().await {
            if msg.kind == kind {
                return Some(msg);
            }
        }
        None
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn msg(kind: MessageType, job_id: &str) -> NotificationMessage {
        NotificationMessage::new(kind, 0).with_job_id(job_id)
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus = NotificationBus::new();
        let mut a = bus.subscribe_channel(MessageType::JobEnqueued);
        let mut b = bus.subscribe_channel(Topic::All);

        assert_eq!(bus.publish(msg(MessageType::JobEnqueued, "j1")), 2);

        assert_eq!(a.recv().await.unwrap().job_id.as_deref(), Some("j1"));
        assert_eq!(b.recv().await.unwrap().job_id.as_deref(), Some("j1"));
    }

    #[tokio::test]
    async fn test_topic_filtering() {
        let bus = NotificationBus::new();
        let mut updates = bus.subscribe_channel(MessageType::JobUpdated);

        assert_eq!(bus.publish(msg(MessageType::JobEnqueued, "j1")), 0);
        bus.publish(msg(MessageType::JobUpdated, "j2"));

        assert_eq!(updates.recv().await.unwrap().job_id.as_deref(), Some("j2"));
        assert!(updates.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_order_preserved_per_publisher() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe_channel(Topic::All);
        for i in 0..50 {
            bus.publish(msg(MessageType::JobUpdated, &i.to_string()));
        }
        for i in 0..50 {
            let m = rx.recv().await.unwrap();
            assert_eq!(m.job_id, Some(i.to_string()));
        }
    }

    #[tokio::test]
    async fn test_failing_handlers_do_not_block_others() {
        let bus = NotificationBus::new();
        let _erroring = bus.subscribe(Topic::All, |_| async {
            Err(AppError::Internal("nope".to_string()))
        });
        let _panicking = bus.subscribe(Topic::All, |m: NotificationMessage| async move {
            if m.kind == MessageType::Ping {
                panic!("subscriber blew up");
            }
            Ok(())
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _healthy = bus.subscribe(Topic::All, move |m: NotificationMessage| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(m.job_id);
                Ok(())
            }
        });

        bus.publish(msg(MessageType::Ping, "first"));
        bus.publish(msg(MessageType::Ping, "second"));

        let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.as_deref(), Some("first"));
        assert_eq!(second.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_panicking_subscriber_keeps_receiving() {
        let bus = NotificationBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus.subscribe(Topic::All, move |m: NotificationMessage| {
            let tx = tx.clone();
            async move {
                if m.job_id.as_deref() == Some("boom") {
                    panic!("bad message");
                }
                let _ = tx.send(m.job_id);
                Ok(())
            }
        });

        bus.publish(msg(MessageType::Ping, "boom"));
        bus.publish(msg(MessageType::Ping, "after"));

        let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = NotificationBus::new();
        let sub = bus.subscribe(Topic::All, |_| async { Ok(()) });
        let rx = bus.subscribe_channel(Topic::All);
        assert_eq!(bus.subscriber_count(), 2);

        sub.unsubscribe();
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(msg(MessageType::Ping, "x")), 0);
    }

    #[tokio::test]
    async fn test_recv_kind_skips_other_messages() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe_channel(Topic::All);
        bus.publish(msg(MessageType::Ping, "a"));
        bus.publish(msg(MessageType::Pong, "b"));

        let pong = rx.recv_kind(MessageType::Pong).await.unwrap();
        assert_eq!(pong.job_id.as_deref(), Some("b"));
    }
}
