//! In-memory event bus.

use std::sync::{Arc, Mutex, RwLock, mpsc};

use crate::bus::{BusError, EventBus, Subscription};
use crate::handler::EventHandler;

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Handlers first, then best-effort fan-out to subscriptions
pub struct InMemoryEventBus<M> {
    handlers: RwLock<Vec<Arc<dyn EventHandler<M>>>>,
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers = self.handlers.read().map(|h| h.len()).unwrap_or_default();
        f.debug_struct("InMemoryEventBus")
            .field("handlers", &handlers)
            .finish_non_exhaustive()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    fn publish(&self, message: M) -> Result<(), BusError> {
        // Snapshot so a handler may register further handlers or publish again.
        let handlers: Vec<_> = self.handlers.read().map_err(|_| BusError::Poisoned)?.clone();
        for handler in handlers {
            if let Err(err) = handler.handle(&message) {
                tracing::warn!(handler = handler.name(), error = %err, "event handler failed");
            }
        }

        let mut subs = self.subscribers.lock().map_err(|_| BusError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }

    fn register_handler(&self, handler: Arc<dyn EventHandler<M>>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::FnHandler;

    #[test]
    fn handlers_run_before_subscribers_and_failures_are_contained() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.register_handler(Arc::new(FnHandler::new("broken", |_: &u32| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        })));
        let counter = seen.clone();
        bus.register_handler(Arc::new(FnHandler::new("counter", move |m: &u32| -> anyhow::Result<()> {
            counter.fetch_add(*m as usize, Ordering::SeqCst);
            Ok(())
        })));

        let sub = bus.subscribe();
        bus.publish(2).unwrap();
        bus.publish(3).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(sub.drain(), vec![2, 3]);
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let bus: InMemoryEventBus<&'static str> = InMemoryEventBus::new();
        drop(bus.subscribe());
        let live = bus.subscribe();

        bus.publish("tick").unwrap();
        assert_eq!(live.try_recv().unwrap(), "tick");
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }
}
