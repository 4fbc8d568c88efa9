use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::transport::{ListenerId, NotificationTransport, TransportEvent};

/// Owns a transport listener registration between `start` and `stop`.
pub struct NotificationSubscription {
    transport: Arc<dyn NotificationTransport>,
    queue: Arc<Mutex<VecDeque<TransportEvent>>>,
    handle: Option<ListenerId>,
}

impl NotificationSubscription {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self {
            transport,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            handle: None,
        }
    }

    /// Registers the listener. Returns `false` if already started.
    pub fn start(&mut self) -> bool {
        if self.handle.is_some() {
            return false;
        }
        let queue = self.queue.clone();
        let id = self.transport.add_listener(Arc::new(move |event: &TransportEvent| {
            queue.lock().push_back(event.clone());
        }));
        debug!(listener = id.0, "notification listener registered");
        self.handle = Some(id);
        true
    }

    /// Releases the listener. Events already queued stay available to
    /// [`NotificationSubscription::drain`]. Returns `false` if not started.
    pub fn stop(&mut self) -> bool {
        let Some(id) = self.handle.take() else {
            return false;
        };
        if !self.transport.remove_listener(id) {
            debug!(listener = id.0, "listener was already gone");
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn drain(&self) -> Vec<TransportEvent> {
        self.queue.lock().drain(..).collect()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}
