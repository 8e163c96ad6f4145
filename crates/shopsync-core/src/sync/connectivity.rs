//! Observable network availability

use tokio::sync::watch;

/// Publishes online/offline transitions to schedulers
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record the current availability; unchanged values wake nobody
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                tracing::info!(online, "Connectivity changed");
                *current = online;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
