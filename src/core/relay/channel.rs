//! Transport-agnostic outbound channel
//!
//! A `Channel` is the only thing the relay core knows about a connection:
//! it can send encoded bytes, it can be closed, and callers can register
//! hooks that run exactly once when it closes. The transport side drives
//! the other half (`ChannelDriver`): it pulls frames off the outbound
//! queue and watches for the close signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};

use super::error::RelayError;

type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// State shared between the channel handle and its driver.
struct ChannelShared {
    closed: AtomicBool,
    hooks: std::sync::Mutex<Vec<CloseHook>>,
}

impl ChannelShared {
    /// Flip to closed and drain the hooks. Only the first caller runs them.
    fn fire(&self) {
        let hooks = {
            let mut guard = match self.hooks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *guard)
        };

        for hook in hooks {
            hook();
        }
    }
}

/// Handle the relay core holds for one connection.
///
/// Cloneable; all clones refer to the same underlying connection and
/// observe the same close state.
#[derive(Clone)]
pub struct Channel {
    outbound: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
    shared: Arc<ChannelShared>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Queue an already-encoded frame for delivery.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ChannelClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }

    /// Close the channel. Idempotent: the first call signals the driver and
    /// fires the close hooks, later calls do nothing.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
        self.shared.fire();
    }

    /// Whether the channel has been closed (from either side).
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Register a hook to run when the channel closes.
    ///
    /// Runs exactly once. If the channel is already closed the hook runs
    /// immediately on the calling thread.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut guard = match self.shared.hooks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !self.shared.closed.load(Ordering::SeqCst) {
                guard.push(Box::new(hook));
                return;
            }
        }
        hook();
    }
}

/// Fires the close hooks when the transport task ends, however it ends.
pub struct CloseGuard {
    shared: Arc<ChannelShared>,
}

impl CloseGuard {
    /// Fire the hooks now instead of waiting for drop.
    pub fn fire(&self) {
        self.shared.fire();
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.shared.fire();
    }
}

/// Transport-side half of a channel.
pub struct ChannelDriver {
    outbound: mpsc::Receiver<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
    shared: Arc<ChannelShared>,
}

impl ChannelDriver {
    /// Split into the pieces a transport select loop needs.
    ///
    /// The receiver yields frames queued via [`Channel::send`]; the watch
    /// flips to `true` when [`Channel::close`] is called; the guard fires
    /// the close hooks when the transport task finishes.
    pub fn into_parts(self) -> (mpsc::Receiver<Vec<u8>>, watch::Receiver<bool>, CloseGuard) {
        (
            self.outbound,
            self.shutdown,
            CloseGuard {
                shared: self.shared,
            },
        )
    }
}

/// Create a connected channel pair.
///
/// `buffer` bounds the outbound queue; a slow connection exerts backpressure
/// on senders rather than growing without bound.
pub fn channel(buffer: usize) -> (Channel, ChannelDriver) {
    let (outbound_tx, outbound_rx) = mpsc::channel(buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shared = Arc::new(ChannelShared {
        closed: AtomicBool::new(false),
        hooks: std::sync::Mutex::new(Vec::new()),
    });

    (
        Channel {
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            shared: Arc::clone(&shared),
        },
        ChannelDriver {
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            shared,
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn test_send_reaches_driver() {
        let (channel, driver) = channel(8);
        let (mut outbound, _shutdown, _guard) = driver.into_parts();

        channel.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(outbound.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (channel, _driver) = channel(8);
        channel.close();

        let result = channel.send(b"late".to_vec()).await;
        assert!(matches!(result, Err(RelayError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_close_signals_driver() {
        let (channel, driver) = channel(8);
        let (_outbound, mut shutdown, _guard) = driver.into_parts();

        channel.close();
        shutdown.changed().await.unwrap();
        assert!(*shutdown.borrow());
    }

    #[tokio::test]
    async fn test_hooks_fire_exactly_once() {
        let (channel, _driver) = channel(8);
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        channel.on_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        channel.close();
        channel.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_after_close_runs_immediately() {
        let (channel, _driver) = channel(8);
        channel.close();

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        channel.on_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guard_drop_fires_hooks() {
        let (channel, driver) = channel(8);
        let (_outbound, _shutdown, guard) = driver.into_parts();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        channel.on_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // Simulates the transport task ending without an explicit close
        drop(guard);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_clones_share_close_state() {
        let (channel, _driver) = channel(8);
        let clone = channel.clone();

        channel.close();
        assert!(clone.is_closed());
    }

    #[tokio::test]
    async fn test_multiple_hooks_all_run() {
        let (channel, _driver) = channel(8);
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let c = Arc::clone(&count);
            channel.on_close(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        channel.close();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
