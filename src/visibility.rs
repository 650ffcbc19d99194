//! Suspend/resume driven by the host's foreground/background signal.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::ConnectionManager;

/// Host page visibility, as reported by the embedding environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVisibility {
    Visible,
    Hidden,
}

/// Bridges the visibility signal to the connection manager.
///
/// Hidden releases the transport via [`ConnectionManager::suspend`] so no
/// network resource is held in the background; retry counters survive.
/// Visible calls [`ConnectionManager::resume`], which reconnects only if
/// the consumer has not explicitly stopped in the meantime.
///
/// The gate is opt-in per subscription: spawn one for connections that
/// should sleep in the background, skip it for those that must not.
pub struct VisibilityGate;

impl VisibilityGate {
    pub fn spawn(
        mut rx: watch::Receiver<PageVisibility>,
        manager: Arc<ConnectionManager>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut current = *rx.borrow();
            loop {
                if rx.changed().await.is_err() {
                    // Host signal gone; leave the manager as-is.
                    return;
                }
                let next = *rx.borrow();
                if next == current {
                    continue;
                }
                current = next;
                match next {
                    PageVisibility::Hidden => {
                        debug!("page hidden; releasing transport");
                        manager.suspend();
                    }
                    PageVisibility::Visible => {
                        debug!("page visible; resuming stream");
                        manager.resume();
                    }
                }
            }
        })
    }
}
