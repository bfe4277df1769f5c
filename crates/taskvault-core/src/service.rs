//! Start/stop plumbing shared by every looping component.
//!
//! A `ServiceLoop` owns at most one spawned tokio task plus the
//! `CancellationToken` used to ask it to exit. Stopping is cancel, then wait
//! a bounded grace period, then hard abort.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle to a component's background loop.
pub struct ServiceLoop {
    name: String,
    slot: Mutex<Option<Running>>,
}

impl ServiceLoop {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True while a spawned loop exists and has not exited (or panicked).
    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawn the loop. Returns `false` if one is already alive.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(&self, f: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(f(token.clone()));
        *slot = Some(Running { token, handle });
        true
    }

    /// Cancel the loop and wait up to `grace` for it to exit; abort it otherwise.
    /// Returns `false` if nothing was running.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let running = self.lock().take();
        let Some(Running { token, mut handle }) = running else {
            return false;
        };
        token.cancel();
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            tracing::warn!(
                "⏱️ '{}' did not stop within {:?}, aborting",
                self.name,
                grace
            );
            handle.abort();
        }
        true
    }

    /// Hard-kill the loop without waiting. The slot keeps the dead handle,
    /// so `is_running` reports `false` afterwards.
    pub fn abort(&self) {
        if let Some(running) = self.lock().as_ref() {
            running.handle.abort();
        }
    }
}
