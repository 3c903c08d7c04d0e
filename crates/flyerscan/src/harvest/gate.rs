//! Process-wide exclusivity for the browser.
//!
//! At most one [`ExclusiveSession`] exists at a time. The gate lock is held
//! until the browser has actually been closed, either through
//! [`ExclusiveSession::close`] or by the drop fallback.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::browser::{BrowserLauncher, BrowserSession, ClosedSession};
use crate::error::HarvestError;

#[derive(Clone)]
pub struct BrowserGate {
    launcher: Arc<dyn BrowserLauncher>,
    lock: Arc<Mutex<()>>,
    active: Arc<AtomicUsize>,
}

impl BrowserGate {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            lock: Arc::new(Mutex::new(())),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for the browser to be free, then launches a session.
    pub async fn acquire(&self) -> Result<ExclusiveSession, HarvestError> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let session = self.launcher.launch().await?;
        self.active.fetch_add(1, Ordering::SeqCst);
        log::debug!("Browser session opened");

        Ok(ExclusiveSession {
            session,
            guard: Some(guard),
            active: Arc::clone(&self.active),
            runtime: tokio::runtime::Handle::current(),
        })
    }

    /// Number of sessions launched and not yet closed.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// A launched browser plus the gate lock.
pub struct ExclusiveSession {
    session: Box<dyn BrowserSession>,
    guard: Option<OwnedMutexGuard<()>>,
    active: Arc<AtomicUsize>,
    runtime: tokio::runtime::Handle,
}

impl ExclusiveSession {
    /// Closes the browser and releases the gate.
    pub async fn close(mut self) -> Result<(), HarvestError> {
        let mut session = std::mem::replace(&mut self.session, Box::new(ClosedSession));
        let result = session.close().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.guard.take();
        if let Err(e) = &result {
            log::warn!("Browser close reported an error: {}", e);
        } else {
            log::debug!("Browser session closed");
        }
        result
    }
}

impl Deref for ExclusiveSession {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for ExclusiveSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for ExclusiveSession {
    fn drop(&mut self) {
        // `close` already ran.
        let Some(guard) = self.guard.take() else {
            return;
        };

        let mut session = std::mem::replace(&mut self.session, Box::new(ClosedSession));
        let active = Arc::clone(&self.active);
        self.runtime.spawn(async move {
            if let Err(e) = session.close().await {
                log::warn!("Browser cleanup on drop failed: {}", e);
            }
            active.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
        });
    }
}
