// Remote Session Pool
//
// Holds at most one live session per connection id. Sessions are created
// lazily on first use and reused until closed, evicted, or found dead.
//
// Architecture:
// - One slot per connection id, each behind its own async mutex
// - get-or-create runs with the slot locked, so concurrent first use of an
//   id performs a single handshake
// - Different ids never contend beyond the brief map lookup

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::{RemoteSession, SessionConnector};
use crate::config::SshConnectionConfig;
use crate::error::{ExecError, Result};
use crate::metrics;

type Slot = Arc<Mutex<Option<Arc<dyn RemoteSession>>>>;

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions currently held
    pub active_sessions: usize,

    /// Connection ids that have been requested at least once
    pub known_ids: usize,
}

/// Remote session pool
pub struct SessionPool {
    connector: Arc<dyn SessionConnector>,
    slots: std::sync::Mutex<HashMap<String, Slot>>,
    shut_down: AtomicBool,
}

impl SessionPool {
    /// Create an empty pool
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            slots: std::sync::Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Return the live session for `connection_id`, establishing one if needed
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Connection`] if establishing fails (nothing is
    /// retained for the id) or the pool has been shut down.
    pub async fn get_session(
        &self,
        connection_id: &str,
        config: &SshConnectionConfig,
    ) -> Result<Arc<dyn RemoteSession>> {
        self.ensure_open()?;
        let slot = self.slot(connection_id);
        let mut held = slot.lock().await;

        if let Some(session) = held.as_ref() {
            if session.is_alive() {
                debug!(connection_id, "Reusing SSH session");
                return Ok(Arc::clone(session));
            }
        }
        if let Some(stale) = held.take() {
            warn!(connection_id, "Discarding dead SSH session");
            stale.close().await;
            metrics::ACTIVE_SESSIONS.dec();
        }

        // close_all may have run while this caller waited on the slot
        self.ensure_open()?;

        let session = self
            .connector
            .connect(connection_id, config)
            .await
            .inspect_err(|e| warn!(connection_id, error = %e, "SSH connect failed"))?;
        *held = Some(Arc::clone(&session));
        metrics::ACTIVE_SESSIONS.inc();
        info!(connection_id, "SSH session established");
        Ok(session)
    }

    /// Close and forget the session for `connection_id`
    ///
    /// No-op when no session is held. Waits for an in-flight command on the
    /// session to finish.
    pub async fn close_session(&self, connection_id: &str) {
        let slot = self.lock_slots().get(connection_id).cloned();
        let Some(slot) = slot else {
            return;
        };
        let mut held = slot.lock().await;
        if let Some(session) = held.take() {
            session.close().await;
            metrics::ACTIVE_SESSIONS.dec();
            info!(connection_id, "SSH session closed");
        }
    }

    /// Close `session` if it is still the one held for `connection_id`
    ///
    /// Used after a remote timeout, when the channel state is unknown.
    pub async fn evict(&self, connection_id: &str, session: &Arc<dyn RemoteSession>) {
        let slot = self.lock_slots().get(connection_id).cloned();
        let Some(slot) = slot else {
            return;
        };
        let mut held = slot.lock().await;
        let same = held
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if same {
            if let Some(session) = held.take() {
                warn!(connection_id, "Evicting SSH session");
                session.close().await;
                metrics::ACTIVE_SESSIONS.dec();
            }
        }
    }

    /// Close every held session and refuse new ones
    pub async fn close_all(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let slots: Vec<(String, Slot)> = self
            .lock_slots()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut closed = 0;
        for (id, slot) in slots {
            let mut held = slot.lock().await;
            if let Some(session) = held.take() {
                session.close().await;
                metrics::ACTIVE_SESSIONS.dec();
                debug!(connection_id = %id, "SSH session closed on shutdown");
                closed += 1;
            }
        }
        info!("Closed {} SSH session(s)", closed);
    }

    /// Whether a session is currently held for `connection_id`
    pub async fn has_session(&self, connection_id: &str) -> bool {
        let slot = self.lock_slots().get(connection_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Get pool statistics
    pub async fn stats(&self) -> PoolStats {
        let slots: Vec<Slot> = self.lock_slots().values().cloned().collect();
        let known_ids = slots.len();
        let mut active_sessions = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                active_sessions += 1;
            }
        }
        PoolStats {
            active_sessions,
            known_ids,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ExecError::Connection("Session pool is shut down".to_string()));
        }
        Ok(())
    }

    fn slot(&self, connection_id: &str) -> Slot {
        let mut slots = self.lock_slots();
        Arc::clone(
            slots
                .entry(connection_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
