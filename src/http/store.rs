//! Live sessions of the HTTP binding, keyed by `Mcp-Session-Id`

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::sync::{mpsc::Receiver, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::capability::CapabilityRegistry;
use crate::errors::AppError;
use crate::session::{ServerIdentity, Session};
use crate::transport::ChannelTransport;

struct SessionEntry {
    session: Arc<Session>,
    outbound: Arc<Mutex<Receiver<Vec<u8>>>>,
    last_seen: StdMutex<Instant>,
}

impl SessionEntry {
    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    max_sessions: usize,
    idle_timeout: Option<Duration>,
}

impl SessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
            idle_timeout: None,
        }
    }

    /// Sessions with no POST or GET for longer than `timeout` are closed and
    /// forgotten. `None` keeps them until they end.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Creates a session with a fresh id and attaches its transport.
    ///
    /// Ended and idle sessions are pruned first so they never count against the limit.
    pub async fn create(
        &self,
        identity: ServerIdentity,
        registry: CapabilityRegistry,
        request_timeout: Option<Duration>,
    ) -> Result<Arc<Session>, AppError> {
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions).await;

        if sessions.len() >= self.max_sessions {
            return Err(AppError::unavailable(
                "session_limit_reached",
                "maximum number of mcp sessions reached",
            ));
        }

        let id = Uuid::new_v4().to_string();
        let (transport, outbound) = ChannelTransport::new();
        let session = Arc::new(
            Session::new(id.clone(), identity, registry, Arc::new(transport))
                .with_request_timeout(request_timeout),
        );
        session
            .connect()
            .map_err(|err| AppError::internal(err.to_string()))?;

        sessions.insert(
            id.clone(),
            SessionEntry {
                session: Arc::clone(&session),
                outbound: Arc::new(Mutex::new(outbound)),
                last_seen: StdMutex::new(Instant::now()),
            },
        );
        info!(session_id = %id, active_sessions = sessions.len(), "session created");
        Ok(session)
    }

    /// Closes and drops idle sessions and forgets ended ones. Returns how
    /// many entries were removed.
    pub async fn prune_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions).await
    }

    async fn prune(&self, sessions: &mut HashMap<String, SessionEntry>) -> usize {
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| {
                entry.session.state().is_terminal()
                    || self
                        .idle_timeout
                        .is_some_and(|timeout| entry.idle_for() >= timeout)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            let Some(entry) = sessions.remove(id) else {
                continue;
            };
            if !entry.session.state().is_terminal() {
                info!(
                    session_id = %id,
                    idle_ms = entry.idle_for().as_millis() as u64,
                    "idle session closed"
                );
                entry.session.close().await;
            }
        }

        if !expired.is_empty() {
            debug!(pruned = expired.len(), active_sessions = sessions.len(), "sessions pruned");
        }
        expired.len()
    }

    /// Looks up a session and marks it as seen.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(id)?;
        entry.touch();
        Some(Arc::clone(&entry.session))
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(id)?;
        debug!(session_id = %id, "session removed");
        Some(removed.session)
    }

    /// Takes every frame queued for the client. `None` for an unknown session.
    pub async fn drain_outbound(&self, id: &str) -> Option<Vec<Value>> {
        let outbound = {
            let sessions = self.sessions.read().await;
            let entry = sessions.get(id)?;
            entry.touch();
            Arc::clone(&entry.outbound)
        };

        let mut receiver = outbound.lock().await;
        let mut frames = Vec::new();
        while let Ok(frame) = receiver.try_recv() {
            match serde_json::from_slice(&frame) {
                Ok(value) => frames.push(value),
                Err(err) => {
                    debug!(session_id = %id, error = %err, "undecodable outbound frame dropped")
                }
            }
        }
        Some(frames)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
