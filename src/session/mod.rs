//! Capability-gated MCP session
//!
//! A [`Session`] owns one client connection. Everything that can change the
//! capabilities happens before `Ready`: the registry lives behind the lifecycle
//! lock until negotiation freezes it into a [`CapabilitySet`] stored in a
//! `OnceLock`. After that the guard and the gate read it without locking.

pub mod gate;
pub mod guard;
pub mod negotiation;
pub mod state;
pub mod subscriptions;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicI64, AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::capability::{Capability, CapabilityRegistry, CapabilitySet, RegistryError};
use crate::errors::{ProtocolError, TransportError};
use crate::mcp::rpc::{json_rpc_notification, json_rpc_request};
use crate::transport::Transport;

pub use gate::{LogLevel, NotificationGate, NotificationKind, ServerNotification};
pub use guard::Direction;
pub use negotiation::{InitializeParams, InitializeResult, PeerInfo, ServerIdentity};
pub use state::{SessionEvent, SessionState};
pub use subscriptions::SubscriptionTable;

type PendingRequests = HashMap<i64, oneshot::Sender<Result<Value, ProtocolError>>>;

/// What the handshake fixed for the rest of the session.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub local: CapabilitySet,
    pub remote: CapabilitySet,
    pub client_info: PeerInfo,
}

pub struct Session {
    id: String,
    identity: ServerIdentity,
    state: AtomicU8,
    // Serializes lifecycle transitions. Holds the registry until it is frozen.
    lifecycle: Mutex<Option<CapabilityRegistry>>,
    negotiated: OnceLock<Negotiated>,
    gate: NotificationGate,
    min_log_level: AtomicU8,
    pending_requests: Mutex<PendingRequests>,
    next_request_id: AtomicI64,
    request_timeout: Option<Duration>,
    transport: Arc<dyn Transport>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        identity: ServerIdentity,
        registry: CapabilityRegistry,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id: id.into(),
            identity,
            state: AtomicU8::new(SessionState::Unconnected as u8),
            lifecycle: Mutex::new(Some(registry)),
            negotiated: OnceLock::new(),
            gate: NotificationGate::new(),
            min_log_level: AtomicU8::new(LogLevel::default() as u8),
            pending_requests: Mutex::new(HashMap::new()),
            next_request_id: AtomicI64::new(1),
            request_timeout: None,
            transport,
            created_at: Utc::now(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.get()
    }

    pub fn local_capabilities(&self) -> Option<&CapabilitySet> {
        self.negotiated().map(|negotiated| &negotiated.local)
    }

    pub fn remote_capabilities(&self) -> Option<&CapabilitySet> {
        self.negotiated().map(|negotiated| &negotiated.remote)
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        self.gate.subscriptions()
    }

    pub fn gate_denials(&self) -> u64 {
        self.gate.denied_count()
    }

    pub fn min_log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_log_level.load(Ordering::Relaxed))
    }

    fn lifecycle(&self) -> MutexGuard<'_, Option<CapabilityRegistry>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_requests(&self) -> MutexGuard<'_, PendingRequests> {
        self.pending_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Callers hold the lifecycle lock.
    fn advance(&self, event: SessionEvent) -> Option<SessionState> {
        let current = self.state();
        let next = current.next(event)?;
        self.state.store(next as u8, Ordering::Release);
        if next != current {
            info!(
                session_id = %self.id,
                from = %current,
                to = %next,
                "session state changed"
            );
        }
        Some(next)
    }

    /// Transport attached: `Unconnected -> Negotiating`. Repeated attaches are ignored.
    pub fn connect(&self) -> Result<(), ProtocolError> {
        let _lifecycle = self.lifecycle();
        match self.state() {
            SessionState::Unconnected => {
                self.advance(SessionEvent::Connect);
                Ok(())
            }
            state if state.is_terminal() => Err(ProtocolError::SessionClosed),
            _ => Ok(()),
        }
    }

    pub fn declare(&self, capability: Capability) -> Result<(), RegistryError> {
        let mut lifecycle = self.lifecycle();
        if !self.state().accepts_registration() {
            return Err(RegistryError::RegistrationAfterLock);
        }

        match lifecycle.as_mut() {
            Some(registry) => registry.declare(capability),
            None => Err(RegistryError::RegistrationAfterLock),
        }
    }

    /// Runs the `initialize` handshake. Only valid once, while `Negotiating`.
    ///
    /// Any failure here fails the session; a second call after `Ready` is a
    /// protocol violation with the same effect.
    pub fn negotiate(&self, params: Option<Value>) -> Result<InitializeResult, ProtocolError> {
        let mut lifecycle = self.lifecycle();
        match self.state() {
            SessionState::Negotiating => {}
            SessionState::Ready => {
                self.advance(SessionEvent::ProtocolViolation);
                drop(lifecycle);
                self.release();
                warn!(session_id = %self.id, "duplicate initialize, session failed");
                return Err(ProtocolError::AlreadyNegotiated);
            }
            SessionState::Unconnected => return Err(ProtocolError::SessionNotReady),
            SessionState::Closed | SessionState::Failed => {
                return Err(ProtocolError::SessionClosed)
            }
        }

        let checked = negotiation::parse_initialize_params(params).and_then(|params| {
            let version = negotiation::check_protocol_version(&params.protocol_version)?;
            Ok((params, version))
        });
        let (params, version) = match checked {
            Ok(checked) => checked,
            Err(err) => {
                self.advance(SessionEvent::NegotiationFailed);
                drop(lifecycle);
                self.release();
                warn!(session_id = %self.id, error = %err, "initialize rejected");
                return Err(err);
            }
        };

        let Some(registry) = lifecycle.take() else {
            self.advance(SessionEvent::NegotiationFailed);
            return Err(ProtocolError::AlreadyNegotiated);
        };

        let local = registry.freeze(version);
        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: local.descriptor().clone(),
            server_info: self.identity.info(),
            instructions: self.identity.instructions.clone(),
        };
        let negotiated = Negotiated {
            local,
            remote: CapabilitySet::new(version, params.capabilities),
            client_info: params.client_info,
        };

        info!(
            session_id = %self.id,
            protocol_version = version,
            client_name = %negotiated.client_info.name,
            client_version = %negotiated.client_info.version,
            "session negotiated"
        );

        if self.negotiated.set(negotiated).is_err() {
            self.advance(SessionEvent::NegotiationFailed);
            return Err(ProtocolError::AlreadyNegotiated);
        }
        self.advance(SessionEvent::NegotiationSucceeded);
        Ok(result)
    }

    /// Checks a method the client sent us against the capabilities of the
    /// side that must serve it.
    ///
    /// Before `Ready` a method whose capability is not even pending is still
    /// reported as unsupported; everything else waits for negotiation.
    pub fn authorize_inbound(&self, method: &str) -> Result<(), ProtocolError> {
        self.authorize(method, Direction::Inbound)
    }

    /// Checks a method we are about to send against the client's capabilities.
    pub fn authorize_outbound(&self, method: &str) -> Result<(), ProtocolError> {
        self.authorize(method, Direction::Outbound)
    }

    fn authorize(&self, method: &str, direction: Direction) -> Result<(), ProtocolError> {
        match self.state() {
            SessionState::Ready => {
                let Some(negotiated) = self.negotiated.get() else {
                    return Err(ProtocolError::SessionNotReady);
                };
                guard::authorize(
                    method,
                    direction,
                    negotiated.local.descriptor(),
                    Some(negotiated.remote.descriptor()),
                )
            }
            SessionState::Closed | SessionState::Failed => Err(ProtocolError::SessionClosed),
            SessionState::Unconnected | SessionState::Negotiating => {
                if let Some(registry) = self.lifecycle().as_ref() {
                    guard::authorize(method, direction, registry.pending(), None)?;
                }
                Err(ProtocolError::SessionNotReady)
            }
        }
    }

    pub fn set_log_level(&self, level: LogLevel) -> Result<(), ProtocolError> {
        self.authorize_inbound("logging/setLevel")?;
        self.min_log_level.store(level as u8, Ordering::Relaxed);
        debug!(session_id = %self.id, level = ?level, "log level set");
        Ok(())
    }

    /// Returns `true` when this session was not yet subscribed to `uri`.
    pub fn subscribe(&self, uri: &str) -> Result<bool, ProtocolError> {
        self.authorize_inbound("resources/subscribe")?;
        let added = self.subscriptions().subscribe(uri, &self.id);

        // A close that raced with us has already cleared the table.
        if self.state().is_terminal() {
            self.subscriptions().unsubscribe(uri, &self.id);
            return Err(ProtocolError::SessionClosed);
        }
        Ok(added)
    }

    pub fn unsubscribe(&self, uri: &str) -> Result<bool, ProtocolError> {
        self.authorize_inbound("resources/unsubscribe")?;
        Ok(self.subscriptions().unsubscribe(uri, &self.id))
    }

    pub fn guard_notify(&self, kind: &NotificationKind<'_>) -> bool {
        if self.state() != SessionState::Ready {
            debug!(
                session_id = %self.id,
                method = kind.method(),
                "notification outside ready state"
            );
            return false;
        }

        self.gate.guard_notify(
            kind,
            self.local_capabilities().map(CapabilitySet::descriptor),
            self.min_log_level(),
        )
    }

    /// Sends a server-initiated notification when the gate allows it.
    ///
    /// `Ok(false)` means the notification was dropped and nothing was sent.
    pub async fn notify(&self, notification: ServerNotification) -> Result<bool, ProtocolError> {
        if self.state().is_terminal() {
            return Err(ProtocolError::SessionClosed);
        }
        if !self.guard_notify(&notification.kind()) {
            return Ok(false);
        }

        let frame = encode_frame(&json_rpc_notification(
            notification.method(),
            notification.params(),
        ))?;
        self.transport.send_frame(frame).await?;
        Ok(true)
    }

    /// Sends a server-to-client request and waits for the correlated response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        self.authorize_outbound(method)?;

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending_requests().insert(id, sender);

        if self.state().is_terminal() {
            self.pending_requests().remove(&id);
            return Err(ProtocolError::SessionClosed);
        }

        let sent = match encode_frame(&json_rpc_request(id, method, params)) {
            Ok(frame) => self.transport.send_frame(frame).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            self.pending_requests().remove(&id);
            return Err(err.into());
        }

        let outcome = match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending_requests().remove(&id);
                    warn!(session_id = %self.id, method, request_id = id, "request timed out");
                    return Err(ProtocolError::RequestTimeout(timeout));
                }
            },
            None => receiver.await,
        };

        // A dropped sender means the session was torn down underneath us.
        outcome.unwrap_or_else(|_| Err(ProtocolError::SessionClosed))
    }

    /// Routes a response frame to the request waiting on `id`.
    pub fn complete_request(&self, id: &Value, outcome: Result<Value, ProtocolError>) -> bool {
        let Some(id) = id.as_i64() else {
            return false;
        };

        match self.pending_requests().remove(&id) {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Graceful close. Idempotent; only the first call closes the transport.
    pub async fn close(&self) {
        if self.end(SessionEvent::Close) {
            self.transport.close().await;
        }
    }

    /// Protocol violation: the session moves to `Failed` and the transport is closed.
    pub async fn fail(&self, reason: &str) {
        warn!(session_id = %self.id, reason, "protocol violation");
        if self.end(SessionEvent::ProtocolViolation) {
            self.transport.close().await;
        }
    }

    fn end(&self, event: SessionEvent) -> bool {
        let changed = {
            let _lifecycle = self.lifecycle();
            let before = self.state();
            self.advance(event).is_some_and(|after| after != before)
        };

        if changed {
            self.release();
        }
        changed
    }

    fn release(&self) {
        let released = self.subscriptions().clear();
        let pending: Vec<_> = self.pending_requests().drain().collect();
        let cancelled = pending.len();
        for (_, sender) in pending {
            let _ = sender.send(Err(ProtocolError::SessionClosed));
        }

        debug!(
            session_id = %self.id,
            subscriptions = released,
            pending_requests = cancelled,
            "session resources released"
        );
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn encode_frame(message: &Value) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(message).map_err(|err| TransportError::Send(err.to_string()))
}
