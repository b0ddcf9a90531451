//! Periodic ping probe with at most one request in flight.
//!
//! The probe is observational: timeouts and error replies clear the pending
//! request and mark latency unknown, they never change the session status.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};
use xmpp_parsers::{iq::Iq, jid::Jid, ping::Ping};

use crate::{error::SessionError, ids::unique_id, session::SessionStatus, stanza::Stanza};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPing {
    pub id: String,
    pub sent_at: Instant,
    pub deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    target: String,
    timeout: Duration,
    pending: Option<PendingPing>,
    last_latency: Option<Duration>,
}

impl LivenessMonitor {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
            pending: None,
            last_latency: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pending(&self) -> Option<&PendingPing> {
        self.pending.as_ref()
    }

    /// Round trip of the last answered probe; `None` after a timeout or an
    /// error reply.
    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.as_ref().is_some_and(|pending| pending.id == id)
    }

    /// Builds the next probe, or `None` when one is already in flight or the
    /// session is not connected.
    pub fn check(
        &mut self,
        status: SessionStatus,
        now: Instant,
    ) -> Result<Option<Stanza>, SessionError> {
        if self.pending.is_some() || status != SessionStatus::Connected {
            return Ok(None);
        }

        let to: Jid = self
            .target
            .parse()
            .map_err(|_| SessionError::InvalidJid(self.target.clone()))?;
        let id = unique_id(Some("ping"));
        let iq = Iq::from_get(id.clone(), Ping).with_to(to);

        debug!(id = %id, target = %self.target, "sending liveness probe");
        self.pending = Some(PendingPing {
            id,
            sent_at: now,
            deadline: now + self.timeout,
        });
        Ok(Some(Stanza::Iq(Box::new(iq))))
    }

    /// Resolves the pending probe with a result reply and returns its latency.
    pub fn on_response(&mut self, id: &str, now: Instant) -> Result<Duration, SessionError> {
        let pending = self.take_matching(id)?;
        let latency = now.saturating_duration_since(pending.sent_at);
        info!(id = %id, latency_ms = latency.as_millis() as u64, "liveness probe answered");
        self.last_latency = Some(latency);
        Ok(latency)
    }

    /// Resolves the pending probe with an error reply.
    pub fn on_error(&mut self, id: &str) -> Result<(), SessionError> {
        self.take_matching(id)?;
        self.last_latency = None;
        Ok(())
    }

    /// Expires the pending probe once its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Option<SessionError> {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|pending| now >= pending.deadline);
        if !expired {
            return None;
        }

        let pending = self.pending.take()?;
        self.last_latency = None;
        Some(SessionError::LivenessTimeout { id: pending.id })
    }

    /// Drops any in-flight probe without touching the recorded latency.
    pub fn clear(&mut self) {
        self.pending = None;
    }

    fn take_matching(&mut self, id: &str) -> Result<PendingPing, SessionError> {
        if !self.is_pending(id) {
            return Err(SessionError::CorrelationMismatch { id: id.to_string() });
        }
        self.pending
            .take()
            .ok_or_else(|| SessionError::CorrelationMismatch { id: id.to_string() })
    }
}
