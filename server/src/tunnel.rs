//! # Tunnel Entity
//!
//! One live tunnel: identity, secret, timestamps, the attached duplex
//! channel (if any), and the table of requests awaiting a response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tunnel_protocol::Envelope;

use crate::error::GatewayError;

/// Outcome delivered to a request awaiting a response.
pub type PendingResult = Result<tunnel_protocol::SerializedHttpResponse, GatewayError>;

/// The write-once rendezvous an ingress-proxy request waits on. Backed by
/// a `oneshot` channel: the channel itself enforces single fulfillment
/// (the sender is consumed on `send`), which is the concrete realization
/// of the "single-fulfillment slot" design note — no separate
/// compare-and-swap is needed.
pub type PendingSender = oneshot::Sender<PendingResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Connecting,
    Active,
    Disconnected,
    Expired,
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TunnelStatus::Connecting => "connecting",
            TunnelStatus::Active => "active",
            TunnelStatus::Disconnected => "disconnected",
            TunnelStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// The outbound side of the attached duplex channel: a queue consumed by
/// a single writer task, so the heartbeat and any in-flight response
/// frames never interleave bytes on the wire.
pub type ChannelSender = mpsc::UnboundedSender<Envelope>;

/// The attached channel together with the generation number minted for
/// it, so a caller can later prove it still owns the slot it attached.
struct ChannelSlot {
    generation: u64,
    sender: ChannelSender,
}

/// A single live tunnel.
pub struct Tunnel {
    pub tunnel_id: String,
    pub auth_token: String,
    pub name: Option<String>,
    pub local_port: Option<u16>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,

    last_active: Mutex<DateTime<Utc>>,
    status: Mutex<TunnelStatus>,
    channel: Mutex<Option<ChannelSlot>>,
    next_generation: AtomicU64,
    pending: Mutex<HashMap<String, PendingSender>>,
}

impl Tunnel {
    pub fn new(
        tunnel_id: String,
        auth_token: String,
        name: Option<String>,
        local_port: Option<u16>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tunnel_id,
            auth_token,
            name,
            local_port,
            metadata,
            created_at: now,
            last_active: Mutex::new(now),
            status: Mutex::new(TunnelStatus::Connecting),
            channel: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self) -> TunnelStatus {
        *self.status.lock().unwrap()
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.lock().unwrap()
    }

    /// `last_active` is monotonically non-decreasing.
    pub fn touch(&self) {
        let mut last = self.last_active.lock().unwrap();
        let now = Utc::now();
        if now > *last {
            *last = now;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.lock().unwrap().is_some()
    }

    /// Attaches a channel and transitions to ACTIVE, unless one is already
    /// attached. The check and the set happen under the same lock, so two
    /// concurrent callers can never both succeed. Returns the generation
    /// minted for this attach on success, so the caller can later prove
    /// (via `detach`) that it still owns the slot it attached.
    pub fn try_attach(&self, sender: ChannelSender) -> Option<u64> {
        let mut guard = self.channel.lock().unwrap();
        if guard.is_some() {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        *guard = Some(ChannelSlot { generation, sender });
        drop(guard);

        *self.status.lock().unwrap() = TunnelStatus::Active;
        self.touch();
        Some(generation)
    }

    /// Enqueues an envelope on the attached channel's outbound queue.
    /// Returns an error if no channel is attached or the writer task has
    /// gone away.
    pub fn send(&self, envelope: Envelope) -> Result<(), GatewayError> {
        let guard = self.channel.lock().unwrap();
        match guard.as_ref() {
            Some(slot) => slot.sender.send(envelope).map_err(|_| GatewayError::SendFailure),
            None => Err(GatewayError::SendFailure),
        }
    }

    /// Detaches the channel, marks DISCONNECTED, and fails every pending
    /// request with `TunnelDisconnected` — but only if `generation` still
    /// matches the attached slot. A connection whose attach lost the race
    /// in `try_attach`, or that has since been superseded by a later
    /// attach, calling `detach` with its own stale generation is a no-op:
    /// it must not tear down a different connection's live channel.
    /// Returns whether it actually detached anything.
    pub fn detach(&self, generation: u64) -> bool {
        let mut guard = self.channel.lock().unwrap();
        match guard.as_ref() {
            Some(slot) if slot.generation == generation => {
                *guard = None;
                drop(guard);
                *self.status.lock().unwrap() = TunnelStatus::Disconnected;
                self.fail_all_pending(|| GatewayError::TunnelDisconnected);
                true
            }
            _ => false,
        }
    }

    /// Fails every pending request with `TunnelDeleted` — called by the
    /// registry when a tunnel is removed outright (explicit delete,
    /// sweep), as opposed to a mere channel disconnect.
    pub fn fail_pending_on_delete(&self) {
        self.fail_all_pending(|| GatewayError::TunnelDeleted);
    }

    fn fail_all_pending(&self, err: impl Fn() -> GatewayError) {
        let mut pending = self.pending.lock().unwrap();
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(err()));
        }
    }

    /// Registers a pending slot for `request_id`. Overwrites (and thus
    /// silently drops) any stale slot under the same id; `request_id`s are
    /// minted fresh per request and never reused within a tunnel's
    /// lifetime.
    pub fn register_pending(&self, request_id: String, sender: PendingSender) {
        self.pending.lock().unwrap().insert(request_id, sender);
    }

    /// Removes and returns the pending slot for `request_id`, if still
    /// outstanding. Used both by the response handler (to fulfill it) and
    /// by the ingress proxy's timeout path (to claim ownership before
    /// giving up) — whichever call wins the race is the only one that
    /// resolves the slot.
    pub fn take_pending(&self, request_id: &str) -> Option<PendingSender> {
        self.pending.lock().unwrap().remove(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
