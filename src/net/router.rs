//! Message router — classifies inbound frames and republishes typed payloads.
//!
//! DESIGN
//! ======
//! Each category has a `watch` channel holding only the latest value: UI
//! observers render a snapshot, not a queue. Progress payloads are also
//! pushed onto a `broadcast` channel so history-keeping observers (the event
//! log, a job waiting for its terminal signal) see every update in arrival
//! order.
//!
//! ERROR HANDLING
//! ==============
//! `dispatch` never fails. Malformed frames and unknown types are logged and
//! dropped so a bad frame cannot break the connection's read loop.

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;

use std::collections::BTreeMap;

use tokio::sync::{broadcast, watch};

use super::message::{AgentState, ConnectionAck, InboundMessage, ProgressUpdate, parse_inbound};

const PROGRESS_EVENT_CAPACITY: usize = 256;

pub struct MessageRouter {
    progress: watch::Sender<Option<ProgressUpdate>>,
    job: watch::Sender<Option<ProgressUpdate>>,
    agents: watch::Sender<BTreeMap<String, AgentState>>,
    connection: watch::Sender<Option<ConnectionAck>>,
    heartbeat_ack: watch::Sender<Option<f64>>,
    events: broadcast::Sender<ProgressUpdate>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(PROGRESS_EVENT_CAPACITY);
        Self {
            progress: watch::channel(None).0,
            job: watch::channel(None).0,
            agents: watch::channel(BTreeMap::new()).0,
            connection: watch::channel(None).0,
            heartbeat_ack: watch::channel(None).0,
            events,
        }
    }

    /// Parse and fan out one raw text frame.
    ///
    /// Returns the decoded message, or `None` when the frame was dropped.
    pub fn dispatch(&self, raw: &str) -> Option<InboundMessage> {
        let message = match parse_inbound(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, frame_len = raw.len(), "dropping unparseable frame");
                return None;
            }
        };
        self.publish(&message);
        Some(message)
    }

    /// Republish an already-decoded message.
    pub fn publish(&self, message: &InboundMessage) {
        match message {
            InboundMessage::Progress(update) => {
                tracing::debug!(job_id = ?update.job_id, progress = ?update.progress, "generation progress");
                self.progress.send_replace(Some(update.clone()));
                let _ = self.events.send(update.clone());
            }
            InboundMessage::JobUpdate(update) => {
                tracing::debug!(step = ?update.step, progress = ?update.progress, "generation update");
                self.job.send_replace(Some(update.clone()));
                let _ = self.events.send(update.clone());
            }
            InboundMessage::AgentStatus(agents) => {
                self.agents.send_replace(agents.clone());
            }
            InboundMessage::ConnectionAck(ack) => {
                tracing::info!(client_id = ?ack.client_id, "connection acknowledged");
                self.connection.send_replace(Some(ack.clone()));
            }
            InboundMessage::HeartbeatAck { timestamp } => {
                self.heartbeat_ack.send_replace(*timestamp);
            }
            InboundMessage::Unknown { kind } => {
                tracing::warn!(kind = %kind, "ignoring unknown message type");
            }
        }
    }

    /// Every progress and job update, in arrival order.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<ProgressUpdate>> {
        self.progress.subscribe()
    }

    #[must_use]
    pub fn subscribe_job(&self) -> watch::Receiver<Option<ProgressUpdate>> {
        self.job.subscribe()
    }

    #[must_use]
    pub fn subscribe_agents(&self) -> watch::Receiver<BTreeMap<String, AgentState>> {
        self.agents.subscribe()
    }

    #[must_use]
    pub fn subscribe_connection(&self) -> watch::Receiver<Option<ConnectionAck>> {
        self.connection.subscribe()
    }

    #[must_use]
    pub fn latest_progress(&self) -> Option<ProgressUpdate> {
        self.progress.borrow().clone()
    }

    #[must_use]
    pub fn latest_job(&self) -> Option<ProgressUpdate> {
        self.job.borrow().clone()
    }

    #[must_use]
    pub fn latest_agents(&self) -> BTreeMap<String, AgentState> {
        self.agents.borrow().clone()
    }

    #[must_use]
    pub fn latest_connection(&self) -> Option<ConnectionAck> {
        self.connection.borrow().clone()
    }

    #[must_use]
    pub fn last_heartbeat_ack(&self) -> Option<f64> {
        *self.heartbeat_ack.borrow()
    }
}
