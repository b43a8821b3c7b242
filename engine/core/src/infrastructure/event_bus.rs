// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine event fan-out
//
// Mirrors the synchronous callback channels onto tokio broadcast channels so
// async observers (CLI `run --watch`, tests) can stream engine activity.
//
// In-memory only: events published with no subscriber are dropped.

use std::sync::Arc;

use nightframe_cortex::{DiscoveryEvent, DiscoveryPublisher};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::EngineEvent;
use crate::domain::plugin::PluginId;

/// Cloneable handle onto one broadcast channel
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<EngineEvent>>,
}

impl EventBus {
    /// Slow receivers lose the oldest events once `capacity` are buffered
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: EngineEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => debug!(kind, receivers, "Published event"),
            Err(_) => debug!(kind, "Dropped event without subscribers"),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to lifecycle events of one plugin
    pub fn subscribe_plugin(&self, plugin_id: PluginId) -> PluginEventReceiver {
        PluginEventReceiver {
            receiver: self.sender.subscribe(),
            plugin_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl DiscoveryPublisher for EventBus {
    fn publish(&self, event: DiscoveryEvent) {
        EventBus::publish(self, EngineEvent::Discovery(event));
    }
}

fn lagged(missed: u64) -> EventBusError {
    warn!(missed, "Event receiver fell behind");
    EventBusError::Lagged(missed)
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => lagged(n),
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<EngineEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Next buffered event, or [`EventBusError::Empty`]
    pub fn try_recv(&mut self) -> Result<EngineEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => lagged(n),
        })
    }
}

/// Receiver filtered to one plugin's load, failure and unload events
pub struct PluginEventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
    plugin_id: PluginId,
}

impl PluginEventReceiver {
    pub async fn recv(&mut self) -> Result<EngineEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if self.matches_plugin(&event) {
                return Ok(event);
            }
        }
    }

    fn matches_plugin(&self, event: &EngineEvent) -> bool {
        match event {
            EngineEvent::PluginLoaded { plugin_id, .. } => plugin_id == &self.plugin_id,
            EngineEvent::PluginFailed { plugin_id, .. } => plugin_id == &self.plugin_id,
            EngineEvent::PluginUnloaded { plugin_id, .. } => plugin_id == &self.plugin_id,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus closed")]
    Closed,

    #[error("No buffered events")]
    Empty,

    #[error("Missed {0} events")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
