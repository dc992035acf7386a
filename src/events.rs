use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CampaignStageChanged,
    CampaignFailed,
    LeadStatusChanged,
    LeadScored,
    SendsScheduled,
    SendsCancelled,
    SendSent,
    SendFailed,
    TaskFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_type: EventType,
    pub campaign_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub priority: Priority,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl EngineEvent {
    pub fn campaign(
        event_type: EventType,
        campaign_id: Uuid,
        priority: Priority,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            campaign_id,
            lead_id: None,
            priority,
            message: message.into(),
            occurred_at,
        }
    }

    pub fn lead(
        event_type: EventType,
        campaign_id: Uuid,
        lead_id: Uuid,
        priority: Priority,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            lead_id: Some(lead_id),
            ..Self::campaign(event_type, campaign_id, priority, message, occurred_at)
        }
    }
}

/// Sink for engine events. Emitting never fails the operation that produced it.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Fans events out to async subscribers. A zero capacity is raised to one.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEmitter {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<EngineEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl EventEmitter for MemoryEmitter {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: EngineEvent) {
        let lead_id = event.lead_id.map(|id| id.to_string()).unwrap_or_default();
        match event.priority {
            Priority::High => warn!(
                event_type = ?event.event_type,
                campaign_id = %event.campaign_id,
                lead_id = %lead_id,
                "{}",
                event.message
            ),
            _ => info!(
                event_type = ?event.event_type,
                campaign_id = %event.campaign_id,
                lead_id = %lead_id,
                "{}",
                event.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let emitter = BroadcastEmitter::new(16);
        let mut rx = emitter.subscribe();
        let campaign_id = Uuid::new_v4();

        emitter.emit(EngineEvent::campaign(
            EventType::CampaignStageChanged,
            campaign_id,
            Priority::Normal,
            "collecting -> enriching",
            Utc::now(),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.campaign_id, campaign_id);
        assert_eq!(event.event_type, EventType::CampaignStageChanged);
    }

    #[tokio::test]
    async fn zero_capacity_still_delivers() {
        let emitter = BroadcastEmitter::new(0);
        let mut rx = emitter.subscribe();
        let campaign_id = Uuid::new_v4();

        emitter.emit(EngineEvent::campaign(
            EventType::CampaignFailed,
            campaign_id,
            Priority::High,
            "boom",
            Utc::now(),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.campaign_id, campaign_id);
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        BroadcastEmitter::new(4).emit(EngineEvent::campaign(
            EventType::CampaignFailed,
            Uuid::new_v4(),
            Priority::High,
            "boom",
            Utc::now(),
        ));
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&EventType::SendsCancelled).unwrap();
        assert_eq!(json, "\"sends_cancelled\"");
    }
}
