use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{Campaign, Lead, ScheduledSend, SendStatus};
use crate::scheduler::DailyCapLedger;

/// Persistence for campaigns, leads, scheduled sends and the daily send
/// counters. Send status changes only touch rows still in the expected state.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_campaign(&self, campaign: &Campaign) -> Result<()>;

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>>;

    /// Inserts a collected lead unless the campaign already has one with the
    /// same [`Lead::source_key`]. Returns whether it was inserted.
    async fn insert_lead(&self, lead: &Lead) -> Result<bool>;

    async fn save_lead(&self, lead: &Lead) -> Result<()>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>>;

    async fn list_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>>;

    /// Fails with [`EngineError::SchedulingConflict`] when the lead already
    /// has a send for the same step.
    async fn insert_send(&self, send: &ScheduledSend) -> Result<()>;

    async fn get_send(&self, id: Uuid) -> Result<Option<ScheduledSend>>;

    async fn list_sends(&self, campaign_id: Uuid) -> Result<Vec<ScheduledSend>>;

    async fn list_sends_for_lead(&self, lead_id: Uuid) -> Result<Vec<ScheduledSend>>;

    async fn list_pending_sends(&self, campaign_id: Uuid) -> Result<Vec<ScheduledSend>>;

    /// Returns `false` when the row is no longer in `from`. Moving to `sent`
    /// stamps `sent_at` with `at`.
    async fn transition_send(
        &self,
        id: Uuid,
        from: SendStatus,
        to: SendStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn approve_send(&self, id: Uuid) -> Result<bool>;

    async fn cancel_pending_for_lead(&self, lead_id: Uuid) -> Result<u64>;

    /// Deliveries counted against the campaign's cap on `day` (UTC).
    async fn sends_used_on(&self, campaign_id: Uuid, day: NaiveDate) -> Result<u32>;

    /// Takes one slot of the day's cap. Returns `false` when `limit` is reached.
    async fn reserve_send_slot(&self, campaign_id: Uuid, day: NaiveDate, limit: u32)
        -> Result<bool>;

    async fn release_send_slot(&self, campaign_id: Uuid, day: NaiveDate) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    campaigns: HashMap<Uuid, Campaign>,
    leads: Vec<Lead>,
    sends: Vec<ScheduledSend>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    caps: DailyCapLedger,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.tables
            .lock()
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        Ok(self.tables.lock().campaigns.get(&id).cloned())
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<bool> {
        let mut tables = self.tables.lock();
        let key = lead.source_key();
        let known = tables
            .leads
            .iter()
            .any(|l| l.campaign_id == lead.campaign_id && l.source_key() == key);
        if known {
            return Ok(false);
        }
        tables.leads.push(lead.clone());
        Ok(true)
    }

    async fn save_lead(&self, lead: &Lead) -> Result<()> {
        let mut tables = self.tables.lock();
        match tables.leads.iter_mut().find(|l| l.id == lead.id) {
            Some(existing) => *existing = lead.clone(),
            None => tables.leads.push(lead.clone()),
        }
        Ok(())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        Ok(self.tables.lock().leads.iter().find(|l| l.id == id).cloned())
    }

    async fn list_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>> {
        Ok(self
            .tables
            .lock()
            .leads
            .iter()
            .filter(|l| l.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn insert_send(&self, send: &ScheduledSend) -> Result<()> {
        let mut tables = self.tables.lock();
        let duplicate = tables
            .sends
            .iter()
            .any(|s| s.lead_id == send.lead_id && s.step_index == send.step_index);
        if duplicate {
            return Err(EngineError::SchedulingConflict {
                lead_id: send.lead_id,
                step_index: send.step_index,
            });
        }
        tables.sends.push(send.clone());
        Ok(())
    }

    async fn get_send(&self, id: Uuid) -> Result<Option<ScheduledSend>> {
        Ok(self.tables.lock().sends.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sends(&self, campaign_id: Uuid) -> Result<Vec<ScheduledSend>> {
        Ok(self
            .tables
            .lock()
            .sends
            .iter()
            .filter(|s| s.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn list_sends_for_lead(&self, lead_id: Uuid) -> Result<Vec<ScheduledSend>> {
        let mut sends: Vec<ScheduledSend> = self
            .tables
            .lock()
            .sends
            .iter()
            .filter(|s| s.lead_id == lead_id)
            .cloned()
            .collect();
        sends.sort_by_key(|s| s.step_index);
        Ok(sends)
    }

    async fn list_pending_sends(&self, campaign_id: Uuid) -> Result<Vec<ScheduledSend>> {
        Ok(self
            .tables
            .lock()
            .sends
            .iter()
            .filter(|s| s.campaign_id == campaign_id && s.status == SendStatus::Pending)
            .cloned()
            .collect())
    }

    async fn transition_send(
        &self,
        id: Uuid,
        from: SendStatus,
        to: SendStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        let Some(send) = tables.sends.iter_mut().find(|s| s.id == id) else {
            return Err(EngineError::not_found("scheduled send", id));
        };
        if send.status != from {
            return Ok(false);
        }
        send.status = to;
        if to == SendStatus::Sent {
            send.sent_at = Some(at);
        }
        Ok(true)
    }

    async fn approve_send(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock();
        let Some(send) = tables.sends.iter_mut().find(|s| s.id == id) else {
            return Err(EngineError::not_found("scheduled send", id));
        };
        if send.status != SendStatus::Pending {
            return Ok(false);
        }
        send.approved = true;
        Ok(true)
    }

    async fn cancel_pending_for_lead(&self, lead_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock();
        let mut cancelled = 0u64;
        for send in tables
            .sends
            .iter_mut()
            .filter(|s| s.lead_id == lead_id && s.status == SendStatus::Pending)
        {
            send.status = SendStatus::Cancelled;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn sends_used_on(&self, campaign_id: Uuid, day: NaiveDate) -> Result<u32> {
        Ok(self.caps.used(campaign_id, day))
    }

    async fn reserve_send_slot(
        &self,
        campaign_id: Uuid,
        day: NaiveDate,
        limit: u32,
    ) -> Result<bool> {
        Ok(self.caps.try_reserve(campaign_id, day, limit))
    }

    async fn release_send_slot(&self, campaign_id: Uuid, day: NaiveDate) -> Result<()> {
        self.caps.release(campaign_id, day);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SequenceTemplate;

    fn send(lead_id: Uuid, step_index: u32) -> ScheduledSend {
        ScheduledSend {
            id: Uuid::new_v4(),
            lead_id,
            campaign_id: Uuid::nil(),
            step_index,
            template: SequenceTemplate::FollowUp,
            scheduled_at: Utc::now(),
            status: SendStatus::Pending,
            approved: false,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_step_is_a_conflict() {
        let store = MemoryStore::new();
        let lead_id = Uuid::new_v4();
        store.insert_send(&send(lead_id, 0)).await.unwrap();
        let err = store.insert_send(&send(lead_id, 0)).await.unwrap_err();
        assert!(matches!(err, EngineError::SchedulingConflict { step_index: 0, .. }));
        store.insert_send(&send(lead_id, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_send_cannot_be_marked_sent() {
        let store = MemoryStore::new();
        let row = send(Uuid::new_v4(), 0);
        store.insert_send(&row).await.unwrap();

        assert_eq!(store.cancel_pending_for_lead(row.lead_id).await.unwrap(), 1);
        let moved = store
            .transition_send(row.id, SendStatus::Pending, SendStatus::Sent, Utc::now())
            .await
            .unwrap();
        assert!(!moved);
        let stored = store.get_send(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SendStatus::Cancelled);
        assert!(stored.sent_at.is_none());
    }

    #[tokio::test]
    async fn cancellation_leaves_sent_rows() {
        let store = MemoryStore::new();
        let lead_id = Uuid::new_v4();
        let first = send(lead_id, 0);
        let second = send(lead_id, 1);
        store.insert_send(&first).await.unwrap();
        store.insert_send(&second).await.unwrap();

        let now = Utc::now();
        assert!(store
            .transition_send(first.id, SendStatus::Pending, SendStatus::Sent, now)
            .await
            .unwrap());
        assert_eq!(store.cancel_pending_for_lead(lead_id).await.unwrap(), 1);

        let rows = store.list_sends_for_lead(lead_id).await.unwrap();
        assert_eq!(rows[0].status, SendStatus::Sent);
        assert_eq!(rows[1].status, SendStatus::Cancelled);
    }

    #[tokio::test]
    async fn known_business_is_not_inserted_twice() {
        let store = MemoryStore::new();
        let campaign = Uuid::new_v4();
        let email = Some("desk@brightsmiles.com".to_string());
        let first = Lead::new(campaign, "Bright Smiles", email.clone(), Default::default());
        let again = Lead::new(campaign, "Bright Smiles Dental", email.clone(), Default::default());
        let elsewhere = Lead::new(Uuid::new_v4(), "Bright Smiles", email, Default::default());

        assert!(store.insert_lead(&first).await.unwrap());
        assert!(!store.insert_lead(&again).await.unwrap());
        assert!(store.insert_lead(&elsewhere).await.unwrap());
        assert_eq!(store.list_leads(campaign).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_slots_stop_at_the_limit() {
        let store = MemoryStore::new();
        let campaign = Uuid::new_v4();
        let day = Utc::now().date_naive();

        assert!(store.reserve_send_slot(campaign, day, 2).await.unwrap());
        assert!(store.reserve_send_slot(campaign, day, 2).await.unwrap());
        assert!(!store.reserve_send_slot(campaign, day, 2).await.unwrap());

        store.release_send_slot(campaign, day).await.unwrap();
        assert_eq!(store.sends_used_on(campaign, day).await.unwrap(), 1);
    }
}
