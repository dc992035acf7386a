use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CampaignConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventType, Priority};
use crate::models::{
    Campaign, CampaignStatus, Lead, LeadStatus, ScheduledSend, SendStatus, SequenceTemplate, Tier,
};
use crate::pipeline::transition_lead;
use crate::scheduler::{materialize_sends, next_sequence_base, plan_dispatch};
use crate::templates::{render, RenderedMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    Failed,
    /// Today's cap is used up; the send stays pending.
    CapReached,
    /// The row stopped being pending, or the lead stopped being contactable.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub rolled_over: usize,
    pub awaiting_action: usize,
    pub skipped: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Sent => self.sent += 1,
            SendOutcome::Failed => self.failed += 1,
            SendOutcome::CapReached => self.rolled_over += 1,
            SendOutcome::Skipped => self.skipped += 1,
        }
    }
}

impl Engine {
    /// Creates the lead's missing sequence rows; repeated calls add nothing.
    pub async fn schedule_lead(
        &self,
        lead: &Lead,
        config: &CampaignConfig,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if !matches!(lead.status, LeadStatus::Scored | LeadStatus::Contacted) {
            return Ok(0);
        }

        let existing = self.store.list_sends_for_lead(lead.id).await?;
        let mut created = 0usize;
        for send in materialize_sends(lead, &config.outreach.sequences, &existing) {
            match self.store.insert_send(&send).await {
                Ok(()) => created += 1,
                Err(EngineError::SchedulingConflict {
                    lead_id,
                    step_index,
                }) => {
                    debug!(lead_id = %lead_id, step_index, "send already scheduled");
                }
                Err(e) => return Err(e),
            }
        }

        if created > 0 {
            self.emit(EngineEvent::lead(
                EventType::SendsScheduled,
                lead.campaign_id,
                lead.id,
                Priority::Low,
                format!("{created} sends scheduled for {}", lead.business_name),
                now,
            ));
        }
        Ok(created)
    }

    /// Responded, converted and lost cancel every pending send of the lead
    /// before the new status is stored; sent rows are kept.
    pub async fn set_lead_status(
        &self,
        lead_id: Uuid,
        to: LeadStatus,
        now: DateTime<Utc>,
    ) -> Result<Lead> {
        let mut lead = self.load_lead(lead_id).await?;
        let from = transition_lead(&mut lead, to)?;
        if to == LeadStatus::Scored && lead.tier_entered_at.is_none() {
            lead.tier_entered_at = Some(now);
        }

        if to.cancels_outreach() {
            let cancelled = self.store.cancel_pending_for_lead(lead_id).await?;
            if cancelled > 0 {
                info!(lead_id = %lead_id, cancelled, status = %to, "pending sends cancelled");
                self.emit(EngineEvent::lead(
                    EventType::SendsCancelled,
                    lead.campaign_id,
                    lead_id,
                    Priority::Normal,
                    format!("{cancelled} pending sends cancelled ({to})"),
                    now,
                ));
            }
        }

        self.store.save_lead(&lead).await?;
        self.emit_status_change(&lead, from, now);

        if to == LeadStatus::Scored {
            let campaign = self.load_campaign(lead.campaign_id).await?;
            self.schedule_lead(&lead, &campaign.config, now).await?;
        }

        Ok(lead)
    }

    /// Due pending sends of an active campaign go out in FIFO order until the
    /// daily cap is reached.
    pub async fn dispatch_due(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<DispatchReport> {
        let campaign = self.load_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Active {
            debug!(campaign_id = %campaign_id, status = %campaign.status, "campaign not active, skipping dispatch");
            return Ok(DispatchReport::default());
        }

        let outreach = &campaign.config.outreach;
        let day = now.date_naive();
        let used = self.store.sends_used_on(campaign_id, day).await?;
        let remaining = outreach.daily_limit.saturating_sub(used);

        let pending = self.store.list_pending_sends(campaign_id).await?;
        let plan = plan_dispatch(&pending, now, outreach.send_mode, remaining);

        let mut report = DispatchReport {
            rolled_over: plan.rolled_over.len(),
            awaiting_action: plan.awaiting_action.len(),
            ..DispatchReport::default()
        };

        let by_id: HashMap<Uuid, &ScheduledSend> = pending.iter().map(|s| (s.id, s)).collect();
        let mut leads: HashMap<Uuid, Lead> = HashMap::new();

        for send_id in plan.dispatch {
            let Some(send) = by_id.get(&send_id).copied() else {
                continue;
            };
            if !leads.contains_key(&send.lead_id) {
                let lead = self.load_lead(send.lead_id).await?;
                leads.insert(lead.id, lead);
            }
            let Some(lead) = leads.get_mut(&send.lead_id) else {
                continue;
            };
            let outcome = self
                .deliver(&campaign, lead, Some(send), send.template, now)
                .await?;
            report.record(outcome);
        }

        info!(
            campaign_id = %campaign_id,
            sent = report.sent,
            failed = report.failed,
            rolled_over = report.rolled_over,
            awaiting_action = report.awaiting_action,
            "dispatch cycle finished"
        );
        Ok(report)
    }

    pub async fn approve_send(&self, send_id: Uuid) -> Result<bool> {
        self.store.approve_send(send_id).await
    }

    /// Sends `template` to one lead now, under the daily cap. Fulfils the
    /// lead's earliest pending row using that template, if any.
    pub async fn send(
        &self,
        campaign_id: Uuid,
        lead_id: Uuid,
        template: SequenceTemplate,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome> {
        let campaign = self.load_campaign(campaign_id).await?;
        ensure_can_send(&campaign)?;

        let mut lead = self.load_lead(lead_id).await?;
        if lead.campaign_id != campaign_id {
            return Err(EngineError::not_found("lead", lead_id));
        }
        if !matches!(lead.status, LeadStatus::Scored | LeadStatus::Contacted) {
            return Err(EngineError::invalid_transition(
                "lead",
                lead.status,
                LeadStatus::Contacted,
            ));
        }

        let row = self
            .store
            .list_sends_for_lead(lead_id)
            .await?
            .into_iter()
            .filter(|s| s.status == SendStatus::Pending && s.template == template)
            .min_by_key(|s| (s.scheduled_at, s.step_index));

        self.deliver(&campaign, &mut lead, row.as_ref(), template, now)
            .await
    }

    pub async fn run_sequence(
        &self,
        campaign_id: Uuid,
        tier: Tier,
        template: SequenceTemplate,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport> {
        let campaign = self.load_campaign(campaign_id).await?;
        ensure_can_send(&campaign)?;

        let mut report = DispatchReport::default();
        for lead in self.store.list_leads(campaign_id).await? {
            if lead.tier != Some(tier)
                || !matches!(lead.status, LeadStatus::Scored | LeadStatus::Contacted)
            {
                continue;
            }
            let outcome = self.send(campaign_id, lead.id, template, now).await?;
            report.record(outcome);
        }
        Ok(report)
    }

    pub async fn preview(
        &self,
        campaign_id: Uuid,
        lead_id: Uuid,
        template: SequenceTemplate,
    ) -> Result<RenderedMessage> {
        let campaign = self.load_campaign(campaign_id).await?;
        let lead = self.load_lead(lead_id).await?;
        if lead.campaign_id != campaign_id {
            return Err(EngineError::not_found("lead", lead_id));
        }
        Ok(render(template, &lead, &campaign.config))
    }

    /// Replaces a campaign's config and re-scores its live leads. A lead
    /// whose tier changes drops its pending rows and enters the new tier's
    /// sequence from `now`; otherwise only missing steps are filled.
    pub async fn republish_config(
        &self,
        campaign_id: Uuid,
        config: &CampaignConfig,
        now: DateTime<Utc>,
    ) -> Result<Campaign> {
        let config = config.validated()?;
        let mut campaign = self.load_campaign(campaign_id).await?;
        if campaign.status.is_running_stage() || campaign.status.is_terminal() {
            return Err(EngineError::invalid_transition(
                "campaign",
                campaign.status,
                "republish",
            ));
        }

        campaign.config = config;
        self.store.save_campaign(&campaign).await?;
        info!(campaign_id = %campaign_id, "campaign config republished");

        for mut lead in self.store.list_leads(campaign_id).await? {
            if !matches!(lead.status, LeadStatus::Scored | LeadStatus::Contacted) {
                continue;
            }
            let previous = lead.tier;
            self.apply_score(&mut lead, &campaign.config, now)?;
            if lead.tier != previous {
                self.restart_sequence(&mut lead, now).await?;
            }
            self.store.save_lead(&lead).await?;
            if lead.tier != previous {
                self.emit_scored(&lead, now);
            }
            self.schedule_lead(&lead, &campaign.config, now).await?;
        }

        Ok(campaign)
    }

    async fn restart_sequence(&self, lead: &mut Lead, now: DateTime<Utc>) -> Result<()> {
        let cancelled = self.store.cancel_pending_for_lead(lead.id).await?;
        let existing = self.store.list_sends_for_lead(lead.id).await?;
        lead.sequence_base = next_sequence_base(&existing);
        lead.tier_entered_at = Some(now);
        info!(
            lead_id = %lead.id,
            tier = ?lead.tier,
            cancelled,
            sequence_base = lead.sequence_base,
            "lead changed tier, sequence restarted"
        );
        if cancelled > 0 {
            self.emit(EngineEvent::lead(
                EventType::SendsCancelled,
                lead.campaign_id,
                lead.id,
                Priority::Normal,
                format!("{cancelled} pending sends cancelled (tier change)"),
                now,
            ));
        }
        Ok(())
    }

    /// `row`, when given, must still be pending and is marked sent only
    /// through a guarded transition. A lead that stopped being contactable
    /// is never mailed.
    async fn deliver(
        &self,
        campaign: &Campaign,
        lead: &mut Lead,
        row: Option<&ScheduledSend>,
        template: SequenceTemplate,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome> {
        let day = now.date_naive();
        let limit = campaign.config.outreach.daily_limit;

        if let Some(row) = row {
            let current = self.store.get_send(row.id).await?;
            if current.map(|s| s.status) != Some(SendStatus::Pending) {
                debug!(send_id = %row.id, "send no longer pending");
                return Ok(SendOutcome::Skipped);
            }
        }

        *lead = self.load_lead(lead.id).await?;
        if lead.status.cancels_outreach() {
            if let Some(row) = row {
                self.store
                    .transition_send(row.id, SendStatus::Pending, SendStatus::Cancelled, now)
                    .await?;
            }
            debug!(lead_id = %lead.id, status = %lead.status, "lead no longer contactable");
            return Ok(SendOutcome::Skipped);
        }

        if !self.store.reserve_send_slot(campaign.id, day, limit).await? {
            return Ok(SendOutcome::CapReached);
        }

        let message = render(template, lead, &campaign.config);
        if message.to_email.is_none() {
            self.store.release_send_slot(campaign.id, day).await?;
            if let Some(row) = row {
                self.store
                    .transition_send(row.id, SendStatus::Pending, SendStatus::Failed, now)
                    .await?;
            }
            self.emit(EngineEvent::lead(
                EventType::SendFailed,
                campaign.id,
                lead.id,
                Priority::Normal,
                format!("{} has no email address", lead.business_name),
                now,
            ));
            return Ok(SendOutcome::Failed);
        }

        if let Err(e) = self.mailer.deliver(&message).await {
            self.store.release_send_slot(campaign.id, day).await?;
            let error = EngineError::DispatchFailure(format!("{e:#}"));
            warn!(
                campaign_id = %campaign.id,
                lead_id = %lead.id,
                error = %error,
                "send failed, left pending for retry"
            );
            self.emit(EngineEvent::lead(
                EventType::TaskFailed,
                campaign.id,
                lead.id,
                Priority::High,
                error.to_string(),
                now,
            ));
            return Ok(SendOutcome::Failed);
        }

        if let Some(row) = row {
            let marked = self
                .store
                .transition_send(row.id, SendStatus::Pending, SendStatus::Sent, now)
                .await?;
            if !marked {
                warn!(send_id = %row.id, "send was cancelled while in flight");
                return Ok(SendOutcome::Skipped);
            }
        }

        if lead.status == LeadStatus::Scored {
            let from = transition_lead(lead, LeadStatus::Contacted)?;
            self.store.save_lead(lead).await?;
            self.emit_status_change(lead, from, now);
        }

        self.emit(EngineEvent::lead(
            EventType::SendSent,
            campaign.id,
            lead.id,
            Priority::Low,
            format!("{template} sent to {}", lead.business_name),
            now,
        ));
        Ok(SendOutcome::Sent)
    }

    fn emit_status_change(&self, lead: &Lead, from: LeadStatus, now: DateTime<Utc>) {
        let priority = match lead.status {
            LeadStatus::Responded | LeadStatus::Converted => Priority::High,
            _ => Priority::Normal,
        };
        self.emit(EngineEvent::lead(
            EventType::LeadStatusChanged,
            lead.campaign_id,
            lead.id,
            priority,
            format!("{}: {from} -> {}", lead.business_name, lead.status),
            now,
        ));
    }
}

fn ensure_can_send(campaign: &Campaign) -> Result<()> {
    if matches!(campaign.status, CampaignStatus::Ready | CampaignStatus::Active) {
        Ok(())
    } else {
        Err(EngineError::invalid_transition(
            "campaign",
            campaign.status,
            "send",
        ))
    }
}
