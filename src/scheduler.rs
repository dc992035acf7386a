use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::{cumulative_offsets, TierSequences};
use crate::models::{Lead, ScheduledSend, SendMode, SendStatus};

/// Rows the lead's tier sequence calls for that `existing` does not hold yet.
/// Step `i` of the sequence is stored at `lead.sequence_base + i`.
pub fn materialize_sends(
    lead: &Lead,
    sequences: &TierSequences,
    existing: &[ScheduledSend],
) -> Vec<ScheduledSend> {
    let (Some(tier), Some(entered_at)) = (lead.tier, lead.tier_entered_at) else {
        return Vec::new();
    };
    let Some(steps) = sequences.get(tier) else {
        return Vec::new();
    };

    let taken: HashSet<u32> = existing
        .iter()
        .filter(|send| send.lead_id == lead.id)
        .map(|send| send.step_index)
        .collect();

    steps
        .iter()
        .zip(cumulative_offsets(steps))
        .enumerate()
        .map(|(index, step)| (lead.sequence_base + index as u32, step))
        .filter(|(step_index, _)| !taken.contains(step_index))
        .map(|(step_index, (step, offset))| ScheduledSend {
            id: Uuid::new_v4(),
            lead_id: lead.id,
            campaign_id: lead.campaign_id,
            step_index,
            template: step.template,
            scheduled_at: entered_at + Duration::days(offset as i64),
            status: SendStatus::Pending,
            approved: false,
            sent_at: None,
        })
        .collect()
}

/// First step index free after every row the lead already has.
pub fn next_sequence_base(existing: &[ScheduledSend]) -> u32 {
    existing
        .iter()
        .map(|send| send.step_index + 1)
        .max()
        .unwrap_or(0)
}

pub fn sort_fifo(sends: &mut [ScheduledSend]) {
    sends.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.lead_id.cmp(&b.lead_id))
            .then_with(|| a.step_index.cmp(&b.step_index))
    });
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchPlan {
    pub dispatch: Vec<Uuid>,
    /// Held for a human: draft mode, or not yet approved in semi-auto.
    pub awaiting_action: Vec<Uuid>,
    /// Over today's cap; they stay pending.
    pub rolled_over: Vec<Uuid>,
}

pub fn plan_dispatch(
    pending: &[ScheduledSend],
    now: DateTime<Utc>,
    mode: SendMode,
    remaining: u32,
) -> DispatchPlan {
    let mut due: Vec<ScheduledSend> = pending
        .iter()
        .filter(|send| send.status == SendStatus::Pending && send.scheduled_at <= now)
        .cloned()
        .collect();
    sort_fifo(&mut due);

    let mut plan = DispatchPlan::default();
    let mut budget = remaining as usize;

    for send in due {
        let eligible = match mode {
            SendMode::Draft => false,
            SendMode::SemiAuto => send.approved,
            SendMode::FullAuto => true,
        };
        if !eligible {
            plan.awaiting_action.push(send.id);
        } else if budget > 0 {
            budget -= 1;
            plan.dispatch.push(send.id);
        } else {
            plan.rolled_over.push(send.id);
        }
    }

    plan
}

/// Sends used per `(campaign, calendar day)`.
#[derive(Debug, Default)]
pub struct DailyCapLedger {
    used: Mutex<HashMap<(Uuid, NaiveDate), u32>>,
}

impl DailyCapLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_reserve(&self, campaign_id: Uuid, day: NaiveDate, limit: u32) -> bool {
        let mut used = self.used.lock();
        let entry = used.entry((campaign_id, day)).or_insert(0);
        if *entry >= limit {
            return false;
        }
        *entry += 1;
        true
    }

    pub fn release(&self, campaign_id: Uuid, day: NaiveDate) {
        let mut used = self.used.lock();
        if let Some(entry) = used.get_mut(&(campaign_id, day)) {
            *entry = entry.saturating_sub(1);
        }
    }

    pub fn used(&self, campaign_id: Uuid, day: NaiveDate) -> u32 {
        self.used
            .lock()
            .get(&(campaign_id, day))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::models::{LeadSignals, LeadStatus, Tier};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn entry_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn scored_lead(tier: Tier) -> Lead {
        let mut lead = Lead::new(Uuid::new_v4(), "Bright Smiles", None, LeadSignals::default());
        lead.tier = Some(tier);
        lead.tier_entered_at = Some(entry_time());
        lead.status = LeadStatus::Scored;
        lead
    }

    fn pending_at(campaign_id: Uuid, at: DateTime<Utc>) -> ScheduledSend {
        ScheduledSend {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            campaign_id,
            step_index: 0,
            template: crate::models::SequenceTemplate::InitialOutreach,
            scheduled_at: at,
            status: SendStatus::Pending,
            approved: false,
            sent_at: None,
        }
    }

    #[test]
    fn sends_land_on_cumulative_offsets() {
        let config = sample_config();
        let lead = scored_lead(Tier::A);
        let sends = materialize_sends(&lead, &config.outreach.sequences, &[]);

        let days: Vec<i64> = sends
            .iter()
            .map(|s| (s.scheduled_at - entry_time()).num_days())
            .collect();
        assert_eq!(days, vec![0, 3, 7, 14]);
        assert!(sends.iter().all(|s| s.status == SendStatus::Pending));
        assert_eq!(sends[3].template, crate::models::SequenceTemplate::Breakup);
    }

    #[test]
    fn tier_without_sequence_schedules_nothing() {
        let config = sample_config();
        let lead = scored_lead(Tier::C);
        assert!(materialize_sends(&lead, &config.outreach.sequences, &[]).is_empty());
    }

    #[test]
    fn rescheduling_is_idempotent() {
        let config = sample_config();
        let lead = scored_lead(Tier::A);
        let first = materialize_sends(&lead, &config.outreach.sequences, &[]);
        let second = materialize_sends(&lead, &config.outreach.sequences, &first);
        assert!(second.is_empty());

        let partial = materialize_sends(&lead, &config.outreach.sequences, &first[..2]);
        let steps: Vec<u32> = partial.iter().map(|s| s.step_index).collect();
        assert_eq!(steps, vec![2, 3]);
    }

    #[test]
    fn new_tier_sequence_starts_after_existing_rows() {
        let config = sample_config();
        let old = materialize_sends(&scored_lead(Tier::A), &config.outreach.sequences, &[]);

        let mut lead = scored_lead(Tier::B);
        lead.id = old[0].lead_id;
        lead.sequence_base = next_sequence_base(&old);
        let fresh = materialize_sends(&lead, &config.outreach.sequences, &old);

        let steps: Vec<u32> = fresh.iter().map(|s| s.step_index).collect();
        assert_eq!(steps, vec![4, 5]);
        assert_eq!(fresh[0].scheduled_at, entry_time());
        assert_eq!(next_sequence_base(&[]), 0);
    }

    #[test]
    fn plan_respects_cap_and_fifo() {
        let campaign_id = Uuid::new_v4();
        let now = entry_time();
        let early = pending_at(campaign_id, now - Duration::hours(2));
        let late = pending_at(campaign_id, now - Duration::hours(1));
        let future = pending_at(campaign_id, now + Duration::hours(1));

        let plan = plan_dispatch(
            &[late.clone(), future, early.clone()],
            now,
            SendMode::FullAuto,
            1,
        );
        assert_eq!(plan.dispatch, vec![early.id]);
        assert_eq!(plan.rolled_over, vec![late.id]);
    }

    #[test]
    fn draft_mode_never_dispatches() {
        let campaign_id = Uuid::new_v4();
        let now = entry_time();
        let sends = vec![pending_at(campaign_id, now), pending_at(campaign_id, now)];
        let plan = plan_dispatch(&sends, now, SendMode::Draft, 10);
        assert!(plan.dispatch.is_empty());
        assert_eq!(plan.awaiting_action.len(), 2);
    }

    #[test]
    fn semi_auto_needs_approval() {
        let campaign_id = Uuid::new_v4();
        let now = entry_time();
        let mut approved = pending_at(campaign_id, now);
        approved.approved = true;
        let unapproved = pending_at(campaign_id, now);
        let plan = plan_dispatch(
            &[approved.clone(), unapproved.clone()],
            now,
            SendMode::SemiAuto,
            10,
        );
        assert_eq!(plan.dispatch, vec![approved.id]);
        assert_eq!(plan.awaiting_action, vec![unapproved.id]);
    }

    #[test]
    fn ledger_caps_per_campaign_and_day() {
        let ledger = DailyCapLedger::new();
        let campaign = Uuid::new_v4();
        let other = Uuid::new_v4();
        let day = entry_time().date_naive();

        assert!(ledger.try_reserve(campaign, day, 2));
        assert!(ledger.try_reserve(campaign, day, 2));
        assert!(!ledger.try_reserve(campaign, day, 2));
        assert!(ledger.try_reserve(other, day, 2));

        ledger.release(campaign, day);
        assert_eq!(ledger.used(campaign, day), 1);
        assert!(ledger.try_reserve(campaign, day.succ_opt().unwrap(), 2));
    }

    #[test]
    fn concurrent_reservations_never_exceed_limit() {
        let ledger = Arc::new(DailyCapLedger::new());
        let campaign = Uuid::new_v4();
        let day = entry_time().date_naive();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| ledger.try_reserve(campaign, day, 50))
                        .count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(granted, 50);
        assert_eq!(ledger.used(campaign, day), 50);
    }
}
