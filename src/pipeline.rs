//! Campaign and lead lifecycle rules.
//!
//! ```text
//! campaign:
//!   draft -> collecting -> enriching -> scoring -> ready -> active <-> paused
//!                                                   |        |          |
//!                                                   |        +-> completed <-+
//!                                                   +-> draft (republish)
//!   any non-terminal -> failed -> draft
//!
//! lead:
//!   new -> enriched -> scored -> contacted -> responded -> qualified -> converted
//!                                                     \------------------^
//!   any non-terminal -> lost
//! ```

use crate::error::{EngineError, Result};
use crate::models::{CampaignStatus, Lead, LeadStatus};

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// A collect, enrich or score stage is in flight.
    pub fn is_running_stage(&self) -> bool {
        matches!(self, Self::Collecting | Self::Enriching | Self::Scoring)
    }

    pub fn can_transition_to(&self, target: CampaignStatus) -> bool {
        use CampaignStatus::*;

        match (self, target) {
            (Draft, Collecting) => true,
            (Collecting, Enriching) => true,
            (Enriching, Scoring) => true,
            (Scoring, Ready) => true,
            (Ready, Active) => true,
            (Active, Paused) => true,
            (Paused, Active) => true,
            (Active, Completed) => true,
            (Paused, Completed) => true,

            // Re-running stages requires going back to draft.
            (Ready, Draft) => true,
            (Failed, Draft) => true,

            (from, Failed) => !from.is_terminal() && *from != Failed,

            _ => false,
        }
    }
}

impl LeadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converted | Self::Lost)
    }

    pub fn can_transition_to(&self, target: LeadStatus) -> bool {
        use LeadStatus::*;

        match (self, target) {
            (New, Enriched) => true,
            (Enriched, Scored) => true,
            (Scored, Contacted) => true,
            (Contacted, Responded) => true,
            (Responded, Qualified) => true,
            (Responded, Converted) => true,
            (Qualified, Converted) => true,

            (from, Lost) => !from.is_terminal(),

            _ => false,
        }
    }
}

pub fn check_campaign_transition(from: CampaignStatus, to: CampaignStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::invalid_transition("campaign", from, to))
    }
}

/// Validates `lead.status -> to`, including the tier invariant, and applies it.
pub fn transition_lead(lead: &mut Lead, to: LeadStatus) -> Result<LeadStatus> {
    let from = lead.status;
    if !from.can_transition_to(to) {
        return Err(EngineError::invalid_transition("lead", from, to));
    }
    if to.requires_tier() && lead.tier.is_none() {
        return Err(EngineError::invalid_transition(
            "lead",
            from,
            format!("{to} (lead has no tier)"),
        ));
    }
    lead.status = to;
    Ok(from)
}
