use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CampaignConfig;
use crate::error::EngineError;

// as_str / Display / FromStr over the names used in JSON and text columns.
macro_rules! text_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(EngineError::invalid_config(format!(
                        concat!("unknown ", $label, " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
    D,
}

text_enum!(Tier, "tier", { A => "A", B => "B", C => "C", D => "D" });

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::A, Tier::B, Tier::C, Tier::D];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Collecting,
    Enriching,
    Scoring,
    Ready,
    Active,
    Paused,
    Completed,
    Failed,
}

text_enum!(CampaignStatus, "campaign status", {
    Draft => "draft",
    Collecting => "collecting",
    Enriching => "enriching",
    Scoring => "scoring",
    Ready => "ready",
    Active => "active",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Enriched,
    Scored,
    Contacted,
    Responded,
    Qualified,
    Converted,
    Lost,
}

text_enum!(LeadStatus, "lead status", {
    New => "new",
    Enriched => "enriched",
    Scored => "scored",
    Contacted => "contacted",
    Responded => "responded",
    Qualified => "qualified",
    Converted => "converted",
    Lost => "lost",
});

impl LeadStatus {
    pub fn cancels_outreach(self) -> bool {
        matches!(self, Self::Responded | Self::Converted | Self::Lost)
    }

    pub fn requires_tier(self) -> bool {
        matches!(
            self,
            Self::Scored | Self::Contacted | Self::Responded | Self::Qualified | Self::Converted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

text_enum!(SendStatus, "send status", {
    Pending => "pending",
    Sent => "sent",
    Cancelled => "cancelled",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    Draft,
    SemiAuto,
    FullAuto,
}

text_enum!(SendMode, "send mode", {
    Draft => "draft",
    SemiAuto => "semi_auto",
    FullAuto => "full_auto",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceTemplate {
    InitialOutreach,
    FollowUp,
    ValueAdd,
    SocialProof,
    Breakup,
}

text_enum!(SequenceTemplate, "template", {
    InitialOutreach => "initial_outreach",
    FollowUp => "follow_up",
    ValueAdd => "value_add",
    SocialProof => "social_proof",
    Breakup => "breakup",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigitalSignals {
    #[serde(default)]
    pub website: bool,
    #[serde(default)]
    pub online_booking: bool,
    #[serde(default)]
    pub social_profiles: bool,
    #[serde(default)]
    pub google_business_profile: bool,
    #[serde(default)]
    pub mobile_friendly: bool,
    #[serde(default)]
    pub runs_ads: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementSignals {
    #[serde(default)]
    pub review_count: u32,
    /// 0-5 scale.
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub days_since_last_review: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadSignals {
    #[serde(default)]
    pub business_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Value of the campaign's size metric (employees, locations, ...).
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub digital: DigitalSignals,
    #[serde(default)]
    pub engagement: EngagementSignals,
    #[serde(default)]
    pub text_snippets: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub firmographic: f64,
    pub digital_readiness: f64,
    pub engagement: f64,
    pub pain_points: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub config: CampaignConfig,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(name: impl Into<String>, config: CampaignConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: CampaignStatus::Draft,
            config,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub business_name: String,
    pub email: Option<String>,
    pub signals: LeadSignals,
    pub score: Option<ScoreBreakdown>,
    pub matched_keywords: Vec<String>,
    pub tier: Option<Tier>,
    pub tier_entered_at: Option<DateTime<Utc>>,
    /// First step index of the current tier's sequence. Moves past every
    /// existing row when the lead changes tier.
    #[serde(default)]
    pub sequence_base: u32,
    pub status: LeadStatus,
}

impl Lead {
    pub fn new(
        campaign_id: Uuid,
        business_name: impl Into<String>,
        email: Option<String>,
        signals: LeadSignals,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            business_name: business_name.into(),
            email,
            signals,
            score: None,
            matched_keywords: Vec::new(),
            tier: None,
            tier_entered_at: None,
            sequence_base: 0,
            status: LeadStatus::New,
        }
    }

    pub fn total_score(&self) -> f64 {
        self.score.map(|s| s.total).unwrap_or(0.0)
    }

    /// Identity of the business within its campaign: the email when known,
    /// otherwise name and location.
    pub fn source_key(&self) -> String {
        match self.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_lowercase(),
            _ => format!(
                "{}|{}",
                self.business_name.trim().to_lowercase(),
                self.signals
                    .location
                    .as_deref()
                    .unwrap_or_default()
                    .trim()
                    .to_lowercase()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSend {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub campaign_id: Uuid,
    pub step_index: u32,
    pub template: SequenceTemplate,
    pub scheduled_at: DateTime<Utc>,
    pub status: SendStatus,
    /// Human confirmation, required before dispatch in semi-auto mode.
    pub approved: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_text_columns() {
        assert_eq!("semi_auto".parse::<SendMode>().unwrap(), SendMode::SemiAuto);
        assert_eq!(LeadStatus::Responded.as_str(), "responded");
        assert_eq!("B".parse::<Tier>().unwrap(), Tier::B);
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[test]
    fn cancelling_statuses() {
        assert!(LeadStatus::Lost.cancels_outreach());
        assert!(LeadStatus::Responded.cancels_outreach());
        assert!(!LeadStatus::Contacted.cancels_outreach());
        assert!(!LeadStatus::Lost.requires_tier());
    }

    #[test]
    fn source_key_prefers_email() {
        let campaign = Uuid::new_v4();
        let with_email = Lead::new(
            campaign,
            "Bright Smiles",
            Some(" Hello@BrightSmiles.com ".to_string()),
            LeadSignals::default(),
        );
        assert_eq!(with_email.source_key(), "hello@brightsmiles.com");

        let signals = LeadSignals {
            location: Some("Austin, TX".to_string()),
            ..LeadSignals::default()
        };
        let without = Lead::new(campaign, "Bright Smiles ", None, signals);
        assert_eq!(without.source_key(), "bright smiles|austin, tx");
    }
}
