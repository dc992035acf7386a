use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::{SendMode, SequenceTemplate, Tier};

pub const WEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub firmographic: f64,
    pub digital_readiness: f64,
    pub engagement: f64,
    pub pain_points: f64,
}

impl ScoringWeights {
    pub const EQUAL: ScoringWeights = ScoringWeights {
        firmographic: 0.25,
        digital_readiness: 0.25,
        engagement: 0.25,
        pain_points: 0.25,
    };

    fn values(&self) -> [(&'static str, f64); 4] {
        [
            ("firmographic", self.firmographic),
            ("digital_readiness", self.digital_readiness),
            ("engagement", self.engagement),
            ("pain_points", self.pain_points),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.firmographic + self.digital_readiness + self.engagement + self.pain_points
    }

    /// Scales the weights to sum to 1.0; an all-zero set becomes equal quarters.
    pub fn normalized(&self) -> Result<Self> {
        for (name, value) in self.values() {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::invalid_config(format!(
                    "weight {name} must be a non-negative number, got {value}"
                )));
            }
        }

        let total = self.sum();
        if !total.is_finite() {
            return Err(EngineError::invalid_config(format!(
                "weights are too large to normalize, sum is {total}"
            )));
        }
        if total == 0.0 {
            return Ok(Self::EQUAL);
        }

        Ok(Self {
            firmographic: self.firmographic / total,
            digital_readiness: self.digital_readiness / total,
            engagement: self.engagement / total,
            pain_points: self.pain_points / total,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "B")]
    pub b: f64,
    #[serde(rename = "C")]
    pub c: f64,
    #[serde(rename = "D", default)]
    pub d: f64,
}

impl TierThresholds {
    pub fn threshold(&self, tier: Tier) -> f64 {
        match tier {
            Tier::A => self.a,
            Tier::B => self.b,
            Tier::C => self.c,
            Tier::D => self.d,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for tier in Tier::ALL {
            let value = self.threshold(tier);
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(EngineError::invalid_config(format!(
                    "threshold {tier} must be within 0..=100, got {value}"
                )));
            }
        }
        if !(self.a >= self.b && self.b >= self.c && self.c >= self.d) {
            return Err(EngineError::invalid_config(format!(
                "thresholds must satisfy A >= B >= C >= D (got {} / {} / {} / {})",
                self.a, self.b, self.c, self.d
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: f64,
    pub max: f64,
}

impl SizeRange {
    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min < 0.0 {
            return Err(EngineError::invalid_config(format!(
                "size range bounds must be non-negative numbers, got {}..{}",
                self.min, self.max
            )));
        }
        if self.min > self.max {
            return Err(EngineError::invalid_config(format!(
                "size range is inverted: min {} > max {}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PainPointCategory {
    pub category: String,
    pub keywords: Vec<String>,
}

/// Weights need not sum to one; the combined value is capped at 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementTuning {
    #[serde(default = "default_rating_weight")]
    pub rating_weight: f64,
    #[serde(default = "default_volume_weight")]
    pub volume_weight: f64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    /// Review count that earns the full volume component.
    #[serde(default = "default_volume_target")]
    pub volume_target: u32,
}

fn default_rating_weight() -> f64 {
    0.4
}

fn default_volume_weight() -> f64 {
    0.4
}

fn default_recency_weight() -> f64 {
    0.2
}

fn default_volume_target() -> u32 {
    50
}

impl Default for EngagementTuning {
    fn default() -> Self {
        Self {
            rating_weight: default_rating_weight(),
            volume_weight: default_volume_weight(),
            recency_weight: default_recency_weight(),
            volume_target: default_volume_target(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitalSignalWeights {
    pub website: f64,
    pub online_booking: f64,
    pub social_profiles: f64,
    pub google_business_profile: f64,
    pub mobile_friendly: f64,
    pub runs_ads: f64,
}

impl Default for DigitalSignalWeights {
    fn default() -> Self {
        Self {
            website: 2.0,
            online_booking: 1.0,
            social_profiles: 1.0,
            google_business_profile: 1.0,
            mobile_friendly: 1.0,
            runs_ads: 1.0,
        }
    }
}

impl DigitalSignalWeights {
    fn values(&self) -> [(&'static str, f64); 6] {
        [
            ("website", self.website),
            ("online_booking", self.online_booking),
            ("social_profiles", self.social_profiles),
            ("google_business_profile", self.google_business_profile),
            ("mobile_friendly", self.mobile_friendly),
            ("runs_ads", self.runs_ads),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.values() {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::invalid_config(format!(
                    "digital signal weight {name} must be a non-negative number, got {value}"
                )));
            }
        }
        let total = self.total();
        if !total.is_finite() || total <= 0.0 {
            return Err(EngineError::invalid_config(
                "digital signal weights must sum to a positive number",
            ));
        }
        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.website
            + self.online_booking
            + self.social_profiles
            + self.google_business_profile
            + self.mobile_friendly
            + self.runs_ads
    }
}

/// `delay_days` is the gap after the previous step; see [`cumulative_offsets`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub template: SequenceTemplate,
    pub delay_days: u32,
}

/// Day offsets from tier entry for each step, in step order.
pub fn cumulative_offsets(steps: &[SequenceStep]) -> Vec<u32> {
    steps
        .iter()
        .scan(0u32, |running, step| {
            *running = running.saturating_add(step.delay_days);
            Some(*running)
        })
        .collect()
}

/// Per-tier sequences. A missing tier means "do not contact".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierSequences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a_tier: Option<Vec<SequenceStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b_tier: Option<Vec<SequenceStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_tier: Option<Vec<SequenceStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d_tier: Option<Vec<SequenceStep>>,
}

impl TierSequences {
    pub fn get(&self, tier: Tier) -> Option<&[SequenceStep]> {
        match tier {
            Tier::A => self.a_tier.as_deref(),
            Tier::B => self.b_tier.as_deref(),
            Tier::C => self.c_tier.as_deref(),
            Tier::D => self.d_tier.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMarket {
    #[serde(default)]
    pub geography: Vec<String>,
    #[serde(default)]
    pub business_types: Vec<String>,
    /// Label of the size metric, e.g. "employees" or "locations".
    pub size_metric: String,
    pub size_range: SizeRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcpScoring {
    pub weights: ScoringWeights,
    #[serde(default)]
    pub pain_points: Vec<PainPointCategory>,
    pub tier_thresholds: TierThresholds,
    #[serde(default)]
    pub engagement: EngagementTuning,
    #[serde(default)]
    pub digital_weights: DigitalSignalWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachSettings {
    pub send_mode: SendMode,
    pub daily_limit: u32,
    #[serde(default)]
    pub sequences: TierSequences,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Personalization {
    #[serde(default)]
    pub value_propositions: Vec<String>,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_company: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub target_market: TargetMarket,
    pub icp_scoring: IcpScoring,
    pub outreach: OutreachSettings,
    #[serde(default)]
    pub personalization: Personalization,
}

impl CampaignConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Validates every section and returns a copy with normalized weights
    /// and trimmed, lowercased pain-point keywords.
    pub fn validated(&self) -> Result<Self> {
        let mut config = self.clone();

        config.icp_scoring.weights = self.icp_scoring.weights.normalized()?;
        config.icp_scoring.tier_thresholds.validate()?;
        config.target_market.size_range.validate()?;

        let tuning = &config.icp_scoring.engagement;
        let tuning_weights = [
            tuning.rating_weight,
            tuning.volume_weight,
            tuning.recency_weight,
        ];
        if tuning_weights.iter().any(|w| !w.is_finite() || *w < 0.0)
            || tuning.volume_target == 0
        {
            return Err(EngineError::invalid_config(
                "engagement tuning needs non-negative weights and a positive volume target",
            ));
        }

        config.icp_scoring.digital_weights.validate()?;

        for category in config.icp_scoring.pain_points.iter_mut() {
            if category.category.trim().is_empty() {
                return Err(EngineError::invalid_config("pain point category needs a name"));
            }
            category.keywords = category
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if category.keywords.is_empty() {
                return Err(EngineError::invalid_config(format!(
                    "pain point category '{}' has no keywords",
                    category.category
                )));
            }
        }

        if config.outreach.daily_limit == 0 {
            return Err(EngineError::invalid_config("daily_limit must be positive"));
        }

        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        let max_connections = match std::env::var("ICP_MAX_CONNECTIONS") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("ICP_MAX_CONNECTIONS is not a number: {value}"))?,
            Err(_) => 5,
        };

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}
