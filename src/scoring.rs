use crate::config::{
    CampaignConfig, DigitalSignalWeights, EngagementTuning, ScoringWeights, SizeRange,
};
use crate::error::{EngineError, Result};
use crate::models::{DigitalSignals, EngagementSignals, LeadSignals, ScoreBreakdown, Tier};
use crate::pain_points::{corpus_from_snippets, match_pain_points, PainPointMatch};
use crate::tier::classify;

#[derive(Debug, Clone, PartialEq)]
pub struct LeadScore {
    pub breakdown: ScoreBreakdown,
    pub tier: Tier,
    pub pain_points: PainPointMatch,
}

/// Scores a lead against an already validated campaign config.
pub fn score_lead(config: &CampaignConfig, signals: &LeadSignals) -> Result<LeadScore> {
    let icp = &config.icp_scoring;
    let corpus = corpus_from_snippets(&signals.text_snippets);
    let pain_points = match_pain_points(&corpus, &icp.pain_points);

    let breakdown = calculate_score(
        &icp.weights,
        &config.target_market.size_range,
        &icp.digital_weights,
        &icp.engagement,
        signals,
        pain_points.relevance_score,
    )?;
    let tier = classify(breakdown.total, &icp.tier_thresholds);

    Ok(LeadScore {
        breakdown,
        tier,
        pain_points,
    })
}

/// Combines the four sub-scores. Each sub-score is worth at most its
/// weight's share of 100, and the total is clamped to `0..=100`.
pub fn calculate_score(
    weights: &ScoringWeights,
    size_range: &SizeRange,
    digital_weights: &DigitalSignalWeights,
    tuning: &EngagementTuning,
    signals: &LeadSignals,
    relevance_score: f64,
) -> Result<ScoreBreakdown> {
    let fit = firmographic_fit(signals.size, size_range)?;

    let firmographic = weights.firmographic * 100.0 * fit;
    let digital_readiness =
        weights.digital_readiness * 100.0 * digital_readiness(&signals.digital, digital_weights);
    let engagement = weights.engagement * 100.0 * engagement(&signals.engagement, tuning);
    let pain_points = weights.pain_points * 100.0 * (relevance_score.clamp(0.0, 100.0) / 100.0);

    let total = (firmographic + digital_readiness + engagement + pain_points).clamp(0.0, 100.0);

    Ok(ScoreBreakdown {
        firmographic,
        digital_readiness,
        engagement,
        pain_points,
        total,
    })
}

/// 1.0 inside the range, decaying linearly to 0 at twice the range's width
/// beyond the nearest bound. Zero-width ranges decay over one unit.
pub fn firmographic_fit(size: Option<f64>, range: &SizeRange) -> Result<f64> {
    if range.min > range.max {
        return Err(EngineError::invalid_config(format!(
            "size range is inverted: min {} > max {}",
            range.min, range.max
        )));
    }
    let Some(size) = size.filter(|s| s.is_finite()) else {
        return Ok(0.0);
    };

    let distance = if size < range.min {
        range.min - size
    } else if size > range.max {
        size - range.max
    } else {
        return Ok(1.0);
    };

    let falloff = 2.0 * range.width().max(1.0);
    Ok((1.0 - distance / falloff).max(0.0))
}

pub fn digital_readiness(signals: &DigitalSignals, weights: &DigitalSignalWeights) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }

    let present = [
        (signals.website, weights.website),
        (signals.online_booking, weights.online_booking),
        (signals.social_profiles, weights.social_profiles),
        (
            signals.google_business_profile,
            weights.google_business_profile,
        ),
        (signals.mobile_friendly, weights.mobile_friendly),
        (signals.runs_ads, weights.runs_ads),
    ]
    .iter()
    .filter(|(on, _)| *on)
    .map(|(_, weight)| weight)
    .sum::<f64>();

    (present / total).clamp(0.0, 1.0)
}

/// Monotonic blend of rating, review volume and review recency, capped at 1.0.
pub fn engagement(signals: &EngagementSignals, tuning: &EngagementTuning) -> f64 {
    let rating = signals
        .rating
        .filter(|r| r.is_finite())
        .map(|r| (r / 5.0).clamp(0.0, 1.0))
        .unwrap_or(0.0);
    let volume =
        (signals.review_count as f64 / tuning.volume_target.max(1) as f64).min(1.0);
    let recency = signals
        .days_since_last_review
        .map(recency_weight)
        .unwrap_or(0.0);

    (tuning.rating_weight * rating + tuning.volume_weight * volume + tuning.recency_weight * recency)
        .min(1.0)
}

pub fn recency_weight(days_ago: u32) -> f64 {
    match days_ago {
        0..=7 => 1.0,
        8..=30 => 0.7,
        31..=60 => 0.4,
        _ => 0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    fn strong_lead() -> LeadSignals {
        LeadSignals {
            business_type: Some("dental clinic".to_string()),
            location: Some("Austin, TX".to_string()),
            size: Some(25.0),
            digital: DigitalSignals {
                website: true,
                online_booking: true,
                social_profiles: true,
                google_business_profile: true,
                mobile_friendly: true,
                runs_ads: true,
            },
            engagement: EngagementSignals {
                review_count: 120,
                rating: Some(4.8),
                days_since_last_review: Some(2),
            },
            text_snippets: vec![
                "Always a long WAIT TIME at the front desk".to_string(),
                "Service was slow".to_string(),
            ],
        }
    }

    #[test]
    fn weights_follow_expected_tiers() {
        assert_eq!(recency_weight(2), 1.0);
        assert_eq!(recency_weight(15), 0.7);
        assert_eq!(recency_weight(40), 0.4);
        assert_eq!(recency_weight(90), 0.2);
    }

    #[test]
    fn fit_decays_outside_range() {
        let range = SizeRange {
            min: 10.0,
            max: 20.0,
        };
        assert_eq!(firmographic_fit(Some(15.0), &range).unwrap(), 1.0);
        assert_eq!(firmographic_fit(Some(10.0), &range).unwrap(), 1.0);
        assert!((firmographic_fit(Some(30.0), &range).unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(firmographic_fit(Some(40.0), &range).unwrap(), 0.0);
        assert_eq!(firmographic_fit(Some(0.0), &range).unwrap(), 0.5);
        assert_eq!(firmographic_fit(None, &range).unwrap(), 0.0);
    }

    #[test]
    fn inverted_range_fails() {
        let range = SizeRange {
            min: 30.0,
            max: 10.0,
        };
        assert!(matches!(
            firmographic_fit(Some(20.0), &range),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn digital_readiness_uses_weights() {
        let weights = DigitalSignalWeights::default();
        let only_site = DigitalSignals {
            website: true,
            ..DigitalSignals::default()
        };
        assert!((digital_readiness(&only_site, &weights) - 2.0 / 7.0).abs() < 1e-9);
        assert_eq!(digital_readiness(&DigitalSignals::default(), &weights), 0.0);
    }

    #[test]
    fn engagement_grows_with_rating_and_reviews() {
        let tuning = EngagementTuning::default();
        let weak = EngagementSignals {
            review_count: 5,
            rating: Some(3.0),
            days_since_last_review: Some(45),
        };
        let strong = EngagementSignals {
            review_count: 60,
            rating: Some(4.5),
            days_since_last_review: Some(45),
        };
        assert!(engagement(&strong, &tuning) > engagement(&weak, &tuning));
        assert!(engagement(&strong, &tuning) <= 1.0);
        assert_eq!(engagement(&EngagementSignals::default(), &tuning), 0.0);
    }

    #[test]
    fn strong_lead_lands_in_tier_a() {
        let config = sample_config().validated().unwrap();
        let score = score_lead(&config, &strong_lead()).unwrap();

        assert!((score.breakdown.firmographic - 40.0).abs() < 1e-9);
        assert!((score.breakdown.digital_readiness - 30.0).abs() < 1e-9);
        assert_eq!(score.pain_points.matched_keywords.len(), 2);
        assert!(score.breakdown.total >= 80.0);
        assert!(score.breakdown.total <= 100.0);
        assert_eq!(score.tier, Tier::A);
    }

    #[test]
    fn scoring_is_reproducible() {
        let config = sample_config().validated().unwrap();
        let first = score_lead(&config, &strong_lead()).unwrap();
        let second = score_lead(&config, &strong_lead()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_signals_classify_as_d() {
        let config = sample_config().validated().unwrap();
        let score = score_lead(&config, &LeadSignals::default()).unwrap();
        assert_eq!(score.breakdown.total, 0.0);
        assert_eq!(score.tier, Tier::D);
    }
}
