use crate::config::TierThresholds;
use crate::models::Tier;

/// Highest tier whose threshold `score` meets. Anything below C is D, even
/// under a non-zero D floor.
pub fn classify(score: f64, thresholds: &TierThresholds) -> Tier {
    for tier in [Tier::A, Tier::B, Tier::C] {
        if score >= thresholds.threshold(tier) {
            return tier;
        }
    }
    Tier::D
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> TierThresholds {
        TierThresholds {
            a: 80.0,
            b: 60.0,
            c: 40.0,
            d: 0.0,
        }
    }

    #[test]
    fn boundary_scores_take_the_higher_tier() {
        let t = thresholds();
        assert_eq!(classify(80.0, &t), Tier::A);
        assert_eq!(classify(60.0, &t), Tier::B);
        assert_eq!(classify(40.0, &t), Tier::C);
        assert_eq!(classify(59.999, &t), Tier::C);
    }

    #[test]
    fn below_every_threshold_is_d() {
        let t = TierThresholds {
            a: 90.0,
            b: 70.0,
            c: 50.0,
            d: 20.0,
        };
        assert_eq!(classify(5.0, &t), Tier::D);
        assert_eq!(classify(0.0, &thresholds()), Tier::D);
    }

    #[test]
    fn classification_is_monotonic() {
        let t = thresholds();
        let position = |tier: Tier| Tier::ALL.iter().position(|t| *t == tier);
        let mut previous = classify(0.0, &t);
        for step in 1..=1000 {
            let current = classify(step as f64 / 10.0, &t);
            assert!(position(current) <= position(previous));
            previous = current;
        }
    }

    #[test]
    fn equal_thresholds_prefer_the_higher_tier() {
        let t = TierThresholds {
            a: 50.0,
            b: 50.0,
            c: 50.0,
            d: 0.0,
        };
        assert_eq!(classify(50.0, &t), Tier::A);
        assert_eq!(classify(49.0, &t), Tier::D);
    }
}
