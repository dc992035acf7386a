use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Campaign, Lead, ScheduledSend, SendStatus, Tier};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSummary {
    pub tier: Tier,
    pub count: usize,
    pub avg_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub sent: usize,
    pub cancelled: usize,
    pub failed: usize,
}

pub fn summarize_by_tier(leads: &[Lead]) -> Vec<TierSummary> {
    let mut map: HashMap<Tier, (usize, f64)> = HashMap::new();

    for lead in leads {
        let Some(tier) = lead.tier else {
            continue;
        };
        let entry = map.entry(tier).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += lead.total_score();
    }

    Tier::ALL
        .iter()
        .filter_map(|tier| {
            map.get(tier).map(|(count, total)| TierSummary {
                tier: *tier,
                count: *count,
                avg_score: if *count == 0 {
                    0.0
                } else {
                    total / *count as f64
                },
            })
        })
        .collect()
}

pub fn summarize_queue(sends: &[ScheduledSend]) -> QueueSummary {
    let mut summary = QueueSummary::default();
    for send in sends {
        match send.status {
            SendStatus::Pending => summary.pending += 1,
            SendStatus::Sent => summary.sent += 1,
            SendStatus::Cancelled => summary.cancelled += 1,
            SendStatus::Failed => summary.failed += 1,
        }
    }
    summary
}

pub fn build_report(
    campaign: &Campaign,
    leads: &[Lead],
    sends: &[ScheduledSend],
    now: DateTime<Utc>,
) -> String {
    let tiers = summarize_by_tier(leads);
    let queue = summarize_queue(sends);
    let names: HashMap<Uuid, &str> = leads
        .iter()
        .map(|l| (l.id, l.business_name.as_str()))
        .collect();

    let mut output = String::new();

    let _ = writeln!(output, "# Campaign Report: {}", campaign.name);
    let _ = writeln!(
        output,
        "Status {} with {} leads (generated {})",
        campaign.status,
        leads.len(),
        now.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Tier Mix");

    if tiers.is_empty() {
        let _ = writeln!(output, "No scored leads yet.");
    } else {
        for summary in tiers.iter() {
            let _ = writeln!(
                output,
                "- Tier {}: {} leads (avg score {:.1})",
                summary.tier, summary.count, summary.avg_score
            );
        }
    }

    let mut ranked: Vec<&Lead> = leads.iter().filter(|l| l.score.is_some()).collect();
    ranked.sort_by(|a, b| {
        b.total_score()
            .partial_cmp(&a.total_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Leads");

    if ranked.is_empty() {
        let _ = writeln!(output, "No scored leads yet.");
    } else {
        for lead in ranked.iter().take(10) {
            let keywords = if lead.matched_keywords.is_empty() {
                "no pain points matched".to_string()
            } else {
                lead.matched_keywords.join(", ")
            };
            let _ = writeln!(
                output,
                "- {} (tier {}, {}) score {:.1}: {}",
                lead.business_name,
                lead.tier.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
                lead.status,
                lead.total_score(),
                keywords
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Outreach Queue");
    let _ = writeln!(
        output,
        "- pending {} / sent {} / cancelled {} / failed {}",
        queue.pending, queue.sent, queue.cancelled, queue.failed
    );

    let mut upcoming: Vec<&ScheduledSend> = sends
        .iter()
        .filter(|s| s.status == SendStatus::Pending)
        .collect();
    upcoming.sort_by_key(|s| (s.scheduled_at, s.lead_id, s.step_index));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Next Sends");

    if upcoming.is_empty() {
        let _ = writeln!(output, "Nothing scheduled.");
    } else {
        for send in upcoming.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} {} to {} (step {})",
                send.scheduled_at.format("%Y-%m-%d"),
                send.template,
                names.get(&send.lead_id).copied().unwrap_or("unknown lead"),
                send.step_index + 1
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::models::{LeadSignals, LeadStatus, ScoreBreakdown, SequenceTemplate};
    use chrono::TimeZone;

    fn scored(campaign_id: Uuid, name: &str, tier: Tier, total: f64) -> Lead {
        let mut lead = Lead::new(campaign_id, name, None, LeadSignals::default());
        lead.tier = Some(tier);
        lead.status = LeadStatus::Scored;
        lead.score = Some(ScoreBreakdown {
            total,
            ..ScoreBreakdown::default()
        });
        lead
    }

    #[test]
    fn tier_mix_averages_scores() {
        let campaign_id = Uuid::new_v4();
        let leads = vec![
            scored(campaign_id, "A1", Tier::A, 90.0),
            scored(campaign_id, "A2", Tier::A, 84.0),
            scored(campaign_id, "C1", Tier::C, 45.0),
            Lead::new(campaign_id, "unscored", None, LeadSignals::default()),
        ];
        let tiers = summarize_by_tier(&leads);
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0].tier, Tier::A);
        assert_eq!(tiers[0].count, 2);
        assert!((tiers[0].avg_score - 87.0).abs() < 1e-9);
        assert_eq!(tiers[1].tier, Tier::C);
    }

    #[test]
    fn report_lists_sections() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let campaign = Campaign::new("Austin dental", sample_config(), now);
        let lead = scored(campaign.id, "Bright Smiles", Tier::A, 91.5);
        let send = ScheduledSend {
            id: Uuid::new_v4(),
            lead_id: lead.id,
            campaign_id: campaign.id,
            step_index: 0,
            template: SequenceTemplate::InitialOutreach,
            scheduled_at: now,
            status: SendStatus::Pending,
            approved: false,
            sent_at: None,
        };

        let report = build_report(&campaign, &[lead], &[send], now);
        assert!(report.starts_with("# Campaign Report: Austin dental"));
        assert!(report.contains("- Tier A: 1 leads (avg score 91.5)"));
        assert!(report.contains("- pending 1 / sent 0 / cancelled 0 / failed 0"));
        assert!(report.contains("2026-03-02 initial_outreach to Bright Smiles (step 1)"));
    }

    #[test]
    fn empty_campaign_report() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let campaign = Campaign::new("Empty", sample_config(), now);
        let report = build_report(&campaign, &[], &[], now);
        assert!(report.contains("No scored leads yet."));
        assert!(report.contains("Nothing scheduled."));
    }
}
