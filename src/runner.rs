//! Pipeline stages run on tokio tasks. The campaign and its config are
//! checked before spawning; failures inside a task move the campaign to
//! `failed` and emit `campaign_failed`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CampaignConfig;
use crate::engine::{Engine, Enricher, LeadSource};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventType, Priority};
use crate::models::{Campaign, CampaignStatus, Lead, LeadStatus};
use crate::pipeline::{check_campaign_transition, transition_lead};
use crate::scoring::score_lead;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: Uuid,
    pub status: TaskState,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    latest: Mutex<HashMap<Uuid, TaskStatus>>,
}

impl TaskRegistry {
    fn start(&self, campaign_id: Uuid) -> Uuid {
        let task_id = Uuid::new_v4();
        self.set(campaign_id, task_id, TaskState::Pending, None);
        task_id
    }

    fn set(
        &self,
        campaign_id: Uuid,
        task_id: Uuid,
        status: TaskState,
        result: Option<serde_json::Value>,
    ) {
        self.latest.lock().insert(
            campaign_id,
            TaskStatus {
                task_id,
                status,
                result,
            },
        );
    }

    pub fn get(&self, campaign_id: Uuid) -> Option<TaskStatus> {
        self.latest.lock().get(&campaign_id).cloned()
    }
}

pub struct TaskHandle {
    pub task_id: Uuid,
    join: JoinHandle<TaskStatus>,
}

impl TaskHandle {
    pub async fn wait(self) -> TaskStatus {
        match self.join.await {
            Ok(status) => status,
            Err(e) => TaskStatus {
                task_id: self.task_id,
                status: TaskState::Failure,
                result: Some(serde_json::json!({ "error": e.to_string() })),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub collected: usize,
    pub enriched: usize,
    pub scored: usize,
    pub scheduled: usize,
    pub by_tier: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Collect,
    Enrich,
    Score,
}

impl Stage {
    fn entry_status(self) -> CampaignStatus {
        match self {
            Stage::Collect => CampaignStatus::Collecting,
            Stage::Enrich => CampaignStatus::Enriching,
            Stage::Score => CampaignStatus::Scoring,
        }
    }
}

impl Engine {
    pub async fn run(
        &self,
        campaign_id: Uuid,
        source: Arc<dyn LeadSource>,
        enricher: Arc<dyn Enricher>,
        now: DateTime<Utc>,
    ) -> Result<TaskHandle> {
        self.precheck(campaign_id, Stage::Collect).await?;
        let engine = self.clone();
        Ok(self.spawn_task(campaign_id, now, async move {
            engine
                .run_pipeline(campaign_id, source.as_ref(), enricher.as_ref(), now)
                .await
        }))
    }

    pub async fn collect(
        &self,
        campaign_id: Uuid,
        source: Arc<dyn LeadSource>,
        now: DateTime<Utc>,
    ) -> Result<TaskHandle> {
        self.precheck(campaign_id, Stage::Collect).await?;
        let engine = self.clone();
        Ok(self.spawn_task(campaign_id, now, async move {
            let collected = engine.collect_leads(campaign_id, source.as_ref(), now).await?;
            Ok(PipelineSummary {
                collected,
                ..PipelineSummary::default()
            })
        }))
    }

    pub async fn enrich(
        &self,
        campaign_id: Uuid,
        enricher: Arc<dyn Enricher>,
        now: DateTime<Utc>,
    ) -> Result<TaskHandle> {
        self.precheck(campaign_id, Stage::Enrich).await?;
        let engine = self.clone();
        Ok(self.spawn_task(campaign_id, now, async move {
            let enriched = engine
                .enrich_leads(campaign_id, enricher.as_ref(), now)
                .await?;
            Ok(PipelineSummary {
                enriched,
                ..PipelineSummary::default()
            })
        }))
    }

    pub async fn score(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<TaskHandle> {
        self.precheck(campaign_id, Stage::Score).await?;
        let engine = self.clone();
        Ok(self.spawn_task(campaign_id, now, async move {
            engine.score_leads(campaign_id, now).await
        }))
    }

    /// Latest pipeline task for the campaign, if any ran in this process.
    pub fn get_status(&self, campaign_id: Uuid) -> Option<TaskStatus> {
        self.tasks.get(campaign_id)
    }

    pub async fn run_pipeline(
        &self,
        campaign_id: Uuid,
        source: &dyn LeadSource,
        enricher: &dyn Enricher,
        now: DateTime<Utc>,
    ) -> Result<PipelineSummary> {
        let collected = self.collect_leads(campaign_id, source, now).await?;
        let enriched = self.enrich_leads(campaign_id, enricher, now).await?;
        let summary = self.score_leads(campaign_id, now).await?;
        Ok(PipelineSummary {
            collected,
            enriched,
            ..summary
        })
    }

    /// Collect stage: `draft -> collecting`. Businesses the campaign already
    /// holds are skipped, so a re-run only adds new ones.
    pub async fn collect_leads(
        &self,
        campaign_id: Uuid,
        source: &dyn LeadSource,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let campaign = self
            .transition_campaign(campaign_id, CampaignStatus::Collecting, now)
            .await?;
        let drafts = source
            .collect(&campaign)
            .await
            .map_err(|e| EngineError::stage("collect", format!("{e:#}")))?;

        let mut collected = 0usize;
        let mut duplicates = 0usize;
        for draft in drafts {
            if self.store.insert_lead(&draft.into_lead(campaign_id)).await? {
                collected += 1;
            } else {
                duplicates += 1;
            }
        }
        info!(campaign_id = %campaign_id, collected, duplicates, "collect stage finished");
        Ok(collected)
    }

    pub async fn enrich_leads(
        &self,
        campaign_id: Uuid,
        enricher: &dyn Enricher,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.transition_campaign(campaign_id, CampaignStatus::Enriching, now)
            .await?;

        let mut enriched = 0usize;
        for mut lead in self.store.list_leads(campaign_id).await? {
            if lead.status != LeadStatus::New {
                continue;
            }
            let signals = match enricher.enrich(&lead).await {
                Ok(signals) => signals,
                Err(e) => {
                    return Err(EngineError::stage(
                        "enrich",
                        format!("{}: {e:#}", lead.business_name),
                    ))
                }
            };
            lead.signals = signals;
            transition_lead(&mut lead, LeadStatus::Enriched)?;
            self.store.save_lead(&lead).await?;
            enriched += 1;
        }
        info!(campaign_id = %campaign_id, enriched, "enrich stage finished");
        Ok(enriched)
    }

    pub async fn score_leads(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PipelineSummary> {
        let campaign = self
            .transition_campaign(campaign_id, CampaignStatus::Scoring, now)
            .await?;
        let config = campaign.config.validated()?;

        let mut summary = PipelineSummary::default();
        for mut lead in self.store.list_leads(campaign_id).await? {
            if lead.status != LeadStatus::Enriched {
                continue;
            }
            self.apply_score(&mut lead, &config, now)?;
            transition_lead(&mut lead, LeadStatus::Scored)?;
            self.store.save_lead(&lead).await?;
            self.emit_scored(&lead, now);

            summary.scored += 1;
            if let Some(tier) = lead.tier {
                *summary.by_tier.entry(tier.to_string()).or_default() += 1;
            }
            summary.scheduled += self.schedule_lead(&lead, &config, now).await?;
        }

        self.transition_campaign(campaign_id, CampaignStatus::Ready, now)
            .await?;
        info!(
            campaign_id = %campaign_id,
            scored = summary.scored,
            scheduled = summary.scheduled,
            "score stage finished"
        );
        Ok(summary)
    }

    /// Recomputes score, tier and matched keywords. Sets the tier-entry time
    /// only for a lead that has none; tier changes are handled by the caller.
    pub(crate) fn apply_score(
        &self,
        lead: &mut Lead,
        config: &CampaignConfig,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let scored = score_lead(config, &lead.signals)?;
        debug!(
            lead_id = %lead.id,
            total = scored.breakdown.total,
            tier = %scored.tier,
            "lead scored"
        );
        lead.score = Some(scored.breakdown);
        lead.tier = Some(scored.tier);
        lead.matched_keywords = scored.pain_points.matched_keywords.into_iter().collect();
        if lead.tier_entered_at.is_none() {
            lead.tier_entered_at = Some(now);
        }
        Ok(())
    }

    pub(crate) fn emit_scored(&self, lead: &Lead, now: DateTime<Utc>) {
        let tier = lead.tier.map(|t| t.to_string()).unwrap_or_default();
        self.emit(EngineEvent::lead(
            EventType::LeadScored,
            lead.campaign_id,
            lead.id,
            Priority::Low,
            format!(
                "{} scored {:.1} (tier {tier})",
                lead.business_name,
                lead.total_score()
            ),
            now,
        ));
    }

    async fn precheck(&self, campaign_id: Uuid, stage: Stage) -> Result<Campaign> {
        let campaign = self.load_campaign(campaign_id).await?;
        campaign.config.validated()?;
        check_campaign_transition(campaign.status, stage.entry_status())?;
        Ok(campaign)
    }

    fn spawn_task<F>(&self, campaign_id: Uuid, now: DateTime<Utc>, work: F) -> TaskHandle
    where
        F: std::future::Future<Output = Result<PipelineSummary>> + Send + 'static,
    {
        let task_id = self.tasks.start(campaign_id);
        let engine = self.clone();

        let join = tokio::spawn(async move {
            engine
                .tasks
                .set(campaign_id, task_id, TaskState::Started, None);

            let (state, result) = match work.await {
                Ok(summary) => (TaskState::Success, serde_json::to_value(&summary).ok()),
                Err(e) => {
                    engine.fail_campaign(campaign_id, &e, now).await;
                    (
                        TaskState::Failure,
                        Some(serde_json::json!({ "error": e.to_string() })),
                    )
                }
            };

            engine.tasks.set(campaign_id, task_id, state, result.clone());
            TaskStatus {
                task_id,
                status: state,
                result,
            }
        });

        TaskHandle { task_id, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_uses_upper_case_names() {
        let json = serde_json::to_string(&TaskState::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
    }

    #[test]
    fn registry_keeps_latest_task() {
        let registry = TaskRegistry::default();
        let campaign = Uuid::new_v4();
        let first = registry.start(campaign);
        let second = registry.start(campaign);
        assert_ne!(first, second);

        let status = registry.get(campaign).unwrap();
        assert_eq!(status.task_id, second);
        assert_eq!(status.status, TaskState::Pending);
    }
}
