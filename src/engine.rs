use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CampaignConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventEmitter, EventType, Priority};
use crate::models::{Campaign, CampaignStatus, Lead, LeadSignals};
use crate::pipeline::check_campaign_transition;
use crate::runner::TaskRegistry;
use crate::store::Repository;
use crate::templates::RenderedMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadDraft {
    pub business_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub signals: LeadSignals,
}

impl LeadDraft {
    pub fn into_lead(self, campaign_id: Uuid) -> Lead {
        Lead::new(campaign_id, self.business_name, self.email, self.signals)
    }
}

/// Collection stage boundary: finds raw leads for a campaign.
#[async_trait]
pub trait LeadSource: Send + Sync {
    async fn collect(&self, campaign: &Campaign) -> anyhow::Result<Vec<LeadDraft>>;
}

/// Enrichment stage boundary: returns the lead's full signal set.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, lead: &Lead) -> anyhow::Result<LeadSignals>;
}

/// Outbound transport boundary.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, message: &RenderedMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticLeadSource {
    drafts: Vec<LeadDraft>,
}

impl StaticLeadSource {
    pub fn new(drafts: Vec<LeadDraft>) -> Self {
        Self { drafts }
    }
}

#[async_trait]
impl LeadSource for StaticLeadSource {
    async fn collect(&self, _campaign: &Campaign) -> anyhow::Result<Vec<LeadDraft>> {
        Ok(self.drafts.clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEnricher;

#[async_trait]
impl Enricher for PassthroughEnricher {
    async fn enrich(&self, lead: &Lead) -> anyhow::Result<LeadSignals> {
        Ok(lead.signals.clone())
    }
}

/// Cheap to clone; background pipeline tasks hold their own clone. The daily
/// send cap is counted in the repository, so engines sharing a store share it.
#[derive(Clone)]
pub struct Engine {
    pub(crate) store: Arc<dyn Repository>,
    pub(crate) events: Arc<dyn EventEmitter>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) tasks: Arc<TaskRegistry>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Repository>,
        events: Arc<dyn EventEmitter>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            events,
            mailer,
            tasks: Arc::new(TaskRegistry::default()),
        }
    }

    /// Validates `config` and stores a new draft campaign with the normalized copy.
    pub async fn create_campaign(
        &self,
        name: &str,
        config: &CampaignConfig,
        now: DateTime<Utc>,
    ) -> Result<Campaign> {
        let campaign = Campaign::new(name, config.validated()?, now);
        self.store.save_campaign(&campaign).await?;
        info!(campaign_id = %campaign.id, name, "campaign created");
        Ok(campaign)
    }

    pub(crate) async fn load_campaign(&self, id: Uuid) -> Result<Campaign> {
        self.store
            .get_campaign(id)
            .await?
            .ok_or_else(|| EngineError::not_found("campaign", id))
    }

    pub(crate) async fn load_lead(&self, id: Uuid) -> Result<Lead> {
        self.store
            .get_lead(id)
            .await?
            .ok_or_else(|| EngineError::not_found("lead", id))
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }

    pub async fn transition_campaign(
        &self,
        campaign_id: Uuid,
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> Result<Campaign> {
        let mut campaign = self.load_campaign(campaign_id).await?;
        let from = campaign.status;
        check_campaign_transition(from, to)?;

        campaign.status = to;
        self.store.save_campaign(&campaign).await?;
        info!(campaign_id = %campaign_id, %from, %to, "campaign status changed");

        self.emit(EngineEvent::campaign(
            EventType::CampaignStageChanged,
            campaign_id,
            Priority::Normal,
            format!("{from} -> {to}"),
            now,
        ));
        Ok(campaign)
    }

    pub(crate) async fn fail_campaign(
        &self,
        campaign_id: Uuid,
        error: &EngineError,
        now: DateTime<Utc>,
    ) {
        warn!(campaign_id = %campaign_id, error = %error, "pipeline stage failed");

        match self.load_campaign(campaign_id).await {
            Ok(mut campaign) if campaign.status.can_transition_to(CampaignStatus::Failed) => {
                campaign.status = CampaignStatus::Failed;
                if let Err(e) = self.store.save_campaign(&campaign).await {
                    warn!(campaign_id = %campaign_id, error = %e, "could not persist failed status");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(campaign_id = %campaign_id, error = %e, "could not load failed campaign"),
        }

        self.emit(EngineEvent::campaign(
            EventType::CampaignFailed,
            campaign_id,
            Priority::High,
            error.to_string(),
            now,
        ));
    }
}
