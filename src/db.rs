use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::config::{CampaignConfig, Settings};
use crate::engine::LeadDraft;
use crate::error::{EngineError, Result};
use crate::models::{
    Campaign, Lead, LeadSignals, ScheduledSend, ScoreBreakdown, SendStatus,
};
use crate::store::Repository;

const SEND_COLUMNS: &str = "id, lead_id, campaign_id, step_index, template, scheduled_at, \
                            status, approved, sent_at";

const LEAD_COLUMNS: &str = "id, campaign_id, business_name, email, signals, score, \
                            matched_keywords, tier, tier_entered_at, sequence_base, status";

const LEAD_INSERT: &str = r#"
    INSERT INTO icp_outreach.leads
    (id, campaign_id, source_key, business_name, email, signals, score,
     matched_keywords, tier, tier_entered_at, sequence_base, status)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(store: &PgStore, now: DateTime<Utc>) -> anyhow::Result<Uuid> {
    let config = CampaignConfig::from_json_str(include_str!("../demos/campaign.json"))?
        .validated()?;
    let drafts: Vec<LeadDraft> = serde_json::from_str(include_str!("../demos/leads.json"))?;

    let campaign = Campaign::new("Austin dental clinics", config, now);
    store.save_campaign(&campaign).await?;
    for draft in drafts {
        store.insert_lead(&draft.into_lead(campaign.id)).await?;
    }

    Ok(campaign.id)
}

fn campaign_from_row(row: &PgRow) -> Result<Campaign> {
    let status: String = row.try_get("status")?;
    let config: Json<CampaignConfig> = row.try_get("config")?;
    Ok(Campaign {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: status.parse()?,
        config: config.0,
        created_at: row.try_get("created_at")?,
    })
}

fn lead_from_row(row: &PgRow) -> Result<Lead> {
    let signals: Json<LeadSignals> = row.try_get("signals")?;
    let score: Option<Json<ScoreBreakdown>> = row.try_get("score")?;
    let tier: Option<String> = row.try_get("tier")?;
    let status: String = row.try_get("status")?;
    let sequence_base: i32 = row.try_get("sequence_base")?;
    Ok(Lead {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        business_name: row.try_get("business_name")?,
        email: row.try_get("email")?,
        signals: signals.0,
        score: score.map(|s| s.0),
        matched_keywords: row.try_get("matched_keywords")?,
        tier: tier.map(|t| t.parse()).transpose()?,
        tier_entered_at: row.try_get("tier_entered_at")?,
        sequence_base: u32::try_from(sequence_base).map_err(|_| {
            EngineError::invalid_config(format!("negative sequence base {sequence_base}"))
        })?,
        status: status.parse()?,
    })
}

fn bind_lead<'q>(
    query: Query<'q, Postgres, PgArguments>,
    lead: &'q Lead,
) -> Result<Query<'q, Postgres, PgArguments>> {
    let sequence_base = i32::try_from(lead.sequence_base).map_err(|_| {
        EngineError::invalid_config(format!("sequence base {} out of range", lead.sequence_base))
    })?;
    Ok(query
        .bind(lead.id)
        .bind(lead.campaign_id)
        .bind(lead.source_key())
        .bind(&lead.business_name)
        .bind(&lead.email)
        .bind(Json(&lead.signals))
        .bind(lead.score.map(Json))
        .bind(&lead.matched_keywords)
        .bind(lead.tier.map(|t| t.as_str()))
        .bind(lead.tier_entered_at)
        .bind(sequence_base)
        .bind(lead.status.as_str()))
}

fn send_from_row(row: &PgRow) -> Result<ScheduledSend> {
    let step_index: i32 = row.try_get("step_index")?;
    let template: String = row.try_get("template")?;
    let status: String = row.try_get("status")?;
    Ok(ScheduledSend {
        id: row.try_get("id")?,
        lead_id: row.try_get("lead_id")?,
        campaign_id: row.try_get("campaign_id")?,
        step_index: u32::try_from(step_index).map_err(|_| {
            EngineError::invalid_config(format!("negative step index {step_index}"))
        })?,
        template: template.parse()?,
        scheduled_at: row.try_get("scheduled_at")?,
        status: status.parse()?,
        approved: row.try_get("approved")?,
        sent_at: row.try_get("sent_at")?,
    })
}

#[async_trait]
impl Repository for PgStore {
    async fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO icp_outreach.campaigns (id, name, status, config, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, status = EXCLUDED.status, config = EXCLUDED.config
            "#,
        )
        .bind(campaign.id)
        .bind(&campaign.name)
        .bind(campaign.status.as_str())
        .bind(Json(&campaign.config))
        .bind(campaign.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        let row = sqlx::query(
            "SELECT id, name, status, config, created_at FROM icp_outreach.campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<bool> {
        let sql = format!("{LEAD_INSERT} ON CONFLICT (campaign_id, source_key) DO NOTHING");
        let result = bind_lead(sqlx::query(&sql), lead)?
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn save_lead(&self, lead: &Lead) -> Result<()> {
        let sql = format!(
            "{LEAD_INSERT} ON CONFLICT (id) DO UPDATE \
             SET business_name = EXCLUDED.business_name, \
                 email = EXCLUDED.email, \
                 signals = EXCLUDED.signals, \
                 score = EXCLUDED.score, \
                 matched_keywords = EXCLUDED.matched_keywords, \
                 tier = EXCLUDED.tier, \
                 tier_entered_at = EXCLUDED.tier_entered_at, \
                 sequence_base = EXCLUDED.sequence_base, \
                 status = EXCLUDED.status"
        );
        bind_lead(sqlx::query(&sql), lead)?
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        let query = format!("SELECT {LEAD_COLUMNS} FROM icp_outreach.leads WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }

    async fn list_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>> {
        let query = format!(
            "SELECT {LEAD_COLUMNS} FROM icp_outreach.leads WHERE campaign_id = $1 ORDER BY position"
        );
        let rows = sqlx::query(&query)
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(lead_from_row).collect()
    }

    async fn insert_send(&self, send: &ScheduledSend) -> Result<()> {
        let step_index = i32::try_from(send.step_index).map_err(|_| {
            EngineError::invalid_config(format!("step index {} out of range", send.step_index))
        })?;
        let result = sqlx::query(
            r#"
            INSERT INTO icp_outreach.scheduled_sends
            (id, lead_id, campaign_id, step_index, template, scheduled_at, status, approved, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (lead_id, step_index) DO NOTHING
            "#,
        )
        .bind(send.id)
        .bind(send.lead_id)
        .bind(send.campaign_id)
        .bind(step_index)
        .bind(send.template.as_str())
        .bind(send.scheduled_at)
        .bind(send.status.as_str())
        .bind(send.approved)
        .bind(send.sent_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::SchedulingConflict {
                lead_id: send.lead_id,
                step_index: send.step_index,
            });
        }
        Ok(())
    }

    async fn get_send(&self, id: Uuid) -> Result<Option<ScheduledSend>> {
        let query = format!("SELECT {SEND_COLUMNS} FROM icp_outreach.scheduled_sends WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(send_from_row).transpose()
    }

    async fn list_sends(&self, campaign_id: Uuid) -> Result<Vec<ScheduledSend>> {
        let query = format!(
            "SELECT {SEND_COLUMNS} FROM icp_outreach.scheduled_sends \
             WHERE campaign_id = $1 ORDER BY scheduled_at, lead_id, step_index"
        );
        let rows = sqlx::query(&query)
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(send_from_row).collect()
    }

    async fn list_sends_for_lead(&self, lead_id: Uuid) -> Result<Vec<ScheduledSend>> {
        let query = format!(
            "SELECT {SEND_COLUMNS} FROM icp_outreach.scheduled_sends \
             WHERE lead_id = $1 ORDER BY step_index"
        );
        let rows = sqlx::query(&query)
            .bind(lead_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(send_from_row).collect()
    }

    async fn list_pending_sends(&self, campaign_id: Uuid) -> Result<Vec<ScheduledSend>> {
        let query = format!(
            "SELECT {SEND_COLUMNS} FROM icp_outreach.scheduled_sends \
             WHERE campaign_id = $1 AND status = 'pending' \
             ORDER BY scheduled_at, lead_id, step_index"
        );
        let rows = sqlx::query(&query)
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(send_from_row).collect()
    }

    async fn transition_send(
        &self,
        id: Uuid,
        from: SendStatus,
        to: SendStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE icp_outreach.scheduled_sends
            SET status = $3,
                sent_at = CASE WHEN $3 = 'sent' THEN $4 ELSE sent_at END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn approve_send(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE icp_outreach.scheduled_sends SET approved = TRUE \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel_pending_for_lead(&self, lead_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE icp_outreach.scheduled_sends SET status = 'cancelled' \
             WHERE lead_id = $1 AND status = 'pending'",
        )
        .bind(lead_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn sends_used_on(&self, campaign_id: Uuid, day: NaiveDate) -> Result<u32> {
        let used: Option<i32> = sqlx::query_scalar(
            "SELECT used FROM icp_outreach.daily_send_counts WHERE campaign_id = $1 AND day = $2",
        )
        .bind(campaign_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(used.map_or(0, |n| u32::try_from(n).unwrap_or(0)))
    }

    async fn reserve_send_slot(
        &self,
        campaign_id: Uuid,
        day: NaiveDate,
        limit: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO icp_outreach.daily_send_counts AS counts (campaign_id, day, used)
            VALUES ($1, $2, 1)
            ON CONFLICT (campaign_id, day) DO UPDATE
            SET used = counts.used + 1
            WHERE counts.used < $3
            "#,
        )
        .bind(campaign_id)
        .bind(day)
        .bind(i32::try_from(limit).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_send_slot(&self, campaign_id: Uuid, day: NaiveDate) -> Result<()> {
        sqlx::query(
            "UPDATE icp_outreach.daily_send_counts SET used = GREATEST(used - 1, 0) \
             WHERE campaign_id = $1 AND day = $2",
        )
        .bind(campaign_id)
        .bind(day)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
