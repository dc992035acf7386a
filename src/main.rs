use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use icp_outreach_engine::config::{CampaignConfig, Settings};
use icp_outreach_engine::db::{self, PgStore};
use icp_outreach_engine::engine::{Engine, LeadDraft, Mailer, PassthroughEnricher, StaticLeadSource};
use icp_outreach_engine::events::TracingEmitter;
use icp_outreach_engine::models::{CampaignStatus, LeadStatus, SequenceTemplate, Tier};
use icp_outreach_engine::report;
use icp_outreach_engine::store::Repository;
use icp_outreach_engine::templates::RenderedMessage;

#[derive(Parser)]
#[command(name = "icp-outreach")]
#[command(about = "ICP lead scoring and tiered outreach scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo campaign with a few leads
    Seed,
    /// Create a draft campaign from a JSON config
    CreateCampaign {
        #[arg(long)]
        name: String,
        #[arg(long)]
        config: PathBuf,
    },
    /// Collect, enrich and score leads from a JSON file of lead drafts
    Run {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long)]
        leads: PathBuf,
    },
    /// Move a campaign to another lifecycle status
    SetStatus {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long)]
        status: CampaignStatus,
    },
    /// Replace a campaign's config and re-score its leads
    Republish {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long)]
        config: PathBuf,
    },
    /// List leads by score
    Score {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run one dispatch cycle for an active campaign
    Dispatch {
        #[arg(long)]
        campaign: Uuid,
    },
    /// Approve a pending send (semi-auto campaigns)
    Approve {
        #[arg(long)]
        send: Uuid,
    },
    /// Record a lead status change
    LeadStatus {
        #[arg(long)]
        lead: Uuid,
        #[arg(long)]
        status: LeadStatus,
    },
    /// Send one template to a lead now
    Send {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long)]
        lead: Uuid,
        #[arg(long)]
        template: SequenceTemplate,
    },
    /// Send one template to every contactable lead of a tier
    RunSequence {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long)]
        tier: Tier,
        #[arg(long)]
        template: SequenceTemplate,
    },
    /// Render a template for a lead without sending it
    Preview {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long)]
        lead: Uuid,
        #[arg(long)]
        template: SequenceTemplate,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

/// Writes outgoing messages to the log; delivery providers plug in here.
struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, message: &RenderedMessage) -> anyhow::Result<()> {
        let to = message
            .to_email
            .as_deref()
            .context("message has no recipient")?;
        info!(to, subject = %message.subject, "outreach message queued for delivery");
        Ok(())
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "icp_outreach_engine=info,icp_outreach=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let store = PgStore::connect(&settings)
        .await
        .context("failed to connect to Postgres")?;
    let engine = Engine::new(
        Arc::new(store.clone()),
        Arc::new(TracingEmitter),
        Arc::new(LogMailer),
    );
    let now = Utc::now();

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let campaign_id = db::seed(&store, now).await?;
            println!("Seeded demo campaign {campaign_id}.");
        }
        Commands::CreateCampaign { name, config } => {
            let config = CampaignConfig::from_path(&config)
                .with_context(|| format!("failed to read config {}", config.display()))?;
            let campaign = engine.create_campaign(&name, &config, now).await?;
            println!("Created campaign {}.", campaign.id);
        }
        Commands::Run { campaign, leads } => {
            let raw = std::fs::read_to_string(&leads)
                .with_context(|| format!("failed to read {}", leads.display()))?;
            let drafts: Vec<LeadDraft> = serde_json::from_str(&raw)?;
            let handle = engine
                .run(
                    campaign,
                    Arc::new(StaticLeadSource::new(drafts)),
                    Arc::new(PassthroughEnricher),
                    now,
                )
                .await?;
            println!("Started task {}.", handle.task_id);
            let status = handle.wait().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::SetStatus { campaign, status } => {
            let campaign = engine.transition_campaign(campaign, status, now).await?;
            println!("Campaign {} is now {}.", campaign.id, campaign.status);
        }
        Commands::Republish { campaign, config } => {
            let config = CampaignConfig::from_path(&config)
                .with_context(|| format!("failed to read config {}", config.display()))?;
            let campaign = engine.republish_config(campaign, &config, now).await?;
            println!("Republished config for {}.", campaign.id);
        }
        Commands::Score { campaign, limit } => {
            let mut leads = store.list_leads(campaign).await?;
            leads.retain(|lead| lead.score.is_some());
            if leads.is_empty() {
                println!("No scored leads for this campaign.");
                return Ok(());
            }
            leads.sort_by(|a, b| {
                b.total_score()
                    .partial_cmp(&a.total_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            println!("Top leads by ICP score:");
            for lead in leads.iter().take(limit) {
                println!(
                    "- {} ({}) tier {} score {:.1}",
                    lead.business_name,
                    lead.status,
                    lead.tier.map(|t| t.to_string()).unwrap_or_default(),
                    lead.total_score()
                );
            }
        }
        Commands::Dispatch { campaign } => {
            let report = engine.dispatch_due(campaign, now).await?;
            println!(
                "Sent {}, failed {}, rolled over {}, awaiting action {}.",
                report.sent, report.failed, report.rolled_over, report.awaiting_action
            );
        }
        Commands::Approve { send } => {
            if engine.approve_send(send).await? {
                println!("Approved send {send}.");
            } else {
                println!("Send {send} is no longer pending.");
            }
        }
        Commands::LeadStatus { lead, status } => {
            let lead = engine.set_lead_status(lead, status, now).await?;
            println!("{} is now {}.", lead.business_name, lead.status);
        }
        Commands::Send {
            campaign,
            lead,
            template,
        } => {
            let outcome = engine.send(campaign, lead, template, now).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Commands::RunSequence {
            campaign,
            tier,
            template,
        } => {
            let report = engine.run_sequence(campaign, tier, template, now).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Preview {
            campaign,
            lead,
            template,
        } => {
            let message = engine.preview(campaign, lead, template).await?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        Commands::Report { campaign, out } => {
            let record = store
                .get_campaign(campaign)
                .await?
                .with_context(|| format!("campaign {campaign} not found"))?;
            let leads = store.list_leads(campaign).await?;
            let sends = store.list_sends(campaign).await?;
            let report = report::build_report(&record, &leads, &sends, now);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
