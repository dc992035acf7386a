//! ICP lead scoring and tier-based outreach sequencing.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod outreach;
pub mod pain_points;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod scoring;
pub mod store;
pub mod templates;
pub mod tier;

pub use config::CampaignConfig;
pub use engine::{Engine, Enricher, LeadDraft, LeadSource, Mailer};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventEmitter, EventType};
pub use models::{Campaign, Lead, LeadStatus, ScheduledSend, SendStatus, Tier};
pub use store::{MemoryStore, Repository};
