use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the scoring and outreach engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed weights, thresholds, size ranges or outreach settings.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A state machine refused the requested move; state is unchanged.
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A scheduled send already exists for this lead and step.
    #[error("send already scheduled for lead {lead_id} step {step_index}")]
    SchedulingConflict { lead_id: Uuid, step_index: u32 },

    #[error("dispatch failure: {0}")]
    DispatchFailure(String),

    #[error("{stage} stage failed: {message}")]
    Stage { stage: &'static str, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn stage(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_both_states() {
        let err = EngineError::invalid_transition("campaign", "active", "collecting");
        assert_eq!(
            err.to_string(),
            "invalid campaign transition: active -> collecting"
        );
    }

    #[test]
    fn stage_error_display() {
        let err = EngineError::stage("enrich", "upstream timed out");
        assert_eq!(err.to_string(), "enrich stage failed: upstream timed out");
    }
}
