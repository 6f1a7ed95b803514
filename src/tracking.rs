use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::context::EvaluationContext;
use crate::eval::EvaluationResult;
use crate::flag::Flag;
use crate::flag_value::ServedValue;

/// A record of one evaluation, handed to an [EvaluationTracker].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationEvent {
    pub platform: String,
    pub environment: String,
    pub flag_key: String,
    pub served_value: ServedValue,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl EvaluationEvent {
    /// Describe an evaluation for tracking. Evaluations without a user id are not tracked.
    pub fn from_evaluation(
        flag: &Flag,
        context: &EvaluationContext,
        result: &EvaluationResult,
    ) -> Option<Self> {
        let user_id = context.user_id()?;
        Some(EvaluationEvent {
            platform: flag.platform.clone(),
            environment: flag.environment.clone(),
            flag_key: flag.flag_key.clone(),
            served_value: result.served_value,
            user_id: user_id.to_string(),
            country: context.country().map(str::to_string),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TrackingError {
    #[error("tracking backend unavailable: {0}")]
    Unavailable(String),
    #[error("evaluation record rejected: {0}")]
    Rejected(String),
}

/// Sink for evaluation telemetry, typically backed by an analytics table or queue.
#[async_trait]
pub trait EvaluationTracker: Send + Sync {
    async fn record_evaluation(&self, event: EvaluationEvent) -> Result<(), TrackingError>;
}

/// Record `event` on a detached task.
///
/// Returns immediately. The task runs to completion on its own; a failure is logged and
/// dropped, never retried. Outside a tokio runtime the event is dropped with a warning.
pub fn dispatch(tracker: Arc<dyn EvaluationTracker>, event: EvaluationEvent) {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(e) => {
            warn!(
                "dropping evaluation event for {}: no tokio runtime ({})",
                event.flag_key, e
            );
            return;
        }
    };

    handle.spawn(async move {
        let flag_key = event.flag_key.clone();
        match tracker.record_evaluation(event).await {
            Ok(()) => debug!("recorded evaluation of {}", flag_key),
            Err(e) => warn!("failed to record evaluation of {}: {}", flag_key, e),
        }
    });
}
