//! Request/response control surface over the controller

use super::controller::CampaignController;
use super::error::ControlError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Log entries returned by `get_logs` when no limit is given
pub const DEFAULT_LOG_LIMIT: usize = 100;

fn default_log_limit() -> usize {
    DEFAULT_LOG_LIMIT
}

/// Commands accepted by [`CampaignController::handle`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    GetState,
    GetStatistics,
    GetLogs {
        #[serde(default = "default_log_limit")]
        limit: usize,
    },
    ClearLogs,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: Value,
}

impl ControlResponse {
    pub fn ok(message: Option<&str>, data: Value) -> Self {
        Self {
            success: true,
            error_code: None,
            message: message.map(str::to_string),
            data,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.to_string()),
            message: Some(message.into()),
            data: Value::Null,
        }
    }
}

impl From<ControlError> for ControlResponse {
    fn from(err: ControlError) -> Self {
        ControlResponse::error(err.code(), err.to_string())
    }
}

fn to_data<T: Serialize>(value: &T) -> ControlResponse {
    match serde_json::to_value(value) {
        Ok(data) => ControlResponse::ok(None, data),
        Err(e) => ControlResponse::error("INTERNAL_ERROR", e.to_string()),
    }
}

impl CampaignController {
    /// Execute one control command
    pub async fn handle(self: &Arc<Self>, command: ControlCommand) -> ControlResponse {
        match command {
            ControlCommand::Start => match self.start().await {
                Ok(()) => ControlResponse::ok(Some("Campaign started"), Value::Null),
                Err(e) => e.into(),
            },
            ControlCommand::Stop => match self.stop().await {
                Ok(()) => ControlResponse::ok(Some("Campaign stopping"), Value::Null),
                Err(e) => e.into(),
            },
            ControlCommand::GetState => to_data(&self.get_state().await),
            ControlCommand::GetStatistics => to_data(&self.get_statistics().await),
            ControlCommand::GetLogs { limit } => to_data(&self.get_logs(limit).await),
            ControlCommand::ClearLogs => {
                self.clear_logs().await;
                ControlResponse::ok(Some("Logs cleared"), Value::Null)
            }
        }
    }
}
