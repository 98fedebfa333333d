use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::resource::HandlerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ready,
    Running,
    Finished,
    Failed,
}

impl ExecutionStatus {
    /// Ready and running executions count against the parallelism limit.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ExecutionStatus::Ready | ExecutionStatus::Running)
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ExecutionStatus::Ready => write!(f, "ready"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Finished => write!(f, "finished"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Task chain an execution runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImportAction {
    Import,
    Copy,
}

impl Display for ImportAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ImportAction::Import => write!(f, "import"),
            ImportAction::Copy => write!(f, "copy"),
        }
    }
}

impl FromStr for ImportAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "import" | "upload" => Ok(ImportAction::Import),
            "copy" => Ok(ImportAction::Copy),
            _ => Err(anyhow::anyhow!("Invalid action: {}", s)),
        }
    }
}

/// Persistent record of one multi-step import or copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub exec_id: Uuid,
    pub user: String,
    pub name: Option<String>,
    pub status: ExecutionStatus,
    /// Step currently running (or the last one that ran).
    pub step: Option<String>,
    pub func_name: Option<String>,
    pub action: ImportAction,
    pub input_params: serde_json::Value,
    pub output_params: serde_json::Value,
    pub log: Option<String>,
    pub handler: Option<HandlerKind>,
    pub resource_id: Option<Uuid>,
    /// Steps that finished, in execution order.
    pub tasks: Vec<String>,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ExecutionRequest {
    pub fn new(
        user: impl Into<String>,
        action: ImportAction,
        func_name: impl Into<String>,
        input_params: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            exec_id: Uuid::new_v4(),
            user: user.into(),
            name: None,
            status: ExecutionStatus::Ready,
            step: None,
            func_name: Some(func_name.into()),
            action,
            input_params,
            output_params: serde_json::Value::Object(Default::default()),
            log: None,
            handler: None,
            resource_id: None,
            tasks: Vec::new(),
            created: now,
            last_updated: now,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExecutionRequestResponse {
    pub exec_id: Uuid,
    pub user: String,
    pub name: Option<String>,
    pub status: ExecutionStatus,
    pub step: Option<String>,
    pub action: ImportAction,
    #[schema(value_type = Object)]
    pub input_params: serde_json::Value,
    #[schema(value_type = Object)]
    pub output_params: serde_json::Value,
    pub log: Option<String>,
    pub handler: Option<HandlerKind>,
    pub resource_id: Option<Uuid>,
    pub tasks: Vec<String>,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl From<ExecutionRequest> for ExecutionRequestResponse {
    fn from(req: ExecutionRequest) -> Self {
        ExecutionRequestResponse {
            exec_id: req.exec_id,
            user: req.user,
            name: req.name,
            status: req.status,
            step: req.step,
            action: req.action,
            input_params: req.input_params,
            output_params: req.output_params,
            log: req.log,
            handler: req.handler,
            resource_id: req.resource_id,
            tasks: req.tasks,
            created: req.created,
            last_updated: req.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_statuses() {
        assert!(ExecutionStatus::Ready.is_in_flight());
        assert!(ExecutionStatus::Running.is_in_flight());
        assert!(!ExecutionStatus::Finished.is_in_flight());
        assert!(!ExecutionStatus::Failed.is_in_flight());
    }

    #[test]
    fn new_request_is_ready() {
        let req = ExecutionRequest::new(
            "alice",
            ImportAction::Import,
            "start_import",
            serde_json::json!({}),
        );
        assert_eq!(req.status, ExecutionStatus::Ready);
        assert!(req.tasks.is_empty());
        assert_eq!("upload".parse::<ImportAction>().unwrap(), ImportAction::Import);
    }
}
