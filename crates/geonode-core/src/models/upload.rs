use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of an upload session mirrored from the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    Pending,
    Running,
    Waiting,
    Complete,
    Processed,
    Invalid,
}

impl Display for UploadState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadState::Pending => write!(f, "PENDING"),
            UploadState::Running => write!(f, "RUNNING"),
            UploadState::Waiting => write!(f, "WAITING"),
            UploadState::Complete => write!(f, "COMPLETE"),
            UploadState::Processed => write!(f, "PROCESSED"),
            UploadState::Invalid => write!(f, "INVALID"),
        }
    }
}

impl FromStr for UploadState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(UploadState::Pending),
            "RUNNING" => Ok(UploadState::Running),
            "WAITING" => Ok(UploadState::Waiting),
            "COMPLETE" => Ok(UploadState::Complete),
            "PROCESSED" => Ok(UploadState::Processed),
            "INVALID" => Ok(UploadState::Invalid),
            _ => Err(anyhow::anyhow!("Invalid upload state: {}", s)),
        }
    }
}

/// Upload session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub user: String,
    pub name: String,
    pub state: UploadState,
    /// Importer session id, once one was opened.
    pub import_id: Option<i64>,
    pub resource_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub resume_url: Option<String>,
    pub date: DateTime<Utc>,
    pub complete: bool,
}

impl Upload {
    pub fn new(user: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            name: name.into(),
            state: UploadState::Pending,
            import_id: None,
            resource_id: None,
            execution_id: None,
            resume_url: None,
            date: Utc::now(),
            complete: false,
        }
    }

    /// Processed sessions are kept regardless of age.
    pub fn is_processed(&self) -> bool {
        self.state == UploadState::Processed
    }

    pub fn is_expired(&self, now: DateTime<Utc>, expiry_hours: i64) -> bool {
        now.signed_duration_since(self.date) > chrono::Duration::hours(expiry_hours)
    }
}
