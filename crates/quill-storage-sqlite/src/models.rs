//! Database models

use serde::{Deserialize, Serialize};

/// Client record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Client ID
    pub id: Option<i64>,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Company name
    pub company: Option<String>,
    /// Archived flag
    pub archived: bool,
    /// Created timestamp
    pub created_at: i64,
}

/// Project record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project ID
    pub id: Option<i64>,
    /// Owning client ID
    pub client_id: i64,
    /// Project title
    pub title: String,
    /// Billing currency code
    pub currency: String,
    /// Created timestamp
    pub created_at: i64,
}

/// Proposal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Still being drafted
    Draft,
    /// Sent to the client
    Sent,
    /// Accepted by the client
    Accepted,
    /// Declined by the client
    Declined,
}

impl ProposalStatus {
    /// Stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    /// Parse stored string form
    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "accepted" => Self::Accepted,
            "declined" => Self::Declined,
            _ => Self::Draft,
        }
    }
}

/// Proposal record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Proposal ID
    pub id: Option<i64>,
    /// Owning project ID
    pub project_id: i64,
    /// Proposal body text
    pub body: String,
    /// Word count of the body
    pub word_count: i64,
    /// Lifecycle status
    pub status: ProposalStatus,
    /// Created timestamp
    pub created_at: i64,
}

/// Application setting row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSetting {
    /// Setting key
    pub key: String,
    /// Setting value
    pub value: String,
}
