pub mod error;
pub mod handlers;
pub mod memory_store;
pub mod pg_store;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use error::TicketError;
pub use handlers::configure_tickets_routes;
pub use memory_store::MemoryTicketStore;
pub use pg_store::PgTicketStore;
pub use store::{
    ClassificationStats, ClassificationUpdate, DailyCount, Page, TicketFilter, TicketStats,
    TicketStore,
};

pub const SUBJECT_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [Self; 4] = [Self::Open, Self::InProgress, Self::Resolved, Self::Closed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
            Self::Closed => "Closed",
        }
    }
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TicketError::Validation(format!("Unknown status: {s}")))
    }
}

/// The fixed classification taxonomy. A ticket's category is always one of
/// these values or null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    TechnicalSupport,
    BillingInquiry,
    FeatureRequest,
    BugReport,
    AccountAccess,
    GeneralInquiry,
    Complaint,
    HardwareIssue,
    SoftwareIssue,
    NetworkConnectivity,
}

impl TicketCategory {
    pub const ALL: [Self; 10] = [
        Self::TechnicalSupport,
        Self::BillingInquiry,
        Self::FeatureRequest,
        Self::BugReport,
        Self::AccountAccess,
        Self::GeneralInquiry,
        Self::Complaint,
        Self::HardwareIssue,
        Self::SoftwareIssue,
        Self::NetworkConnectivity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TechnicalSupport => "technical_support",
            Self::BillingInquiry => "billing_inquiry",
            Self::FeatureRequest => "feature_request",
            Self::BugReport => "bug_report",
            Self::AccountAccess => "account_access",
            Self::GeneralInquiry => "general_inquiry",
            Self::Complaint => "complaint",
            Self::HardwareIssue => "hardware_issue",
            Self::SoftwareIssue => "software_issue",
            Self::NetworkConnectivity => "network_connectivity",
        }
    }

    /// One-line meaning, as presented to the model.
    pub fn description(self) -> &'static str {
        match self {
            Self::TechnicalSupport => "General technical help or guidance",
            Self::BillingInquiry => "Questions about billing, payments, invoices",
            Self::FeatureRequest => "Requests for new features or enhancements",
            Self::BugReport => "Reports of software bugs or issues",
            Self::AccountAccess => "Problems logging in or accessing accounts",
            Self::GeneralInquiry => "General questions or information requests",
            Self::Complaint => "Customer complaints or dissatisfaction",
            Self::HardwareIssue => "Problems with physical hardware",
            Self::SoftwareIssue => "Problems with software functionality",
            Self::NetworkConnectivity => "Internet or network connection problems",
        }
    }

    /// Canned rationale attached to synthetic classifications.
    pub fn fallback_explanation(self) -> &'static str {
        match self {
            Self::TechnicalSupport => {
                "Appears to be a technical support request based on keywords."
            }
            Self::BillingInquiry => "Contains billing or payment related terminology.",
            Self::FeatureRequest => "User is requesting a new feature or enhancement.",
            Self::BugReport => "Describes unexpected behavior or system errors.",
            Self::AccountAccess => "User having trouble accessing their account.",
            Self::GeneralInquiry => "General question or information request.",
            Self::Complaint => "Expresses dissatisfaction with service or product.",
            Self::HardwareIssue => "Describes problems with physical hardware.",
            Self::SoftwareIssue => "Reports software functionality problems.",
            Self::NetworkConnectivity => "Network or connectivity related issue.",
        }
    }
}

impl fmt::Display for TicketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketCategory {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| TicketError::Validation(format!("Unknown category: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub subject: String,
    pub body: String,
    pub status: TicketStatus,
    pub category: Option<TicketCategory>,
    pub explanation: Option<String>,
    pub confidence: Option<f64>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn is_classified(&self) -> bool {
        self.category.is_some()
    }

    pub fn has_note(&self) -> bool {
        self.note
            .as_deref()
            .map(|note| !note.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTicket {
    pub subject: String,
    pub body: String,
}

impl NewTicket {
    pub fn validate(&self) -> Result<(), TicketError> {
        if self.subject.trim().is_empty() {
            return Err(TicketError::Validation("The subject field is required.".into()));
        }
        if self.subject.chars().count() > SUBJECT_MAX_CHARS {
            return Err(TicketError::Validation(format!(
                "The subject may not be greater than {SUBJECT_MAX_CHARS} characters."
            )));
        }
        if self.body.trim().is_empty() {
            return Err(TicketError::Validation("The body field is required.".into()));
        }
        Ok(())
    }
}

/// Staff-editable fields. For `category` and `note` the outer `Option` is
/// "was the field sent" and the inner one is the value, so an explicit JSON
/// `null` clears the column.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TicketPatch {
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default, deserialize_with = "present")]
    pub category: Option<Option<TicketCategory>>,
    #[serde(default, deserialize_with = "present")]
    pub note: Option<Option<String>>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.category.is_none() && self.note.is_none()
    }
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub fn round_confidence(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn parse_ticket_id(raw: &str) -> Result<Uuid, TicketError> {
    Uuid::parse_str(raw).map_err(|_| TicketError::NotFound(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_str() {
        for category in TicketCategory::ALL {
            assert_eq!(category.as_str().parse::<TicketCategory>().ok(), Some(category));
        }
        assert!("not_a_real_category".parse::<TicketCategory>().is_err());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(TicketStatus::InProgress.label(), "In Progress");
        assert_eq!(TicketStatus::default(), TicketStatus::Open);
        assert!(matches!(
            "pending".parse::<TicketStatus>(),
            Err(TicketError::Validation(_))
        ));
    }

    #[test]
    fn test_patch_distinguishes_null_from_missing() {
        let patch: TicketPatch = serde_json::from_str(r#"{"category": null}"#).unwrap();
        assert_eq!(patch.category, Some(None));
        assert_eq!(patch.note, None);

        let patch: TicketPatch =
            serde_json::from_str(r#"{"category": "bug_report", "note": "call back"}"#).unwrap();
        assert_eq!(patch.category, Some(Some(TicketCategory::BugReport)));
        assert_eq!(patch.note, Some(Some("call back".to_string())));

        let patch: TicketPatch = serde_json::from_str("{}").unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_patch_rejects_unknown_category() {
        let result = serde_json::from_str::<TicketPatch>(r#"{"category": "printer"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_ticket_validation() {
        let ok = NewTicket {
            subject: "Can't log in".into(),
            body: "Password reset link expired".into(),
        };
        assert!(ok.validate().is_ok());

        let blank = NewTicket {
            subject: "   ".into(),
            body: "x".into(),
        };
        assert!(matches!(blank.validate(), Err(TicketError::Validation(_))));

        let long = NewTicket {
            subject: "a".repeat(SUBJECT_MAX_CHARS + 1),
            body: "x".into(),
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_has_note_ignores_whitespace() {
        let mut ticket = Ticket {
            id: Uuid::now_v7(),
            subject: "s".into(),
            body: "b".into(),
            status: TicketStatus::Open,
            category: None,
            explanation: None,
            confidence: None,
            note: Some("  ".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!ticket.has_note());
        ticket.note = Some("escalated".into());
        assert!(ticket.has_note());
        assert!(!ticket.is_classified());
    }

    #[test]
    fn test_round_confidence() {
        assert_eq!(round_confidence(0.876), 0.88);
        assert_eq!(round_confidence(0.7), 0.7);
    }
}
