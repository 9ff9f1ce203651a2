use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{NewTicket, Ticket, TicketCategory, TicketError, TicketPatch, TicketStatus};

pub const DEFAULT_PER_PAGE: u32 = 15;
pub const MAX_PER_PAGE: u32 = 100;
pub const RECENT_ACTIVITY_DAYS: i64 = 7;

/// Persistence surface for tickets.
///
/// `apply_classification` is the only path a classification run may use to
/// write a ticket. Implementations must evaluate "set category only if it is
/// currently null" against the stored row at write time, in a single atomic
/// step, so two concurrent runs can never overwrite each other's category.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn create(&self, new: NewTicket) -> Result<Ticket, TicketError>;

    async fn get(&self, id: Uuid) -> Result<Ticket, TicketError>;

    async fn update(&self, id: Uuid, patch: TicketPatch) -> Result<Ticket, TicketError>;

    async fn delete(&self, id: Uuid) -> Result<(), TicketError>;

    async fn list(&self, filter: &TicketFilter) -> Result<Page<Ticket>, TicketError>;

    /// Newest-first selection used by bulk classification.
    async fn recent(&self, unclassified_only: bool, limit: usize)
        -> Result<Vec<Ticket>, TicketError>;

    async fn apply_classification(
        &self,
        id: Uuid,
        update: ClassificationUpdate,
    ) -> Result<Ticket, TicketError>;

    async fn stats(&self) -> Result<TicketStats, TicketError>;
}

/// Result of one classification run, ready to be merged into a ticket.
/// `category` is the proposal; it only lands if the stored category is null.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationUpdate {
    pub category: Option<TicketCategory>,
    pub explanation: String,
    pub confidence: f64,
}

impl ClassificationUpdate {
    pub fn validate(&self) -> Result<(), TicketError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(TicketError::Validation(format!(
                "Confidence must be between 0 and 1, got {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub category: Option<TicketCategory>,
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for TicketFilter {
    fn default() -> Self {
        Self {
            status: None,
            category: None,
            search: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl TicketFilter {
    pub fn per_page(&self) -> u32 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }

    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.per_page())
    }

    /// Lowercased search needle, `None` when blank.
    pub fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub current_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u32,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, filter: &TicketFilter, total: u64) -> Self {
        let per_page = filter.per_page();
        let last_page = total.div_ceil(u64::from(per_page)).max(1);
        Self {
            data,
            current_page: filter.page(),
            per_page,
            total,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStats {
    pub classified_count: i64,
    pub unclassified_count: i64,
    pub average_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketStats {
    pub total_tickets: i64,
    pub tickets_by_status: BTreeMap<String, i64>,
    pub tickets_by_category: BTreeMap<String, i64>,
    pub recent_activity: Vec<DailyCount>,
    pub classification_stats: ClassificationStats,
    pub tickets_with_notes: i64,
    pub generated_at: DateTime<Utc>,
}

/// Status histogram with every status present, zero-filled.
pub fn status_histogram(counts: impl IntoIterator<Item = (String, i64)>) -> BTreeMap<String, i64> {
    let mut histogram: BTreeMap<String, i64> = TicketStatus::ALL
        .iter()
        .map(|status| (status.as_str().to_string(), 0))
        .collect();
    for (status, count) in counts {
        *histogram.entry(status).or_insert(0) += count;
    }
    histogram
}
