use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::classify::enqueue_classification;
use super::queue::{JobId, JobQueue, QueueError};
use crate::tickets::{Ticket, TicketCategory, TicketError, TicketStatus, TicketStore};

pub const DEFAULT_BULK_LIMIT: usize = 50;
pub const DEFAULT_BULK_DELAY_MS: u64 = 1000;
pub const MAX_BULK_LIMIT: usize = 500;
pub const MAX_BULK_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkClassifyOptions {
    pub unclassified_only: bool,
    pub limit: usize,
    pub delay_ms: u64,
    pub dry_run: bool,
}

impl BulkClassifyOptions {
    /// Bounds applied to requests arriving over HTTP.
    pub fn validate(&self) -> Result<(), TicketError> {
        if self.limit > MAX_BULK_LIMIT {
            return Err(TicketError::Validation(format!(
                "The limit may not be greater than {MAX_BULK_LIMIT}."
            )));
        }
        if self.delay_ms > MAX_BULK_DELAY_MS {
            return Err(TicketError::Validation(format!(
                "The delay_ms may not be greater than {MAX_BULK_DELAY_MS}."
            )));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for BulkClassifyOptions {
    fn default() -> Self {
        Self {
            unclassified_only: false,
            limit: DEFAULT_BULK_LIMIT,
            delay_ms: DEFAULT_BULK_DELAY_MS,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkPreviewItem {
    pub id: Uuid,
    pub subject: String,
    pub status: TicketStatus,
    pub category: Option<TicketCategory>,
    pub created_at: DateTime<Utc>,
}

impl From<&Ticket> for BulkPreviewItem {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id,
            subject: ticket.subject.clone(),
            status: ticket.status,
            category: ticket.category,
            created_at: ticket.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub total: usize,
    pub queued: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BulkOutcome {
    Preview { tickets: Vec<BulkPreviewItem> },
    Dispatched(BulkSummary),
}

/// Where the bulk driver sends work. Implemented by [`JobQueue`]; tests
/// substitute recorders.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch_classification(&self, ticket_id: Uuid) -> Result<JobId, QueueError>;
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn dispatch_classification(&self, ticket_id: Uuid) -> Result<JobId, QueueError> {
        enqueue_classification(self, ticket_id).await
    }
}

/// Newest-first selection of up to `limit` tickets.
pub async fn select_for_classification(
    store: &dyn TicketStore,
    options: &BulkClassifyOptions,
) -> Result<Vec<Ticket>, TicketError> {
    store.recent(options.unclassified_only, options.limit).await
}

/// Enqueue one classification job per ticket, sequentially, sleeping
/// `delay` between dispatches. Enqueue failures are counted, never fatal.
pub async fn dispatch_classifications(
    dispatcher: &dyn JobDispatcher,
    ticket_ids: &[Uuid],
    delay: Duration,
) -> BulkSummary {
    let mut summary = BulkSummary {
        total: ticket_ids.len(),
        ..Default::default()
    };

    for (index, ticket_id) in ticket_ids.iter().enumerate() {
        match dispatcher.dispatch_classification(*ticket_id).await {
            Ok(job_id) => {
                summary.queued += 1;
                info!("Queued classification ticket_id={ticket_id} job={job_id}");
            }
            Err(e) => {
                summary.errors += 1;
                warn!("Failed to queue classification ticket_id={ticket_id} error={e}");
            }
        }

        if index + 1 < ticket_ids.len() && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    info!(
        "Bulk classification dispatched total={} queued={} errors={}",
        summary.total, summary.queued, summary.errors
    );
    summary
}

/// Select tickets and either preview them or dispatch them inline.
pub async fn run_bulk_classification(
    store: &dyn TicketStore,
    dispatcher: &dyn JobDispatcher,
    options: &BulkClassifyOptions,
) -> Result<BulkOutcome, TicketError> {
    let tickets = select_for_classification(store, options).await?;

    if options.dry_run {
        info!(
            "Bulk classification dry run: {} ticket(s) selected",
            tickets.len()
        );
        return Ok(BulkOutcome::Preview {
            tickets: tickets.iter().map(BulkPreviewItem::from).collect(),
        });
    }

    if tickets.is_empty() {
        info!("No tickets found to classify.");
        return Ok(BulkOutcome::Dispatched(BulkSummary::default()));
    }

    let ids: Vec<Uuid> = tickets.iter().map(|t| t.id).collect();
    Ok(BulkOutcome::Dispatched(
        dispatch_classifications(dispatcher, &ids, options.delay()).await,
    ))
}
