use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::queue::{JobContext, JobFuture, JobHandler, JobId, JobQueue, QueueError};
use super::retry::JobError;
use crate::classifier::{ClassificationSource, TicketClassifier};
use crate::tickets::{ClassificationUpdate, TicketCategory, TicketError, TicketStore};

pub const CLASSIFY_TICKET_JOB: &str = "classify_ticket";

impl From<TicketError> for JobError {
    fn from(e: TicketError) -> Self {
        match e {
            TicketError::NotFound(_) | TicketError::Validation(_) => Self::Permanent(e.to_string()),
            TicketError::Database(_) | TicketError::Connection(_) => {
                Self::Transient(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationOutcome {
    pub ticket_id: Uuid,
    pub category: Option<TicketCategory>,
    pub confidence: f64,
    /// The stored category was kept instead of the proposed one.
    pub manual_override: bool,
    pub source: ClassificationSource,
}

/// Classifies one ticket and merges the result into the store.
#[derive(Clone)]
pub struct ClassifyTicketJob {
    store: Arc<dyn TicketStore>,
    classifier: Arc<TicketClassifier>,
}

impl ClassifyTicketJob {
    pub fn new(store: Arc<dyn TicketStore>, classifier: Arc<TicketClassifier>) -> Self {
        Self { store, classifier }
    }

    pub async fn run(&self, ticket_id: Uuid, attempt: u32) -> Result<ClassificationOutcome, JobError> {
        let result = self.attempt(ticket_id, attempt).await;
        if let Err(e) = &result {
            warn!("Ticket classification failed ticket_id={ticket_id} error={e} attempt={attempt}");
        }
        result
    }

    async fn attempt(&self, ticket_id: Uuid, attempt: u32) -> Result<ClassificationOutcome, JobError> {
        info!("Starting ticket classification ticket_id={ticket_id} attempt={attempt}");
        let ticket = self.store.get(ticket_id).await?;
        debug!("Classifying ticket_id={} subject={:?}", ticket.id, ticket.subject);

        let result = self.classifier.classify(&ticket.subject, &ticket.body).await;

        let proposed = ticket.category.is_none().then_some(result.category);
        let update = ClassificationUpdate {
            category: proposed,
            explanation: result.explanation,
            confidence: result.confidence,
        };
        let updated = self.store.apply_classification(ticket_id, update).await?;

        let manual_override = proposed.is_none() || updated.category != proposed;
        let outcome = ClassificationOutcome {
            ticket_id,
            category: updated.category,
            confidence: updated.confidence.unwrap_or(result.confidence),
            manual_override,
            source: result.source,
        };

        info!(
            "Ticket classification completed ticket_id={} category={} confidence={:.2} manual_override={} source={}",
            ticket_id,
            outcome.category.map(TicketCategory::as_str).unwrap_or("none"),
            outcome.confidence,
            outcome.manual_override,
            outcome.source
        );
        Ok(outcome)
    }

    /// Adapter for [`JobQueue::register_handler`].
    pub fn handler(self) -> JobHandler {
        let job = Arc::new(self);
        Arc::new(move |ctx: JobContext, payload: Value| -> JobFuture {
            let job = job.clone();
            Box::pin(async move {
                let ticket_id = ticket_id_from_payload(&payload)?;
                let outcome = job.run(ticket_id, ctx.attempt).await?;
                serde_json::to_value(outcome).map_err(|e| JobError::Permanent(e.to_string()))
            })
        })
    }

    pub async fn register(self, queue: &JobQueue) {
        queue.register_handler(CLASSIFY_TICKET_JOB, self.handler()).await;
    }
}

pub fn classification_payload(ticket_id: Uuid) -> Value {
    json!({ "ticket_id": ticket_id })
}

fn ticket_id_from_payload(payload: &Value) -> Result<Uuid, JobError> {
    payload
        .get("ticket_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| JobError::Permanent(format!("invalid classification payload: {payload}")))
}

/// Fire-and-forget: the job id is returned as soon as the queue accepts it.
pub async fn enqueue_classification(queue: &JobQueue, ticket_id: Uuid) -> Result<JobId, QueueError> {
    queue
        .enqueue(CLASSIFY_TICKET_JOB, classification_payload(ticket_id))
        .await
}
