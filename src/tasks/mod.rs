pub mod bulk;
pub mod classify;
pub mod queue;
pub mod retry;

pub use bulk::{
    dispatch_classifications, run_bulk_classification, select_for_classification,
    BulkClassifyOptions, BulkOutcome, BulkPreviewItem, BulkSummary, JobDispatcher,
};
pub use classify::{enqueue_classification, ClassifyTicketJob, CLASSIFY_TICKET_JOB};
pub use queue::{JobContext, JobHandler, JobId, JobQueue, JobReport, QueueError};
pub use retry::{execute_with_policy, Execution, JobError, JobStatus, RetryPolicy};
