use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::dsl::{avg, count_star};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Date, Nullable, Text, Timestamptz, Varchar};
use uuid::Uuid;

use super::store::{status_histogram, RECENT_ACTIVITY_DAYS};
use super::{
    round_confidence, ClassificationStats, ClassificationUpdate, DailyCount, NewTicket, Page,
    Ticket, TicketCategory, TicketError, TicketFilter, TicketPatch, TicketStats, TicketStatus,
    TicketStore,
};
use crate::core::shared::schema::tickets;
use crate::core::shared::utils::DbPool;

diesel::define_sql_function! {
    fn coalesce(x: Nullable<Varchar>, y: Nullable<Varchar>) -> Nullable<Varchar>;
}

diesel::define_sql_function! {
    fn btrim(x: Nullable<Text>) -> Nullable<Text>;
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = tickets)]
struct TicketRow {
    id: Uuid,
    subject: String,
    body: String,
    status: String,
    category: Option<String>,
    explanation: Option<String>,
    confidence: Option<BigDecimal>,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = TicketError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status: TicketStatus = row
            .status
            .parse()
            .map_err(|_| TicketError::Database(format!("Invalid stored status: {}", row.status)))?;
        let category = row
            .category
            .as_deref()
            .map(str::parse::<TicketCategory>)
            .transpose()
            .map_err(|_| {
                TicketError::Database(format!("Invalid stored category on ticket {}", row.id))
            })?;
        Ok(Ticket {
            id: row.id,
            subject: row.subject,
            body: row.body,
            status,
            category,
            explanation: row.explanation,
            confidence: row.confidence.as_ref().and_then(ToPrimitive::to_f64),
            note: row.note,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = tickets)]
struct TicketChangeset {
    status: Option<String>,
    category: Option<Option<String>>,
    note: Option<Option<String>>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, QueryableByName)]
struct DailyCountRow {
    #[diesel(sql_type = Date)]
    day: NaiveDate,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

fn to_numeric(confidence: f64) -> Result<BigDecimal, TicketError> {
    format!("{:.2}", round_confidence(confidence))
        .parse::<BigDecimal>()
        .map_err(|e| TicketError::Validation(format!("Invalid confidence {confidence}: {e}")))
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn filtered(filter: &TicketFilter) -> tickets::BoxedQuery<'static, Pg> {
    let mut q = tickets::table.into_boxed();

    if let Some(status) = filter.status {
        q = q.filter(tickets::status.eq(status.as_str()));
    }

    if let Some(category) = filter.category {
        q = q.filter(tickets::category.eq(category.as_str()));
    }

    if let Some(needle) = filter.needle() {
        let pattern = like_pattern(&needle);
        q = q.filter(
            tickets::subject
                .ilike(pattern.clone())
                .or(tickets::body.ilike(pattern)),
        );
    }

    q
}

/// Postgres-backed store. Diesel is synchronous, so each call checks out a
/// pooled connection on the blocking thread pool.
#[derive(Clone)]
pub struct PgTicketStore {
    pool: DbPool,
}

impl PgTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, TicketError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, TicketError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| TicketError::Connection(format!("DB error: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| TicketError::Database(format!("Blocking task failed: {e}")))?
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn create(&self, new: NewTicket) -> Result<Ticket, TicketError> {
        new.validate()?;
        let now = Utc::now();
        let row = TicketRow {
            id: Uuid::now_v7(),
            subject: new.subject,
            body: new.body,
            status: TicketStatus::Open.as_str().to_string(),
            category: None,
            explanation: None,
            confidence: None,
            note: None,
            created_at: now,
            updated_at: now,
        };

        self.with_conn(move |conn| {
            diesel::insert_into(tickets::table)
                .values(&row)
                .get_result::<TicketRow>(conn)?
                .try_into()
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Ticket, TicketError> {
        self.with_conn(move |conn| {
            tickets::table
                .find(id)
                .first::<TicketRow>(conn)
                .optional()?
                .ok_or_else(|| TicketError::NotFound(id.to_string()))?
                .try_into()
        })
        .await
    }

    async fn update(&self, id: Uuid, patch: TicketPatch) -> Result<Ticket, TicketError> {
        let changes = TicketChangeset {
            status: patch.status.map(|s| s.as_str().to_string()),
            category: patch.category.map(|c| c.map(|c| c.as_str().to_string())),
            note: patch.note,
            updated_at: Utc::now(),
        };

        self.with_conn(move |conn| {
            diesel::update(tickets::table.find(id))
                .set(&changes)
                .get_result::<TicketRow>(conn)
                .optional()?
                .ok_or_else(|| TicketError::NotFound(id.to_string()))?
                .try_into()
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<(), TicketError> {
        self.with_conn(move |conn| {
            let deleted = diesel::delete(tickets::table.find(id)).execute(conn)?;
            if deleted == 0 {
                return Err(TicketError::NotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, filter: &TicketFilter) -> Result<Page<Ticket>, TicketError> {
        let filter = filter.clone();

        self.with_conn(move |conn| {
            let total: i64 = filtered(&filter).count().get_result(conn)?;

            let rows: Vec<TicketRow> = filtered(&filter)
                .order((tickets::created_at.desc(), tickets::id.desc()))
                .limit(i64::from(filter.per_page()))
                .offset(i64::try_from(filter.offset()).unwrap_or(i64::MAX))
                .load(conn)?;

            let data = rows
                .into_iter()
                .map(Ticket::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page::new(data, &filter, u64::try_from(total).unwrap_or(0)))
        })
        .await
    }

    async fn recent(
        &self,
        unclassified_only: bool,
        limit: usize,
    ) -> Result<Vec<Ticket>, TicketError> {
        self.with_conn(move |conn| {
            let mut q = tickets::table.into_boxed();
            if unclassified_only {
                q = q.filter(tickets::category.is_null());
            }

            q.order((tickets::created_at.desc(), tickets::id.desc()))
                .limit(i64::try_from(limit).unwrap_or(i64::MAX))
                .load::<TicketRow>(conn)?
                .into_iter()
                .map(Ticket::try_from)
                .collect()
        })
        .await
    }

    async fn apply_classification(
        &self,
        id: Uuid,
        update: ClassificationUpdate,
    ) -> Result<Ticket, TicketError> {
        update.validate()?;
        let confidence = to_numeric(update.confidence)?;
        let proposed = update.category.map(|c| c.as_str().to_string());

        // Single statement: the null check on category happens against the
        // row being written, not against an earlier read.
        self.with_conn(move |conn| {
            diesel::update(tickets::table.find(id))
                .set((
                    tickets::explanation.eq(Some(update.explanation)),
                    tickets::confidence.eq(Some(confidence)),
                    tickets::category.eq(coalesce(tickets::category, proposed)),
                    tickets::updated_at.eq(Utc::now()),
                ))
                .get_result::<TicketRow>(conn)
                .optional()?
                .ok_or_else(|| TicketError::NotFound(id.to_string()))?
                .try_into()
        })
        .await
    }

    async fn stats(&self) -> Result<TicketStats, TicketError> {
        self.with_conn(move |conn| {
            let now = Utc::now();

            let total_tickets: i64 = tickets::table.count().get_result(conn)?;

            let by_status: Vec<(String, i64)> = tickets::table
                .group_by(tickets::status)
                .select((tickets::status, count_star()))
                .load(conn)?;

            let by_category: Vec<(Option<String>, i64)> = tickets::table
                .filter(tickets::category.is_not_null())
                .group_by(tickets::category)
                .select((tickets::category, count_star()))
                .load(conn)?;

            let classified_count: i64 = tickets::table
                .filter(tickets::category.is_not_null())
                .count()
                .get_result(conn)?;

            let average_confidence: Option<BigDecimal> = tickets::table
                .select(avg(tickets::confidence))
                .first(conn)?;

            let tickets_with_notes: i64 = tickets::table
                .filter(tickets::note.is_not_null())
                .filter(btrim(tickets::note).ne(""))
                .count()
                .get_result(conn)?;

            let recent_activity: Vec<DailyCountRow> = diesel::sql_query(
                "SELECT DATE(created_at) AS day, COUNT(*) AS count \
                 FROM tickets WHERE created_at >= $1 \
                 GROUP BY day ORDER BY day",
            )
            .bind::<Timestamptz, _>(now - Duration::days(RECENT_ACTIVITY_DAYS))
            .load(conn)?;

            Ok(TicketStats {
                total_tickets,
                tickets_by_status: status_histogram(by_status),
                tickets_by_category: by_category
                    .into_iter()
                    .filter_map(|(category, count)| category.map(|c| (c, count)))
                    .collect(),
                recent_activity: recent_activity
                    .into_iter()
                    .map(|row| DailyCount {
                        date: row.day,
                        count: row.count,
                    })
                    .collect(),
                classification_stats: ClassificationStats {
                    classified_count,
                    unclassified_count: total_tickets - classified_count,
                    average_confidence: average_confidence.as_ref().and_then(ToPrimitive::to_f64),
                },
                tickets_with_notes,
                generated_at: now,
            })
        })
        .await
    }
}
