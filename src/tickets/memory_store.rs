use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{status_histogram, RECENT_ACTIVITY_DAYS};
use super::{
    round_confidence, ClassificationStats, ClassificationUpdate, DailyCount, NewTicket, Page,
    Ticket, TicketError, TicketFilter, TicketPatch, TicketStats, TicketStatus, TicketStore,
};

/// Process-local store used when no database is configured and by tests.
/// Every mutation runs under the write lock, which makes the conditional
/// category write atomic.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    tickets: RwLock<HashMap<Uuid, Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tickets.read().await.is_empty()
    }
}

fn newest_first(tickets: &mut [Ticket]) {
    tickets.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

fn matches(ticket: &Ticket, filter: &TicketFilter, needle: Option<&str>) -> bool {
    if filter.status.is_some_and(|status| ticket.status != status) {
        return false;
    }
    if filter.category.is_some() && ticket.category != filter.category {
        return false;
    }
    match needle {
        Some(needle) => {
            ticket.subject.to_lowercase().contains(needle)
                || ticket.body.to_lowercase().contains(needle)
        }
        None => true,
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn create(&self, new: NewTicket) -> Result<Ticket, TicketError> {
        new.validate()?;
        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::now_v7(),
            subject: new.subject,
            body: new.body,
            status: TicketStatus::Open,
            category: None,
            explanation: None,
            confidence: None,
            note: None,
            created_at: now,
            updated_at: now,
        };
        self.tickets.write().await.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn get(&self, id: Uuid) -> Result<Ticket, TicketError> {
        self.tickets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| TicketError::NotFound(id.to_string()))
    }

    async fn update(&self, id: Uuid, patch: TicketPatch) -> Result<Ticket, TicketError> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(&id)
            .ok_or_else(|| TicketError::NotFound(id.to_string()))?;

        if let Some(status) = patch.status {
            ticket.status = status;
        }
        if let Some(category) = patch.category {
            ticket.category = category;
        }
        if let Some(note) = patch.note {
            ticket.note = note;
        }
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), TicketError> {
        self.tickets
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TicketError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &TicketFilter) -> Result<Page<Ticket>, TicketError> {
        let needle = filter.needle();
        let mut found: Vec<Ticket> = self
            .tickets
            .read()
            .await
            .values()
            .filter(|t| matches(t, filter, needle.as_deref()))
            .cloned()
            .collect();
        newest_first(&mut found);

        let total = found.len() as u64;
        let offset = usize::try_from(filter.offset()).unwrap_or(usize::MAX);
        let data = found
            .into_iter()
            .skip(offset)
            .take(filter.per_page() as usize)
            .collect();
        Ok(Page::new(data, filter, total))
    }

    async fn recent(
        &self,
        unclassified_only: bool,
        limit: usize,
    ) -> Result<Vec<Ticket>, TicketError> {
        let mut found: Vec<Ticket> = self
            .tickets
            .read()
            .await
            .values()
            .filter(|t| !unclassified_only || t.category.is_none())
            .cloned()
            .collect();
        newest_first(&mut found);
        found.truncate(limit);
        Ok(found)
    }

    async fn apply_classification(
        &self,
        id: Uuid,
        update: ClassificationUpdate,
    ) -> Result<Ticket, TicketError> {
        update.validate()?;
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(&id)
            .ok_or_else(|| TicketError::NotFound(id.to_string()))?;

        ticket.explanation = Some(update.explanation);
        ticket.confidence = Some(round_confidence(update.confidence));
        if ticket.category.is_none() {
            ticket.category = update.category;
        }
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn stats(&self) -> Result<TicketStats, TicketError> {
        let tickets = self.tickets.read().await;
        let now = Utc::now();
        let since = now - Duration::days(RECENT_ACTIVITY_DAYS);

        let mut by_status: BTreeMap<String, i64> = BTreeMap::new();
        let mut by_category: BTreeMap<String, i64> = BTreeMap::new();
        let mut by_day: BTreeMap<chrono::NaiveDate, i64> = BTreeMap::new();
        let mut confidence_sum = 0.0;
        let mut confidence_count = 0u32;

        for ticket in tickets.values() {
            *by_status.entry(ticket.status.as_str().to_string()).or_insert(0) += 1;
            if let Some(category) = ticket.category {
                *by_category.entry(category.as_str().to_string()).or_insert(0) += 1;
            }
            if let Some(confidence) = ticket.confidence {
                confidence_sum += confidence;
                confidence_count += 1;
            }
            if ticket.created_at >= since {
                *by_day.entry(ticket.created_at.date_naive()).or_insert(0) += 1;
            }
        }

        let classified_count = tickets.values().filter(|t| t.is_classified()).count() as i64;
        let total_tickets = tickets.len() as i64;

        Ok(TicketStats {
            total_tickets,
            tickets_by_status: status_histogram(by_status),
            tickets_by_category: by_category,
            recent_activity: by_day
                .into_iter()
                .map(|(date, count)| DailyCount { date, count })
                .collect(),
            classification_stats: ClassificationStats {
                classified_count,
                unclassified_count: total_tickets - classified_count,
                average_confidence: (confidence_count > 0)
                    .then(|| confidence_sum / f64::from(confidence_count)),
            },
            tickets_with_notes: tickets.values().filter(|t| t.has_note()).count() as i64,
            generated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::TicketCategory;
    use std::sync::Arc;

    fn new_ticket(subject: &str, body: &str) -> NewTicket {
        NewTicket {
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let store = MemoryTicketStore::new();
        let ticket = store
            .create(new_ticket("Can't log in", "My password stopped working"))
            .await
            .unwrap();

        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.category, None);
        assert_eq!(ticket.explanation, None);
        assert_eq!(ticket.confidence, None);
        assert_eq!(store.get(ticket.id).await.unwrap(), ticket);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_body() {
        let store = MemoryTicketStore::new();
        let result = store.create(new_ticket("Subject", "")).await;
        assert!(matches!(result, Err(TicketError::Validation(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_applies_only_provided_fields() {
        let store = MemoryTicketStore::new();
        let ticket = store.create(new_ticket("Printer", "Jammed")).await.unwrap();

        let updated = store
            .update(
                ticket.id,
                TicketPatch {
                    status: Some(TicketStatus::InProgress),
                    note: Some(Some("Sent technician".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TicketStatus::InProgress);
        assert_eq!(updated.note.as_deref(), Some("Sent technician"));
        assert_eq!(updated.category, None);
        assert_eq!(updated.subject, "Printer");

        let cleared = store
            .update(
                ticket.id,
                TicketPatch {
                    note: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.note, None);
        assert_eq!(cleared.status, TicketStatus::InProgress);
    }

    #[tokio::test]
    async fn test_missing_ticket_is_not_found() {
        let store = MemoryTicketStore::new();
        let id = Uuid::now_v7();
        assert!(matches!(store.get(id).await, Err(TicketError::NotFound(_))));
        assert!(matches!(store.delete(id).await, Err(TicketError::NotFound(_))));
        assert!(matches!(
            store.update(id, TicketPatch::default()).await,
            Err(TicketError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_permanently() {
        let store = MemoryTicketStore::new();
        let ticket = store.create(new_ticket("a", "b")).await.unwrap();
        store.delete(ticket.id).await.unwrap();
        assert!(matches!(store.get(ticket.id).await, Err(TicketError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_search_and_order() {
        let store = MemoryTicketStore::new();
        let login = store
            .create(new_ticket("Can't LOG in", "Account locked"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let vpn = store
            .create(new_ticket("VPN drops", "Keeps failing after login"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create(new_ticket("Invoice", "Charged twice")).await.unwrap();

        store
            .update(
                vpn.id,
                TicketPatch {
                    status: Some(TicketStatus::Resolved),
                    category: Some(Some(TicketCategory::NetworkConnectivity)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let search = TicketFilter {
            search: Some("login".into()),
            ..Default::default()
        };
        let page = store.list(&search).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].id, vpn.id);

        let search = TicketFilter {
            search: Some("log".into()),
            ..Default::default()
        };
        let page = store.list(&search).await.unwrap();
        let ids: Vec<Uuid> = page.data.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![vpn.id, login.id]);

        let by_status = TicketFilter {
            status: Some(TicketStatus::Resolved),
            category: Some(TicketCategory::NetworkConnectivity),
            ..Default::default()
        };
        assert_eq!(store.list(&by_status).await.unwrap().total, 1);

        let by_category = TicketFilter {
            category: Some(TicketCategory::BillingInquiry),
            ..Default::default()
        };
        assert_eq!(store.list(&by_category).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let store = MemoryTicketStore::new();
        for i in 0..20 {
            store
                .create(new_ticket(&format!("Ticket {i}"), "body"))
                .await
                .unwrap();
        }

        let first = store.list(&TicketFilter::default()).await.unwrap();
        assert_eq!(first.data.len(), 15);
        assert_eq!(first.total, 20);
        assert_eq!(first.last_page, 2);

        let second = store
            .list(&TicketFilter {
                page: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.data.len(), 5);
        assert_eq!(second.current_page, 2);
    }

    #[tokio::test]
    async fn test_apply_classification_preserves_manual_category() {
        let store = MemoryTicketStore::new();
        let ticket = store.create(new_ticket("Refund", "Wrong charge")).await.unwrap();
        store
            .update(
                ticket.id,
                TicketPatch {
                    category: Some(Some(TicketCategory::BillingInquiry)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = store
            .apply_classification(
                ticket.id,
                ClassificationUpdate {
                    category: Some(TicketCategory::Complaint),
                    explanation: "Customer is unhappy".into(),
                    confidence: 0.814,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.category, Some(TicketCategory::BillingInquiry));
        assert_eq!(updated.explanation.as_deref(), Some("Customer is unhappy"));
        assert_eq!(updated.confidence, Some(0.81));
    }

    #[tokio::test]
    async fn test_concurrent_classification_persists_one_category() {
        let store = Arc::new(MemoryTicketStore::new());
        let ticket = store.create(new_ticket("Slow laptop", "Fans loud")).await.unwrap();

        let proposals = [TicketCategory::HardwareIssue, TicketCategory::SoftwareIssue];
        let handles: Vec<_> = proposals
            .into_iter()
            .map(|category| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .apply_classification(
                            ticket.id,
                            ClassificationUpdate {
                                category: Some(category),
                                explanation: format!("guessed {category}"),
                                confidence: 0.9,
                            },
                        )
                        .await
                })
            })
            .collect();

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap().unwrap().category);
        }

        let stored = store.get(ticket.id).await.unwrap().category;
        assert!(stored.is_some());
        assert!(seen.iter().all(|category| *category == stored));
    }

    #[tokio::test]
    async fn test_recent_selects_unclassified_newest_first() {
        let store = MemoryTicketStore::new();
        let older = store.create(new_ticket("old", "b")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let classified = store.create(new_ticket("classified", "b")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = store.create(new_ticket("new", "b")).await.unwrap();
        store
            .update(
                classified.id,
                TicketPatch {
                    category: Some(Some(TicketCategory::BugReport)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let picked: Vec<Uuid> = store
            .recent(true, 10)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(picked, vec![newer.id, older.id]);
        assert_eq!(store.recent(false, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryTicketStore::new();
        let a = store.create(new_ticket("a", "b")).await.unwrap();
        let b = store.create(new_ticket("c", "d")).await.unwrap();
        store.create(new_ticket("e", "f")).await.unwrap();

        store
            .apply_classification(
                a.id,
                ClassificationUpdate {
                    category: Some(TicketCategory::BugReport),
                    explanation: "x".into(),
                    confidence: 0.8,
                },
            )
            .await
            .unwrap();
        store
            .update(
                b.id,
                TicketPatch {
                    status: Some(TicketStatus::Closed),
                    note: Some(Some("done".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_tickets, 3);
        assert_eq!(stats.tickets_by_status["open"], 2);
        assert_eq!(stats.tickets_by_status["closed"], 1);
        assert_eq!(stats.tickets_by_status["in_progress"], 0);
        assert_eq!(stats.tickets_by_category["bug_report"], 1);
        assert_eq!(stats.classification_stats.classified_count, 1);
        assert_eq!(stats.classification_stats.unclassified_count, 2);
        assert_eq!(stats.classification_stats.average_confidence, Some(0.8));
        assert_eq!(stats.tickets_with_notes, 1);
        assert_eq!(stats.recent_activity.iter().map(|d| d.count).sum::<i64>(), 3);
    }
}
