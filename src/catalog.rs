use crate::error::AppError;
use crate::models::{Category, College, EventRecord, parse_clock};
use crate::submission::{EventSubmitter, SubmissionPayload, SubmitError};
use async_trait::async_trait;
use nanoid::nanoid;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

const SEED_EVENTS: &str = include_str!("../data/events.json");

/// Where listing pages get their events from.
pub trait EventSource: Send + Sync {
    fn list_approved_events(&self) -> Vec<EventRecord>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total: usize,
    pub approved: usize,
    pub pending: usize,
    pub featured: usize,
    pub by_category: Vec<CategoryCount>,
}

/// Categories offered on the submission form.
pub fn submission_categories() -> Vec<Category> {
    [
        ("1", "Conference"),
        ("2", "Workshop"),
        ("3", "Seminar"),
        ("4", "Hackathon"),
        ("5", "Career Fair"),
        ("6", "Social"),
    ]
    .into_iter()
    .map(|(id, name)| Category { id: id.to_string(), name: name.to_string() })
    .collect()
}

/// In-memory event store. Insertion order is preserved and ids are unique.
#[derive(Debug, Default)]
pub struct Catalog {
    events: RwLock<Vec<EventRecord>>,
}

impl Catalog {
    /// Builds a catalog, keeping the first record for any repeated id.
    pub fn new(records: Vec<EventRecord>) -> Self {
        let mut seen = HashSet::new();
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.id.clone()) {
                events.push(record);
            } else {
                warn!(id = %record.id, "dropping event with duplicate id");
            }
        }
        Self { events: RwLock::new(events) }
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let records: Vec<EventRecord> = serde_json::from_str(raw)?;
        Ok(Self::new(records))
    }

    pub fn seeded() -> Result<Self, AppError> {
        Self::from_json(SEED_EVENTS)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<EventRecord>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<EventRecord>> {
        self.events.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn get_event(&self, id: &str) -> Result<EventRecord, AppError> {
        self.read()
            .iter()
            .find(|e| e.id == id && e.approved)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no event with id {id}")))
    }

    pub fn featured_events(&self) -> Vec<EventRecord> {
        self.read()
            .iter()
            .filter(|e| e.featured && e.approved)
            .cloned()
            .collect()
    }

    pub fn pending_events(&self) -> Vec<EventRecord> {
        self.read().iter().filter(|e| !e.approved).cloned().collect()
    }

    /// Approved events sharing at least one category name with `event`.
    pub fn related_events(&self, event: &EventRecord, limit: usize) -> Vec<EventRecord> {
        self.read()
            .iter()
            .filter(|e| e.approved && e.id != event.id)
            .filter(|e| event.categories.iter().any(|c| e.has_category_named(&c.name)))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn insert(&self, record: EventRecord) -> Result<(), AppError> {
        let mut events = self.write();
        if events.iter().any(|e| e.id == record.id) {
            return Err(AppError::Conflict(format!("event {} already exists", record.id)));
        }
        events.push(record);
        Ok(())
    }

    pub fn approve(&self, id: &str) -> Result<EventRecord, AppError> {
        let mut events = self.write();
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| AppError::NotFound(format!("no event with id {id}")))?;
        if event.approved {
            return Err(AppError::Conflict(format!("event {id} is already approved")));
        }
        event.approved = true;
        info!(%id, title = %event.title, "event approved");
        Ok(event.clone())
    }

    pub fn reject(&self, id: &str) -> Result<EventRecord, AppError> {
        let mut events = self.write();
        let index = events
            .iter()
            .position(|e| e.id == id && !e.approved)
            .ok_or_else(|| AppError::NotFound(format!("no pending event with id {id}")))?;
        let removed = events.remove(index);
        info!(%id, title = %removed.title, "event rejected");
        Ok(removed)
    }

    /// Approved events per category name, most common first.
    pub fn category_counts(&self) -> Vec<CategoryCount> {
        count_categories(self.read().iter().filter(|e| e.approved))
    }

    pub fn stats(&self) -> CatalogStats {
        let events = self.read();
        let approved = events.iter().filter(|e| e.approved).count();
        CatalogStats {
            total: events.len(),
            approved,
            pending: events.len() - approved,
            featured: events.iter().filter(|e| e.featured && e.approved).count(),
            by_category: count_categories(events.iter()),
        }
    }
}

fn count_categories<'a>(events: impl Iterator<Item = &'a EventRecord>) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for event in events {
        for category in &event.categories {
            *counts.entry(category.name.as_str()).or_default() += 1;
        }
    }
    let mut counts: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(name, count)| CategoryCount { name: name.to_string(), count })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    counts
}

impl EventSource for Catalog {
    fn list_approved_events(&self) -> Vec<EventRecord> {
        self.read().iter().filter(|e| e.approved).cloned().collect()
    }
}

/// Files finished submissions into the catalog as pending events.
pub struct CatalogSubmitter {
    catalog: Arc<Catalog>,
    categories: Vec<Category>,
}

impl CatalogSubmitter {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog, categories: submission_categories() }
    }

    fn category(&self, id: &str) -> Category {
        self.categories
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .unwrap_or_else(|| Category { id: id.to_string(), name: id.to_string() })
    }

    fn to_record(&self, payload: SubmissionPayload) -> EventRecord {
        let start_time = match parse_clock(&payload.start_time) {
            Some(clock) => payload.start_date.and_time(clock).format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => payload.start_date.format("%Y-%m-%d").to_string(),
        };
        let location = payload.location.unwrap_or_else(|| "Online".to_string());
        EventRecord {
            id: nanoid!(10),
            title: payload.title,
            description: payload.description,
            start_time: Some(start_time),
            end_time: None,
            location,
            website_url: payload.website_url.or(payload.online_url),
            image_url: None,
            featured: false,
            categories: payload.categories.iter().map(|id| self.category(id)).collect(),
            college: payload.college.map(|name| College { name }),
            submitting_user: None,
            approved: false,
        }
    }
}

#[async_trait]
impl EventSubmitter for CatalogSubmitter {
    async fn submit_event(&self, payload: SubmissionPayload) -> Result<String, SubmitError> {
        let record = self.to_record(payload);
        let id = record.id.clone();
        self.catalog
            .insert(record)
            .map_err(|err| SubmitError::Rejected(err.to_string()))?;
        info!(%id, "submission filed for review");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn seed_data_loads_with_pending_events_hidden() -> anyhow::Result<()> {
        let catalog = Catalog::seeded()?;
        assert_eq!(catalog.len(), 9);
        let approved = catalog.list_approved_events();
        assert_eq!(approved.len(), 7);
        assert!(approved.iter().all(|e| e.approved));
        assert_eq!(catalog.pending_events().len(), 2);
        assert_eq!(
            catalog.featured_events().iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "5"]
        );
        Ok(())
    }

    #[test]
    fn duplicate_ids_keep_the_first_record() -> anyhow::Result<()> {
        let catalog = Catalog::from_json(
            r#"[{"id":"a","title":"First","approved":true},
                {"id":"a","title":"Second","approved":true}]"#,
        )?;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get_event("a")?.title, "First");
        Ok(())
    }

    #[test]
    fn malformed_seed_is_an_error() {
        assert!(matches!(Catalog::from_json("{not json"), Err(AppError::Seed(_))));
    }

    #[test]
    fn unapproved_events_are_not_found_publicly() -> anyhow::Result<()> {
        let catalog = Catalog::seeded()?;
        assert!(matches!(catalog.get_event("8"), Err(AppError::NotFound(_))));
        assert!(matches!(catalog.get_event("nope"), Err(AppError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn approve_and_reject_moderate_pending_events() -> anyhow::Result<()> {
        let catalog = Catalog::seeded()?;
        let approved = catalog.approve("8")?;
        assert!(approved.approved);
        assert_eq!(catalog.get_event("8")?.title, approved.title);
        assert!(matches!(catalog.approve("8"), Err(AppError::Conflict(_))));

        let rejected = catalog.reject("9")?;
        assert_eq!(rejected.id, "9");
        assert_eq!(catalog.len(), 8);
        assert!(catalog.pending_events().is_empty());
        assert!(matches!(catalog.reject("1"), Err(AppError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn related_events_share_a_category() -> anyhow::Result<()> {
        let catalog = Catalog::seeded()?;
        let event = catalog.get_event("3")?;
        let related = catalog.related_events(&event, 5);
        assert_eq!(related.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["6"]);
        Ok(())
    }

    #[test]
    fn stats_cover_every_record() -> anyhow::Result<()> {
        let catalog = Catalog::seeded()?;
        let stats = catalog.stats();
        assert_eq!((stats.total, stats.approved, stats.pending, stats.featured), (9, 7, 2, 2));
        assert_eq!(stats.by_category[0], CategoryCount { name: "Hackathon".into(), count: 2 });
        assert!(stats.by_category.iter().any(|c| c.name == "Competition"));

        let public = catalog.category_counts();
        assert!(!public.iter().any(|c| c.name == "Competition"));
        Ok(())
    }

    #[tokio::test]
    async fn catalog_submitter_files_a_pending_event() -> anyhow::Result<()> {
        let catalog = Arc::new(Catalog::seeded()?);
        let submitter = CatalogSubmitter::new(catalog.clone());
        let payload = SubmissionPayload {
            title: "Spring Hackathon".into(),
            description: "Build things".into(),
            start_date: NaiveDate::from_ymd_opt(2025, 4, 12).unwrap(),
            start_time: "02:30 PM".into(),
            location: None,
            online_url: Some("https://meet.example/abc".into()),
            website_url: None,
            college: Some("MIT".into()),
            categories: vec!["4".into(), "99".into()],
        };

        let id = submitter.submit_event(payload).await?;
        let pending = catalog.pending_events();
        let filed = pending.iter().find(|e| e.id == id).expect("filed event");
        assert!(!filed.approved);
        assert_eq!(filed.start_time.as_deref(), Some("2025-04-12T14:30:00"));
        assert_eq!(filed.location, "Online");
        assert_eq!(filed.website_url.as_deref(), Some("https://meet.example/abc"));
        assert_eq!(filed.organizer(), "MIT");
        assert_eq!(
            filed.categories.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["Hackathon", "99"]
        );
        Ok(())
    }
}
