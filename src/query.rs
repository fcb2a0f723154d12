//! Filtering, ordering and paging of event listings.
//!
//! Every function here only reads its inputs. Malformed filter values and
//! malformed event timestamps degrade to "no constraint" and "no date"
//! respectively; nothing in this module can fail.

use crate::models::{EventRecord, parse_day};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

/// Named, independent constraints. `None`, blank and `"all"` all mean the
/// field is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub search: Option<String>,
    pub category: Option<String>,
    pub date: Option<String>,
    /// Organizer name; `organizer` is accepted as an alias key but never
    /// overrides an explicit `college`.
    pub college: Option<String>,
    pub location: Option<String>,
}

impl FilterSpec {
    /// Builds a spec from loose key/value pairs. Unknown keys are ignored.
    /// The result does not depend on the order of the pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut spec = FilterSpec::default();
        let mut organizer = None;
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match key {
                "search" => spec.search = value,
                "category" => spec.category = value,
                "date" => spec.date = value,
                "college" => spec.college = value,
                "organizer" => organizer = value,
                "location" => spec.location = value,
                _ => {}
            }
        }
        if spec.college.is_none() {
            spec.college = organizer;
        }
        spec
    }

    pub fn is_empty(&self) -> bool {
        [
            &self.search,
            &self.category,
            &self.date,
            &self.college,
            &self.location,
        ]
        .into_iter()
        .all(|v| active(v).is_none())
    }
}

fn active(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn active_lower(value: &Option<String>) -> Option<String> {
    active(value).map(str::to_lowercase)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Date,
    Name,
}

impl SortKey {
    /// Unrecognised names fall back to the default ordering.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("name") | Some("title") => SortKey::Name,
            _ => SortKey::Date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub size: usize,
    pub cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub events: Vec<EventRecord>,
    pub total: usize,
    pub has_more: bool,
    pub next_cursor: Option<usize>,
}

struct Matcher {
    search: Option<String>,
    category: Option<String>,
    date: Option<NaiveDate>,
    college: Option<String>,
    location: Option<String>,
}

impl Matcher {
    fn new(spec: &FilterSpec) -> Self {
        Self {
            search: active_lower(&spec.search),
            category: active_lower(&spec.category),
            date: active(&spec.date).and_then(parse_day),
            college: active_lower(&spec.college),
            location: active_lower(&spec.location),
        }
    }

    fn matches(&self, event: &EventRecord) -> bool {
        if !event.approved {
            return false;
        }
        if let Some(term) = &self.search {
            let hit = [
                event.title.as_str(),
                event.description.as_str(),
                event.organizer(),
                event.location.as_str(),
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(term.as_str()));
            if !hit {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if !event.has_category_named(category) {
                return false;
            }
        }
        if let Some(day) = self.date {
            if event.starts_at().map(|dt| dt.date()) != Some(day) {
                return false;
            }
        }
        if let Some(college) = &self.college {
            if !event.organizer().to_lowercase().contains(college.as_str()) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            if !event.location.to_lowercase().contains(location.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Approved records satisfying every active constraint, in input order.
pub fn filter<'a>(records: &'a [EventRecord], spec: &FilterSpec) -> Vec<&'a EventRecord> {
    let matcher = Matcher::new(spec);
    records.iter().filter(|e| matcher.matches(e)).collect()
}

/// Stable sort. Undated events go after every dated one, in their
/// original relative order.
pub fn sort(events: &mut [&EventRecord], key: SortKey) {
    match key {
        SortKey::Date => events.sort_by(|a, b| compare_start(a, b)),
        SortKey::Name => events.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        }),
    }
}

fn compare_start(a: &EventRecord, b: &EventRecord) -> Ordering {
    match (a.starts_at(), b.starts_at()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Slices `events` without copying. A zero page size is treated as one so
/// that advancing the cursor always makes progress.
pub fn paginate<T>(events: &[T], page: PageRequest) -> (&[T], bool) {
    let size = page.size.max(1);
    let start = page.cursor.min(events.len());
    let end = start.saturating_add(size).min(events.len());
    (&events[start..end], end < events.len())
}

/// Filter, sort and paginate in one pass.
pub fn query(
    records: &[EventRecord],
    spec: &FilterSpec,
    key: SortKey,
    page: PageRequest,
) -> QueryResult {
    let mut matched = filter(records, spec);
    sort(&mut matched, key);
    let total = matched.len();
    let (slice, has_more) = paginate(&matched, page);
    debug!(
        total,
        returned = slice.len(),
        cursor = page.cursor,
        ?key,
        "evaluated event query"
    );
    QueryResult {
        events: slice.iter().map(|e| (*e).clone()).collect(),
        total,
        has_more,
        next_cursor: has_more.then(|| page.cursor.min(total) + slice.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, College};

    fn event(id: &str, title: &str, start: Option<&str>) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            start_time: start.map(str::to_string),
            end_time: None,
            location: String::new(),
            website_url: None,
            image_url: None,
            featured: false,
            categories: Vec::new(),
            college: None,
            submitting_user: None,
            approved: true,
        }
    }

    fn ids(events: &[&EventRecord]) -> Vec<String> {
        events.iter().map(|e| e.id.clone()).collect()
    }

    fn sample() -> Vec<EventRecord> {
        let mut innovate = event("1", "Innovate 2025", Some("2025-01-23T10:00:00"));
        innovate.description = "Industry leaders explore innovations".into();
        innovate.location = "Bathurst Extra Hotel".into();
        innovate.college = Some(College { name: "MIT".into() });
        innovate.categories = vec![Category { id: "1".into(), name: "Tech Talk".into() }];

        let mut green = event("2", "GreenTech", Some("2025-03-17T10:00:00"));
        green.description = "Sustainable engineering".into();
        green.location = "Grand Central Hotel".into();
        green.college = Some(College { name: "Stanford University".into() });
        green.categories = vec![
            Category { id: "3".into(), name: "Workshop".into() },
            Category { id: "1".into(), name: "Tech Talk".into() },
        ];

        let mut pending = event("3", "Robotics for Beginners", Some("2025-08-12T10:00:00"));
        pending.approved = false;

        let mut undated = event("4", "Alumni Mixer", None);
        undated.location = "Student Union".into();

        vec![innovate, green, pending, undated]
    }

    #[test]
    fn empty_spec_returns_every_approved_record_in_order() {
        let records = sample();
        let all = FilterSpec {
            category: Some("all".into()),
            search: Some("  ".into()),
            ..Default::default()
        };
        assert!(all.is_empty());
        assert_eq!(ids(&filter(&records, &all)), vec!["1", "2", "4"]);
        assert_eq!(ids(&filter(&records, &FilterSpec::default())), vec!["1", "2", "4"]);
    }

    #[test]
    fn search_covers_title_description_organizer_and_location() {
        let records = sample();
        let by = |term: &str| {
            ids(&filter(&records, &FilterSpec { search: Some(term.into()), ..Default::default() }))
        };
        assert_eq!(by("greentech"), vec!["2"]);
        assert_eq!(by("INNOVATIONS"), vec!["1"]);
        assert_eq!(by("stanford"), vec!["2"]);
        assert_eq!(by("hotel"), vec!["1", "2"]);
        assert!(by("robotics").is_empty(), "unapproved records never surface");
    }

    #[test]
    fn every_title_substring_finds_its_record() {
        let records = sample();
        for record in records.iter().filter(|r| r.approved) {
            let needle = &record.title[1..record.title.len() - 1];
            let found = filter(&records, &FilterSpec { search: Some(needle.into()), ..Default::default() });
            assert!(found.iter().any(|e| e.id == record.id), "{needle}");
        }
    }

    #[test]
    fn category_matches_names_case_insensitively() {
        let records = sample();
        let spec = FilterSpec { category: Some("tech talk".into()), ..Default::default() };
        assert_eq!(ids(&filter(&records, &spec)), vec!["1", "2"]);
        let spec = FilterSpec { category: Some("WORKSHOP".into()), ..Default::default() };
        assert_eq!(ids(&filter(&records, &spec)), vec!["2"]);
    }

    #[test]
    fn date_filter_compares_calendar_days() {
        let records = sample();
        let spec = FilterSpec { date: Some("2025-03-17".into()), ..Default::default() };
        assert_eq!(ids(&filter(&records, &spec)), vec!["2"]);

        let spec = FilterSpec { date: Some("2025-03-17T23:59:00".into()), ..Default::default() };
        assert_eq!(ids(&filter(&records, &spec)), vec!["2"]);
    }

    #[test]
    fn unparsable_dates_never_match_but_bad_filters_are_ignored() {
        let mut records = sample();
        records[0].start_time = Some("sometime soon".into());
        let spec = FilterSpec { date: Some("2025-01-23".into()), ..Default::default() };
        assert!(filter(&records, &spec).is_empty());

        let spec = FilterSpec { date: Some("not a date".into()), ..Default::default() };
        assert_eq!(ids(&filter(&records, &spec)), vec!["1", "2", "4"]);
    }

    #[test]
    fn filters_combine_with_and() {
        let records = sample();
        let spec = FilterSpec::from_pairs([
            ("organizer", "stan"),
            ("location", "central"),
            ("category", "Tech Talk"),
            ("unknown", "whatever"),
        ]);
        assert_eq!(ids(&filter(&records, &spec)), vec!["2"]);

        let spec = FilterSpec::from_pairs([("college", "mit"), ("location", "central")]);
        assert!(filter(&records, &spec).is_empty());
    }

    #[test]
    fn college_wins_over_the_organizer_alias_in_any_order() {
        let forward = FilterSpec::from_pairs([("college", "mit"), ("organizer", "stanford")]);
        let reverse = FilterSpec::from_pairs([("organizer", "stanford"), ("college", "mit")]);
        assert_eq!(forward, reverse);
        assert_eq!(forward.college.as_deref(), Some("mit"));

        let alias_only = FilterSpec::from_pairs([("organizer", "stanford")]);
        assert_eq!(alias_only.college.as_deref(), Some("stanford"));
        assert_eq!(ids(&filter(&sample(), &alias_only)), vec!["2"]);
    }

    #[test]
    fn date_sort_orders_ascending_with_undated_last() {
        let records = vec![
            event("1", "AI Talk", Some("2025-05-01")),
            event("x", "Mystery", Some("garbage")),
            event("2", "Art Fest", Some("2025-04-01")),
            event("y", "Untimed", None),
        ];
        let mut matched = filter(&records, &FilterSpec::from_pairs([("category", "all")]));
        sort(&mut matched, SortKey::Date);
        assert_eq!(ids(&matched), vec!["2", "1", "x", "y"]);

        sort(&mut matched, SortKey::Date);
        assert_eq!(ids(&matched), vec!["2", "1", "x", "y"]);
    }

    #[test]
    fn date_sort_is_stable_for_equal_starts() {
        let records = vec![
            event("b", "Second", Some("2025-05-01T09:00:00")),
            event("a", "First", Some("2025-05-01T09:00:00")),
            event("c", "Earlier", Some("2025-04-30T09:00:00")),
        ];
        let mut matched = filter(&records, &FilterSpec::default());
        sort(&mut matched, SortKey::Date);
        assert_eq!(ids(&matched), vec!["c", "b", "a"]);
    }

    #[test]
    fn name_sort_is_case_insensitive_with_id_tiebreak() {
        let records = vec![
            event("9", "zoo day", None),
            event("3", "Art Fest", None),
            event("1", "art fest", None),
            event("2", "Bake Sale", None),
        ];
        for _ in 0..3 {
            let mut matched = filter(&records, &FilterSpec::default());
            sort(&mut matched, SortKey::Name);
            assert_eq!(ids(&matched), vec!["1", "3", "2", "9"]);
        }
    }

    #[test]
    fn paging_walks_without_gaps_or_duplicates() {
        let items: Vec<u32> = (0..5).collect();
        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let (slice, has_more) = paginate(&items, PageRequest { size: 2, cursor });
            seen.extend_from_slice(slice);
            cursor += slice.len();
            assert_eq!(has_more, cursor < items.len());
            if !has_more {
                break;
            }
        }
        assert_eq!(seen, items);
    }

    #[test]
    fn paging_edge_cases() {
        let items = vec![1, 2, 3];
        assert_eq!(paginate(&items, PageRequest { size: 0, cursor: 0 }), (&items[..1], true));
        assert_eq!(paginate(&items, PageRequest { size: 3, cursor: 0 }), (&items[..], false));
        assert_eq!(paginate(&items, PageRequest { size: 2, cursor: 7 }), (&items[3..], false));
        let empty: Vec<u8> = Vec::new();
        assert_eq!(paginate(&empty, PageRequest { size: 9, cursor: 0 }), (&empty[..], false));
    }

    #[test]
    fn query_reports_total_before_paging() {
        let records = vec![
            event("1", "AI Talk", Some("2025-05-01")),
            event("2", "Art Fest", Some("2025-04-01")),
            event("3", "Bake Sale", Some("2025-06-01")),
        ];
        let spec = FilterSpec::from_pairs([("category", "all")]);
        let first = query(&records, &spec, SortKey::Date, PageRequest { size: 2, cursor: 0 });
        assert_eq!(first.total, 3);
        assert!(first.has_more);
        assert_eq!(first.next_cursor, Some(2));
        assert_eq!(
            first.events.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["2", "1"]
        );

        let rest = query(&records, &spec, SortKey::Date, PageRequest { size: 2, cursor: 2 });
        assert_eq!(rest.events.len(), 1);
        assert_eq!(rest.events[0].id, "3");
        assert!(!rest.has_more);
        assert_eq!(rest.next_cursor, None);
    }

    #[test]
    fn lenient_sort_key_parsing() {
        assert_eq!(SortKey::parse_lenient(Some("Name")), SortKey::Name);
        assert_eq!(SortKey::parse_lenient(Some("popularity")), SortKey::Date);
        assert_eq!(SortKey::parse_lenient(None), SortKey::Date);
    }
}
