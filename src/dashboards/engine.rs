//! Read-only statistics over people and replies.
//!
//! The store does the grouping; this module derives counts, percentages
//! and ordering from the raw groups so both store implementations report
//! identically.

use std::collections::HashMap;

use super::types::{AddressRow, CompletionRow, ReportParams, Totals};
use crate::core::shared::models::Schedule;
use crate::core::store::{
    AddressGroup, BucketQuery, Collection, CreationBucket, DateRange, ScheduleReplyCount, Store,
    StoreError,
};

/// `part / whole * 100`, or 0 for an empty population. Not rounded.
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

pub fn summarize_addresses(groups: Vec<AddressGroup>) -> Vec<AddressRow> {
    let overall: i64 = groups.iter().map(|g| g.total).sum();
    let mut rows: Vec<AddressRow> = groups
        .into_iter()
        .map(|g| AddressRow {
            percentage: percentage(g.total, overall),
            peoples_general_count: g.total - g.with_medical_id,
            peoples_with_d_id_count: g.with_medical_id,
            peoples_count: g.total,
            province: g.province,
            district: g.district,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.peoples_count
            .cmp(&a.peoples_count)
            .then_with(|| a.province.cmp(&b.province))
            .then_with(|| a.district.cmp(&b.district))
    });
    rows
}

/// One row per schedule in `schedules` order; schedules nobody replied to
/// report zero.
pub fn completion_rows(
    schedules: &[Schedule],
    repliers: &[ScheduleReplyCount],
    population: i64,
) -> Vec<CompletionRow> {
    let counts: HashMap<_, _> = repliers
        .iter()
        .map(|r| (r.schedule_id, r.people))
        .collect();
    schedules
        .iter()
        .map(|schedule| {
            let people = counts.get(&schedule.id).copied().unwrap_or(0);
            CompletionRow {
                schedule_id: schedule.id,
                name: schedule.name.clone(),
                people,
                percentage: percentage(people, population),
            }
        })
        .collect()
}

pub async fn address_breakdown(store: &dyn Store) -> Result<Vec<AddressRow>, StoreError> {
    Ok(summarize_addresses(store.address_groups().await?))
}

pub async fn creation_histogram(
    store: &dyn Store,
    params: &ReportParams,
) -> Result<Vec<CreationBucket>, StoreError> {
    let mut buckets = store
        .creation_buckets(BucketQuery {
            granularity: params.granularity,
            offset_minutes: params.tz_offset_minutes,
            range: params.range,
        })
        .await?;
    buckets.sort_by_key(|b| (b.year, b.month, b.day));
    Ok(buckets)
}

/// Replies do not carry the person's creation date, so a bounded population
/// is resolved to person ids first and replies are then restricted to them.
pub async fn schedule_completion(
    store: &dyn Store,
    range: DateRange,
) -> Result<Vec<CompletionRow>, StoreError> {
    let (population, repliers) = if range.is_unbounded() {
        let population = store.count_documents(Collection::People, &[]).await?;
        (population, store.repliers_per_schedule(None).await?)
    } else {
        let ids = store.people_created_within(range).await?;
        let population = ids.len() as i64;
        if population == 0 {
            (0, Vec::new())
        } else {
            (population, store.repliers_per_schedule(Some(ids)).await?)
        }
    };

    let mut schedules = store.list_schedules().await?;
    schedules.sort_by_key(|s| s.day);
    Ok(completion_rows(&schedules, &repliers, population))
}

pub async fn totals(store: &dyn Store) -> Result<Totals, StoreError> {
    Ok(Totals {
        people: store.count_documents(Collection::People, &[]).await?,
        replies: store.count_documents(Collection::Replies, &[]).await?,
        conversations: store.count_documents(Collection::Conversations, &[]).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::*;
    use crate::core::store::{EngagementWrite, Granularity, MemoryStore, PersonPatch, ReplyWrite};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn group(province: &str, district: &str, total: i64, with_medical_id: i64) -> AddressGroup {
        AddressGroup {
            province: province.into(),
            district: district.into(),
            total,
            with_medical_id,
        }
    }

    #[test]
    fn test_percentage_guards_empty_population() {
        assert_eq!(percentage(7, 10), 70.0);
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(3, 0), 0.0);
        assert!((percentage(1, 3) - 33.333_333_333_333_33).abs() < 1e-9);
    }

    #[test]
    fn test_addresses_sorted_by_total_then_name() {
        let rows = summarize_addresses(vec![
            group("Hue", "other", 2, 0),
            group("Da Nang", "Hai Chau", 5, 3),
            group("Can Tho", "Ninh Kieu", 2, 2),
            group("Can Tho", "Cai Rang", 2, 1),
        ]);
        let order: Vec<_> = rows
            .iter()
            .map(|r| (r.province.as_str(), r.district.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Da Nang", "Hai Chau"),
                ("Can Tho", "Cai Rang"),
                ("Can Tho", "Ninh Kieu"),
                ("Hue", "other"),
            ]
        );
        assert_eq!(rows[0].peoples_general_count, 2);
        assert_eq!(rows[0].percentage, percentage(5, 11));
        assert!((rows[0].percentage - 45.454_545_454_545_45).abs() < 1e-9);
        let sum: f64 = rows.iter().map(|r| r.percentage).sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_medical_id_split_within_one_district() {
        let store = MemoryStore::new();
        let medical_ids = ["123456", "654321", "12345", "abcdef", ""];
        for (i, medical_id) in medical_ids.iter().enumerate() {
            store
                .upsert_person(PersonPatch {
                    id: format!("p{i}"),
                    province: Some("Hue".into()),
                    district: Some("Phu Vang".into()),
                    medical_id: Some(medical_id.to_string()).filter(|m| !m.is_empty()),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let rows = address_breakdown(&store).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].peoples_count, 5);
        assert_eq!(rows[0].peoples_with_d_id_count, 2);
        assert_eq!(rows[0].peoples_general_count, 3);
        assert_eq!(rows[0].percentage, 100.0);
    }

    #[tokio::test]
    async fn test_missing_address_grouped_as_other() {
        let store = MemoryStore::new();
        seed_person(&store, "a", None).await;
        seed_person(&store, "b", Some("Hue")).await;

        let rows = address_breakdown(&store).await.unwrap();
        let keys: Vec<_> = rows
            .iter()
            .map(|r| (r.province.as_str(), r.district.as_str()))
            .collect();
        assert_eq!(keys, vec![("Hue", "other"), ("other", "other")]);
    }

    async fn reply(store: &MemoryStore, person: &str, schedule: Uuid, block: &str) {
        store
            .record_engagement(EngagementWrite {
                person_id: person.into(),
                schedule_id: schedule,
                reply: Some(ReplyWrite {
                    bot_id: "bot-1".into(),
                    block_id: block.into(),
                    text: Some("ok".into()),
                    image: None,
                    submitted_type: None,
                }),
                quiz: None,
                progress: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_completion_counts_distinct_repliers() {
        let store = MemoryStore::new();
        let second = seed_schedule(&store, "Week 2", 2).await;
        let first = seed_schedule(&store, "Week 1", 1).await;
        for i in 0..10 {
            seed_person(&store, &format!("p{i}"), None).await;
        }
        for i in 0..7 {
            reply(&store, &format!("p{i}"), first.id, "intro").await;
            reply(&store, &format!("p{i}"), first.id, "outro").await;
        }

        let rows = schedule_completion(&store, DateRange::default()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].schedule_id, first.id);
        assert_eq!(rows[0].people, 7);
        assert_eq!(rows[0].percentage, 70.0);
        assert_eq!(rows[1].schedule_id, second.id);
        assert_eq!(rows[1].people, 0);
        assert_eq!(rows[1].percentage, 0.0);
    }

    #[tokio::test]
    async fn test_completion_restricts_replies_to_population() {
        let store = MemoryStore::new();
        let schedule = seed_schedule(&store, "Week 1", 1).await;
        let early = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        for (id, created) in [("old-1", early), ("old-2", early), ("new-1", late)] {
            seed_person(&store, id, None).await;
            backdate_person(&store, id, created).await;
        }
        reply(&store, "old-1", schedule.id, "b").await;
        reply(&store, "new-1", schedule.id, "b").await;

        let range = DateRange {
            from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
        };
        let rows = schedule_completion(&store, range).await.unwrap();
        assert_eq!(rows[0].people, 1);
        assert_eq!(rows[0].percentage, 50.0);

        let empty = DateRange {
            from: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap()),
        };
        let rows = schedule_completion(&store, empty).await.unwrap();
        assert_eq!(rows[0].people, 0);
        assert_eq!(rows[0].percentage, 0.0);
    }

    #[tokio::test]
    async fn test_creation_histogram_honours_offset() {
        let store = MemoryStore::new();
        let instants = [
            Utc.with_ymd_and_hms(2024, 1, 31, 20, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 15, 10, 0, 0).unwrap(),
        ];
        for (i, created) in instants.into_iter().enumerate() {
            let id = format!("p{i}");
            seed_person(&store, &id, None).await;
            backdate_person(&store, &id, created).await;
        }

        let utc = ReportParams {
            granularity: Granularity::Month,
            tz_offset_minutes: 0,
            range: DateRange::default(),
        };
        let buckets = creation_histogram(&store, &utc).await.unwrap();
        let counts: Vec<_> = buckets.iter().map(|b| (b.month, b.count)).collect();
        assert_eq!(counts, vec![(Some(1), 2), (Some(2), 1)]);

        let plus_seven = ReportParams {
            tz_offset_minutes: 420,
            ..utc
        };
        let buckets = creation_histogram(&store, &plus_seven).await.unwrap();
        let counts: Vec<_> = buckets.iter().map(|b| (b.month, b.count)).collect();
        assert_eq!(counts, vec![(Some(1), 1), (Some(2), 2)]);
        assert!(buckets.iter().all(|b| b.day.is_none()));
    }
}
