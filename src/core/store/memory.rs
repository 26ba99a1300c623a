//! In-process document store. Every write takes the single write lock, so
//! natural-key upserts and the engagement write are atomic just as they are
//! in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::documents::{self, Collection, Condition, DocumentQuery};
use super::{
    AddressGroup, BucketQuery, CommentWrite, CreationBucket, DateRange, DocumentPage,
    EngagementReceipt, EngagementWrite, Granularity, PersonPatch, ScheduleReplyCount, Store,
    StoreError, OTHER_GROUP,
};
use crate::core::shared::models::{Comment, Person, Question, Schedule, User};

/// Collections an engagement event may write.
const ENGAGEMENT_TABLES: [Collection; 3] =
    [Collection::Replies, Collection::Quizzes, Collection::Progresses];

#[derive(Debug, Clone, Default)]
struct Tables {
    collections: HashMap<Collection, BTreeMap<String, Value>>,
}

fn now_value() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn decode<T: DeserializeOwned>(document: &Value) -> Result<T, StoreError> {
    serde_json::from_value(document.clone()).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn timestamp(document: &Value, field: &str) -> Option<DateTime<Utc>> {
    document
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn text<'a>(document: &'a Value, field: &str) -> Option<&'a str> {
    document.get(field).and_then(Value::as_str)
}

impl Tables {
    fn docs(&self, collection: Collection) -> impl Iterator<Item = &Value> {
        self.collections
            .get(&collection)
            .into_iter()
            .flat_map(|table| table.values())
    }

    fn table_mut(&mut self, collection: Collection) -> &mut BTreeMap<String, Value> {
        self.collections.entry(collection).or_default()
    }

    fn get(&self, collection: Collection, id: &str) -> Option<&Value> {
        self.collections.get(&collection).and_then(|t| t.get(id))
    }

    fn check_unique(
        &self,
        collection: Collection,
        document: &Value,
        own_id: &str,
    ) -> Result<(), StoreError> {
        for key in collection.unique_keys() {
            let clash = self.docs(collection).any(|other| {
                text(other, "id") != Some(own_id)
                    && key.iter().all(|f| other.get(*f) == document.get(*f))
            });
            if clash {
                return Err(StoreError::Constraint(format!(
                    "duplicate key value violates unique constraint on {} ({})",
                    collection.table(),
                    key.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Writes `document` as a new row, filling every missing column with null.
    fn insert(&mut self, collection: Collection, mut document: Map<String, Value>) -> Result<Value, StoreError> {
        let id = documents::stamp_new(collection, &mut document, &now_value());
        if self.get(collection, &id).is_some() {
            return Err(StoreError::Constraint(format!(
                "duplicate key value violates primary key on {}",
                collection.table()
            )));
        }

        let document = Value::Object(document);
        self.check_unique(collection, &document, &id)?;
        self.table_mut(collection).insert(id, document.clone());
        Ok(document)
    }

    fn update(
        &mut self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, StoreError> {
        let Some(Value::Object(current)) = self.get(collection, id).cloned() else {
            return Ok(None);
        };
        let mut merged = current;
        for (key, value) in patch {
            if key != "id" && key != "created_at" {
                merged.insert(key, value);
            }
        }
        if collection.has_updated_at() {
            merged.insert("updated_at".into(), now_value());
        }

        let document = Value::Object(merged);
        self.check_unique(collection, &document, id)?;
        self.table_mut(collection).insert(id.to_string(), document.clone());
        Ok(Some(document))
    }

    /// Overwrites the row sharing `key` with `document`, or inserts it.
    fn upsert(
        &mut self,
        collection: Collection,
        key: &[&str],
        document: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        let existing = self
            .docs(collection)
            .find(|row| key.iter().all(|f| row.get(*f) == document.get(*f)))
            .and_then(|row| text(row, "id"))
            .map(str::to_string);

        match existing {
            Some(id) => self
                .update(collection, &id, document)?
                .ok_or_else(|| StoreError::Corrupt(format!("{} row {id} vanished", collection.table()))),
            None => self.insert(collection, document),
        }
    }

    fn record_engagement(&mut self, write: EngagementWrite) -> Result<EngagementReceipt, StoreError> {
        let mut receipt = EngagementReceipt::default();
        let person = Value::String(write.person_id.clone());
        let schedule = Value::String(write.schedule_id.to_string());

        if let Some(reply) = write.reply {
            let mut doc = Map::new();
            doc.insert("person_id".into(), person.clone());
            doc.insert("schedule_id".into(), schedule.clone());
            doc.insert("bot_id".into(), Value::String(reply.bot_id));
            doc.insert("block_id".into(), Value::String(reply.block_id));
            doc.insert("text".into(), reply.text.map_or(Value::Null, Value::String));
            doc.insert("image".into(), reply.image.map_or(Value::Null, Value::String));
            doc.insert(
                "submitted_type".into(),
                reply
                    .submitted_type
                    .map_or(Value::Null, |t| Value::String(t.as_str().to_string())),
            );
            let stored = self.upsert(
                Collection::Replies,
                &["person_id", "schedule_id", "bot_id", "block_id"],
                doc,
            )?;
            receipt.reply = Some(decode(&stored)?);
        }

        if let Some(quiz) = write.quiz {
            let reply_id = receipt
                .reply
                .as_ref()
                .map_or(Value::Null, |r| Value::String(r.id.to_string()));
            let mut doc = Map::new();
            doc.insert("person_id".into(), person.clone());
            doc.insert("question_id".into(), Value::String(quiz.question_id.to_string()));
            doc.insert("reply_id".into(), reply_id);
            doc.insert("answer".into(), Value::from(quiz.answer));
            doc.insert("is_correct".into(), Value::Bool(quiz.is_correct));
            let stored = self.upsert(Collection::Quizzes, &["person_id", "question_id"], doc)?;
            receipt.quiz = Some(decode(&stored)?);
        }

        if let Some(status) = write.progress {
            let mut doc = Map::new();
            doc.insert("person_id".into(), person);
            doc.insert("schedule_id".into(), schedule);
            doc.insert("status".into(), Value::from(status.code()));
            let stored = self.upsert(Collection::Progresses, &["person_id", "schedule_id"], doc)?;
            receipt.progress = Some(decode(&stored)?);
        }

        Ok(receipt)
    }
}

fn person_document(patch: PersonPatch) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert("id".into(), Value::String(patch.id));
    let fields = [
        ("bot_id", patch.bot_id),
        ("first_name", patch.first_name),
        ("last_name", patch.last_name),
        ("gender", patch.gender),
        ("avatar_url", patch.avatar_url),
        ("locale", patch.locale),
        ("timezone", patch.timezone),
        ("province", patch.province),
        ("district", patch.district),
        ("medical_id", patch.medical_id),
        ("child_name", patch.child_name),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            doc.insert(name.into(), Value::String(value));
        }
    }
    if let Some(year) = patch.child_birth_year {
        doc.insert("child_birth_year".into(), Value::from(year));
    }
    doc
}

/// Store backed by process memory. Used by the test suite and by
/// `botadmin --memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `ping` fail, as an unreachable database would.
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Rewrites `created_at`, which regular writes never touch.
    #[cfg(test)]
    pub async fn backdate(
        &self,
        collection: Collection,
        id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let document = tables
            .table_mut(collection)
            .get_mut(id)
            .ok_or_else(|| StoreError::Query(format!("no {} row {id}", collection.table())))?;
        document["created_at"] =
            Value::String(created_at.to_rfc3339_opts(SecondsFormat::Micros, true));
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Connection("store is offline".into()));
        }
        Ok(())
    }

    async fn find_person(&self, id: &str) -> Result<Option<Person>, StoreError> {
        let tables = self.tables.read().await;
        tables.get(Collection::People, id).map(decode).transpose()
    }

    async fn upsert_person(&self, patch: PersonPatch) -> Result<Person, StoreError> {
        let mut tables = self.tables.write().await;
        let stored = tables.upsert(Collection::People, &["id"], person_document(patch))?;
        decode(&stored)
    }

    async fn find_schedule(&self, id: Uuid) -> Result<Option<Schedule>, StoreError> {
        let tables = self.tables.read().await;
        let found = tables
            .get(Collection::Schedules, &id.to_string())
            .map(decode)
            .transpose();
        found
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let tables = self.tables.read().await;
        let mut schedules = tables
            .docs(Collection::Schedules)
            .map(decode)
            .collect::<Result<Vec<Schedule>, _>>()?;
        schedules.sort_by(|a, b| a.day.cmp(&b.day).then(a.created_at.cmp(&b.created_at)));
        Ok(schedules)
    }

    async fn find_question(&self, id: Uuid) -> Result<Option<Question>, StoreError> {
        let tables = self.tables.read().await;
        let found = tables
            .get(Collection::Questions, &id.to_string())
            .map(decode)
            .transpose();
        found
    }

    async fn record_engagement(
        &self,
        write: EngagementWrite,
    ) -> Result<EngagementReceipt, StoreError> {
        let mut tables = self.tables.write().await;
        // A failing step restores the written tables so nothing is left behind.
        let saved: Vec<_> = ENGAGEMENT_TABLES
            .iter()
            .map(|c| (*c, tables.collections.get(c).cloned()))
            .collect();
        let result = tables.record_engagement(write);
        if result.is_err() {
            for (collection, table) in saved {
                match table {
                    Some(table) => tables.collections.insert(collection, table),
                    None => tables.collections.remove(&collection),
                };
            }
        }
        result
    }

    async fn upsert_comment(&self, write: CommentWrite) -> Result<Comment, StoreError> {
        let mut doc = Map::new();
        doc.insert("person_id".into(), Value::String(write.person_id));
        doc.insert("question_id".into(), Value::String(write.question_id.to_string()));
        doc.insert("answer".into(), Value::String(write.answer));

        let mut tables = self.tables.write().await;
        let stored = tables.upsert(Collection::Comments, &["person_id", "question_id"], doc)?;
        decode(&stored)
    }

    async fn address_groups(&self) -> Result<Vec<AddressGroup>, StoreError> {
        let tables = self.tables.read().await;
        let mut groups: BTreeMap<(String, String), (i64, i64)> = BTreeMap::new();
        for person in tables.docs(Collection::People) {
            let label = |field: &str| {
                text(person, field)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(OTHER_GROUP)
                    .to_string()
            };
            let entry = groups
                .entry((label("province"), label("district")))
                .or_default();
            entry.0 += 1;
            if text(person, "medical_id").is_some_and(super::is_medical_id) {
                entry.1 += 1;
            }
        }
        Ok(groups
            .into_iter()
            .map(|((province, district), (total, with_medical_id))| AddressGroup {
                province,
                district,
                total,
                with_medical_id,
            })
            .collect())
    }

    async fn creation_buckets(
        &self,
        query: BucketQuery,
    ) -> Result<Vec<CreationBucket>, StoreError> {
        let tables = self.tables.read().await;
        let offset = Duration::minutes(i64::from(query.offset_minutes));
        let mut counts: BTreeMap<(i32, Option<i32>, Option<i32>), i64> = BTreeMap::new();

        for person in tables.docs(Collection::People) {
            let Some(created) = timestamp(person, "created_at") else {
                continue;
            };
            if !query.range.contains(created) {
                continue;
            }
            let local = (created + offset).naive_utc();
            let key = match query.granularity {
                Granularity::Day => (local.year(), Some(local.month() as i32), Some(local.day() as i32)),
                Granularity::Month => (local.year(), Some(local.month() as i32), None),
                Granularity::Year => (local.year(), None, None),
            };
            *counts.entry(key).or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((year, month, day), count)| CreationBucket {
                year,
                month,
                day,
                count,
            })
            .collect())
    }

    async fn people_created_within(&self, range: DateRange) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .docs(Collection::People)
            .filter(|p| timestamp(p, "created_at").is_some_and(|t| range.contains(t)))
            .filter_map(|p| text(p, "id").map(str::to_string))
            .collect())
    }

    async fn repliers_per_schedule(
        &self,
        people: Option<Vec<String>>,
    ) -> Result<Vec<ScheduleReplyCount>, StoreError> {
        let allowed: Option<HashSet<String>> = people.map(|ids| ids.into_iter().collect());
        let tables = self.tables.read().await;
        let mut repliers: HashMap<Uuid, HashSet<&str>> = HashMap::new();

        for reply in tables.docs(Collection::Replies) {
            let (Some(person), Some(schedule)) = (text(reply, "person_id"), text(reply, "schedule_id")) else {
                continue;
            };
            if allowed.as_ref().is_some_and(|ids| !ids.contains(person)) {
                continue;
            }
            let schedule_id = Uuid::parse_str(schedule)
                .map_err(|e| StoreError::Corrupt(format!("reply schedule_id: {e}")))?;
            repliers.entry(schedule_id).or_default().insert(person);
        }

        Ok(repliers
            .into_iter()
            .map(|(schedule_id, people)| ScheduleReplyCount {
                schedule_id,
                people: people.len() as i64,
            })
            .collect())
    }

    async fn list_documents(
        &self,
        collection: Collection,
        query: &DocumentQuery,
    ) -> Result<DocumentPage, StoreError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Value> = tables
            .docs(collection)
            .filter(|doc| documents::matches(doc, &query.filter))
            .cloned()
            .collect();
        documents::sort_documents(&mut matching, &query.sort);

        let count = query.with_count.then(|| matching.len() as i64);
        let results = matching
            .into_iter()
            .skip(query.skip.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();
        Ok(DocumentPage { results, count })
    }

    async fn count_documents(
        &self,
        collection: Collection,
        filter: &[Condition],
    ) -> Result<i64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .docs(collection)
            .filter(|doc| documents::matches(doc, filter))
            .count() as i64)
    }

    async fn get_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self.tables.read().await.get(collection, id).cloned())
    }

    async fn insert_document(
        &self,
        collection: Collection,
        document: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        self.tables.write().await.insert(collection, document)
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, StoreError> {
        self.tables.write().await.update(collection, id, patch)
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.table_mut(collection).remove(id).is_some())
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        let found = tables
            .docs(Collection::Users)
            .find(|u| text(u, "username") == Some(username))
            .map(decode)
            .transpose();
        found
    }

    async fn save_user(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, StoreError> {
        let mut doc = Map::new();
        doc.insert("username".into(), Value::String(username.to_string()));
        doc.insert("password_hash".into(), Value::String(password_hash.to_string()));
        doc.insert("is_admin".into(), Value::Bool(is_admin));

        let mut tables = self.tables.write().await;
        let stored = tables.upsert(Collection::Users, &["username"], doc)?;
        decode(&stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::models::{ProgressStatus, SubmittedType};
    use crate::core::store::{QuizWrite, ReplyWrite};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn schedule(store: &MemoryStore, name: &str, day: i32) -> Uuid {
        let doc = store
            .insert_document(Collection::Schedules, object(json!({"name": name, "day": day})))
            .await
            .unwrap();
        Uuid::parse_str(doc["id"].as_str().unwrap()).unwrap()
    }

    fn engagement(schedule_id: Uuid, text: &str) -> EngagementWrite {
        EngagementWrite {
            person_id: "p1".into(),
            schedule_id,
            reply: Some(ReplyWrite {
                bot_id: "bot".into(),
                block_id: "block".into(),
                text: Some(text.into()),
                image: None,
                submitted_type: Some(SubmittedType::Text),
            }),
            quiz: None,
            progress: Some(ProgressStatus::Started),
        }
    }

    #[tokio::test]
    async fn test_upsert_person_merges_fields() {
        let store = MemoryStore::new();
        store
            .upsert_person(PersonPatch {
                id: "p1".into(),
                first_name: Some("Lan".into()),
                province: Some("Hue".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let person = store
            .upsert_person(PersonPatch {
                id: "p1".into(),
                first_name: Some("Mai".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(person.first_name.as_deref(), Some("Mai"));
        assert_eq!(person.province.as_deref(), Some("Hue"));
        assert_eq!(store.count_documents(Collection::People, &[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_engagement_overwrites_by_natural_key() {
        let store = MemoryStore::new();
        let day1 = schedule(&store, "Day 1", 1).await;

        store.record_engagement(engagement(day1, "first")).await.unwrap();
        let mut second = engagement(day1, "second");
        second.progress = Some(ProgressStatus::Complete);
        let receipt = store.record_engagement(second).await.unwrap();

        assert_eq!(receipt.reply.unwrap().text.as_deref(), Some("second"));
        assert_eq!(receipt.progress.unwrap().status, 2);
        assert_eq!(store.count_documents(Collection::Replies, &[]).await.unwrap(), 1);
        assert_eq!(store.count_documents(Collection::Progresses, &[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_engagement_leaves_nothing_behind() {
        let store = MemoryStore::new();
        let day1 = schedule(&store, "Day 1", 1).await;
        store.tables.write().await.table_mut(Collection::Progresses).insert(
            "broken".into(),
            json!({
                "id": "broken",
                "person_id": "p1",
                "schedule_id": day1.to_string(),
                "status": 1,
                "created_at": "not a timestamp",
            }),
        );

        let err = store.record_engagement(engagement(day1, "lost")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert_eq!(store.count_documents(Collection::Replies, &[]).await.unwrap(), 0);
        let progress = store.get_document(Collection::Progresses, "broken").await.unwrap().unwrap();
        assert!(progress.get("updated_at").is_none());
        assert_eq!(store.count_documents(Collection::Schedules, &[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_quiz_references_reply_from_same_event() {
        let store = MemoryStore::new();
        let day1 = schedule(&store, "Day 1", 1).await;
        let question_id = Uuid::new_v4();

        let mut write = engagement(day1, "answer");
        write.quiz = Some(QuizWrite {
            question_id,
            answer: 1,
            is_correct: true,
        });
        let receipt = store.record_engagement(write).await.unwrap();
        let reply = receipt.reply.unwrap();
        let quiz = receipt.quiz.unwrap();
        assert_eq!(quiz.reply_id, Some(reply.id));

        let mut without_reply = engagement(day1, "unused");
        without_reply.reply = None;
        without_reply.quiz = Some(QuizWrite {
            question_id,
            answer: 2,
            is_correct: false,
        });
        let quiz = store.record_engagement(without_reply).await.unwrap().quiz.unwrap();
        assert_eq!(quiz.reply_id, None);
        assert!(!quiz.is_correct);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_natural_key() {
        let store = MemoryStore::new();
        let question = Uuid::new_v4().to_string();
        let comment = json!({"person_id": "p1", "question_id": question, "answer": "a"});
        store
            .insert_document(Collection::Comments, object(comment.clone()))
            .await
            .unwrap();
        let err = store
            .insert_document(Collection::Comments, object(comment))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_people_keep_supplied_id() {
        let store = MemoryStore::new();
        let doc = store
            .insert_document(Collection::People, object(json!({"id": "1839201"})))
            .await
            .unwrap();
        assert_eq!(doc["id"], "1839201");
        assert!(doc["province"].is_null());

        let schedule = store
            .insert_document(Collection::Schedules, object(json!({"id": "mine", "name": "D", "day": 1})))
            .await
            .unwrap();
        assert_ne!(schedule["id"], "mine");
    }

    #[tokio::test]
    async fn test_update_refreshes_updated_at_and_keeps_created_at() {
        let store = MemoryStore::new();
        let doc = store
            .insert_document(Collection::Schedules, object(json!({"name": "Day 1", "day": 1})))
            .await
            .unwrap();
        let id = doc["id"].as_str().unwrap();

        let updated = store
            .update_document(
                Collection::Schedules,
                id,
                object(json!({"name": "Day One", "created_at": "2000-01-01T00:00:00Z"})),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["name"], "Day One");
        assert_eq!(updated["created_at"], doc["created_at"]);
        assert!(store
            .update_document(Collection::Schedules, "missing", Map::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_repliers_per_schedule_counts_distinct_people() {
        let store = MemoryStore::new();
        let day1 = schedule(&store, "Day 1", 1).await;
        for (person, block) in [("p1", "a"), ("p1", "b"), ("p2", "a")] {
            let mut write = engagement(day1, "x");
            write.person_id = person.into();
            if let Some(reply) = write.reply.as_mut() {
                reply.block_id = block.into();
            }
            store.record_engagement(write).await.unwrap();
        }

        let all = store.repliers_per_schedule(None).await.unwrap();
        assert_eq!(all, vec![ScheduleReplyCount { schedule_id: day1, people: 2 }]);

        let only_p2 = store
            .repliers_per_schedule(Some(vec!["p2".into()]))
            .await
            .unwrap();
        assert_eq!(only_p2[0].people, 1);
    }
}
