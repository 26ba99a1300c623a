//! Persistence seam.
//!
//! Every component reaches the document store through [`Store`]. Writes keyed
//! by a natural key are upserts executed by the store itself (`ON CONFLICT`
//! in Postgres, a single lock hold in memory), never a read followed by a
//! conditional insert in the caller.

pub mod documents;
pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::shared::models::{
    Comment, Person, Progress, ProgressStatus, Question, Quiz, Reply, Schedule, SubmittedType,
    User,
};

pub use documents::{Collection, Condition, DocumentQuery, Operator, SortKey};
pub use memory::MemoryStore;
pub use pg::PgStore;

/// Group label used when a person has no province or district.
pub const OTHER_GROUP: &str = "other";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Corrupt document: {0}")]
    Corrupt(String),
    #[error("Store task failed: {0}")]
    Task(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match err {
            Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation,
                info,
            ) => StoreError::Constraint(info.message().to_string()),
            Error::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
                StoreError::Connection(info.message().to_string())
            }
            Error::DatabaseError(_, info) if info.message().starts_with("invalid input syntax") => {
                StoreError::Constraint(info.message().to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Sanitized person fields from an upsert-person event. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonPatch {
    pub id: String,
    pub bot_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub avatar_url: Option<String>,
    pub locale: Option<String>,
    pub timezone: Option<String>,
    pub province: Option<String>,
    pub district: Option<String>,
    pub medical_id: Option<String>,
    pub child_name: Option<String>,
    pub child_birth_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyWrite {
    pub bot_id: String,
    pub block_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub submitted_type: Option<SubmittedType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizWrite {
    pub question_id: Uuid,
    pub answer: i32,
    pub is_correct: bool,
}

/// One reply event's writes. Applied in order reply, quiz, progress inside a
/// single transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementWrite {
    pub person_id: String,
    pub schedule_id: Uuid,
    pub reply: Option<ReplyWrite>,
    pub quiz: Option<QuizWrite>,
    pub progress: Option<ProgressStatus>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngagementReceipt {
    pub reply: Option<Reply>,
    pub quiz: Option<Quiz>,
    pub progress: Option<Progress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentWrite {
    pub person_id: String,
    pub question_id: Uuid,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// `from` is inclusive, `to` exclusive.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| instant >= from) && self.to.map_or(true, |to| instant < to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Day,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketQuery {
    pub granularity: Granularity,
    pub offset_minutes: i32,
    pub range: DateRange,
}

/// Raw address grouping; derived counts are computed by the reporting engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressGroup {
    pub province: String,
    pub district: String,
    pub total: i64,
    pub with_medical_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreationBucket {
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReplyCount {
    pub schedule_id: Uuid,
    pub people: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPage {
    pub results: Vec<Value>,
    pub count: Option<i64>,
}

/// A medical ID counts only when it is exactly six ASCII digits.
pub fn is_medical_id(value: &str) -> bool {
    value.len() == 6 && value.bytes().all(|b| b.is_ascii_digit())
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_person(&self, id: &str) -> Result<Option<Person>, StoreError>;
    async fn upsert_person(&self, patch: PersonPatch) -> Result<Person, StoreError>;
    async fn find_schedule(&self, id: Uuid) -> Result<Option<Schedule>, StoreError>;
    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError>;
    async fn find_question(&self, id: Uuid) -> Result<Option<Question>, StoreError>;
    async fn record_engagement(
        &self,
        write: EngagementWrite,
    ) -> Result<EngagementReceipt, StoreError>;
    async fn upsert_comment(&self, write: CommentWrite) -> Result<Comment, StoreError>;

    async fn address_groups(&self) -> Result<Vec<AddressGroup>, StoreError>;
    async fn creation_buckets(&self, query: BucketQuery)
        -> Result<Vec<CreationBucket>, StoreError>;
    async fn people_created_within(&self, range: DateRange) -> Result<Vec<String>, StoreError>;
    /// Distinct repliers per schedule, optionally restricted to `people`.
    async fn repliers_per_schedule(
        &self,
        people: Option<Vec<String>>,
    ) -> Result<Vec<ScheduleReplyCount>, StoreError>;

    async fn list_documents(
        &self,
        collection: Collection,
        query: &DocumentQuery,
    ) -> Result<DocumentPage, StoreError>;
    async fn count_documents(
        &self,
        collection: Collection,
        filter: &[Condition],
    ) -> Result<i64, StoreError>;
    async fn get_document(&self, collection: Collection, id: &str)
        -> Result<Option<Value>, StoreError>;
    async fn insert_document(
        &self,
        collection: Collection,
        document: Map<String, Value>,
    ) -> Result<Value, StoreError>;
    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, StoreError>;
    async fn delete_document(&self, collection: Collection, id: &str) -> Result<bool, StoreError>;

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn save_user(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_medical_id_requires_six_digits() {
        assert!(is_medical_id("012345"));
        assert!(!is_medical_id("12345"));
        assert!(!is_medical_id("1234567"));
        assert!(!is_medical_id("12a456"));
        assert!(!is_medical_id("１２３４５６"));
    }

    #[test]
    fn test_date_range_is_half_open() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let range = DateRange {
            from: Some(from),
            to: Some(to),
        };
        assert!(range.contains(from));
        assert!(!range.contains(to));
        assert!(DateRange::default().is_unbounded());
        assert!(DateRange::default().contains(to));
    }
}
