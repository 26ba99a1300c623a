use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Array, BigInt, Int4, Jsonb, Nullable, Text, Timestamptz};
use diesel::upsert::excluded;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::documents::{self, Collection, Condition, DocumentQuery, FieldKind, Operator};
use super::{
    AddressGroup, BucketQuery, CommentWrite, CreationBucket, DateRange, DocumentPage,
    EngagementReceipt, EngagementWrite, Granularity, PersonPatch, ScheduleReplyCount, Store,
    StoreError, OTHER_GROUP,
};
use crate::core::shared::models::{
    Comment, Person, Progress, Question, Quiz, Reply, Schedule, User,
};
use crate::core::shared::schema::{
    comments, people, progresses, questions, quizzes, replies, schedules, users,
};
use crate::core::shared::utils::DbPool;

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = people)]
struct PersonRow {
    id: String,
    bot_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    gender: Option<String>,
    avatar_url: Option<String>,
    locale: Option<String>,
    timezone: Option<String>,
    province: Option<String>,
    district: Option<String>,
    medical_id: Option<String>,
    child_name: Option<String>,
    child_birth_year: Option<i32>,
    updated_at: DateTime<Utc>,
}

impl PersonRow {
    fn new(patch: PersonPatch, now: DateTime<Utc>) -> Self {
        Self {
            id: patch.id,
            bot_id: patch.bot_id,
            first_name: patch.first_name,
            last_name: patch.last_name,
            gender: patch.gender,
            avatar_url: patch.avatar_url,
            locale: patch.locale,
            timezone: patch.timezone,
            province: patch.province,
            district: patch.district,
            medical_id: patch.medical_id,
            child_name: patch.child_name,
            child_birth_year: patch.child_birth_year,
            updated_at: now,
        }
    }
}

#[derive(QueryableByName)]
struct DocumentRow {
    #[diesel(sql_type = Jsonb)]
    doc: Value,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct AddressRow {
    #[diesel(sql_type = Text)]
    province: String,
    #[diesel(sql_type = Text)]
    district: String,
    #[diesel(sql_type = BigInt)]
    total: i64,
    #[diesel(sql_type = BigInt)]
    with_medical_id: i64,
}

#[derive(QueryableByName)]
struct BucketRow {
    #[diesel(sql_type = Int4)]
    year: i32,
    #[diesel(sql_type = Nullable<Int4>)]
    month: Option<i32>,
    #[diesel(sql_type = Nullable<Int4>)]
    day: Option<i32>,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct ReplierRow {
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    schedule_id: Uuid,
    #[diesel(sql_type = BigInt)]
    people: i64,
}

enum Bind {
    Text(String),
    TextArray(Vec<String>),
    Json(Value),
}

type DynamicQuery = BoxedSqlQuery<'static, Pg, SqlQuery>;

fn bind_all(sql: String, binds: Vec<Bind>) -> DynamicQuery {
    let mut query = diesel::sql_query(sql).into_boxed::<Pg>();
    for bind in binds {
        query = match bind {
            Bind::Text(value) => query.bind::<Text, _>(value),
            Bind::TextArray(values) => query.bind::<Array<Text>, _>(values),
            Bind::Json(value) => query.bind::<Jsonb, _>(value),
        };
    }
    query
}

fn sql_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "text",
        FieldKind::Uuid => "uuid",
        FieldKind::Int => "int4",
        FieldKind::Bool => "boolean",
        FieldKind::Timestamp => "timestamptz",
        FieldKind::TextArray => "text[]",
        FieldKind::IntArray => "int4[]",
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders the filter as SQL over alias `t`. Field names come from the
/// collection whitelist; every value is a bind parameter.
fn where_clause(collection: Collection, filter: &[Condition], binds: &mut Vec<Bind>) -> String {
    let mut clauses = Vec::new();
    for condition in filter {
        let Some(field) = collection.field(condition.field) else {
            continue;
        };
        let column = format!("t.{}", field.name);
        let array_kind = matches!(field.kind, FieldKind::TextArray | FieldKind::IntArray);

        let clause = match (condition.op, &condition.value) {
            (Operator::Eq, Value::Null) => format!("{column} IS NULL"),
            (Operator::Ne, Value::Null) => format!("{column} IS NOT NULL"),
            (op, value) if array_kind => {
                binds.push(Bind::Json(value.clone()));
                let n = binds.len();
                match op {
                    Operator::In => format!(
                        "to_jsonb({column}) IN (SELECT jsonb_array_elements(${n}::jsonb))"
                    ),
                    Operator::Ne => format!("to_jsonb({column}) IS DISTINCT FROM ${n}::jsonb"),
                    _ => format!("to_jsonb({column}) {} ${n}::jsonb", op.sql()),
                }
            }
            (Operator::In, Value::Array(items)) => {
                binds.push(Bind::TextArray(items.iter().map(scalar_text).collect()));
                let n = binds.len();
                format!("{column} = ANY(CAST(${n} AS {}[]))", sql_type(field.kind))
            }
            (op, value) => {
                binds.push(Bind::Text(scalar_text(value)));
                let n = binds.len();
                let cast = format!("CAST(${n} AS {})", sql_type(field.kind));
                match op {
                    Operator::Ne => format!("{column} IS DISTINCT FROM {cast}"),
                    _ => format!("{column} {} {cast}", op.sql()),
                }
            }
        };
        clauses.push(clause);
    }

    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn order_clause(query: &DocumentQuery) -> String {
    let mut keys: Vec<String> = query
        .sort
        .iter()
        .map(|key| {
            if key.descending {
                format!("t.{} DESC NULLS LAST", key.field)
            } else {
                format!("t.{} ASC NULLS FIRST", key.field)
            }
        })
        .collect();
    keys.push("t.created_at ASC".into());
    keys.push("t.id ASC".into());
    format!(" ORDER BY {}", keys.join(", "))
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Runs `job` on the blocking pool with one pooled connection.
    async fn run<T, F>(&self, job: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            job(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn write_engagement(
        conn: &mut PgConnection,
        write: EngagementWrite,
    ) -> Result<EngagementReceipt, StoreError> {
        let now = Utc::now();
        let mut receipt = EngagementReceipt::default();

        if let Some(reply) = write.reply {
            let stored = diesel::insert_into(replies::table)
                .values((
                    replies::id.eq(Uuid::new_v4()),
                    replies::person_id.eq(&write.person_id),
                    replies::schedule_id.eq(write.schedule_id),
                    replies::bot_id.eq(&reply.bot_id),
                    replies::block_id.eq(&reply.block_id),
                    replies::text.eq(&reply.text),
                    replies::image.eq(&reply.image),
                    replies::submitted_type.eq(reply.submitted_type.map(|t| t.as_str())),
                    replies::created_at.eq(now),
                    replies::updated_at.eq(now),
                ))
                .on_conflict((
                    replies::person_id,
                    replies::schedule_id,
                    replies::bot_id,
                    replies::block_id,
                ))
                .do_update()
                .set((
                    replies::text.eq(excluded(replies::text)),
                    replies::image.eq(excluded(replies::image)),
                    replies::submitted_type.eq(excluded(replies::submitted_type)),
                    replies::updated_at.eq(now),
                ))
                .returning(Reply::as_returning())
                .get_result(conn)?;
            receipt.reply = Some(stored);
        }

        if let Some(quiz) = write.quiz {
            let reply_id = receipt.reply.as_ref().map(|r| r.id);
            let stored = diesel::insert_into(quizzes::table)
                .values((
                    quizzes::id.eq(Uuid::new_v4()),
                    quizzes::person_id.eq(&write.person_id),
                    quizzes::question_id.eq(quiz.question_id),
                    quizzes::reply_id.eq(reply_id),
                    quizzes::answer.eq(quiz.answer),
                    quizzes::is_correct.eq(quiz.is_correct),
                    quizzes::created_at.eq(now),
                    quizzes::updated_at.eq(now),
                ))
                .on_conflict((quizzes::person_id, quizzes::question_id))
                .do_update()
                .set((
                    quizzes::reply_id.eq(excluded(quizzes::reply_id)),
                    quizzes::answer.eq(excluded(quizzes::answer)),
                    quizzes::is_correct.eq(excluded(quizzes::is_correct)),
                    quizzes::updated_at.eq(now),
                ))
                .returning(Quiz::as_returning())
                .get_result(conn)?;
            receipt.quiz = Some(stored);
        }

        if let Some(status) = write.progress {
            let stored = diesel::insert_into(progresses::table)
                .values((
                    progresses::id.eq(Uuid::new_v4()),
                    progresses::person_id.eq(&write.person_id),
                    progresses::schedule_id.eq(write.schedule_id),
                    progresses::status.eq(status.code()),
                    progresses::created_at.eq(now),
                    progresses::updated_at.eq(now),
                ))
                .on_conflict((progresses::person_id, progresses::schedule_id))
                .do_update()
                .set((
                    progresses::status.eq(excluded(progresses::status)),
                    progresses::updated_at.eq(now),
                ))
                .returning(Progress::as_returning())
                .get_result(conn)?;
            receipt.progress = Some(stored);
        }

        Ok(receipt)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.run(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn find_person(&self, id: &str) -> Result<Option<Person>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            Ok(people::table
                .find(id)
                .select(Person::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn upsert_person(&self, patch: PersonPatch) -> Result<Person, StoreError> {
        self.run(move |conn| {
            let row = PersonRow::new(patch, Utc::now());
            Ok(diesel::insert_into(people::table)
                .values(&row)
                .on_conflict(people::id)
                .do_update()
                .set(&row)
                .returning(Person::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn find_schedule(&self, id: Uuid) -> Result<Option<Schedule>, StoreError> {
        self.run(move |conn| {
            Ok(schedules::table
                .find(id)
                .select(Schedule::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        self.run(|conn| {
            Ok(schedules::table
                .order((schedules::day.asc(), schedules::created_at.asc()))
                .select(Schedule::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn find_question(&self, id: Uuid) -> Result<Option<Question>, StoreError> {
        self.run(move |conn| {
            Ok(questions::table
                .find(id)
                .select(Question::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn record_engagement(
        &self,
        write: EngagementWrite,
    ) -> Result<EngagementReceipt, StoreError> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| Self::write_engagement(conn, write))
        })
        .await
    }

    async fn upsert_comment(&self, write: CommentWrite) -> Result<Comment, StoreError> {
        self.run(move |conn| {
            let now = Utc::now();
            Ok(diesel::insert_into(comments::table)
                .values((
                    comments::id.eq(Uuid::new_v4()),
                    comments::person_id.eq(&write.person_id),
                    comments::question_id.eq(write.question_id),
                    comments::answer.eq(&write.answer),
                    comments::created_at.eq(now),
                    comments::updated_at.eq(now),
                ))
                .on_conflict((comments::person_id, comments::question_id))
                .do_update()
                .set((
                    comments::answer.eq(excluded(comments::answer)),
                    comments::updated_at.eq(now),
                ))
                .returning(Comment::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn address_groups(&self) -> Result<Vec<AddressGroup>, StoreError> {
        let rows: Vec<AddressRow> = self
            .run(|conn| {
                Ok(diesel::sql_query(
                    "SELECT COALESCE(NULLIF(province, ''), $1) AS province, \
                            COALESCE(NULLIF(district, ''), $1) AS district, \
                            COUNT(*) AS total, \
                            COUNT(*) FILTER (WHERE medical_id ~ '^[0-9]{6}$') AS with_medical_id \
                     FROM people GROUP BY 1, 2 ORDER BY 1, 2",
                )
                .bind::<Text, _>(OTHER_GROUP)
                .load(conn)?)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| AddressGroup {
                province: row.province,
                district: row.district,
                total: row.total,
                with_medical_id: row.with_medical_id,
            })
            .collect())
    }

    async fn creation_buckets(
        &self,
        query: BucketQuery,
    ) -> Result<Vec<CreationBucket>, StoreError> {
        let (month, day) = match query.granularity {
            Granularity::Day => (
                "EXTRACT(MONTH FROM local_at)::int4",
                "EXTRACT(DAY FROM local_at)::int4",
            ),
            Granularity::Month => ("EXTRACT(MONTH FROM local_at)::int4", "NULL::int4"),
            Granularity::Year => ("NULL::int4", "NULL::int4"),
        };
        let sql = format!(
            "SELECT EXTRACT(YEAR FROM local_at)::int4 AS year, {month} AS month, {day} AS day, \
                    COUNT(*) AS count \
             FROM (SELECT (created_at AT TIME ZONE 'UTC') + make_interval(mins => $1) AS local_at \
                   FROM people \
                   WHERE ($2::timestamptz IS NULL OR created_at >= $2) \
                     AND ($3::timestamptz IS NULL OR created_at < $3)) AS local_people \
             GROUP BY 1, 2, 3 ORDER BY 1, 2, 3"
        );

        let rows: Vec<BucketRow> = self
            .run(move |conn| {
                Ok(diesel::sql_query(sql)
                    .bind::<Int4, _>(query.offset_minutes)
                    .bind::<Nullable<Timestamptz>, _>(query.range.from)
                    .bind::<Nullable<Timestamptz>, _>(query.range.to)
                    .load(conn)?)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| CreationBucket {
                year: row.year,
                month: row.month,
                day: row.day,
                count: row.count,
            })
            .collect())
    }

    async fn people_created_within(&self, range: DateRange) -> Result<Vec<String>, StoreError> {
        self.run(move |conn| {
            let mut query = people::table.select(people::id).into_boxed();
            if let Some(from) = range.from {
                query = query.filter(people::created_at.ge(from));
            }
            if let Some(to) = range.to {
                query = query.filter(people::created_at.lt(to));
            }
            Ok(query.load(conn)?)
        })
        .await
    }

    async fn repliers_per_schedule(
        &self,
        people: Option<Vec<String>>,
    ) -> Result<Vec<ScheduleReplyCount>, StoreError> {
        let rows: Vec<ReplierRow> = self
            .run(move |conn| {
                Ok(diesel::sql_query(
                    "SELECT schedule_id, COUNT(DISTINCT person_id) AS people FROM replies \
                     WHERE ($1::text[] IS NULL OR person_id = ANY($1)) \
                     GROUP BY schedule_id",
                )
                .bind::<Nullable<Array<Text>>, _>(people)
                .load(conn)?)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ScheduleReplyCount {
                schedule_id: row.schedule_id,
                people: row.people,
            })
            .collect())
    }

    async fn list_documents(
        &self,
        collection: Collection,
        query: &DocumentQuery,
    ) -> Result<DocumentPage, StoreError> {
        let mut binds = Vec::new();
        let filter = where_clause(collection, &query.filter, &mut binds);
        let table = collection.table();
        let page_sql = format!(
            "SELECT to_jsonb(t) AS doc FROM {table} t{filter}{} LIMIT {} OFFSET {}",
            order_clause(query),
            query.limit.max(0),
            query.skip.max(0)
        );
        let count_sql = query.with_count.then(|| {
            let mut count_binds = Vec::new();
            let filter = where_clause(collection, &query.filter, &mut count_binds);
            (
                format!("SELECT COUNT(*) AS count FROM {table} t{filter}"),
                count_binds,
            )
        });

        self.run(move |conn| {
            let rows: Vec<DocumentRow> = bind_all(page_sql, binds).load(conn)?;
            let count = match count_sql {
                Some((sql, binds)) => Some(bind_all(sql, binds).get_result::<CountRow>(conn)?.count),
                None => None,
            };
            Ok(DocumentPage {
                results: rows.into_iter().map(|row| row.doc).collect(),
                count,
            })
        })
        .await
    }

    async fn count_documents(
        &self,
        collection: Collection,
        filter: &[Condition],
    ) -> Result<i64, StoreError> {
        let mut binds = Vec::new();
        let filter = where_clause(collection, filter, &mut binds);
        let sql = format!("SELECT COUNT(*) AS count FROM {} t{filter}", collection.table());
        self.run(move |conn| Ok(bind_all(sql, binds).get_result::<CountRow>(conn)?.count))
            .await
    }

    async fn get_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        let sql = format!(
            "SELECT to_jsonb(t) AS doc FROM {} t WHERE t.id::text = $1",
            collection.table()
        );
        let id = id.to_string();
        self.run(move |conn| {
            let row = diesel::sql_query(sql)
                .bind::<Text, _>(id)
                .get_result::<DocumentRow>(conn)
                .optional()?;
            Ok(row.map(|row| row.doc))
        })
        .await
    }

    async fn insert_document(
        &self,
        collection: Collection,
        mut document: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        let now = Value::String(Utc::now().to_rfc3339());
        documents::stamp_new(collection, &mut document, &now);
        let table = collection.table();
        let sql = format!(
            "WITH ins AS (INSERT INTO {table} \
                 SELECT * FROM jsonb_populate_record(NULL::{table}, $1) RETURNING *) \
             SELECT to_jsonb(ins) AS doc FROM ins"
        );
        self.run(move |conn| {
            let row = diesel::sql_query(sql)
                .bind::<Jsonb, _>(Value::Object(document))
                .get_result::<DocumentRow>(conn)?;
            Ok(row.doc)
        })
        .await
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        mut patch: Map<String, Value>,
    ) -> Result<Option<Value>, StoreError> {
        patch.retain(|key, _| collection.writable_fields().any(|f| f.name == key.as_str()));
        if collection.has_updated_at() {
            patch.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        }
        if patch.is_empty() {
            return self.get_document(collection, id).await;
        }

        let table = collection.table();
        let assignments = patch
            .keys()
            .map(|key| format!("{key} = r.{key}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} AS t SET {assignments} \
             FROM jsonb_populate_record(NULL::{table}, $1) AS r \
             WHERE t.id::text = $2 RETURNING to_jsonb(t) AS doc"
        );
        let id = id.to_string();
        self.run(move |conn| {
            let row = diesel::sql_query(sql)
                .bind::<Jsonb, _>(Value::Object(patch))
                .bind::<Text, _>(id)
                .get_result::<DocumentRow>(conn)
                .optional()?;
            Ok(row.map(|row| row.doc))
        })
        .await
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id::text = $1", collection.table());
        let id = id.to_string();
        self.run(move |conn| {
            let deleted = diesel::sql_query(sql).bind::<Text, _>(id).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let username = username.to_string();
        self.run(move |conn| {
            Ok(users::table
                .filter(users::username.eq(username))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn save_user(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, StoreError> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            created_at: now,
            updated_at: now,
        };
        self.run(move |conn| {
            Ok(diesel::insert_into(users::table)
                .values(&user)
                .on_conflict(users::username)
                .do_update()
                .set((
                    users::password_hash.eq(excluded(users::password_hash)),
                    users::is_admin.eq(excluded(users::is_admin)),
                    users::updated_at.eq(now),
                ))
                .returning(User::as_returning())
                .get_result(conn)?)
        })
        .await
    }
}
