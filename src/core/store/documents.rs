//! Collection registry and the document query language shared by both
//! stores: `where` filters, `sort` keys and `select` projections.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::core::shared::error::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    People,
    Schedules,
    Questions,
    Replies,
    Quizzes,
    Progresses,
    Comments,
    Conversations,
    Messages,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Uuid,
    Int,
    Bool,
    Timestamp,
    TextArray,
    IntArray,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn field(name: &'static str, kind: FieldKind, required: bool) -> Field {
    Field {
        name,
        kind,
        required,
    }
}

use FieldKind::{Bool, Int, IntArray, Text, TextArray, Timestamp};

const PEOPLE_FIELDS: &[Field] = &[
    field("id", Text, true),
    field("bot_id", Text, false),
    field("first_name", Text, false),
    field("last_name", Text, false),
    field("gender", Text, false),
    field("avatar_url", Text, false),
    field("locale", Text, false),
    field("timezone", Text, false),
    field("province", Text, false),
    field("district", Text, false),
    field("medical_id", Text, false),
    field("child_name", Text, false),
    field("child_birth_year", Int, false),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

const SCHEDULE_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("name", Text, true),
    field("day", Int, true),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

const QUESTION_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("schedule_id", FieldKind::Uuid, false),
    field("content", Text, true),
    field("options", TextArray, true),
    field("correct_answers", IntArray, true),
    field("kind", Text, true),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

const REPLY_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("person_id", Text, true),
    field("schedule_id", FieldKind::Uuid, true),
    field("bot_id", Text, true),
    field("block_id", Text, true),
    field("text", Text, false),
    field("image", Text, false),
    field("submitted_type", Text, false),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

const QUIZ_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("person_id", Text, true),
    field("question_id", FieldKind::Uuid, true),
    field("reply_id", FieldKind::Uuid, false),
    field("answer", Int, true),
    field("is_correct", Bool, true),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

const PROGRESS_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("person_id", Text, true),
    field("schedule_id", FieldKind::Uuid, true),
    field("status", Int, true),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

const COMMENT_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("person_id", Text, true),
    field("question_id", FieldKind::Uuid, true),
    field("answer", Text, true),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

const CONVERSATION_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("person_id", Text, true),
    field("schedule_id", FieldKind::Uuid, false),
    field("bot_id", Text, false),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

const MESSAGE_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("conversation_id", FieldKind::Uuid, true),
    field("sender", Text, true),
    field("text", Text, true),
    field("created_at", Timestamp, true),
];

const USER_FIELDS: &[Field] = &[
    field("id", FieldKind::Uuid, true),
    field("username", Text, true),
    field("password_hash", Text, true),
    field("is_admin", Bool, true),
    field("created_at", Timestamp, true),
    field("updated_at", Timestamp, true),
];

impl Collection {
    /// Collections reachable through the generic CRUD routes.
    pub const ROUTABLE: [Collection; 9] = [
        Collection::People,
        Collection::Schedules,
        Collection::Questions,
        Collection::Replies,
        Collection::Progresses,
        Collection::Comments,
        Collection::Quizzes,
        Collection::Conversations,
        Collection::Messages,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Self::People => "people",
            Self::Schedules => "schedules",
            Self::Questions => "questions",
            Self::Replies => "replies",
            Self::Quizzes => "quizzes",
            Self::Progresses => "progresses",
            Self::Comments => "comments",
            Self::Conversations => "conversations",
            Self::Messages => "messages",
            Self::Users => "users",
        }
    }

    /// URL segment of the collection.
    pub fn route(&self) -> &'static str {
        match self {
            Self::People => "peoples",
            other => other.table(),
        }
    }

    pub fn fields(&self) -> &'static [Field] {
        match self {
            Self::People => PEOPLE_FIELDS,
            Self::Schedules => SCHEDULE_FIELDS,
            Self::Questions => QUESTION_FIELDS,
            Self::Replies => REPLY_FIELDS,
            Self::Quizzes => QUIZ_FIELDS,
            Self::Progresses => PROGRESS_FIELDS,
            Self::Comments => COMMENT_FIELDS,
            Self::Conversations => CONVERSATION_FIELDS,
            Self::Messages => MESSAGE_FIELDS,
            Self::Users => USER_FIELDS,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields().iter().find(|f| f.name == name)
    }

    pub fn has_updated_at(&self) -> bool {
        self.field("updated_at").is_some()
    }

    /// People keep the platform identifier the caller supplies.
    pub fn accepts_client_id(&self) -> bool {
        matches!(self, Self::People)
    }

    /// Natural keys enforced as unique indexes.
    pub fn unique_keys(&self) -> &'static [&'static [&'static str]] {
        match self {
            Self::Replies => &[&["person_id", "schedule_id", "bot_id", "block_id"]],
            Self::Quizzes | Self::Comments => &[&["person_id", "question_id"]],
            Self::Progresses => &[&["person_id", "schedule_id"]],
            Self::Users => &[&["username"]],
            _ => &[],
        }
    }

    /// Columns a CRUD update may rewrite.
    pub fn writable_fields(&self) -> impl Iterator<Item = &'static Field> {
        self.fields()
            .iter()
            .filter(|f| f.name != "id" && f.name != "created_at")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl Operator {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$in" => Some(Self::In),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: &'static str,
    pub op: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: &'static str,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub filter: Vec<Condition>,
    pub sort: Vec<SortKey>,
    pub limit: i64,
    pub skip: i64,
    pub with_count: bool,
}

fn known_field(
    collection: Collection,
    name: &str,
    param: &str,
) -> Result<&'static Field, FieldError> {
    collection
        .field(name)
        .ok_or_else(|| FieldError::query(param, format!("Unknown field '{name}'")))
}

fn check_operand(field: &Field, op: Operator, operand: &Value) -> Result<(), FieldError> {
    let accepted = match (op, operand) {
        (Operator::In, Value::Array(items)) => items
            .iter()
            .all(|item| !item.is_null() && kind_accepts(field.kind, item)),
        (Operator::In, _) => false,
        (Operator::Eq | Operator::Ne, value) => kind_accepts(field.kind, value),
        (_, Value::Null) => false,
        (_, value) => kind_accepts(field.kind, value),
    };
    if accepted {
        Ok(())
    } else {
        Err(FieldError::query(
            "where",
            format!("'{}' expects {}", field.name, kind_name(field.kind)),
        )
        .with_value(operand.clone()))
    }
}

/// Parses a JSON `where` object. Literal values mean equality; objects use
/// `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte` and `$in`.
pub fn parse_filter(collection: Collection, raw: &str) -> Result<Vec<Condition>, FieldError> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| FieldError::query("where", format!("Invalid JSON: {e}")))?;
    let Value::Object(entries) = parsed else {
        return Err(FieldError::query("where", "Must be a JSON object"));
    };

    let mut conditions = Vec::new();
    for (name, value) in entries {
        let field = known_field(collection, &name, "where")?;
        match value {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
                for (token, operand) in ops {
                    let op = Operator::parse(&token).ok_or_else(|| {
                        FieldError::query("where", format!("Unsupported operator '{token}'"))
                    })?;
                    if op == Operator::In && !operand.is_array() {
                        return Err(FieldError::query("where", "$in expects an array"));
                    }
                    check_operand(field, op, &operand)?;
                    conditions.push(Condition {
                        field: field.name,
                        op,
                        value: operand,
                    });
                }
            }
            literal => {
                check_operand(field, Operator::Eq, &literal)?;
                conditions.push(Condition {
                    field: field.name,
                    op: Operator::Eq,
                    value: literal,
                });
            }
        }
    }
    Ok(conditions)
}

/// `"-created_at,name"` sorts by creation time descending, then name.
pub fn parse_sort(collection: Collection, raw: &str) -> Result<Vec<SortKey>, FieldError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|token| {
            let (name, descending) = match token.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (token.strip_prefix('+').unwrap_or(token), false),
            };
            Ok(SortKey {
                field: known_field(collection, name, "sort")?.name,
                descending,
            })
        })
        .collect()
}

pub fn parse_select(collection: Collection, raw: &str) -> Result<Vec<&'static str>, FieldError> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|name| known_field(collection, name, "select").map(|f| f.name))
        .collect()
}

/// Keeps only the selected fields; `id` always survives.
pub fn project(document: Value, fields: &[&str]) -> Value {
    if fields.is_empty() {
        return document;
    }
    match document {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| k == "id" || fields.contains(&k.as_str()))
                .collect(),
        ),
        other => other,
    }
}

/// Ordering used by the in-memory store: null < bool < number < string,
/// mirroring how Postgres orders jsonb scalars of the same type.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare_values(a, b) == Ordering::Equal
        }
        _ => a == b,
    }
}

pub fn matches(document: &Value, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| {
        let actual = document.get(condition.field).unwrap_or(&Value::Null);
        let expected = &condition.value;
        match condition.op {
            Operator::Eq => values_equal(actual, expected),
            Operator::Ne => !values_equal(actual, expected),
            Operator::In => expected
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(actual, item))),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                if actual.is_null() || std::mem::discriminant(actual) != std::mem::discriminant(expected) {
                    return false;
                }
                let ordering = compare_values(actual, expected);
                match condition.op {
                    Operator::Gt => ordering == Ordering::Greater,
                    Operator::Gte => ordering != Ordering::Less,
                    Operator::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
        }
    })
}

pub fn sort_documents(documents: &mut [Value], keys: &[SortKey]) {
    documents.sort_by(|a, b| {
        for key in keys {
            let left = a.get(key.field).unwrap_or(&Value::Null);
            let right = b.get(key.field).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right);
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        let left = (a.get("created_at"), a.get("id"));
        let right = (b.get("created_at"), b.get("id"));
        compare_values(left.0.unwrap_or(&Value::Null), right.0.unwrap_or(&Value::Null))
            .then_with(|| compare_values(left.1.unwrap_or(&Value::Null), right.1.unwrap_or(&Value::Null)))
    });
}

/// Assigns `id` and the timestamps of a new document and fills every missing
/// column with null. Returns the id.
pub fn stamp_new(collection: Collection, document: &mut Map<String, Value>, now: &Value) -> String {
    let id = match document.get("id").and_then(Value::as_str) {
        Some(id) if collection.accepts_client_id() && !id.is_empty() => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };
    document.insert("id".into(), Value::String(id.clone()));
    document.insert("created_at".into(), now.clone());
    if collection.has_updated_at() {
        document.insert("updated_at".into(), now.clone());
    }
    for field in collection.fields() {
        document.entry(field.name).or_insert(Value::Null);
    }
    id
}

fn kind_accepts(kind: FieldKind, value: &Value) -> bool {
    match (kind, value) {
        (_, Value::Null) => true,
        (FieldKind::Text, Value::String(_)) => true,
        (FieldKind::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
        (FieldKind::Int, Value::Number(n)) => n.as_i64().is_some_and(|i| i32::try_from(i).is_ok()),
        (FieldKind::Bool, Value::Bool(_)) => true,
        (FieldKind::Timestamp, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        (FieldKind::TextArray, Value::Array(items)) => items.iter().all(Value::is_string),
        (FieldKind::IntArray, Value::Array(items)) => items
            .iter()
            .all(|i| i.as_i64().is_some_and(|i| i32::try_from(i).is_ok())),
        _ => false,
    }
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "a string",
        FieldKind::Uuid => "a UUID",
        FieldKind::Int => "an integer",
        FieldKind::Bool => "a boolean",
        FieldKind::Timestamp => "an RFC 3339 timestamp",
        FieldKind::TextArray => "an array of strings",
        FieldKind::IntArray => "an array of integers",
    }
}

/// Checks a CRUD body against the collection's fields. Unknown keys are
/// dropped. With `creating`, empty arrays and `false` fill missing array and
/// boolean columns and every other required column must be present.
pub fn validate_document(
    collection: Collection,
    body: Map<String, Value>,
    creating: bool,
) -> Result<Map<String, Value>, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut rejected = HashSet::new();
    let mut document = Map::new();

    for (key, value) in body {
        let Some(field) = collection.field(&key) else {
            continue;
        };
        if !kind_accepts(field.kind, &value) {
            errors.push(
                FieldError::body(field.name, format!("Must be {}", kind_name(field.kind)))
                    .with_value(value),
            );
            rejected.insert(field.name);
            continue;
        }
        if field.required && value.is_null() {
            errors.push(FieldError::body(field.name, "Field cannot be null"));
            rejected.insert(field.name);
            continue;
        }
        document.insert(key, value);
    }

    if creating {
        for field in collection.fields() {
            if document.contains_key(field.name)
                || rejected.contains(field.name)
                || matches!(field.name, "id" | "created_at" | "updated_at")
            {
                continue;
            }
            match field.kind {
                FieldKind::TextArray | FieldKind::IntArray => {
                    document.insert(field.name.to_string(), Value::Array(vec![]));
                }
                FieldKind::Bool if field.required => {
                    document.insert(field.name.to_string(), Value::Bool(false));
                }
                _ if field.required => {
                    errors.push(FieldError::body(field.name, "Field is required"));
                }
                _ => {}
            }
        }
    }

    if errors.is_empty() {
        Ok(document)
    } else {
        Err(errors)
    }
}
