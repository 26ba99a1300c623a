//! Request bodies from the chat platform and the validation helpers the
//! webhook handlers share.
//!
//! The platform posts either JSON or a url-encoded form, and names attributes
//! in camelCase, snake_case or with spaces (`messenger user id`). A
//! [`Payload`] accepts all of them, drops absent sentinels and resolves a
//! field through its [`FieldSpec`] aliases. A [`Validator`] collects every
//! problem before the handler decides to write anything.

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::header,
    Form, Json,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::sanitize::sanitize;
use crate::core::shared::error::{AppError, FieldError};

pub struct FieldSpec {
    /// Name reported in validation errors.
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

pub const PERSON_ID: FieldSpec = FieldSpec {
    name: "personId",
    aliases: &[
        "personId",
        "person_id",
        "messenger user id",
        "messenger_user_id",
        "messengerUserId",
        "id",
    ],
};
pub const BOT_ID: FieldSpec = FieldSpec {
    name: "botId",
    aliases: &["botId", "bot_id", "bot id"],
};
pub const FIRST_NAME: FieldSpec = FieldSpec {
    name: "firstName",
    aliases: &["firstName", "first_name", "first name"],
};
pub const LAST_NAME: FieldSpec = FieldSpec {
    name: "lastName",
    aliases: &["lastName", "last_name", "last name"],
};
pub const GENDER: FieldSpec = FieldSpec {
    name: "gender",
    aliases: &["gender"],
};
pub const AVATAR_URL: FieldSpec = FieldSpec {
    name: "avatarUrl",
    aliases: &["avatarUrl", "avatar_url", "profile pic url", "profilePicUrl", "profile_pic_url"],
};
pub const LOCALE: FieldSpec = FieldSpec {
    name: "locale",
    aliases: &["locale"],
};
pub const TIMEZONE: FieldSpec = FieldSpec {
    name: "timezone",
    aliases: &["timezone"],
};
pub const PROVINCE: FieldSpec = FieldSpec {
    name: "province",
    aliases: &["province"],
};
pub const DISTRICT: FieldSpec = FieldSpec {
    name: "district",
    aliases: &["district"],
};
pub const MEDICAL_ID: FieldSpec = FieldSpec {
    name: "medicalId",
    aliases: &["medicalId", "medical_id", "medical id"],
};
pub const CHILD_NAME: FieldSpec = FieldSpec {
    name: "childName",
    aliases: &["childName", "child_name", "child name"],
};
pub const CHILD_BIRTH_YEAR: FieldSpec = FieldSpec {
    name: "childBirthYear",
    aliases: &["childBirthYear", "child_birth_year", "child birth year"],
};
pub const SCHEDULE_ID: FieldSpec = FieldSpec {
    name: "scheduleId",
    aliases: &["scheduleId", "schedule_id", "schedule id", "schedule"],
};
pub const BLOCK_ID: FieldSpec = FieldSpec {
    name: "blockId",
    aliases: &["blockId", "block_id", "block id", "last visited block id"],
};
pub const TEXT: FieldSpec = FieldSpec {
    name: "text",
    aliases: &["text", "last user freeform input"],
};
pub const IMAGE: FieldSpec = FieldSpec {
    name: "image",
    aliases: &["image", "imageUrl", "image_url"],
};
pub const SUBMITTED_TYPE: FieldSpec = FieldSpec {
    name: "submittedType",
    aliases: &["submittedType", "submitted_type", "submitted type"],
};
pub const QUIZ: FieldSpec = FieldSpec {
    name: "quiz",
    aliases: &["quiz"],
};
pub const QUIZ_QUESTION: FieldSpec = FieldSpec {
    name: "quiz.question",
    aliases: &["question", "questionId", "question_id"],
};
pub const QUIZ_ANSWER: FieldSpec = FieldSpec {
    name: "quiz.answer",
    aliases: &["answer"],
};
pub const PROGRESS: FieldSpec = FieldSpec {
    name: "progress",
    aliases: &["progress"],
};
pub const PROGRESS_STATUS: FieldSpec = FieldSpec {
    name: "progress.status",
    aliases: &["status"],
};
pub const QUESTION_ID: FieldSpec = FieldSpec {
    name: "questionId",
    aliases: &["questionId", "question_id", "question"],
};
pub const ANSWER: FieldSpec = FieldSpec {
    name: "answer",
    aliases: &["answer", "text"],
};
pub const NAME: FieldSpec = FieldSpec {
    name: "name",
    aliases: &["name", "fullName", "full_name"],
};

/// A sanitized webhook body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new(body: Map<String, Value>) -> Self {
        Self(sanitize(body))
    }

    pub fn get(&self, spec: &FieldSpec) -> Option<&Value> {
        spec.aliases.iter().find_map(|alias| self.0.get(*alias))
    }

    /// The nested object behind `spec`, if one was sent.
    pub fn nested(&self, spec: &FieldSpec) -> Option<Payload> {
        match self.get(spec) {
            Some(Value::Object(inner)) => Some(Payload(inner.clone())),
            _ => None,
        }
    }
}

/// Turns form keys `quiz[answer]` and `quiz.answer` into nested objects.
fn nest_form_fields(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut body = Map::new();
    for (key, value) in pairs {
        let split = key
            .split_once('[')
            .and_then(|(outer, rest)| rest.strip_suffix(']').map(|inner| (outer, inner)))
            .or_else(|| key.split_once('.'));
        match split {
            Some((outer, inner)) if !outer.is_empty() && !inner.is_empty() => {
                let slot = body
                    .entry(outer.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(nested) = slot {
                    nested.insert(inner.to_string(), Value::String(value));
                }
            }
            _ => {
                body.insert(key, Value::String(value));
            }
        }
    }
    body
}

#[async_trait]
impl<S> FromRequest<S> for Payload
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        let body = if is_form {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| AppError::invalid(FieldError::body("body", e.body_text())))?;
            nest_form_fields(pairs)
        } else {
            let Json(value) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| AppError::invalid(FieldError::body("body", e.body_text())))?;
            match value {
                Value::Object(map) => map,
                other => {
                    return Err(AppError::invalid(
                        FieldError::body("body", "Expected a JSON object").with_value(other),
                    ))
                }
            }
        };
        Ok(Payload::new(body))
    }
}

/// Collects field errors across a whole request.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn reject(&mut self, spec: &FieldSpec, msg: impl Into<String>, value: Option<&Value>) {
        let mut error = FieldError::body(spec.name, msg);
        if let Some(value) = value {
            error = error.with_value(value.clone());
        }
        self.errors.push(error);
    }

    pub fn text(&mut self, payload: &Payload, spec: &FieldSpec) -> Option<String> {
        match payload.get(spec)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            other => {
                self.reject(spec, "Must be a string", Some(other));
                None
            }
        }
    }

    pub fn required_text(&mut self, payload: &Payload, spec: &FieldSpec) -> Option<String> {
        if payload.get(spec).is_none() {
            self.reject(spec, "Field is required", None);
            return None;
        }
        self.text(payload, spec)
    }

    /// Accepts JSON integers and numeric strings.
    pub fn integer(&mut self, payload: &Payload, spec: &FieldSpec) -> Option<i64> {
        let value = payload.get(spec)?;
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        if parsed.is_none() {
            self.reject(spec, "Must be an integer", Some(value));
        }
        parsed
    }

    pub fn required_integer(&mut self, payload: &Payload, spec: &FieldSpec) -> Option<i64> {
        if payload.get(spec).is_none() {
            self.reject(spec, "Field is required", None);
            return None;
        }
        self.integer(payload, spec)
    }

    pub fn required_uuid(&mut self, payload: &Payload, spec: &FieldSpec) -> Option<Uuid> {
        let Some(value) = payload.get(spec) else {
            self.reject(spec, "Field is required", None);
            return None;
        };
        let parsed = value.as_str().and_then(|s| Uuid::parse_str(s.trim()).ok());
        if parsed.is_none() {
            self.reject(spec, "Must be a valid identifier", Some(value));
        }
        parsed
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        Payload::new(value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_aliases_resolve_in_order() {
        let p = payload(json!({"messenger user id": "123", "first name": "Lan"}));
        assert_eq!(p.get(&PERSON_ID), Some(&json!("123")));
        assert_eq!(p.get(&FIRST_NAME), Some(&json!("Lan")));
        assert!(p.get(&LAST_NAME).is_none());
    }

    #[test]
    fn test_integer_accepts_numeric_strings() {
        let p = payload(json!({"childBirthYear": "2021", "status": 2, "answer": "two"}));
        let mut v = Validator::default();
        assert_eq!(v.integer(&p, &CHILD_BIRTH_YEAR), Some(2021));
        assert_eq!(v.integer(&p, &PROGRESS_STATUS), Some(2));
        assert_eq!(v.integer(&p, &QUIZ_ANSWER), None);
        let errors = v.finish().unwrap_err();
        assert!(matches!(errors, AppError::Validation(ref e) if e.len() == 1));
    }

    #[test]
    fn test_validator_collects_all_errors() {
        let p = payload(json!({"scheduleId": "not-a-uuid"}));
        let mut v = Validator::default();
        v.required_text(&p, &PERSON_ID);
        v.required_uuid(&p, &SCHEDULE_ID);
        v.required_text(&p, &BOT_ID);

        let Err(AppError::Validation(errors)) = v.finish() else {
            panic!("expected validation errors");
        };
        let params: Vec<_> = errors.iter().map(|e| e.param.as_str()).collect();
        assert_eq!(params, vec!["personId", "scheduleId", "botId"]);
        assert_eq!(errors[1].value, Some(json!("not-a-uuid")));
    }

    #[test]
    fn test_numbers_are_accepted_as_text() {
        let p = payload(json!({"id": 1839201}));
        let mut v = Validator::default();
        assert_eq!(v.required_text(&p, &PERSON_ID).as_deref(), Some("1839201"));
    }

    #[test]
    fn test_nest_form_fields() {
        let body = nest_form_fields(vec![
            ("personId".into(), "1".into()),
            ("quiz[question]".into(), "q".into()),
            ("quiz.answer".into(), "2".into()),
            ("messenger user id".into(), "1".into()),
        ]);
        assert_eq!(
            Value::Object(body),
            json!({
                "personId": "1",
                "quiz": {"question": "q", "answer": "2"},
                "messenger user id": "1",
            })
        );
    }
}
