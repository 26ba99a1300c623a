use axum::{extract::State, Json};
use log::info;
use serde_json::{json, Value};
use std::sync::Arc;

use super::payload::*;
use crate::core::shared::error::AppError;
use crate::core::shared::models::{ProgressStatus, QuestionKind, SubmittedType};
use crate::core::shared::state::AppState;
use crate::core::store::{CommentWrite, EngagementWrite, PersonPatch, QuizWrite, ReplyWrite};

const MIN_BIRTH_YEAR: i64 = 1900;
const MAX_BIRTH_YEAR: i64 = 2100;

fn acknowledged() -> Json<Value> {
    Json(json!({ "result": true }))
}

fn validate_person(payload: &Payload) -> Result<PersonPatch, AppError> {
    let mut v = Validator::default();
    let id = v.required_text(payload, &PERSON_ID);
    let bot_id = v.required_text(payload, &BOT_ID);
    let child_birth_year = v.integer(payload, &CHILD_BIRTH_YEAR).and_then(|year| {
        match i32::try_from(year) {
            Ok(y) if (MIN_BIRTH_YEAR..=MAX_BIRTH_YEAR).contains(&year) => Some(y),
            _ => {
                v.reject(
                    &CHILD_BIRTH_YEAR,
                    format!("Must be between {MIN_BIRTH_YEAR} and {MAX_BIRTH_YEAR}"),
                    payload.get(&CHILD_BIRTH_YEAR),
                );
                None
            }
        }
    });

    let patch = PersonPatch {
        id: id.unwrap_or_default(),
        bot_id,
        first_name: v.text(payload, &FIRST_NAME),
        last_name: v.text(payload, &LAST_NAME),
        gender: v.text(payload, &GENDER),
        avatar_url: v.text(payload, &AVATAR_URL),
        locale: v.text(payload, &LOCALE),
        timezone: v.text(payload, &TIMEZONE),
        province: v.text(payload, &PROVINCE),
        district: v.text(payload, &DISTRICT),
        medical_id: v.text(payload, &MEDICAL_ID),
        child_name: v.text(payload, &CHILD_NAME),
        child_birth_year,
    };
    v.finish()?;
    Ok(patch)
}

/// `POST /chatfuel/people`: create or merge a person by platform id.
pub async fn upsert_person(
    State(state): State<Arc<AppState>>,
    payload: Payload,
) -> Result<Json<Value>, AppError> {
    let patch = validate_person(&payload)?;
    let person = state.store.upsert_person(patch).await?;
    info!("chatfuel people: upserted person {}", person.id);
    Ok(acknowledged())
}

/// `POST /chatfuel/reply`: the reply, its optional quiz answer and progress
/// update. Everything is validated, including lookups, before one
/// transactional write.
pub async fn upsert_reply(
    State(state): State<Arc<AppState>>,
    payload: Payload,
) -> Result<Json<Value>, AppError> {
    let mut v = Validator::default();
    let person_id = v.required_text(&payload, &PERSON_ID);
    let schedule_id = v.required_uuid(&payload, &SCHEDULE_ID);
    let bot_id = v.required_text(&payload, &BOT_ID);
    let block_id = v.required_text(&payload, &BLOCK_ID);
    let text = v.text(&payload, &TEXT);
    let image = v.text(&payload, &IMAGE);
    let submitted_type = match v.text(&payload, &SUBMITTED_TYPE) {
        Some(raw) => match raw.parse::<SubmittedType>() {
            Ok(kind) => Some(kind),
            Err(_) => {
                let allowed: Vec<_> = SubmittedType::ALL.iter().map(|t| t.as_str()).collect();
                v.reject(
                    &SUBMITTED_TYPE,
                    format!("Must be one of: {}", allowed.join(", ")),
                    payload.get(&SUBMITTED_TYPE),
                );
                None
            }
        },
        None => None,
    };

    let quiz_input = payload.nested(&QUIZ).and_then(|quiz| {
        if quiz.get(&QUIZ_QUESTION).is_none() || quiz.get(&QUIZ_ANSWER).is_none() {
            return None;
        }
        let question_id = v.required_uuid(&quiz, &QUIZ_QUESTION);
        let answer = v.required_integer(&quiz, &QUIZ_ANSWER).and_then(|a| {
            i32::try_from(a).ok().or_else(|| {
                v.reject(&QUIZ_ANSWER, "Out of range", quiz.get(&QUIZ_ANSWER));
                None
            })
        });
        Some((question_id?, answer?))
    });

    let progress = payload.nested(&PROGRESS).and_then(|progress| {
        let code = v.integer(&progress, &PROGRESS_STATUS)?;
        let status = ProgressStatus::from_code(code);
        if status.is_none() {
            v.reject(
                &PROGRESS_STATUS,
                "Must be 1 (started) or 2 (complete)",
                progress.get(&PROGRESS_STATUS),
            );
        }
        status
    });

    if let Some(id) = &person_id {
        if state.store.find_person(id).await?.is_none() {
            v.reject(&PERSON_ID, "Person not found", payload.get(&PERSON_ID));
        }
    }
    if let Some(id) = schedule_id {
        if state.store.find_schedule(id).await?.is_none() {
            v.reject(&SCHEDULE_ID, "Schedule not found", payload.get(&SCHEDULE_ID));
        }
    }
    let mut quiz = None;
    if let Some((question_id, answer)) = quiz_input {
        match state.store.find_question(question_id).await? {
            Some(question) => {
                quiz = Some(QuizWrite {
                    question_id,
                    answer,
                    is_correct: question.accepts(answer),
                })
            }
            None => {
                let value = payload.nested(&QUIZ).and_then(|q| q.get(&QUIZ_QUESTION).cloned());
                v.reject(&QUIZ_QUESTION, "Question not found", value.as_ref());
            }
        }
    }
    v.finish()?;

    let (Some(person_id), Some(schedule_id), Some(bot_id), Some(block_id)) =
        (person_id, schedule_id, bot_id, block_id)
    else {
        return Err(AppError::Internal(anyhow::anyhow!(
            "reply validation passed without required fields"
        )));
    };

    let reply = (text.is_some() || image.is_some() || submitted_type.is_some()).then(|| ReplyWrite {
        bot_id,
        block_id,
        text,
        image,
        submitted_type,
    });
    let write = EngagementWrite {
        person_id: person_id.clone(),
        schedule_id,
        reply,
        quiz,
        progress,
    };

    let receipt = state.store.record_engagement(write).await?;
    info!(
        "chatfuel reply: person {person_id} schedule {schedule_id} (reply: {}, quiz: {}, progress: {})",
        receipt.reply.is_some(),
        receipt.quiz.is_some(),
        receipt.progress.is_some()
    );
    Ok(acknowledged())
}

/// `POST /chatfuel/comment`: free-text answer to an open-ended question.
pub async fn upsert_comment(
    State(state): State<Arc<AppState>>,
    payload: Payload,
) -> Result<Json<Value>, AppError> {
    let mut v = Validator::default();
    let person_id = v.required_text(&payload, &PERSON_ID);
    let question_id = v.required_uuid(&payload, &QUESTION_ID);
    let answer = v.required_text(&payload, &ANSWER);

    if let Some(id) = &person_id {
        if state.store.find_person(id).await?.is_none() {
            v.reject(&PERSON_ID, "Person not found", payload.get(&PERSON_ID));
        }
    }
    if let Some(id) = question_id {
        match state.store.find_question(id).await? {
            Some(question) if question.kind() == QuestionKind::OpenEnded => {}
            Some(_) => v.reject(
                &QUESTION_ID,
                "Question is not open-ended",
                payload.get(&QUESTION_ID),
            ),
            None => v.reject(&QUESTION_ID, "Question not found", payload.get(&QUESTION_ID)),
        }
    }
    v.finish()?;

    let (Some(person_id), Some(question_id), Some(answer)) = (person_id, question_id, answer)
    else {
        return Err(AppError::Internal(anyhow::anyhow!(
            "comment validation passed without required fields"
        )));
    };

    let comment = state
        .store
        .upsert_comment(CommentWrite {
            person_id,
            question_id,
            answer,
        })
        .await?;
    info!(
        "chatfuel comment: person {} question {}",
        comment.person_id, comment.question_id
    );
    Ok(acknowledged())
}
