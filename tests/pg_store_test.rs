//! Store contract against a real PostgreSQL. Skipped unless DATABASE_URL is
//! set. Every test works on freshly generated ids so runs can share a
//! database.

#[cfg(test)]
mod pg_store_integration_tests {
    use botadmin::config::DatabaseConfig;
    use botadmin::core::shared::models::{ProgressStatus, SubmittedType};
    use botadmin::core::shared::utils::{create_conn, run_migrations};
    use botadmin::core::store::{
        Collection, Condition, DocumentQuery, EngagementWrite, Operator, PersonPatch, PgStore,
        QuizWrite, ReplyWrite, Store, StoreError,
    };
    use serde_json::{json, Map, Value};
    use uuid::Uuid;

    fn connect() -> Option<PgStore> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            println!("Skipping test - DATABASE_URL not set");
            return None;
        };
        let pool = match create_conn(&DatabaseConfig {
            url,
            max_connections: 2,
        }) {
            Ok(pool) => pool,
            Err(e) => {
                println!("Skipping test - Cannot connect to PostgreSQL: {e}");
                return None;
            }
        };
        if let Err(e) = run_migrations(&pool) {
            println!("Skipping test - Migrations failed: {e}");
            return None;
        }
        Some(PgStore::new(pool))
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn unique(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn test_person_upsert_merges() {
        let Some(store) = connect() else { return };
        let id = unique("person");

        store
            .upsert_person(PersonPatch {
                id: id.clone(),
                bot_id: Some("bot-1".into()),
                first_name: Some("Lan".into()),
                province: Some("Hue".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let merged = store
            .upsert_person(PersonPatch {
                id: id.clone(),
                first_name: Some("Mai".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(merged.first_name.as_deref(), Some("Mai"));
        assert_eq!(merged.province.as_deref(), Some("Hue"));
        assert_eq!(merged.bot_id.as_deref(), Some("bot-1"));

        let count = store
            .count_documents(
                Collection::People,
                &[Condition {
                    field: "id",
                    op: Operator::Eq,
                    value: json!(id),
                }],
            )
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_engagement_is_idempotent() {
        let Some(store) = connect() else { return };
        let person = unique("person");
        store
            .upsert_person(PersonPatch {
                id: person.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        let schedule = store
            .insert_document(
                Collection::Schedules,
                object(json!({"name": unique("schedule"), "day": 1})),
            )
            .await
            .unwrap();
        let schedule_id = Uuid::parse_str(schedule["id"].as_str().unwrap()).unwrap();
        let question = store
            .insert_document(
                Collection::Questions,
                object(json!({
                    "schedule_id": schedule_id,
                    "content": "?",
                    "options": ["a", "b"],
                    "correct_answers": [1],
                    "kind": "choice",
                })),
            )
            .await
            .unwrap();
        let question_id = Uuid::parse_str(question["id"].as_str().unwrap()).unwrap();

        let write = |text: &str, answer: i32| EngagementWrite {
            person_id: person.clone(),
            schedule_id,
            reply: Some(ReplyWrite {
                bot_id: "bot-1".into(),
                block_id: "block-1".into(),
                text: Some(text.into()),
                image: None,
                submitted_type: Some(SubmittedType::Text),
            }),
            quiz: Some(QuizWrite {
                question_id,
                answer,
                is_correct: answer == 1,
            }),
            progress: Some(ProgressStatus::Complete),
        };

        let first = store.record_engagement(write("first", 0)).await.unwrap();
        let second = store.record_engagement(write("second", 1)).await.unwrap();

        let first_reply = first.reply.unwrap();
        let second_reply = second.reply.unwrap();
        assert_eq!(first_reply.id, second_reply.id);
        assert_eq!(second_reply.text.as_deref(), Some("second"));
        let quiz = second.quiz.unwrap();
        assert!(quiz.is_correct);
        assert_eq!(quiz.reply_id, Some(second_reply.id));

        let repliers = store
            .repliers_per_schedule(Some(vec![person.clone()]))
            .await
            .unwrap();
        let row = repliers.iter().find(|r| r.schedule_id == schedule_id).unwrap();
        assert_eq!(row.people, 1);
    }

    #[tokio::test]
    async fn test_document_crud_round() {
        let Some(store) = connect() else { return };
        let name = unique("schedule");
        let created = store
            .insert_document(Collection::Schedules, object(json!({"name": name, "day": 3})))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let page = store
            .list_documents(
                Collection::Schedules,
                &DocumentQuery {
                    filter: vec![Condition {
                        field: "name",
                        op: Operator::Eq,
                        value: json!(name),
                    }],
                    sort: vec![],
                    limit: 10,
                    skip: 0,
                    with_count: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.count, Some(1));
        assert_eq!(page.results[0]["id"], id.as_str());

        let updated = store
            .update_document(Collection::Schedules, &id, object(json!({"day": 4})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["day"], 4);
        assert_eq!(updated["name"], name.as_str());

        assert!(store.delete_document(Collection::Schedules, &id).await.unwrap());
        assert!(store
            .get_document(Collection::Schedules, &id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_document(Collection::Schedules, "not-a-uuid")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_check_violation_is_constraint_error() {
        let Some(store) = connect() else { return };
        let result = store
            .insert_document(
                Collection::Progresses,
                object(json!({
                    "person_id": unique("person"),
                    "schedule_id": Uuid::new_v4(),
                    "status": 3,
                })),
            )
            .await;
        assert!(matches!(result, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_address_groups_count_medical_ids() {
        let Some(store) = connect() else { return };
        let province = unique("province");
        for (i, medical_id) in ["123456", "12345", "654321"].iter().enumerate() {
            store
                .upsert_person(PersonPatch {
                    id: unique(&format!("addr{i}")),
                    province: Some(province.clone()),
                    medical_id: Some(medical_id.to_string()),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let groups = store.address_groups().await.unwrap();
        let group = groups.iter().find(|g| g.province == province).unwrap();
        assert_eq!(group.district, "other");
        assert_eq!(group.total, 3);
        assert_eq!(group.with_medical_id, 2);
    }
}
