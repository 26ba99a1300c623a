diesel::table! {
    people (id) {
        id -> Text,
        bot_id -> Nullable<Text>,
        first_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
        gender -> Nullable<Text>,
        avatar_url -> Nullable<Text>,
        locale -> Nullable<Text>,
        timezone -> Nullable<Text>,
        province -> Nullable<Text>,
        district -> Nullable<Text>,
        medical_id -> Nullable<Text>,
        child_name -> Nullable<Text>,
        child_birth_year -> Nullable<Int4>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    schedules (id) {
        id -> Uuid,
        name -> Text,
        day -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    questions (id) {
        id -> Uuid,
        schedule_id -> Nullable<Uuid>,
        content -> Text,
        options -> Array<Text>,
        correct_answers -> Array<Int4>,
        kind -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    replies (id) {
        id -> Uuid,
        person_id -> Text,
        schedule_id -> Uuid,
        bot_id -> Text,
        block_id -> Text,
        text -> Nullable<Text>,
        image -> Nullable<Text>,
        submitted_type -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    quizzes (id) {
        id -> Uuid,
        person_id -> Text,
        question_id -> Uuid,
        reply_id -> Nullable<Uuid>,
        answer -> Int4,
        is_correct -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    progresses (id) {
        id -> Uuid,
        person_id -> Text,
        schedule_id -> Uuid,
        status -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    comments (id) {
        id -> Uuid,
        person_id -> Text,
        question_id -> Uuid,
        answer -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    conversations (id) {
        id -> Uuid,
        person_id -> Text,
        schedule_id -> Nullable<Uuid>,
        bot_id -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    messages (id) {
        id -> Uuid,
        conversation_id -> Uuid,
        sender -> Text,
        text -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        username -> Text,
        password_hash -> Text,
        is_admin -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    people,
    schedules,
    questions,
    replies,
    quizzes,
    progresses,
    comments,
    conversations,
    messages,
    users,
);
