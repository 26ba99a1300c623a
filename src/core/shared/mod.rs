pub mod error;
pub mod models;
pub mod schema;
pub mod state;
#[cfg(test)]
pub mod test_utils;
pub mod utils;

pub use error::{AppError, FieldError};
pub use models::{
    Comment, Conversation, Message, Person, Progress, ProgressStatus, Question, QuestionKind,
    Quiz, Reply, Schedule, SubmittedType, User,
};
pub use state::AppState;
pub use utils::{create_conn, run_migrations, DbPool};
