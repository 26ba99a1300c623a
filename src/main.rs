use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use log::{info, warn};
use std::sync::Arc;

use botadmin::config::AppConfig;
use botadmin::core::shared::error::set_expose_error_details;
use botadmin::core::shared::state::AppState;
use botadmin::core::shared::utils::{create_conn, run_migrations, DbPool};
use botadmin::core::store::{MemoryStore, PgStore, Store};
use botadmin::main_module::run_axum_server;
use botadmin::security::password::hash_password;

const USAGE: &str = "\
Usage:
  botadmin                                   start the server
  botadmin --memory                          start with an in-process store (development only)
  botadmin migrate                           apply database migrations and exit
  botadmin create-admin <username> <password>
                                             create or reset an admin user";

fn connect(config: &AppConfig) -> Result<DbPool> {
    let pool = create_conn(&config.database).context("Database pool creation failed")?;
    run_migrations(&pool).map_err(|e| anyhow!("Failed to run migrations: {e}"))?;
    Ok(pool)
}

async fn create_admin(config: &AppConfig, username: &str, password: &str) -> Result<()> {
    if username.trim().is_empty() || password.is_empty() {
        bail!("username and password must not be empty");
    }
    let store = PgStore::new(connect(config)?);
    let hash = hash_password(password)?;
    let user = store
        .save_user(username.trim(), &hash, true)
        .await
        .context("Failed to save admin user")?;
    info!("Admin user '{}' saved ({})", user.username, user.id);
    Ok(())
}

async fn serve(config: AppConfig, in_memory: bool) -> Result<()> {
    let store: Arc<dyn Store> = if in_memory {
        if config.environment.is_production() {
            bail!("--memory is not available in production");
        }
        warn!("Using the in-process store; nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PgStore::new(connect(&config)?))
    };

    let state = Arc::new(AppState::new(config, store)?);
    run_axum_server(state).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    set_expose_error_details(!config.environment.is_production());
    info!(
        "botadmin {} starting in {} mode",
        env!("CARGO_PKG_VERSION"),
        config.environment.as_str()
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] => serve(config, false).await,
        ["--memory"] => serve(config, true).await,
        ["migrate"] => {
            connect(&config)?;
            info!("Migrations are up to date");
            Ok(())
        }
        ["create-admin", username, password] => create_admin(&config, username, password).await,
        ["--help" | "-h"] => {
            println!("{USAGE}");
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            bail!("Unknown command: {}", args.join(" "))
        }
    }
}
