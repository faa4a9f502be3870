use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

use form_tables::audit::ConsistencyAuditor;
use form_tables::config::Config;
use form_tables::eav::EavStore;
use form_tables::scheduler;
use form_tables::schema::SchemaManager;
use form_tables::translate::Translator;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("form_tables=info".parse()?),
        )
        .init();

    info!("Starting form-tables audit runner");

    // Load configuration from environment
    let config = Arc::new(Config::from_env()?);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let eav = EavStore::new(pool.clone());
    eav.ensure_schema().await?;

    let translator = Arc::new(Translator::from_config(&config));
    let mut schema = SchemaManager::new(pool, translator);
    if let Some(dir) = &config.mapping_dir {
        schema = schema.with_mapping_dir(dir);
    }

    let auditor = Arc::new(ConsistencyAuditor::new(Arc::new(schema), eav));

    // Run one audit immediately, then on the configured schedule.
    scheduler::trigger_audit(&config, &auditor).await?;
    let _scheduler = scheduler::start_scheduler(Arc::clone(&config), auditor).await?;

    info!("Audit scheduler running; waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
