mod app_config;
mod email;
mod error;
mod extract;
mod model;
mod observability;
mod pipeline;
mod prompt;
mod testing;

use std::sync::Arc;

use app_config::AppConfig;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use mimalloc::MiMalloc;
use model::job_application::{DbStore, JobApplicationCtrl};
use observability::BatchSummary;
use pipeline::Pipeline;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let app_config = AppConfig::load()?;
    tracing::info!("{}", app_config);

    let mut db_options = ConnectOptions::new(app_config.database_url()?.to_string());
    db_options.sqlx_logging(app_config.database.sqlx_logging);
    let conn = Arc::new(Database::connect(db_options).await?);

    let result = run_batch(&conn, &app_config).await;

    match Arc::try_unwrap(conn) {
        Ok(conn) => {
            if let Err(e) = conn.close().await {
                tracing::warn!("Error closing database connection: {:?}", e);
            }
        }
        Err(_) => tracing::warn!("Database connection still shared, dropping without close"),
    }

    let summary = result.inspect_err(|e| tracing::error!("Run failed: {:?}", e))?;
    tracing::info!("{}", summary);
    print!("{}", summary.render_table());

    Ok(())
}

async fn run_batch(
    conn: &Arc<DatabaseConnection>,
    app_config: &AppConfig,
) -> anyhow::Result<BatchSummary> {
    if app_config.database.run_migrations {
        Migrator::up(conn.as_ref(), None).await?;
    }

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let source = email::build_mail_source(&http_client, app_config).await?;
    let extractor = extract::build_extractor(&http_client, app_config)?;
    let store = DbStore::new(Arc::clone(conn));

    let pipeline = Pipeline::new(
        source,
        extractor,
        Box::new(store),
        &app_config.pipeline,
    );
    let result = pipeline.run(Utc::now().date_naive()).await;
    if let Err(e) = pipeline.close().await {
        tracing::warn!("Error closing mail source: {:?}", e);
    }
    let summary = result?;

    let total = JobApplicationCtrl::count(conn.as_ref()).await?;
    tracing::info!("{} job applications on record", total);

    Ok(summary)
}
