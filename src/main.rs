mod grader;
mod intake;
mod jobs;
mod languages;
mod redis_manager;
mod sandbox;
mod store;
mod submission;
mod testcases;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::intake::{IntakeState, SubmissionIntake};
use crate::redis_manager::RedisManager;
use crate::sandbox::SandboxClient;
use crate::store::RedisSubmissionStore;
use crate::testcases::TestCaseSource;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("grader=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting grading worker...");
    info!(
        "Loaded {} language configuration(s)",
        languages::supported_languages().len()
    );

    let executor = SandboxClient::from_env();
    info!("Execution sandbox at {}", executor.base_url());

    let store = Arc::new(RedisSubmissionStore::from_env().await?);

    // The consumer gets a connection of its own: BLPOP parks it for as
    // long as the queue stays empty, which would starve the producer.
    let mut consumer = RedisManager::from_env().await?;
    let producer = Arc::new(RedisManager::from_env().await?);

    let submission_intake = Arc::new(SubmissionIntake::new(store.clone(), producer));
    let state = IntakeState::new(submission_intake, Arc::new(TestCaseSource::from_env()));

    let bind_addr = std::env::var("INTAKE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8084".into());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Intake API listening on {}", bind_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, intake::router(state)).await {
            error!("Intake server exited: {}", e);
        }
    });

    info!("Waiting for grading jobs...");
    loop {
        let job = consumer.pop_job().await?;
        if let Err(e) = grader::process_grading_job(&job, store.as_ref(), &executor).await {
            error!(
                "Failed to process grading job for submission {}: {:#}",
                job.submission_id, e
            );
        }
    }
}
