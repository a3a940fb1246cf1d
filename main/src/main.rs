use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{rebuild, reset_documents, run_consolidation, ConsolidationEngine, RunSummary};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Consolidates markdown notes into a question-keyed knowledge base.
#[derive(Debug, Parser)]
#[command(name = "consolidate", version)]
struct Cli {
    /// Folder holding the documents to consolidate
    #[arg(long, global = true)]
    input_folder: Option<String>,

    /// Folder receiving the answer records
    #[arg(long, global = true)]
    output_folder: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consolidate every document not yet flagged as consolidated
    Run,
    /// Clear the consolidated flags and the processing ledger
    Reset,
    /// Reset, then consolidate everything again
    Rebuild,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    let mut config = get_config().context("loading configuration")?;
    if let Some(input_folder) = cli.input_folder {
        config.input_folder = input_folder;
    }
    if let Some(output_folder) = cli.output_folder {
        config.output_folder = output_folder;
    }

    let storage = StorageManager::new(&config)
        .await
        .context("opening content store")?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            config.surrealdb_username.as_deref(),
            config.surrealdb_password.as_deref(),
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await
        .context("connecting to surrealdb")?,
    );
    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(
        &config,
        Arc::clone(&openai_client),
    ));
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let engine = ConsolidationEngine::new(db, openai_client, &config, storage, embedding_provider)?;

    match cli.command {
        Command::Run => report(&run_consolidation(&engine).await?),
        Command::Reset => {
            let reset = reset_documents(engine.store(), engine.config()).await?;
            info!(documents = reset, "reset complete");
        }
        Command::Rebuild => report(&rebuild(&engine).await?),
    }

    Ok(())
}

fn report(summary: &RunSummary) {
    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "consolidation complete"
    );
}
