//! logload ingest - run a pipeline stage by hand

use anyhow::{Context, Result};
use clap::Parser;
use logload_common::logging::{init_logging, LogConfig, LogLevel};
use logload_common::types::SourceReference;
use logload_ingest::{
    archive::ArchiveKind,
    config::ClientConfig,
    load::{LoadJobSpec, LoadScriptBuilder, StagingId},
    unpack::UnpackRequest,
    CloudClients, Stages,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "logload-ingest")]
#[command(author, version, about = "Log archive ingestion stages")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Unpack an archive and publish one notification per entry
    Unpack {
        /// Source bucket
        #[arg(short, long)]
        bucket: String,

        /// Archive path within the bucket
        #[arg(short, long)]
        path: String,

        /// Archive kind (zip, tar.gz); guessed from the path when omitted
        #[arg(short, long)]
        kind: Option<ArchiveKind>,

        /// Object size, used to pre-size the zip buffer
        #[arg(short, long)]
        size: Option<u64>,
    },

    /// Load one log file into the target table
    Load {
        /// Bucket holding the log file
        #[arg(short, long)]
        bucket: String,

        /// Log file path within the bucket
        #[arg(short, long)]
        path: String,
    },

    /// Print the load script for a dataset and table
    RenderScript {
        #[arg(short, long)]
        dataset: String,

        #[arg(short, long)]
        table: String,

        /// Staging table id; a fresh one is generated when omitted
        #[arg(long)]
        staging_id: Option<String>,

        /// Source URI bucket shown in the parameter listing
        #[arg(long, default_value = "bucket")]
        bucket: String,

        #[arg(long, default_value = "path/to/file.log")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("logload-ingest")
        .build()
        .with_env_overrides()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Unpack {
            bucket,
            path,
            kind,
            size,
        } => {
            let kind = match kind {
                Some(kind) => kind,
                None => ArchiveKind::detect(&path)
                    .with_context(|| format!("Cannot tell the archive kind of {}; pass --kind", path))?,
            };
            let request = UnpackRequest::new(SourceReference::new(bucket, path), kind)
                .with_declared_size(size);

            let stages = cloud_stages().await?;
            let cancel = cancel_on_ctrl_c();
            info!(source = %request.source, %kind, "Unpacking");
            let report = stages.unpack(request, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        Command::Load { bucket, path } => {
            let stages = cloud_stages().await?;
            let cancel = cancel_on_ctrl_c();
            let receipt = stages
                .load_source(SourceReference::new(bucket, path), &cancel)
                .await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        },
        Command::RenderScript {
            dataset,
            table,
            staging_id,
            bucket,
            path,
        } => {
            let mut spec = LoadJobSpec::new(dataset, table, &SourceReference::new(bucket, path));
            if let Some(id) = staging_id {
                spec = spec.with_staging_id(StagingId::parse(id)?);
            }
            let script = LoadScriptBuilder::build(&spec);
            println!("{}", script.sql);
            for parameter in &script.parameters {
                println!("-- @{} = {:?}", parameter.name, parameter.value);
            }
        },
    }

    Ok(())
}

async fn cloud_stages() -> Result<Stages> {
    let config = ClientConfig::from_env()?;
    let clients = CloudClients::new(config)
        .await
        .context("Failed to build cloud clients")?;
    Ok(Stages::new(Arc::new(clients)))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}
