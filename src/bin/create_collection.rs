use anyhow::{Context, Result};
use clap::Parser;
use scanmint::{
    commit::{AttemptJournal, JournalEntry, ObserverSet, TracingObserver},
    config::AppConfig,
    core::{CommitAction, EntityId},
    publish::{CollectionDraft, CollectionPublisher},
    remote::{
        AddressOnlySigner, GatewayClient, GatewayConfig, HttpSigner, InMemoryBackend,
        RemoteContext,
    },
    template::PayloadTemplate,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "create-collection")]
#[command(about = "Spawn a collection process and load the collection source into it")]
struct Cli {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    /// Transaction id of the thumbnail image.
    #[arg(long, default_value = "")]
    thumbnail: String,
    /// Transaction id of the banner image.
    #[arg(long, default_value = "")]
    banner: String,
    /// Profile process of the creator.
    #[arg(long)]
    profile: String,
    /// Creator wallet. Defaults to the signer address.
    #[arg(long)]
    creator: Option<String>,
    /// Replaces the bundled collection source.
    #[arg(long)]
    template: Option<PathBuf>,
    /// Run against an in-memory backend instead of the network.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = if cli.dry_run {
        dotenvy::dotenv().ok();
        AppConfig::from_lookup(|key| std::env::var(key).ok().or_else(|| dry_run_default(key)))
    } else {
        AppConfig::from_env()
    }
    .context("failed to load configuration")?;

    let (ctx, backend) = if cli.dry_run {
        let backend = Arc::new(InMemoryBackend::new());
        let signer = AddressOnlySigner::new(
            cli.creator.clone().unwrap_or_else(|| "dry-run-wallet".to_string()),
        );
        (
            RemoteContext::new(backend.clone(), Arc::new(signer)),
            Some(backend),
        )
    } else {
        let client = GatewayClient::new(GatewayConfig::new(&config.mu_url, &config.cu_url))
            .context("failed to build gateway client")?;
        let signer = HttpSigner::connect(&config.signer_url, Duration::from_secs(10))
            .await
            .with_context(|| format!("failed to reach signer at {}", config.signer_url))?;
        (RemoteContext::new(Arc::new(client), Arc::new(signer)), None)
    };

    let mut settings = config.publish_settings().await?;
    if let Some(path) = &cli.template {
        settings.collection_template = PayloadTemplate::load(path)
            .await
            .with_context(|| format!("failed to load collection source {}", path.display()))?;
    }

    let draft = CollectionDraft {
        title: cli.title,
        description: cli.description,
        thumbnail: cli.thumbnail,
        banner: cli.banner,
        creator: cli
            .creator
            .unwrap_or_else(|| ctx.signer().address().to_string()),
        profile: EntityId::new(cli.profile).context("--profile must be a process id")?,
    };

    let journal = Arc::new(AttemptJournal::new());
    let observer = ObserverSet::new()
        .with(Arc::new(TracingObserver))
        .with(journal.clone());

    let published = CollectionPublisher::new(ctx, Arc::new(settings))
        .with_observer(Arc::new(observer))
        .publish(&draft)
        .await
        .context("collection publish failed")?;

    let mut summary = json!({
        "collectionId": published.id,
        "spawnAttempts": published.report.attempts_for(CommitAction::Spawn),
        "evalAttempts": published.report.attempts_for(CommitAction::Execute),
        "failedAttempts": journal
            .entries()
            .iter()
            .filter(|entry| {
                matches!(entry, JournalEntry::Attempt { result, .. } if !result.is_success())
            })
            .count(),
    });
    if let Some(backend) = backend {
        let evaluated = backend
            .entity(&published.id)
            .await
            .map(|record| record.evaluated.len())
            .unwrap_or(0);
        summary["dryRun"] = json!({ "evaluatedMessages": evaluated });
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn dry_run_default(key: &str) -> Option<String> {
    let value = match key {
        "AO_MODULE" => "dry-run-module",
        "AO_SCHEDULER" => "dry-run-scheduler",
        "AO_PROFILE_REGISTRY" => "dry-run-registry",
        "RETRY_DELAY_MS" => "0",
        _ => return None,
    };
    Some(value.to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scanmint=info,create_collection=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
