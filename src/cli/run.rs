use anyhow::Context;
use serde_json::{json, Value};
use tracing::info;

use super::{Cli, Command};
use crate::config::AppConfig;
use crate::domain::{EntityRepository, Record, RecordId};
use crate::infrastructure::cache::DistributedCacheFactory;
use crate::infrastructure::observability::{init_metrics, MetricsConfig};
use crate::infrastructure::repository::CacheRepository;
use crate::infrastructure::storage::BackingStoreFactory;

/// Run one CLI command against the configured repository
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let metrics_config = if cli.metrics {
        MetricsConfig::enabled()
    } else {
        config.metrics.clone()
    };
    let metrics = init_metrics(&metrics_config);

    let output = match cli.command {
        Command::EnsureSchema => {
            let store_config = config.store.to_store_config()?;
            BackingStoreFactory::create::<Record>(&store_config).await?;
            json!({ "store": format!("{:?}", store_config.store_type()), "ready": true })
        }
        command => {
            let repository = build_repository(&config).await?;
            let outcome = execute(&repository, command).await;

            // Drain write-behind entries even when the command failed
            let drained = repository.shutdown().await;
            let output = outcome?;
            drained.context("failed to drain write-behind queue")?;
            output
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    if metrics_config.print_on_exit {
        if let Some(metrics) = metrics {
            eprintln!("{}", metrics.render());
        }
    }

    Ok(())
}

/// Assembles a record repository from the configuration sections
pub async fn build_repository(config: &AppConfig) -> anyhow::Result<CacheRepository<Record>> {
    let strategy = config
        .cache
        .to_strategy_config()
        .context("invalid cache configuration")?;

    let distributed =
        DistributedCacheFactory::create(&config.distributed.to_factory_config()?).await?;
    let store = BackingStoreFactory::create::<Record>(&config.store.to_store_config()?).await?;

    let repository = CacheRepository::builder(config.cache.name.clone())
        .strategy(strategy)
        .distributed_cache(distributed)
        .backing_store(store)
        .build()?;

    info!(
        cache = %repository.cache_name(),
        strategy = repository.strategy().label(),
        "Repository ready"
    );

    Ok(repository)
}

async fn execute(
    repository: &dyn EntityRepository<Record>,
    command: Command,
) -> anyhow::Result<Value> {
    let output = match command {
        Command::Get { id } => {
            let record = repository.get(&RecordId::new(id)?).await?;
            serde_json::to_value(record)?
        }
        Command::GetMany { ids } => {
            let ids = parse_ids(ids)?;
            serde_json::to_value(repository.get_all(&ids).await?)?
        }
        Command::Put { id, data } => {
            let id = match id {
                Some(id) => RecordId::new(id)?,
                None => RecordId::generate(),
            };
            let data: Value = serde_json::from_str(&data).context("payload is not valid JSON")?;

            repository.put(Record::new(id.clone(), data)).await?;
            json!({ "id": id.as_str() })
        }
        Command::Invalidate { ids } => {
            let removed = repository.invalidate(&parse_ids(ids)?).await?;
            json!({ "removed": removed })
        }
        Command::InvalidatePattern { glob } => {
            let removed = repository.invalidate_by_pattern(&glob).await?;
            json!({ "removed": removed })
        }
        Command::InvalidateAll => {
            let removed = repository.invalidate_all().await?;
            json!({ "removed": removed })
        }
        Command::EnsureSchema => json!({ "ready": true }),
    };

    Ok(output)
}

fn parse_ids(ids: Vec<String>) -> anyhow::Result<Vec<RecordId>> {
    ids.into_iter()
        .map(|id| RecordId::new(id).map_err(anyhow::Error::from))
        .collect()
}
