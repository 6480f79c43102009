use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use colkit::{
    database::Connector, ColumnValue, ConsistencyLevel, ConsistencyScope, MemoryCluster, Record,
    RecordStore, Schema, SchemaRegistry, ScyllaConnector,
};

#[derive(Parser, Debug)]
#[command(name = "record-loader")]
#[command(about = "Save JSON records into a column family, writing only changed columns")]
struct Args {
    #[arg(short, long, default_value = "config/record-loader.yaml")]
    config: String,

    /// JSON file holding an array of objects
    #[arg(short, long)]
    input: String,

    #[arg(long, default_value = "record")]
    kind: String,

    #[arg(long)]
    keyspace: String,

    #[arg(long)]
    column_family: String,

    #[arg(long, default_value = "id")]
    key_attribute: String,

    /// Override the configured consistency, e.g. `quorum`
    #[arg(long)]
    consistency: Option<String>,

    /// Write to an in-process cluster instead of the configured servers
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "record_loader=info,colkit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = colkit::load_config(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let registry = SchemaRegistry::new();
    registry.register(
        args.kind.clone(),
        Schema::new(&args.keyspace, &args.column_family, &args.key_attribute),
    );

    let connector: Arc<dyn Connector> = if args.dry_run {
        info!("Dry run: writing to in-memory cluster");
        Arc::new(MemoryCluster::new().connector())
    } else {
        Arc::new(ScyllaConnector::default())
    };
    let store = RecordStore::new(&config, connector, Arc::new(registry))?;

    let records = read_records(&args.input, &args.kind)?;
    info!("Loaded {} record(s) from {}", records.len(), args.input);

    let consistency = match &args.consistency {
        Some(name) => parse_consistency(name)?,
        None => store.consistency(),
    };
    let (saved, failed) = ConsistencyScope::new(consistency)
        .run(save_all(&store, records))
        .await;

    store.shutdown().await;
    info!("Finished: {} saved, {} failed", saved, failed);

    if failed > 0 {
        anyhow::bail!("{} record(s) could not be saved", failed);
    }
    Ok(())
}

async fn save_all(store: &RecordStore, records: Vec<Record>) -> (usize, usize) {
    let mut saved = 0;
    let mut failed = 0;
    for mut record in records {
        match store.save(&mut record).await {
            Ok(mutations) => {
                saved += 1;
                info!("Saved record with {} mutation(s)", mutations);
            }
            Err(e) => {
                failed += 1;
                warn!("Failed to save record: {}", e);
            }
        }
    }
    (saved, failed)
}

fn read_records(path: &str, kind: &str) -> Result<Vec<Record>> {
    let contents = std::fs::read_to_string(path)?;
    let rows: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&contents)?;

    Ok(rows
        .into_iter()
        .map(|row| {
            row.into_iter().fold(Record::new(kind), |record, (name, value)| {
                record.with(name, ColumnValue::from(value))
            })
        })
        .collect())
}

fn parse_consistency(name: &str) -> Result<ConsistencyLevel> {
    serde_json::from_value(serde_json::Value::String(name.to_lowercase()))
        .with_context(|| format!("unknown consistency level '{}'", name))
}
