//! dsedit CLI: run the item service and inspect or move dataset items.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dsedit::api::{DatasetItemsApi, HttpItemsApi, LocalItemsApi};
use dsedit::models::{DatasetInfo, DatasetItem, ListQuery};
use dsedit::server::{serve, ServerConfig};
use dsedit::storage::{self, DatasetStore};
use dsedit::SessionConfig;

#[derive(Parser)]
#[command(
    name = "dsedit",
    about = "dsedit: dataset item service and editing tools",
    version,
    author
)]
struct Cli {
    /// Session config file (YAML); its api_url and page_size become the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Item service base URL
    #[arg(long, global = true)]
    api: Option<String>,
    /// Work on a local data directory instead of a running service
    #[arg(long, global = true, conflicts_with = "api")]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the item service
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to
        #[arg(long, short, default_value_t = 8000)]
        port: u16,
    },
    /// List datasets and their item counts
    Datasets,
    /// Show one page of items from a dataset
    List {
        /// Dataset id
        dataset: String,
        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Rows per page
        #[arg(long, short)]
        size: Option<usize>,
        /// Free-text search over item data
        #[arg(long)]
        search: Option<String>,
    },
    /// Import items from a JSON array or JSON-lines file
    Import {
        /// Dataset id
        dataset: String,
        /// Items file
        file: PathBuf,
        /// Items sent per request
        #[arg(long, default_value_t = 100)]
        batch: usize,
    },
    /// Export every item of a dataset to CSV or JSON
    Export {
        /// Dataset id
        dataset: String,
        /// Output format
        #[arg(long, short, default_value = "csv", value_parser = ["csv", "json"])]
        format: String,
        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(api) = cli.api {
        config.api_url = api;
    }

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(cli.dir, host, port).await?;
        }
        Commands::Datasets => {
            let source = Source::new(&config, cli.dir)?;
            cmd_datasets(&source).await?;
        }
        Commands::List { dataset, page, size, search } => {
            let source = Source::new(&config, cli.dir)?;
            let size = size.unwrap_or(config.page_size);
            cmd_list(&source, &dataset, page, size, search).await?;
        }
        Commands::Import { dataset, file, batch } => {
            let source = Source::new(&config, cli.dir)?;
            cmd_import(&source, &dataset, file, batch).await?;
        }
        Commands::Export { dataset, format, output } => {
            let source = Source::new(&config, cli.dir)?;
            cmd_export(&source, &dataset, &format, output, config.page_size).await?;
        }
    }

    Ok(())
}

// ─── Item source ──────────────────────────────────────────────────────────────

/// Where commands read and write items.
enum Source {
    Remote(HttpItemsApi),
    Local(LocalItemsApi),
}

impl Source {
    fn new(config: &SessionConfig, dir: Option<PathBuf>) -> Result<Self> {
        Ok(match dir {
            Some(dir) => Source::Local(LocalItemsApi::new(Arc::new(DatasetStore::open(dir)?))),
            None => {
                info!(url = %config.api_url, "Using item service");
                Source::Remote(HttpItemsApi::new(config.api_url.clone()))
            }
        })
    }

    fn api(&self) -> &dyn DatasetItemsApi {
        match self {
            Source::Remote(api) => api as &dyn DatasetItemsApi,
            Source::Local(api) => api as &dyn DatasetItemsApi,
        }
    }

    async fn datasets(&self) -> Result<Vec<DatasetInfo>> {
        Ok(match self {
            Source::Remote(api) => api.list_datasets().await?,
            Source::Local(api) => api.store().list_datasets(),
        })
    }
}

// ─── Command implementations ──────────────────────────────────────────────────

async fn cmd_serve(dir: Option<PathBuf>, host: String, port: u16) -> Result<()> {
    println!("dsedit item service");
    match &dir {
        Some(dir) => println!("   Data:  {}", dir.display()),
        None => println!("   Data:  in memory"),
    }
    println!("   URL:   http://{}:{}", host, port);
    println!();

    serve(ServerConfig {
        data_dir: dir,
        host,
        port,
    })
    .await
}

async fn cmd_datasets(source: &Source) -> Result<()> {
    let datasets = source.datasets().await?;
    if datasets.is_empty() {
        println!("No datasets found");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Dataset", "Items", "Last updated"]);
    for ds in &datasets {
        let updated = ds
            .last_updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row([ds.id.as_str(), &ds.items_count.to_string(), &updated]);
    }
    println!("{}", table);
    Ok(())
}

async fn cmd_list(
    source: &Source,
    dataset: &str,
    page: usize,
    size: usize,
    search: Option<String>,
) -> Result<()> {
    let mut query = ListQuery::new(page, size);
    if let Some(search) = search {
        query = query.with_search(search);
    }
    let result = source.api().list_items(dataset, &query).await?;

    if result.content.is_empty() {
        println!("No items on page {} of '{}'", page, dataset);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Id", "Tags", "Data"]);
    for item in &result.content {
        table.add_row([
            item.id.as_str(),
            &item.tags.join(", "),
            &truncate(&Value::Object(item.data.clone()).to_string(), 80),
        ]);
    }

    println!("Dataset: {} (page {}, {} items total)", dataset, page, result.total);
    println!("{}", table);
    Ok(())
}

async fn cmd_import(source: &Source, dataset: &str, file: PathBuf, batch: usize) -> Result<()> {
    let mut items = storage::read_items_file(&file)
        .with_context(|| format!("Failed to read items from {}", file.display()))?;
    if items.is_empty() {
        println!("Nothing to import from {}", file.display());
        return Ok(());
    }

    // The service puts new items on top; send them last-first so file order survives.
    items.reverse();
    let total = items.len();

    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} items")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut remaining = items.into_iter().peekable();
    while remaining.peek().is_some() {
        let chunk: Vec<DatasetItem> = remaining.by_ref().take(batch.max(1)).collect();
        let sent = chunk.len() as u64;
        source.api().create_items(dataset, chunk).await?;
        bar.inc(sent);
    }
    bar.finish_and_clear();
    info!(dataset = %dataset, items = total, "Import finished");

    println!("Imported {} items into '{}'", total, dataset);
    Ok(())
}

async fn cmd_export(
    source: &Source,
    dataset: &str,
    format: &str,
    output: Option<PathBuf>,
    page_size: usize,
) -> Result<()> {
    let items = fetch_all(source.api(), dataset, page_size).await?;
    info!(dataset = %dataset, items = items.len(), format, "Export fetched");

    let content = match format {
        "json" => serde_json::to_string_pretty(&items)?,
        "csv" => to_csv(&items),
        _ => anyhow::bail!("Unknown format: {}", format),
    };

    match output {
        Some(path) => {
            std::fs::write(&path, &content)?;
            println!("Exported {} items to {}", items.len(), path.display());
        }
        None => print!("{}", content),
    }

    Ok(())
}

// ─── Utilities ────────────────────────────────────────────────────────────────

async fn fetch_all(
    api: &dyn DatasetItemsApi,
    dataset: &str,
    page_size: usize,
) -> Result<Vec<DatasetItem>> {
    let size = page_size.max(1);
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let result = api.list_items(dataset, &ListQuery::new(page, size)).await?;
        let fetched = result.content.len();
        items.extend(result.content);
        if fetched < size || items.len() >= result.total {
            break;
        }
        page += 1;
    }
    Ok(items)
}

fn to_csv(items: &[DatasetItem]) -> String {
    let columns: Vec<String> = storage::infer_columns(items)
        .into_iter()
        .map(|c| c.name)
        .collect();

    let mut header = vec!["id".to_string(), "tags".to_string()];
    header.extend(columns.iter().cloned());
    let mut out = csv_row(&header);

    for item in items {
        let mut row = vec![item.id.clone(), item.tags.join(";")];
        row.extend(columns.iter().map(|key| match item.data.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }));
        out += &csv_row(&row);
    }
    out
}

fn csv_row(fields: &[String]) -> String {
    let escaped: Vec<String> = fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect();
    escaped.join(",") + "\n"
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
