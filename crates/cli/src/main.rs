use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use folio_core::{Filter, FolioError, FolioResult, Order};
use folio_pager::{fetch_all, Pager, PagerConfig, PagerState, RequestOutcome};
use folio_store::MemoryFetcher;
use serde_json::Value;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "folioctl", version, about = "Page, sort and search a JSON collection")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OrderArg { Asc, Desc }

impl From<OrderArg> for Order {
    fn from(v: OrderArg) -> Self {
        match v {
            OrderArg::Asc => Order::Asc,
            OrderArg::Desc => Order::Desc,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show one page of the collection
    Page {
        /// JSON file holding an array of objects
        file: PathBuf,
        #[arg(long = "page", default_value_t = 1)]
        page: u32,
        /// Page size (default: FOLIO_PAGE_SIZE or 25)
        #[arg(long = "page-size")]
        page_size: Option<u32>,
        /// Field to sort by
        #[arg(long = "order-by")]
        order_by: Option<String>,
        #[arg(long = "order", value_enum, default_value_t = OrderArg::Asc)]
        order: OrderArg,
        /// Filter as key=value; use key~=text for a substring match. Repeatable.
        #[arg(long = "search")]
        search: Vec<String>,
    },
    /// Fetch every page and print the whole collection
    All {
        file: PathBuf,
        #[arg(long = "search")]
        search: Vec<String>,
    },
    /// Delete matching rows from a page and show where the table lands
    Delete {
        file: PathBuf,
        #[arg(long = "page", default_value_t = 1)]
        page: u32,
        #[arg(long = "page-size")]
        page_size: Option<u32>,
        /// Field to match, e.g. "id"
        #[arg(long = "key")]
        key: String,
        /// Value to match; parsed as JSON when possible, else taken as a string
        #[arg(long = "value")]
        value: String,
    },
}

fn init_tracing() {
    let env = std::env::var("FOLIO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FOLIO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FOLIO_METRICS_ADDR; expected host:port");
        }
    }
}

/// Parse `key=value` (exact) or `key~=text` (substring) pairs into a filter.
fn parse_search(pairs: &[String]) -> Result<Filter> {
    let mut out = Filter::new();
    for raw in pairs {
        if let Some((k, v)) = raw.split_once("~=") {
            out.insert(k.trim().to_string(), serde_json::json!({ "+contains": v }));
        } else if let Some((k, v)) = raw.split_once('=') {
            out.insert(k.trim().to_string(), parse_value(v));
        } else {
            return Err(anyhow!("invalid search term: {} (expect key=value or key~=text)", raw));
        }
    }
    Ok(out)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn load(path: &Path) -> Result<Arc<MemoryFetcher>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let backend = MemoryFetcher::from_json(&raw).with_context(|| format!("parsing {}", path.display()))?;
    info!(file = %path.display(), items = backend.len(), "dataset loaded");
    Ok(Arc::new(backend))
}

fn pager_for(backend: &Arc<MemoryFetcher>, page_size: Option<u32>) -> Result<Pager<Value>> {
    let mut cfg = PagerConfig::from_env();
    if let Some(n) = page_size {
        cfg.page_size = n;
    }
    cfg.validate()?;
    Ok(Pager::with_config((), backend.clone(), cfg))
}

/// Every page matching `filter`; a backend failure surfaces as [`FolioError::Fetch`].
async fn collect_all(backend: &MemoryFetcher, filter: &Filter) -> FolioResult<Vec<Value>> {
    fetch_all(backend, &(), filter).await.map_err(|e| FolioError::Fetch(format!("{:#}", e)))
}

fn print_state(output: Output, state: &PagerState<Value>) -> Result<()> {
    if let Some(e) = &state.error {
        eprintln!("error: {:#}", e);
    }
    match output {
        Output::Human => {
            for item in state.items() {
                println!("{}", serde_json::to_string(item)?);
            }
            println!(
                "page {}/{} • {} per page • {} total",
                state.page,
                state.pages.unwrap_or(1),
                state.page_size,
                state.count
            );
        }
        Output::Json => {
            let doc = serde_json::json!({
                "page": state.page,
                "pages": state.pages,
                "page_size": state.page_size,
                "results": state.count,
                "order_by": state.order_by,
                "order": state.order,
                "filter": state.filter,
                "data": state.items(),
                "error": state.error.as_ref().map(|e| format!("{:#}", e)),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Page { file, page, page_size, order_by, order, search } => {
            let backend = load(&file)?;
            let pager = pager_for(&backend, page_size)?;
            let filter = parse_search(&search)?;
            info!(page, order_by = ?order_by, terms = filter.len(), "page invoked");
            if !filter.is_empty() {
                pager.handle_search(filter).await;
            }
            if let Some(key) = order_by {
                pager.handle_order_change(key, order.into()).await;
            }
            if pager.handle_page_change(page, true).await == RequestOutcome::Failed {
                error!("page request failed");
            }
            print_state(cli.output, &pager.current())?;
        }
        Commands::All { file, search } => {
            let backend = load(&file)?;
            let filter = parse_search(&search)?;
            let items = collect_all(backend.as_ref(), &filter).await?;
            info!(count = items.len(), "all fetched");
            match cli.output {
                Output::Human => {
                    for item in &items {
                        println!("{}", serde_json::to_string(item)?);
                    }
                    println!("{} total", items.len());
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&items)?),
            }
        }
        Commands::Delete { file, page, page_size, key, value } => {
            let backend = load(&file)?;
            let pager = pager_for(&backend, page_size)?;
            pager.handle_page_change(page, false).await;
            let target = parse_value(&value);
            let on_page = pager.current().items().iter().filter(|it| it.get(&key) == Some(&target)).count();
            if on_page == 0 {
                return Err(anyhow!("no row with {}={} on page {}", key, value, page));
            }
            let removed = backend.remove_where(&key, &target);
            info!(key = %key, removed, on_page, "rows deleted");
            if on_page == 1 {
                pager.on_delete().await;
            } else {
                pager.on_bulk_delete(on_page).await;
            }
            print_state(cli.output, &pager.current())?;
        }
    }
    Ok(())
}
