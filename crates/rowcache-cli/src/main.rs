//! rowcache - page through and export rows from a remote query endpoint.
//!
//! Every command goes through the same core the interactive table uses:
//! `page` drives a `TableController`, `export` runs the download path.

mod output;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rowcache_core::{
    Config, ExportFetcher, FilterEdit, FilterSpec, HttpDataSource, SortDirection,
    SortKey, SortSpec, SortToggle, TableController,
};

use output::{ExportFormat, PageFormat};

/// Log file prefix inside `--log-dir`
const LOG_FILE_PREFIX: &str = "rowcache.log";

#[derive(Parser)]
#[command(name = "rowcache")]
#[command(about = "Page through and export rows from a remote query endpoint")]
#[command(version)]
struct Cli {
    /// Query endpoint URL (overrides config file and ROWCACHE_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct QueryArgs {
    /// Filter predicate, repeatable
    #[arg(long = "filter", value_name = "FIELD:OP:VALUE")]
    filters: Vec<FilterEdit>,

    /// Sort key in priority order, repeatable
    #[arg(long = "sort", value_name = "FIELD[:asc|:desc]")]
    sort: Vec<SortKey>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page and print its rows
    #[command(after_help = "\
Examples:
  rowcache page --page 2 --page-size 50
  rowcache page --filter status:eq:open --sort created:desc --format table")]
    Page {
        /// Page number, starting at 1
        #[arg(long, default_value = "1")]
        page: usize,

        /// Rows per page (default: from config)
        #[arg(long)]
        page_size: Option<usize>,

        #[arg(long, value_enum, default_value = "jsonl")]
        format: PageFormat,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Download the full filtered result set to a file
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,

        /// Destination file, replaced atomically
        #[arg(long, short = 'o')]
        output: PathBuf,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a configuration file with the given values
    Init {
        #[arg(long)]
        page_size: Option<usize>,

        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=rowcache_core=debug).
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    let mut config = Config::load()?;
    config.apply_env();
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = Some(endpoint);
    }

    match cli.command {
        Commands::Page {
            page,
            page_size,
            format,
            query,
        } => run_page(&config, page, page_size, format, query).await,
        Commands::Export { format, output, query } => run_export(&config, format, &output, query).await,
        Commands::Config { action } => run_config(config, action),
    }
}

fn build_source(config: &Config) -> Result<Arc<HttpDataSource<Value>>> {
    let endpoint = config
        .endpoint
        .clone()
        .context("No endpoint configured. Set ROWCACHE_ENDPOINT or pass --endpoint")?;

    let source = HttpDataSource::with_timeout(endpoint, config.request_timeout())?;
    let source = match config.token {
        Some(ref token) => source.with_token(token.clone()),
        None => source,
    };
    Ok(Arc::new(source))
}

async fn run_page(
    config: &Config,
    page: usize,
    page_size: Option<usize>,
    format: PageFormat,
    query: QueryArgs,
) -> Result<()> {
    let source = build_source(config)?;
    let mut view: TableController<Value, _> = TableController::new(source, config.view_settings());

    // Edits arrive inside one debounce window, so only the last one fetches
    for edit in query.filters {
        view.on_filter_change(edit);
    }
    for key in query.sort {
        view.on_sort_change(SortToggle::multi(key.field.clone()));
        if key.direction == SortDirection::Desc {
            view.on_sort_change(SortToggle::multi(key.field));
        }
    }
    view.on_pagination_change(page, page_size.unwrap_or(config.page_size));

    view.settle().await;
    if let Some(notice) = view.take_notice() {
        anyhow::bail!(notice);
    }

    let stdout = io::stdout();
    output::print_page(&view.visible_rows(), format, &mut stdout.lock())?;
    info!(page = view.page(), pages = view.page_count(), total = view.total(), "Page printed");
    eprintln!(
        "{}",
        output::page_footer(view.page(), view.page_count(), view.total(), &view.cache().age_display())
    );
    Ok(())
}

async fn run_export(config: &Config, format: ExportFormat, output: &Path, query: QueryArgs) -> Result<()> {
    let source = build_source(config)?;
    let filters: FilterSpec = query.filters.into_iter().collect();
    let sort = SortSpec::from_keys(query.sort);

    let exporter = ExportFetcher::<Value, _>::new(source);
    let rows = exporter.download(&filters, &sort).await.context("Export failed")?;

    output::write_export(&rows, format, output)?;
    info!(rows = rows.len(), path = %output.display(), "Export written");
    eprintln!("Exported {} rows to {}", rows.len(), output.display());
    Ok(())
}

fn run_config(mut config: Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            if config.token.is_some() {
                config.token = Some("********".to_string());
            }
            println!("# {}", Config::config_path()?.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Init {
            page_size,
            debounce_ms,
            force,
        } => {
            let path = Config::config_path()?;
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(size) = page_size {
                config.page_size = size;
            }
            if let Some(ms) = debounce_ms {
                config.debounce_ms = ms;
            }
            if config.token.is_some() {
                warn!("Token from environment is being written to the config file");
            }
            config.save_to(&path)?;
            eprintln!("Wrote {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_page_query() {
        let cli = Cli::try_parse_from([
            "rowcache",
            "page",
            "--page",
            "3",
            "--filter",
            "status:eq:open",
            "--sort",
            "created:desc",
            "--sort",
            "name",
        ])
        .expect("parse");

        match cli.command {
            Commands::Page { page, query, .. } => {
                assert_eq!(page, 3);
                assert_eq!(query.filters.len(), 1);
                assert_eq!(query.sort.len(), 2);
                assert_eq!(query.sort[0].direction, SortDirection::Desc);
                assert_eq!(query.sort[1].direction, SortDirection::Asc);
            }
            _ => panic!("expected page command"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_filter() {
        assert!(Cli::try_parse_from(["rowcache", "page", "--filter", "status"]).is_err());
    }

    #[test]
    fn test_cli_export_requires_output() {
        assert!(Cli::try_parse_from(["rowcache", "export", "--format", "csv"]).is_err());
        assert!(Cli::try_parse_from(["rowcache", "export", "--format", "csv", "-o", "rows.csv"]).is_ok());
    }

    #[test]
    fn test_missing_endpoint_is_an_error() {
        let err = build_source(&Config::default()).expect_err("no endpoint");
        assert!(err.to_string().contains("No endpoint configured"));
    }
}
