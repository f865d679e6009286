//! pagewire CLI - Resolve page definitions from the command line
//!
//! Usage:
//!   pagewire resolve pages.yaml home --param title="Hello World!"
//!   pagewire list pages.yaml
//!   pagewire check pages.yaml other.json

use clap::{Parser, Subcommand};
use colored::Colorize;
use indexmap::IndexMap;
use pagewire_core::{Engine, Page, PageCatalog, Registry, RequestContext, ResolvedPage, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// pagewire - Per-request resolution of page configuration graphs
#[derive(Parser, Debug)]
#[command(name = "pagewire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve one page of a catalog for a simulated request
    Resolve {
        /// Page catalog (YAML or JSON)
        catalog: PathBuf,

        /// Key of the page to resolve
        key: String,

        /// Route parameter, as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,

        /// Query parameter, as key=value (repeatable; repeated keys form a list)
        #[arg(short, long = "query", value_parser = parse_pair)]
        queries: Vec<(String, String)>,

        /// URL path of the request
        #[arg(long, default_value = "/")]
        path: String,

        /// Application config exposed under context/config (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format: json, yaml
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// List the pages of a catalog
    List {
        /// Page catalog (YAML or JSON)
        catalog: PathBuf,
    },

    /// Quick parse check of page catalogs
    Check {
        /// Catalog file(s) to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Failed to load {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        source: pagewire_core::Error,
    },

    #[error("Page '{0}' not found in catalog")]
    UnknownPage(String),

    #[error("Unsupported format: {0}. Use json or yaml.")]
    UnsupportedFormat(String),

    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] pagewire_core::Error),
}

/// Run the CLI with the given arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Resolve {
            catalog,
            key,
            params,
            queries,
            path,
            config,
            format,
        } => cmd_resolve(&catalog, &key, params, queries, path, config, &format),

        Commands::List { catalog } => cmd_list(&catalog),

        Commands::Check { files } => cmd_check(files),
    }
}

/// Log to stderr; `RUST_LOG` takes precedence over `-v`
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid '{}', expected key=value", raw)),
    }
}

fn load_catalog(path: &Path) -> Result<PageCatalog, CliError> {
    PageCatalog::load(path).map_err(|source| CliError::Load {
        path: path.to_path_buf(),
        source,
    })
}

/// Read an application config file, choosing the format by extension
fn load_value(path: &Path) -> Result<Value, CliError> {
    let load = || -> pagewire_core::Result<Value> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| pagewire_core::Error::io(e.to_string()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Ok(serde_yaml::from_str(&content)?),
        }
    };
    load().map_err(|source| CliError::Load {
        path: path.to_path_buf(),
        source,
    })
}

fn build_context(
    params: Vec<(String, String)>,
    queries: Vec<(String, String)>,
    path: String,
    app_config: Value,
) -> RequestContext {
    let params: IndexMap<String, String> = params.into_iter().collect();
    queries.into_iter().fold(
        RequestContext::new(path)
            .with_params(params)
            .with_app_config(app_config),
        |ctx, (key, value)| ctx.with_query(key, value),
    )
}

fn render(resolved: &ResolvedPage, format: &str) -> Result<String, CliError> {
    match format {
        "json" => {
            let json = serde_json::to_string_pretty(resolved).map_err(pagewire_core::Error::from)?;
            Ok(format!("{}\n", json))
        }
        "yaml" | "yml" => {
            let yaml = serde_yaml::to_string(resolved).map_err(pagewire_core::Error::from)?;
            Ok(yaml)
        }
        other => Err(CliError::UnsupportedFormat(other.to_string())),
    }
}

fn resolve_page(
    catalog: &Path,
    key: &str,
    ctx: RequestContext,
    format: &str,
) -> Result<String, CliError> {
    let catalog = load_catalog(catalog)?;
    let page = catalog
        .get(key)
        .ok_or_else(|| CliError::UnknownPage(key.to_string()))?;

    let engine = Engine::new(Registry::with_builtins()?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let resolved = runtime.block_on(engine.resolve(&ctx, &page.details))?;

    render(&resolved, format)
}

fn cmd_resolve(
    catalog: &Path,
    key: &str,
    params: Vec<(String, String)>,
    queries: Vec<(String, String)>,
    path: String,
    config: Option<PathBuf>,
    format: &str,
) -> ExitCode {
    let app_config = match config.as_deref().map(load_value).transpose() {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::from(2);
        }
    };
    let ctx = build_context(params, queries, path, app_config);

    match resolve_page(catalog, key, ctx, format) {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e @ (CliError::Load { .. } | CliError::Runtime(_))) => {
            eprintln!("{}", e.to_string().red());
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("{} Resolution failed\n", "✗".red());
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn describe(page: &Page) -> String {
    if page.description.is_empty() {
        format!("{}  {}  {}", page.key.bold(), page.url_pattern.cyan(), page.title)
    } else {
        format!(
            "{}  {}  {} - {}",
            page.key.bold(),
            page.url_pattern.cyan(),
            page.title,
            page.description.dimmed()
        )
    }
}

fn cmd_list(catalog: &Path) -> ExitCode {
    let catalog = match load_catalog(catalog) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::from(2);
        }
    };

    for page in catalog.pages() {
        println!("{}", describe(page));
    }
    ExitCode::SUCCESS
}

fn cmd_check(files: Vec<PathBuf>) -> ExitCode {
    let mut all_valid = true;

    for file in files {
        match PageCatalog::load(&file) {
            Ok(catalog) => {
                println!(
                    "{} {}: {} page(s)",
                    "✓".green(),
                    file.display(),
                    catalog.len()
                );
            }
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), file.display(), e);
                all_valid = false;
            }
        }
    }

    if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
