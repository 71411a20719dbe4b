//! extprog CLI - drive the external components locally.
//!
//! Plays the host engine's part: loads attributes from a JSON file, runs one
//! lifecycle verb or one query, writes the result back and prints diagnostics.

use anyhow::Context;
use clap::{Parser, Subcommand};
use extprog::{
    create_default_provider, BridgeConfig, ComponentKind, Diagnostics, QueryConfig, ResourceData, Verb, TYPE_NAME,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "extprog", version = env!("CARGO_PKG_VERSION"), about = "Run external programs as data sources and managed resources")]
struct Cli {
    /// Bridge configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Parent of the per-step interchange directories
    #[arg(long, global = true)]
    tmpdir_base: Option<PathBuf>,

    /// Kill any single program running longer than this many seconds
    #[arg(long, global = true)]
    program_timeout: Option<u64>,

    /// Cancel the whole operation after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one lifecycle verb against a resource attribute file
    Resource {
        /// create, read, update or delete
        verb: Verb,

        /// Resource attributes (JSON). Updated in place unless --out is given.
        #[arg(short, long)]
        file: PathBuf,

        /// Write updated attributes here instead
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Adopt an existing object by id, then read it into the attribute file
    Import {
        /// Identifier of the existing object
        #[arg(long)]
        id: String,

        /// Resource attributes (JSON). Updated in place unless --out is given.
        #[arg(short, long)]
        file: PathBuf,

        /// Write updated attributes here instead
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run the stateless query protocol and print the result
    Query {
        /// Use the ephemeral resource (flat string map result)
        #[arg(long, default_value_t = false)]
        ephemeral: bool,

        /// Query configuration (JSON); "-" reads stdin
        #[arg(short, long, conflicts_with = "program")]
        file: Option<PathBuf>,

        /// Query entry, repeatable
        #[arg(short, long = "query", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        query: Vec<(String, String)>,

        /// Working directory of the program
        #[arg(short, long)]
        working_dir: Option<PathBuf>,

        /// Program and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        program: Vec<String>,
    },

    /// List registered components
    Components,

    /// Print the effective configuration as TOML
    Config,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", s))
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "extprog=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> BridgeConfig {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path),
        None => BridgeConfig::default(),
    };
    if let Some(base) = &cli.tmpdir_base {
        config.tmpdir_base = base.clone();
    }
    if let Some(secs) = cli.program_timeout {
        config.timeout_secs = Some(secs);
    }
    config
}

/// Token cancelled on Ctrl-C or when the overall timeout elapses.
fn cancellation(timeout: Option<u64>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; stopping the running program");
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout {
        let on_timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("timed out after {}s; stopping the running program", secs);
            on_timeout.cancel();
        });
    }
    cancel
}

fn report(diags: &Diagnostics) -> ExitCode {
    for diag in diags {
        eprintln!("{}\n", diag);
    }
    if diags.has_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn write_output(path: &Path, data: &ResourceData) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(data)?;
    tokio::fs::write(path, rendered + "\n")
        .await
        .with_context(|| format!("writing {}", path.display()))
}

async fn read_resource(path: &Path) -> anyhow::Result<ResourceData> {
    let raw = read_input(path).await?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        use tokio::io::AsyncReadExt;
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await.context("reading stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = load_config(&cli);
    debug!("interchange base: {}", config.tmpdir_base.display());
    let provider = create_default_provider(&config);

    match cli.command {
        Command::Resource { verb, file, out } => {
            let mut data = read_resource(&file).await?;

            let cancel = cancellation(cli.timeout);
            let diags = provider.apply(TYPE_NAME, verb, &mut data, &cancel).await;
            // The prior state only describes the change just applied.
            data.prior_state = None;

            write_output(&out.unwrap_or(file), &data).await?;
            Ok(report(&diags))
        }
        Command::Import { id, file, out } => {
            let mut data = read_resource(&file).await?;

            let cancel = cancellation(cli.timeout);
            let diags = provider.import(TYPE_NAME, &id, &mut data, &cancel).await;

            write_output(&out.unwrap_or(file), &data).await?;
            Ok(report(&diags))
        }
        Command::Query {
            ephemeral,
            file,
            query,
            working_dir,
            program,
        } => {
            let mut query_config = match file {
                Some(path) => {
                    let raw = read_input(&path).await?;
                    serde_json::from_str::<QueryConfig>(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => QueryConfig {
                    program: program.into_iter().map(Some).collect(),
                    working_dir: None,
                    query: BTreeMap::new(),
                },
            };
            query_config
                .query
                .extend(query.into_iter().map(|(k, v)| (k, Some(v))));
            if working_dir.is_some() {
                query_config.working_dir = working_dir;
            }

            let kind = if ephemeral {
                ComponentKind::EphemeralResource
            } else {
                ComponentKind::DataSource
            };
            let cancel = cancellation(cli.timeout);
            match provider.query(kind, TYPE_NAME, &query_config, &cancel).await {
                Ok(value) => {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report(&Diagnostics::from(e))),
            }
        }
        Command::Components => {
            for (kind, name) in provider.list() {
                println!("{:<20} {}", kind.to_string(), name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            print!("{}", config.to_toml());
            Ok(ExitCode::SUCCESS)
        }
    }
}
