use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ccp_client::{CredentialProvider, ProviderError};
use ccp_core::config_file::{CONFIG_ENV, CcpConfigFile};
use ccp_core::{ClientConfig, ConfigError, ParamError, SearchCriteria, params};
use clap::{Parser, Subcommand};
use tracing::debug;

/// Exit status when the provider reports that no account matches.
const EXIT_NOT_FOUND: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "ccp", version, about = "Retrieve credentials from a Central Credential Provider")]
struct Cli {
    /// Config file (otherwise uses CCP_CONFIG).
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Fetch a secret and print it.
    Get {
        /// Search parameter, e.g. `-p safe=Linux -p object=root-srv01`.
        #[arg(long = "param", short = 'p', value_parser = parse_kv, required = true)]
        params: Vec<(String, String)>,
        /// Application id to send instead of the configured one.
        #[arg(long)]
        appid: Option<String>,
        /// Print every field returned by the provider as JSON.
        #[arg(long, default_value_t = false)]
        detail: bool,
    },
    /// Print the effective client configuration (the passphrase is omitted).
    Config,
    /// Validate search parameters without contacting the provider.
    Check {
        #[arg(long = "param", short = 'p', value_parser = parse_kv, required = true)]
        params: Vec<(String, String)>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("no config file: pass --config or set {CONFIG_ENV}")]
    NoConfig,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("cannot render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Provider(e) if e.is_not_found() => ExitCode::from(EXIT_NOT_FOUND),
            _ => ExitCode::FAILURE,
        }
    }
}

fn parse_kv(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    Ok((k.to_owned(), v.to_owned()))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the client config from `--config` or `CCP_CONFIG`.
fn load_config(explicit: Option<&Path>) -> Result<ClientConfig, CliError> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(CcpConfigFile::default_path)
        .ok_or(CliError::NoConfig)?;
    Ok(CcpConfigFile::load(&path)?.client_config())
}

fn criteria(pairs: Vec<(String, String)>, appid: Option<String>) -> SearchCriteria {
    let criteria: SearchCriteria = pairs.into_iter().collect();
    match appid {
        Some(appid) => criteria.with_appid(appid),
        None => criteria,
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.cmd {
        Cmd::Check { params: pairs } => {
            let mut criteria = criteria(pairs, None);
            params::validate(&mut criteria)?;
            println!("ok: {}", criteria.redacted());
        }
        Cmd::Config => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Cmd::Get {
            params: pairs,
            appid,
            detail,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let provider = CredentialProvider::new(config);
            let scope = provider.open()?;
            let criteria = criteria(pairs, appid);
            debug!("looking up {}", criteria.redacted());

            if detail {
                let (_, fields) = scope.get_secret_detail(criteria).await?.into_parts();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::Value::Object(fields))?
                );
            } else {
                let secret = scope.get_secret(criteria).await?;
                println!("{}", secret.expose());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ccp: {e}");
            e.exit_code()
        }
    }
}
