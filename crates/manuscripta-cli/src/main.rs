//! Manuscripta CLI
//!
//! Operator tooling around the Manuscripta SDK: inspect tenant resolution and
//! effective configuration, run journal recommendations, dump resilience
//! metrics.

mod commands;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use manuscripta_core::Error;
use manuscripta_client::ClientSettings;

#[derive(Parser)]
#[command(name = "manuscripta")]
#[command(about = "Manuscripta - manuscript management SDK tools", long_about = None)]
struct Cli {
    /// Settings file (YAML or TOML)
    #[arg(long, global = true, env = "MANUSCRIPTA_CONFIG", default_value = "~/.manuscripta/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which tenant a request would resolve to
    ResolveTenant {
        /// Request header as `Name: value`; repeatable
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,

        /// Bearer token or raw JWT
        #[arg(long)]
        token: Option<String>,

        /// Request URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the effective configuration, API key masked
    ShowConfig {
        /// Organization code; the defaults are shown when omitted
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Recommend journals for an abstract
    RecommendJournals {
        #[arg(long)]
        tenant: String,

        #[arg(long = "abstract")]
        abstract_text: String,

        /// Keyword; repeatable
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        #[arg(long, default_value = "10")]
        limit: u32,
    },
    /// Print resilience metrics in Prometheus text format
    Metrics {
        /// Probe this path for the tenant first so the pipeline has traffic
        #[arg(long, requires = "tenant")]
        probe: Option<String>,

        #[arg(long)]
        tenant: Option<String>,
    },
}

/// Settings from `path`, or defaults when the file does not exist; the
/// environment is applied on top either way
fn load_settings(path: &Path) -> anyhow::Result<ClientSettings> {
    let mut settings = match ClientSettings::from_file(path) {
        Ok(settings) => settings,
        Err(manuscripta_client::ClientError::Core(Error::ConfigNotFound)) => {
            ClientSettings::default()
        }
        Err(e) => return Err(e.into()),
    };
    settings.merge_env();
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.config)?;
    manuscripta_observability::logging::init(&settings.sdk.logging)?;

    match cli.command {
        Commands::ResolveTenant {
            headers,
            token,
            url,
        } => {
            let resolved = commands::resolve_tenant(&headers, token.as_deref(), url.as_deref())?;
            match resolved {
                Some(code) => println!("{}", code),
                None => println!("No tenant could be resolved"),
            }
        }
        Commands::ShowConfig { tenant } => {
            print!("{}", commands::show_config(settings, tenant.as_deref())?);
        }
        Commands::RecommendJournals {
            tenant,
            abstract_text,
            keywords,
            limit,
        } => {
            let recommendations =
                commands::recommend_journals(settings, &tenant, abstract_text, keywords, limit)
                    .await?;
            if recommendations.is_empty() {
                println!("No journals recommended");
            }
            for (rank, rec) in recommendations.iter().enumerate() {
                println!(
                    "{:>2}. {} ({:.2}){}",
                    rank + 1,
                    rec.journal.name,
                    rec.score,
                    if rec.reasons.is_empty() {
                        String::new()
                    } else {
                        format!(" - {}", rec.reasons.join("; "))
                    }
                );
            }
        }
        Commands::Metrics { probe, tenant } => {
            let target = probe.zip(tenant);
            print!("{}", commands::metrics(settings, target).await?);
        }
    }

    Ok(())
}
