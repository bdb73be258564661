//! Command-line runner for the broker integration suite

use broker_itest::config::HarnessConfig;
use broker_itest::loadtest::{LoadTest, LoadTestSettings};
use broker_itest::observability::init_default_logging;
use broker_itest::scenario::{catalog, ScenarioContext, SuiteFixture, SuiteRunner};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Integration test runner for an MQTT 3.1.1 broker
#[derive(Parser)]
#[command(name = "broker-itest")]
#[command(about = "Runs conformance scenarios against a supervised MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Use a broker that is already running instead of launching one
    #[arg(long, global = true)]
    external_broker: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker, run the scenarios, stop the broker
    Run {
        /// Only run scenarios whose name contains this substring
        #[arg(short, long)]
        filter: Option<String>,

        /// Also write the report as JSON
        #[arg(short, long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
    /// List scenario names and descriptions
    List,
    /// Drive publishers and subscribers and count deliveries
    Load {
        #[arg(long, default_value_t = 3)]
        publishers: usize,

        #[arg(long, default_value_t = 3)]
        subscribers: usize,

        #[arg(long, default_value_t = 5)]
        messages: usize,

        #[arg(long, default_value = "/test/load")]
        topic_root: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    if let Commands::List = cli.command {
        for scenario in catalog() {
            println!("{:<34} {}", scenario.name(), scenario.description());
        }
        return;
    }

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(2);
        }
    };

    let mut fixture = if cli.external_broker {
        SuiteFixture::external()
    } else {
        SuiteFixture::supervised(&config)
    };

    let succeeded = match execute(cli.command, &config, &mut fixture).await {
        Ok(succeeded) => succeeded,
        Err(e) => {
            error!("Run failed: {}", e);
            false
        }
    };

    if let Err(e) = fixture.stop().await {
        warn!("Failed to stop broker: {}", e);
    }

    if !succeeded {
        process::exit(1);
    }
}

fn load_configuration(path: Option<&Path>) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(HarnessConfig::load_from_file(path)?)
        }
        None => {
            let default_path = Path::new("itest.toml");
            if default_path.exists() {
                info!("Loading configuration from: {}", default_path.display());
                return Ok(HarnessConfig::load_from_file(default_path)?);
            }
            Ok(HarnessConfig::from_env()?)
        }
    }
}

/// Run one command; Ok(false) means it ran but something failed
async fn execute(
    command: Commands,
    config: &HarnessConfig,
    fixture: &mut SuiteFixture,
) -> Result<bool, Box<dyn std::error::Error>> {
    let context = ScenarioContext::from_config(config)?;
    fixture.start().await?;

    match command {
        Commands::Run { filter, report } => {
            let runner = SuiteRunner::new(context).with_filter(filter);
            let scenarios = catalog();

            let suite_report = tokio::select! {
                report = runner.run(fixture, &scenarios) => report,
                _ = signal::ctrl_c() => {
                    warn!("Interrupted, stopping broker");
                    return Ok(false);
                }
            };

            print!("{}", suite_report.render_text());
            if let Some(path) = report {
                suite_report.write_json(&path)?;
                info!("Report written to {}", path.display());
            }
            Ok(suite_report.is_success())
        }
        Commands::Load {
            publishers,
            subscribers,
            messages,
            topic_root,
        } => {
            let settings = LoadTestSettings {
                publishers,
                subscribers,
                messages_per_publisher: messages,
                topic_root,
            };
            let load = LoadTest::new(settings, context);

            let load_report = tokio::select! {
                result = load.run() => result?,
                _ = signal::ctrl_c() => {
                    warn!("Interrupted, stopping broker");
                    return Ok(false);
                }
            };

            print!("{}", load_report.render_text());
            Ok(load_report.is_complete())
        }
        Commands::List => Ok(true),
    }
}
