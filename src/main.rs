use clap::{Parser, Subcommand};
use confetch::fetch::{Fetcher, FileFetcher};
use confetch::funcs::Library;
use confetch::{config, output, render, sync};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "confetch")]
#[command(about = "Render config files from JSON services, reload on change")]
#[command(long_about = "\
Render config files from JSON services, reload on change

Each [[template]] in the config fetches JSON from the first reachable URL,
renders a MiniJinja template against it and rewrites the destination only
when the output changed. A changed file runs check_cmd, then reload_cmd.

Template data:
  Object keys are top-level variables; the whole document is `root`.
  Helpers: toInt toFloat add sub mul div mod regexReplace strQuote split join
           toUpper toLower contains replace trimSuffix base dir createMap
           pushToMap createArray pushToArray datetime

Run 'confetch gen-config' to generate a documented confetch.toml.")]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, default_value = "confetch.toml", global = true)]
    config: PathBuf,

    /// Log level for confetch (error|warn|info|debug|trace)
    #[arg(long, global = true, conflicts_with = "debug")]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync every template once
    Run,
    /// Sync every template, then repeat every `interval` seconds
    Watch,
    /// Render one template to stdout from a local JSON file
    Render {
        /// Template file
        template: PathBuf,
        /// JSON data file
        #[arg(long)]
        data: PathBuf,
    },
    /// Validate the config and parse every template
    Check,
    /// Print a stock confetch.toml with all options documented
    GenConfig,
}

/// Filter precedence: `--debug`, `--log-level`, `RUST_LOG`, then `info`.
fn log_spec(debug: bool, log_level: Option<&str>) -> String {
    let level = if debug { Some("debug") } else { log_level };
    match level {
        Some(level) => format!("warn,confetch={}", level.to_ascii_lowercase()),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,confetch=info".into()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_spec(cli.debug, cli.log_level.as_deref())))
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let library = Library::standard();

    match cli.command {
        Command::Run => {
            let config = config::load_config(&cli.config)?;
            let outcomes = sync::run_all(&config, &library);
            output::print_run_output(&outcomes);
            if outcomes.iter().any(|o| o.result.is_err()) {
                process::exit(1);
            }
        }
        Command::Watch => {
            let config = config::load_config(&cli.config)?;
            info!(
                templates = config.templates.len(),
                interval = config.interval,
                "watching"
            );
            loop {
                let outcomes = sync::run_all(&config, &library);
                let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
                if failed > 0 {
                    error!(failed, "pass finished with failures");
                }
                std::thread::sleep(Duration::from_secs(config.interval));
            }
        }
        Command::Render { template, data } => {
            let root = FileFetcher::new(data).fetch()?;
            let rendered = render::render(&template, &library, &root)?;
            std::io::stdout().write_all(&rendered)?;
        }
        Command::Check => {
            let config = config::load_config(&cli.config)?;
            println!("==> Checking {}", cli.config.display());
            let checks: Vec<_> = config
                .templates
                .iter()
                .map(|t| (t, render::check(&t.src, &library)))
                .collect();
            output::print_check_output(&checks);
            if checks.iter().any(|(_, result)| result.is_err()) {
                process::exit(1);
            }
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
