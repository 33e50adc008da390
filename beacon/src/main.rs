//! beacon - replay analytics events through consent-gated destinations
//!
//! Subcommands:
//! - `replay`: load CDN settings, gate destinations on consent and push every
//!   event of a JSONL file through the dispatch pipeline
//! - `gate`: print the integrations a consent state would leave enabled
//! - `config`: print the resolved configuration
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/beacon/beacon.log (~/.local/state/beacon/beacon.log)
//! - Config: $XDG_CONFIG_HOME/beacon/config.toml (~/.config/beacon/config.toml)

mod console;
mod replay;

use anyhow::{bail, Context as _, Result};
use beacon_core::consent::{build_integrations, validate_categories, Categories};
use beacon_core::plugin::{PageContext, PageEnrichment};
use beacon_core::settings::CdnClient;
use beacon_core::{
    create_wrapper, Analytics, CdnSettings, Channel, Config, CreateWrapperOptions, Emitted, Hook,
    InitOptions, LoadSettings, Plugin,
};
use clap::{ArgAction, Parser, Subcommand};
use console::ConsoleDestination;
use replay::{ReplayLine, ReplaySummary};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Replay analytics events through consent-gated destinations")]
#[command(version)]
struct Args {
    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSONL file of events
    Replay {
        /// File with one event per line
        events: PathBuf,

        /// Consent state as Category=true|false (repeatable)
        #[arg(long = "consent", value_parser = parse_consent)]
        consent: Vec<(String, bool)>,

        /// CDN settings JSON; fetched with the configured write key when omitted
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Overrides `analytics.write_key`
        #[arg(long)]
        write_key: Option<String>,

        /// Page URL used to enrich events with page context
        #[arg(long)]
        page_url: Option<String>,
    },

    /// Show which integrations a consent state enables
    Gate {
        /// CDN settings JSON
        settings: PathBuf,

        /// Consent state as Category=true|false (repeatable)
        #[arg(long = "consent", value_parser = parse_consent)]
        consent: Vec<(String, bool)>,
    },

    /// Print the resolved configuration
    Config,
}

fn parse_consent(raw: &str) -> std::result::Result<(String, bool), String> {
    let (category, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected Category=true|false, got '{}'", raw))?;
    let category = category.trim();
    if category.is_empty() {
        return Err(format!("missing category name in '{}'", raw));
    }
    let consented = value
        .trim()
        .parse::<bool>()
        .map_err(|_| format!("consent for '{}' must be true or false", category))?;
    Ok((category.to_string(), consented))
}

fn consent_value(consent: &[(String, bool)]) -> Value {
    Value::Object(
        consent
            .iter()
            .map(|(category, consented)| (category.clone(), Value::Bool(*consented)))
            .collect(),
    )
}

fn read_settings(path: &Path) -> Result<CdnSettings> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    CdnSettings::from_json(&json).context("failed to parse settings file")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    match args.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }

    let _log_guard =
        beacon_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("beacon starting");

    match args.command {
        Command::Replay {
            events,
            consent,
            settings,
            write_key,
            page_url,
        } => {
            run_replay(
                &config,
                &events,
                &consent,
                settings.as_deref(),
                write_key,
                page_url.as_deref(),
            )
            .await
        }
        Command::Gate { settings, consent } => run_gate(&config, &settings, &consent),
        Command::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

async fn run_replay(
    config: &Config,
    events: &Path,
    consent: &[(String, bool)],
    settings_path: Option<&Path>,
    write_key: Option<String>,
    page_url: Option<&str>,
) -> Result<()> {
    let write_key = write_key
        .or_else(|| config.analytics.write_key.clone())
        .unwrap_or_else(|| "local".to_string());

    let cdn_settings = match settings_path {
        Some(path) => read_settings(path)?,
        None => {
            let client =
                CdnClient::new(config.analytics.cdn_url.as_deref(), config.analytics.timeout_secs)
                    .context("failed to create CDN client")?;
            client
                .fetch(&write_key)
                .await
                .context("failed to fetch CDN settings")?
        }
    };

    let analytics = Arc::new(Analytics::new(config.analytics.clone()));
    for (name, _) in cdn_settings.integrations.iter() {
        analytics.add_destination(name.clone(), |name, _descriptor| {
            Ok(Arc::new(ConsoleDestination::new(name)) as Arc<dyn Plugin>)
        });
    }
    analytics.on(Channel::Error, |emitted| {
        if let Emitted::Error(e) = emitted {
            eprintln!("error: {}", e.reason);
        }
    });

    if let Some(url) = page_url {
        let page = PageContext::from_location(url, None, "", "")
            .with_context(|| format!("invalid page URL '{}'", url))?;
        analytics
            .register(vec![Arc::new(PageEnrichment::new(Arc::new(page)))])
            .await
            .context("failed to register page enrichment")?;
    }

    if !consent.is_empty() {
        let categories = consent_value(consent);
        let mut options =
            CreateWrapperOptions::new().get_categories(Hook::from_fn(move || categories.clone()));
        if let Some(mappings) = &config.consent.integration_category_mappings {
            options = options.integration_category_mappings(mappings.clone());
        }
        create_wrapper(options)
            .wrap(&analytics)
            .context("failed to install consent wrapper")?;
    }

    analytics
        .load(
            LoadSettings::new(write_key).with_cdn_settings(cdn_settings),
            InitOptions::default(),
        )
        .await
        .context("failed to load destinations")?;

    eprintln!("Destinations: {}", analytics.plugin_names().join(", "));

    let content = std::fs::read_to_string(events)
        .with_context(|| format!("failed to read events file {}", events.display()))?;

    let mut summary = ReplaySummary::default();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed = match ReplayLine::parse(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("line {}: invalid event: {}", index + 1, e);
                summary.rejected += 1;
                continue;
            }
        };
        match parsed.dispatch(&analytics).await {
            Ok(ctx) => summary.record(&ctx),
            Err(e) => {
                eprintln!("line {}: {}", index + 1, e);
                summary.rejected += 1;
            }
        }
    }

    tracing::info!(
        delivered = summary.delivered,
        failed = summary.failed,
        halted = summary.halted,
        rejected = summary.rejected,
        "Replay complete"
    );
    eprintln!(
        "Replayed {} event(s): {} delivered, {} failed, {} halted, {} rejected",
        summary.total(),
        summary.delivered,
        summary.failed,
        summary.halted,
        summary.rejected
    );

    if summary.failed > 0 {
        bail!("{} event(s) failed delivery", summary.failed);
    }
    Ok(())
}

fn run_gate(config: &Config, settings_path: &Path, consent: &[(String, bool)]) -> Result<()> {
    let settings = read_settings(settings_path)?;
    let categories = if consent.is_empty() {
        Categories::new()
    } else {
        validate_categories(&consent_value(consent)).context("invalid consent state")?
    };

    let integrations = build_integrations(
        &settings.integrations,
        &categories,
        config.consent.integration_category_mappings.as_ref(),
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&integrations).context("failed to render integrations")?
    );
    Ok(())
}

fn print_config(config: &Config) {
    println!("Config file: {}", Config::config_path().display());
    println!("Log file:    {}", Config::log_path().display());
    println!();
    println!("[analytics]");
    println!(
        "write_key    = {}",
        config.analytics.write_key.as_deref().unwrap_or("(unset)")
    );
    println!(
        "cdn_url      = {}",
        config
            .analytics
            .cdn_url
            .as_deref()
            .unwrap_or(beacon_core::settings::DEFAULT_CDN_URL)
    );
    println!("max_attempts = {}", config.analytics.max_attempts);
    println!("timeout_secs = {}", config.analytics.timeout_secs);
    println!();
    println!("[consent]");
    match &config.consent.integration_category_mappings {
        Some(mappings) => {
            for (integration, categories) in mappings {
                println!("{} = {:?}", integration, categories);
            }
        }
        None => println!("(no integration category mappings)"),
    }
    println!();
    println!("[logging]");
    println!("level     = {}", config.logging.level);
    println!("max_files = {}", config.logging.max_files);
}
