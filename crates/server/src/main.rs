mod cli;

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use grantflow_core::{Config, Trigger};
use grantflow_ingest::CaptureRequest;
use grantflow_server::{background, build_router, db, open_profiles, AppState};

use cli::{Cli, Commands, ProfilesCommand};

fn load_config() -> Config {
    grantflow_core::config::load_dotenv();
    Config::from_env()
}

/// Stores, profiles and delivery wired from the configuration.
async fn build_state(config: Config, watch_profiles: bool) -> anyhow::Result<AppState> {
    let (grants, log) = db::open_stores(&config.postgres).await;
    let profiles = open_profiles(&config, watch_profiles)
        .with_context(|| format!("loading filter profiles from {}", config.filters.profiles_path.display()))?;
    Ok(AppState::from_config(config, grants, log, Arc::new(profiles)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.log_summary();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(build_state(config, true).await?);

    background::spawn_sweep_loop(Arc::clone(&state));
    background::spawn_capture_schedules(Arc::clone(&state));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn profiles(config: Config, action: ProfilesCommand) -> anyhow::Result<()> {
    let store = open_profiles(&config, false)?;
    match action {
        ProfilesCommand::Init => {
            let added = store.init_defaults()?;
            println!("added {added} profile(s) to {}", store.path().display());
        }
        ProfilesCommand::List => {
            for profile in store.list() {
                println!(
                    "{:<20} rules={:<3} min_score={:.2}  {}",
                    profile.name,
                    profile.rules.len(),
                    profile.min_score,
                    profile.description
                );
            }
        }
        ProfilesCommand::Show { name } => match store.get(&name) {
            Some(profile) => print_json(&profile)?,
            None => bail!("profile '{name}' not found"),
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let mut config = load_config();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { host: None, port: None }) {
        Commands::Serve { host, port } => serve(config, host, port).await?,
        Commands::Capture {
            source,
            from,
            to,
            lookback_days,
            max_results,
            max_pages,
            profiles,
            no_forward,
        } => {
            if no_forward {
                config.delivery.auto_forward = false;
            }
            let state = build_state(config, false).await?;
            let request = CaptureRequest { from, to, lookback_days, max_results, max_pages, profiles };
            let outcome = state.capture(source, &request).await?;
            print_json(&outcome)?;
        }
        Commands::Sweep { limit } => {
            let limit = limit.unwrap_or(config.delivery.sweep_limit);
            let state = build_state(config, false).await?;
            let Some(delivery) = &state.delivery else {
                bail!("webhook delivery is not configured (set WEBHOOK_URL)");
            };
            print_json(&delivery.sweep(Utc::now(), limit).await)?;
        }
        Commands::Profiles { action } => profiles(config, action)?,
        Commands::Deliver { grant_id, force } => {
            let state = build_state(config, false).await?;
            let Some(delivery) = &state.delivery else {
                bail!("webhook delivery is not configured (set WEBHOOK_URL)");
            };
            let outcome = if force {
                delivery.resend(&grant_id, true).await
            } else {
                delivery.deliver(&grant_id, Trigger::Manual).await
            };
            print_json(&outcome)?;
            if outcome.is_failure() {
                bail!("delivery of {grant_id} failed");
            }
        }
        Commands::Config => print_json(&config.redacted_summary())?,
    }

    Ok(())
}
