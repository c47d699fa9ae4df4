use std::process;

use serde::Serialize;
use tiercache::{
    cache::{CacheConfig, CacheManager},
    config,
    infra::{error::InfraError, telemetry},
};
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let command = cli_args.command.unwrap_or(config::Command::Run);
    let cache = CacheManager::new(
        CacheConfig::from(&settings.cache),
        settings.resources.clone(),
    );

    if settings.cache.durable_tier.enabled && !cache.init().await {
        warn!(
            path = %settings.cache.durable_tier.path.display(),
            "Durable tier unavailable; durable entries will be neither read nor written"
        );
    }

    let result = match command {
        config::Command::Run => run_maintenance(&cache).await,
        config::Command::Stats => print_json(&cache.stats().await),
        config::Command::Cleanup => print_json(&cache.cleanup().await),
        config::Command::Clear => print_json(&cache.invalidate_all().await),
        config::Command::Invalidate(args) => {
            print_json(&cache.invalidate_resource(args.resource).await)
        }
    };

    cache.close().await;
    result
}

async fn run_maintenance(cache: &CacheManager) -> Result<(), InfraError> {
    let resources = cache.resources();
    if resources.is_empty() {
        warn!("No cacheable resources configured; every write will be dropped");
    }
    for (resource, policy) in resources.iter() {
        info!(
            resource = %resource,
            ttl_secs = policy.ttl.as_secs(),
            tier = policy.tier.as_str(),
            "Cache policy"
        );
    }

    let handle = cache.spawn_maintenance();
    info!(
        resources = resources.len(),
        "tiercache running; press Ctrl-C to stop"
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown().await;

    let report = cache.cleanup().await;
    info!(
        fast_purged = report.fast_purged,
        durable_purged = report.durable_purged,
        "Final sweep complete"
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), InfraError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
