mod cli;

use crate::cli::{LogFormat, CLI};
use clap::Parser;
use shortmint_allocator::{AllocatorSettings, LockSettings, TokenRangeManager};
use shortmint_coordination::{Coordinator, RetryPolicy, ZooKeeperCoordination};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_format);

    info!(
        zk_server = config.zk_server.as_deref().unwrap_or("<none>"),
        window_size = config.window_size,
        count = config.count,
        "starting shortmint"
    );

    let coordinator = match &config.zk_server {
        Some(addr) => Coordinator::connected(ZooKeeperCoordination::connect(addr).await?),
        None => Coordinator::disabled(),
    };

    let retry = RetryPolicy::builder()
        .attempts(config.retry_attempts)
        .delay(Duration::from_millis(config.retry_delay_ms))
        .build();
    let acquire_timeout =
        (config.acquire_timeout_ms > 0).then(|| Duration::from_millis(config.acquire_timeout_ms));
    let settings = AllocatorSettings::builder()
        .window_size(config.window_size)
        .acquire_attempts(config.acquire_attempts)
        .retry(retry)
        .lock(
            LockSettings::builder()
                .acquire_timeout(acquire_timeout)
                .release_retry(retry)
                .build(),
        )
        .build();

    let manager = TokenRangeManager::new(coordinator, settings);
    manager.bootstrap().await?;

    for _ in 0..config.count {
        println!("{}", manager.next_code().await?);
    }

    let range = manager.range().await;
    info!(
        mode = %manager.mode(),
        current = range.current(),
        end = range.end(),
        "done"
    );
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
