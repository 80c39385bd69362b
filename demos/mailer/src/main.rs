use anyhow::Context;
use clap::Parser;
use courier::Dispatcher;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod args;
mod deliver;
mod intake;
mod queue;

use args::{Args, LogFormat};
use deliver::LogDeliverer;
use intake::SendRequest;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().with_target(false).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.dispatcher_config();
    let queue = queue::build_queue(&args).await?;
    let deliverer = LogDeliverer::new().context("Failed to create delivery client")?;
    let mut dispatcher = Dispatcher::from_config(queue, deliverer, &config);
    dispatcher.start(config.workers)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c");
                break;
            }
        };
        let Some(line) = line else {
            tracing::info!("Reached end of input, delivering until ctrl-c");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<SendRequest>(&line) {
            Ok(request) => {
                let queued = intake::queue_jobs(&dispatcher, request).await;
                tracing::info!(
                    submitted = queued.submitted,
                    failed = queued.failed.len(),
                    "Queued {} jobs",
                    queued.submitted,
                );
            }
            Err(error) => tracing::warn!(%error, "Ignoring invalid send request: {error}"),
        }
    }

    tracing::info!("Shutting down");
    dispatcher.graceful_shutdown().await?;
    Ok(())
}
