mod config;
mod display;
mod logging;
mod reconcile;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Args, Config};
use display::{DisplaySink, LogSink, TerminalSink};
use reconcile::{Director, LoopContext, Reconciler};
use stagehand_core::room_list::load_room_list;
use stagehand_obs::ControlSession;
use stagehand_ranking::HttpRankingSource;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args(Args::parse()).context("invalid configuration")?;
    let _log_guard = logging::init_logging(&config);

    let targets = load_room_list(&config.rooms_file).context("cannot start without rooms")?;
    info!(
        "director_start: rooms={} api={} obs={} monitor_only={}",
        targets.len(),
        config.api_url,
        config.session.url,
        config.monitor_only
    );

    let source = HttpRankingSource::new(config.api_url.clone(), config.fetch_timeout)
        .context("failed to build http client")?;
    let reconciler = if config.monitor_only {
        None
    } else {
        Some(Reconciler::new(
            ControlSession::new(config.session.clone()),
            &config.grid,
        ))
    };
    let ctx = LoopContext {
        source,
        targets,
        grid: config.grid.clone(),
        interval: config.interval,
    };
    let mut director = Director::new(ctx, reconciler);

    let mut sink: Box<dyn DisplaySink> = if config.headless {
        Box::new(LogSink)
    } else {
        match TerminalSink::enter() {
            Ok(sink) => Box::new(sink),
            Err(err) => {
                warn!("terminal_unavailable: {err}; falling back to log output");
                Box::new(LogSink)
            }
        }
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("signal_error: {err}");
            std::future::pending::<()>().await;
        }
    };
    director.run(sink.as_mut(), shutdown).await;

    director.shutdown().await;
    sink.restore();
    info!("director_stop");
    Ok(())
}
