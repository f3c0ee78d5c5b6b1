use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Broker, CandlestickSeries, Config, Signal};
use feed::{shutdown_channel, CandleAggregator, PriceObservable};
use paper::{PaperBroker, Replay};
use risk::ExitRunner;
use strategy::{EntryRunner, StrategyFileConfig, StrategyRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("invalid environment configuration")?;
    info!(
        instrument = %cfg.instrument,
        granularity = %cfg.granularity,
        "pipwatch starting"
    );
    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)?;

    // ── Broker ────────────────────────────────────────────────────────────────
    let replay_path = cfg
        .replay_path
        .clone()
        .context("REPLAY_PATH must point at a replay file")?;
    let replay = Replay::load(&replay_path)
        .with_context(|| format!("failed to load replay from '{}'", replay_path.display()))?;
    let broker: Arc<dyn Broker> = Arc::new(PaperBroker::from_replay(cfg.instrument.clone(), replay));

    // ── Candles ───────────────────────────────────────────────────────────────
    let series = CandlestickSeries::new();
    let aggregator = CandleAggregator::from_config(broker.clone(), series.clone(), &cfg);
    let seeded = aggregator
        .seed(cfg.initial_candle_count)
        .await
        .context("failed to seed candle history")?;
    info!(candles = seeded, "Candle history seeded");

    // ── Strategies ────────────────────────────────────────────────────────────
    let strategies = StrategyRegistry::with_builtins().build(
        &strategy_file,
        &cfg.instrument,
        series,
        broker.clone(),
        cfg.price_scale,
    )?;

    // ── Price feed ────────────────────────────────────────────────────────────
    let (signal_tx, mut signal_rx) = mpsc::channel::<Signal>(128);
    let observable = PriceObservable::from_config(broker.clone(), &cfg)?;
    observable.subscribe(Arc::new(EntryRunner::new(
        strategies.indicators.clone(),
        strategies.entries,
        signal_tx,
    )));
    match strategies.exit {
        Some(exit) => {
            observable.subscribe(Arc::new(ExitRunner::new(exit)));
        }
        None => warn!("No exit strategy configured; open trades are not managed"),
    }

    // Orders are placed elsewhere; signals are only reported.
    let signals = tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            info!(%signal, "Signal received");
        }
    });

    // ── Spawn loops ───────────────────────────────────────────────────────────
    let (trigger, shutdown) = shutdown_channel();
    let candles = tokio::spawn(aggregator.run(shutdown.clone()));
    let prices = tokio::spawn(observable.run(shutdown));

    info!("All loops started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping loops.");
    trigger.trigger();

    candles.await?;
    prices.await?;
    signals.await?;
    info!("pipwatch stopped");
    Ok(())
}
