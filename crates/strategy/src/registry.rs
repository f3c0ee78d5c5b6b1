use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use common::{Broker, CandlestickSeries, Error, Result};
use risk::{ExitConfig, ExitStrategy, ExitStrategyEngine};
use rust_decimal::Decimal;

use crate::config::{EntryConfig, ExitStrategyConfig, IndicatorConfig, Params, StrategyFileConfig};
use crate::engine::{IndicatorEngine, IndicatorHandle};
use crate::entry::{EntryStrategy, MaCrossover, RsiEntry};
use crate::indicators::{Indicator, MovingAverage, Rsi};

/// What entry builders may resolve against.
pub struct EntryContext<'a> {
    pub instrument: &'a str,
    pub engine: &'a IndicatorEngine,
}

impl EntryContext<'_> {
    /// Handle of the indicator named by parameter `key`.
    pub fn indicator(&self, params: &Params, key: &str) -> Result<IndicatorHandle> {
        let name = params.str(key)?;
        self.engine.handle(name).ok_or_else(|| Error::UnknownStrategy {
            kind: "indicator",
            name: name.to_string(),
        })
    }
}

/// What exit builders receive besides their config.
pub struct ExitContext {
    pub broker: Arc<dyn Broker>,
    pub scale: u32,
}

pub type IndicatorBuilder = fn(&Params) -> Result<Box<dyn Indicator>>;
pub type EntryBuilder = fn(&EntryConfig, &EntryContext<'_>) -> Result<Box<dyn EntryStrategy>>;
pub type ExitBuilder = fn(&ExitStrategyConfig, ExitContext) -> Result<Box<dyn ExitStrategy>>;

/// Everything built from one strategy file.
pub struct Strategies {
    pub indicators: Arc<IndicatorEngine>,
    pub entries: Vec<Box<dyn EntryStrategy>>,
    pub exit: Option<Box<dyn ExitStrategy>>,
}

/// Maps type names from the strategy file to constructors.
#[derive(Default)]
pub struct StrategyRegistry {
    indicators: HashMap<String, IndicatorBuilder>,
    entries: HashMap<String, EntryBuilder>,
    exits: HashMap<String, ExitBuilder>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_indicator("sma", build_sma);
        registry.register_indicator("wma", build_wma);
        registry.register_indicator("rsi", build_rsi);
        registry.register_entry("rsi", build_rsi_entry);
        registry.register_entry("ma_crossover", build_ma_crossover);
        registry.register_exit("break_even_close", build_break_even_close);
        registry.register_exit("full_close", build_full_close);
        registry.register_exit("partial_close", build_partial_close);
        registry
    }

    pub fn register_indicator(&mut self, name: impl Into<String>, builder: IndicatorBuilder) {
        self.indicators.insert(name.into(), builder);
    }

    pub fn register_entry(&mut self, name: impl Into<String>, builder: EntryBuilder) {
        self.entries.insert(name.into(), builder);
    }

    pub fn register_exit(&mut self, name: impl Into<String>, builder: ExitBuilder) {
        self.exits.insert(name.into(), builder);
    }

    pub fn build_indicator(&self, cfg: &IndicatorConfig) -> Result<Box<dyn Indicator>> {
        let builder = self
            .indicators
            .get(&cfg.indicator_type)
            .ok_or_else(|| Error::UnknownStrategy {
                kind: "indicator",
                name: cfg.indicator_type.clone(),
            })?;
        builder(&cfg.params)
    }

    pub fn build_entry(
        &self,
        cfg: &EntryConfig,
        ctx: &EntryContext<'_>,
    ) -> Result<Box<dyn EntryStrategy>> {
        let builder = self
            .entries
            .get(&cfg.strategy_type)
            .ok_or_else(|| Error::UnknownStrategy {
                kind: "entry",
                name: cfg.strategy_type.clone(),
            })?;
        builder(cfg, ctx)
    }

    pub fn build_exit(
        &self,
        cfg: &ExitStrategyConfig,
        ctx: ExitContext,
    ) -> Result<Box<dyn ExitStrategy>> {
        let builder = self
            .exits
            .get(&cfg.strategy_type)
            .ok_or_else(|| Error::UnknownStrategy {
                kind: "exit",
                name: cfg.strategy_type.clone(),
            })?;
        builder(cfg, ctx)
    }

    /// Build indicators over `series`, then entries against them, then the
    /// exit strategy bound to `broker`.
    pub fn build(
        &self,
        file: &StrategyFileConfig,
        instrument: &str,
        series: CandlestickSeries,
        broker: Arc<dyn Broker>,
        scale: u32,
    ) -> Result<Strategies> {
        let mut engine = IndicatorEngine::new(series, scale);
        for cfg in &file.indicators {
            let indicator = self.build_indicator(cfg)?;
            engine.register(cfg.name.clone(), indicator)?;
        }

        let ctx = EntryContext {
            instrument,
            engine: &engine,
        };
        let mut entries = Vec::with_capacity(file.entries.len());
        for cfg in &file.entries {
            let entry = self.build_entry(cfg, &ctx)?;
            info!(name = %entry.name(), instrument = %entry.instrument(), "Registered entry strategy");
            entries.push(entry);
        }

        let exit = match &file.exit {
            Some(cfg) => {
                let exit = self.build_exit(cfg, ExitContext { broker, scale })?;
                info!(name = %exit.name(), "Registered exit strategy");
                Some(exit)
            }
            None => None,
        };

        Ok(Strategies {
            indicators: Arc::new(engine),
            entries,
            exit,
        })
    }
}

// ─── Builders ─────────────────────────────────────────────────────────────────

fn build_sma(params: &Params) -> Result<Box<dyn Indicator>> {
    Ok(Box::new(MovingAverage::simple(
        params.usize("period")?,
        params.source()?,
    )?))
}

fn build_wma(params: &Params) -> Result<Box<dyn Indicator>> {
    Ok(Box::new(MovingAverage::weighted(
        params.usize("period")?,
        params.source()?,
    )?))
}

fn build_rsi(params: &Params) -> Result<Box<dyn Indicator>> {
    Ok(Box::new(Rsi::new(params.usize("period")?, params.source()?)?))
}

fn build_rsi_entry(cfg: &EntryConfig, ctx: &EntryContext<'_>) -> Result<Box<dyn EntryStrategy>> {
    let oversold = params_decimal_or(&cfg.params, "oversold", Decimal::from(30))?;
    let overbought = params_decimal_or(&cfg.params, "overbought", Decimal::from(70))?;
    Ok(Box::new(RsiEntry::new(
        cfg.name.clone(),
        ctx.instrument,
        cfg.units,
        ctx.indicator(&cfg.params, "indicator")?,
        oversold,
        overbought,
    )?))
}

fn build_ma_crossover(
    cfg: &EntryConfig,
    ctx: &EntryContext<'_>,
) -> Result<Box<dyn EntryStrategy>> {
    Ok(Box::new(MaCrossover::new(
        cfg.name.clone(),
        ctx.instrument,
        cfg.units,
        ctx.indicator(&cfg.params, "fast")?,
        ctx.indicator(&cfg.params, "slow")?,
    )?))
}

fn build_break_even_close(
    cfg: &ExitStrategyConfig,
    ctx: ExitContext,
) -> Result<Box<dyn ExitStrategy>> {
    let config = ExitConfig::new(
        Some(cfg.params.decimal("break_even_distance")?),
        cfg.params.decimals("target_distances")?,
        params_decimal_or(&cfg.params, "close_fraction", Decimal::ONE)?,
        ctx.scale,
    )?;
    Ok(Box::new(ExitStrategyEngine::new(cfg.name(), ctx.broker, config)))
}

fn build_full_close(cfg: &ExitStrategyConfig, ctx: ExitContext) -> Result<Box<dyn ExitStrategy>> {
    let config = ExitConfig::new(
        cfg.params.decimal_opt("break_even_distance")?,
        cfg.params.decimals("target_distances")?,
        Decimal::ONE,
        ctx.scale,
    )?;
    Ok(Box::new(ExitStrategyEngine::new(cfg.name(), ctx.broker, config)))
}

fn build_partial_close(
    cfg: &ExitStrategyConfig,
    ctx: ExitContext,
) -> Result<Box<dyn ExitStrategy>> {
    let config = ExitConfig::new(
        cfg.params.decimal_opt("break_even_distance")?,
        cfg.params.decimals("target_distances")?,
        cfg.params.decimal("close_fraction")?,
        ctx.scale,
    )?;
    Ok(Box::new(ExitStrategyEngine::new(cfg.name(), ctx.broker, config)))
}

fn params_decimal_or(params: &Params, key: &str, default: Decimal) -> Result<Decimal> {
    Ok(params.decimal_opt(key)?.unwrap_or(default))
}
