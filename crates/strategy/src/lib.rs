pub mod config;
pub mod engine;
pub mod entry;
pub mod indicators;
pub mod registry;
pub mod runner;

pub use config::{EntryConfig, ExitStrategyConfig, IndicatorConfig, Params, StrategyFileConfig};
pub use engine::{IndicatorEngine, IndicatorHandle};
pub use entry::{EntryStrategy, MaCrossover, RsiEntry};
pub use indicators::{Indicator, IndicatorKind, IndicatorValue, MovingAverage, Rsi};
pub use registry::{EntryContext, ExitContext, Strategies, StrategyRegistry};
pub use runner::EntryRunner;
