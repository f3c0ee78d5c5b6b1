//! Exit management for open trades: break-even stop relocation and
//! target closes, driven by the price feed.

pub mod exit;
pub mod runner;

pub use exit::{
    target_price, target_reached, Evaluation, ExitConfig, ExitState, ExitStrategy,
    ExitStrategyEngine, Instruction,
};
pub use runner::ExitRunner;
