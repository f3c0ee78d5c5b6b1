use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use common::{round_half_up, Broker, Error, Pricing, Result, TradeDetails};

/// Lifecycle of the exit rules for one open trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitState {
    Open,
    BreakEvenArmed,
    /// Terminal: a close instruction was accepted by the broker.
    Closed,
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitState::Open => write!(f, "open"),
            ExitState::BreakEvenArmed => write!(f, "break-even-armed"),
            ExitState::Closed => write!(f, "closed"),
        }
    }
}

/// Broker instruction issued by an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    MoveStopLoss { price: Decimal },
    ClosePosition { fraction: Decimal },
}

/// Outcome of evaluating one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The broker reports no open trade.
    NoOpenTrade,
    Unchanged(ExitState),
    /// `from == to` after a close at an intermediate target.
    Transition {
        from: ExitState,
        to: ExitState,
        /// At most one instruction per evaluation; `None` when the broker
        /// already reflects the new state.
        instruction: Option<Instruction>,
    },
}

/// Exit rules bound to a broker, invoked once per accepted price tick.
#[async_trait]
pub trait ExitStrategy: Send {
    fn name(&self) -> &str;

    /// State of the tracked trade, if any.
    fn state(&self) -> Option<ExitState>;

    async fn evaluate(&mut self, tick: &Pricing) -> Result<Evaluation>;
}

/// Distances and sizing for the break-even / close rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitConfig {
    /// Favourable move after which the stop-loss is moved to the open price.
    /// `None` disables break-even.
    pub break_even_distance: Option<Decimal>,
    /// Close targets, nearest first. Each one closes `close_fraction` of the
    /// remaining units; the last one ends management of the trade.
    pub target_distances: Vec<Decimal>,
    /// Share of the current units closed at each target.
    pub close_fraction: Decimal,
    /// Fractional digits for derived prices.
    pub scale: u32,
}

impl ExitConfig {
    pub const DEFAULT_SCALE: u32 = 5;

    pub fn new(
        break_even_distance: Option<Decimal>,
        target_distances: Vec<Decimal>,
        close_fraction: Decimal,
        scale: u32,
    ) -> Result<Self> {
        if let Some(d) = break_even_distance {
            if d <= Decimal::ZERO {
                return Err(Error::InvalidArgument(format!(
                    "break-even distance must be positive, got {d}"
                )));
            }
        }
        if target_distances.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one target distance is required".into(),
            ));
        }
        if let Some(d) = target_distances.iter().find(|d| **d <= Decimal::ZERO) {
            return Err(Error::InvalidArgument(format!(
                "target distances must be positive, got {d}"
            )));
        }
        if target_distances.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::InvalidArgument(format!(
                "target distances must be strictly increasing, got {target_distances:?}"
            )));
        }
        if close_fraction <= Decimal::ZERO || close_fraction > Decimal::ONE {
            return Err(Error::InvalidArgument(format!(
                "close fraction must be in (0, 1], got {close_fraction}"
            )));
        }
        Ok(Self {
            break_even_distance,
            target_distances,
            close_fraction,
            scale,
        })
    }

    /// Distance of the target after `hit` targets have been closed.
    pub fn target_distance(&self, hit: usize) -> Option<Decimal> {
        self.target_distances.get(hit).copied()
    }

    fn is_last_target(&self, hit: usize) -> bool {
        hit + 1 >= self.target_distances.len()
    }
}

/// Price `distance` away from the open price in the trade's favour:
/// above for longs, below for shorts.
pub fn target_price(trade: &TradeDetails, distance: Decimal, scale: u32) -> Result<Decimal> {
    let raw = if trade.is_short() {
        trade.open_price.checked_sub(distance)
    } else {
        trade.open_price.checked_add(distance)
    };
    raw.map(|price| round_half_up(price, scale)).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "target {distance} away from {} is out of range",
            trade.open_price
        ))
    })
}

/// True when `current` already protects at least as much as `stop`.
fn stop_at_or_beyond(trade: &TradeDetails, current: Option<Decimal>, stop: Decimal) -> bool {
    match current {
        None => false,
        Some(current) if trade.is_short() => current <= stop,
        Some(current) => current >= stop,
    }
}

/// True once the executable side of the quote has reached `target`.
///
/// Shorts are bought back at the ask, so they need `target >= ask`; longs
/// sell at the bid and need `target <= bid`.
pub fn target_reached(trade: &TradeDetails, tick: &Pricing, target: Decimal) -> bool {
    if trade.is_short() {
        target >= tick.ask
    } else {
        target <= tick.bid
    }
}

struct TrackedTrade {
    id: String,
    state: ExitState,
    /// Targets already closed at.
    targets_hit: usize,
}

/// Break-even relocation followed by closes at each configured target.
///
/// Tracks the broker's first open trade; a trade with a new id starts over
/// in [`ExitState::Open`].
pub struct ExitStrategyEngine {
    name: String,
    broker: Arc<dyn Broker>,
    config: ExitConfig,
    tracked: Option<TrackedTrade>,
}

impl ExitStrategyEngine {
    pub fn new(name: impl Into<String>, broker: Arc<dyn Broker>, config: ExitConfig) -> Self {
        Self {
            name: name.into(),
            broker,
            config,
            tracked: None,
        }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    fn track(&mut self, trade: &TradeDetails) -> (ExitState, usize) {
        match &self.tracked {
            Some(t) if t.id == trade.id => (t.state, t.targets_hit),
            _ => {
                info!(
                    strategy = %self.name,
                    trade = %trade.id,
                    units = trade.current_units,
                    open_price = %trade.open_price,
                    "Tracking trade"
                );
                self.tracked = Some(TrackedTrade {
                    id: trade.id.clone(),
                    state: ExitState::Open,
                    targets_hit: 0,
                });
                (ExitState::Open, 0)
            }
        }
    }

    fn advance(&mut self, to: ExitState) {
        if let Some(t) = self.tracked.as_mut() {
            t.state = to;
        }
    }

    async fn close(
        &mut self,
        trade: &TradeDetails,
        from: ExitState,
        targets_hit: usize,
    ) -> Result<Evaluation> {
        let fraction = self.config.close_fraction;
        if let Err(e) = self.broker.close_position(trade, fraction).await {
            warn!(strategy = %self.name, trade = %trade.id, error = %e, "Close instruction failed");
            return Err(e);
        }
        let to = if fraction == Decimal::ONE || self.config.is_last_target(targets_hit) {
            ExitState::Closed
        } else {
            from
        };
        info!(
            strategy = %self.name,
            trade = %trade.id,
            target = targets_hit + 1,
            %fraction,
            %to,
            "Position close issued"
        );
        if let Some(t) = self.tracked.as_mut() {
            t.state = to;
            t.targets_hit = targets_hit + 1;
        }
        Ok(Evaluation::Transition {
            from,
            to,
            instruction: Some(Instruction::ClosePosition { fraction }),
        })
    }

    async fn arm_break_even(&mut self, trade: &TradeDetails) -> Result<Evaluation> {
        let stop = round_half_up(trade.open_price, self.config.scale);
        let instruction = if stop_at_or_beyond(trade, trade.stop_loss_price, stop) {
            debug!(
                strategy = %self.name,
                trade = %trade.id,
                current = ?trade.stop_loss_price,
                "Stop-loss already at or past break-even"
            );
            None
        } else {
            if let Err(e) = self.broker.modify_stop_loss(trade, stop).await {
                warn!(strategy = %self.name, trade = %trade.id, error = %e, "Break-even instruction failed");
                return Err(e);
            }
            info!(strategy = %self.name, trade = %trade.id, %stop, "Stop-loss moved to break-even");
            Some(Instruction::MoveStopLoss { price: stop })
        };
        self.advance(ExitState::BreakEvenArmed);
        Ok(Evaluation::Transition {
            from: ExitState::Open,
            to: ExitState::BreakEvenArmed,
            instruction,
        })
    }
}

#[async_trait]
impl ExitStrategy for ExitStrategyEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> Option<ExitState> {
        self.tracked.as_ref().map(|t| t.state)
    }

    async fn evaluate(&mut self, tick: &Pricing) -> Result<Evaluation> {
        let trade = self.broker.trade_details(0).await?;
        if !trade.is_open() {
            if let Some(done) = self.tracked.take() {
                info!(strategy = %self.name, trade = %done.id, "Trade no longer open");
            }
            return Ok(Evaluation::NoOpenTrade);
        }

        let (state, targets_hit) = self.track(&trade);
        if state == ExitState::Closed {
            return Ok(Evaluation::Unchanged(state));
        }

        if let Some(distance) = self.config.target_distance(targets_hit) {
            let close_target = target_price(&trade, distance, self.config.scale)?;
            if target_reached(&trade, tick, close_target) {
                return self.close(&trade, state, targets_hit).await;
            }
        }

        if state == ExitState::Open {
            if let Some(distance) = self.config.break_even_distance {
                let be_target = target_price(&trade, distance, self.config.scale)?;
                if target_reached(&trade, tick, be_target) {
                    return self.arm_break_even(&trade).await;
                }
            }
        }

        Ok(Evaluation::Unchanged(state))
    }
}

impl std::fmt::Debug for ExitStrategyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitStrategyEngine")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
