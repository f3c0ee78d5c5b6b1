use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use common::{PriceObserver, Pricing, Result};

use crate::exit::{Evaluation, ExitStrategy};

/// Adapts an [`ExitStrategy`] to the price feed.
///
/// Ticks are evaluated one at a time; a slow broker call delays the next
/// evaluation instead of racing it.
pub struct ExitRunner {
    name: String,
    strategy: Mutex<Box<dyn ExitStrategy>>,
}

impl ExitRunner {
    pub fn new(strategy: Box<dyn ExitStrategy>) -> Self {
        Self {
            name: strategy.name().to_string(),
            strategy: Mutex::new(strategy),
        }
    }

    pub async fn evaluate(&self, tick: &Pricing) -> Result<Evaluation> {
        let mut strategy = self.strategy.lock().await;
        let evaluation = strategy.evaluate(tick).await?;
        match &evaluation {
            Evaluation::Transition {
                from,
                to,
                instruction,
            } => info!(
                strategy = %self.name,
                %from,
                %to,
                ?instruction,
                "Exit transition"
            ),
            other => debug!(strategy = %self.name, evaluation = ?other, "Exit evaluated"),
        }
        Ok(evaluation)
    }
}

#[async_trait]
impl PriceObserver for ExitRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_tick(&self, tick: &Pricing) -> Result<()> {
        self.evaluate(tick).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::{ExitConfig, ExitState, ExitStrategyEngine};
    use chrono::Utc;
    use common::{Broker, TradeDetails};
    use paper::PaperBroker;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn runner() -> (ExitRunner, Arc<PaperBroker>) {
        let broker = Arc::new(PaperBroker::new("EUR_USD"));
        broker
            .set_trade(Some(
                TradeDetails::new("1", "EUR_USD", 1_000, dec!(1.10000), None).unwrap(),
            ))
            .await;
        let config = ExitConfig::new(None, vec![dec!(0.00540)], Decimal::ONE, 5).unwrap();
        let engine = ExitStrategyEngine::new("full_close", broker.clone(), config);
        (ExitRunner::new(Box::new(engine)), broker)
    }

    #[tokio::test]
    async fn on_tick_drives_the_strategy() {
        let (runner, broker) = runner().await;
        assert_eq!(runner.name(), "full_close");

        let tick = Pricing::new(dec!(1.10560), dec!(1.10550), Utc::now(), true).unwrap();
        runner.on_tick(&tick).await.unwrap();

        assert!(!broker.trade_details(0).await.unwrap().is_open());
        assert_eq!(broker.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn broker_errors_surface_to_the_feed() {
        let (runner, broker) = runner().await;
        broker.set_unavailable(true).await;

        let tick = Pricing::new(dec!(1.10560), dec!(1.10550), Utc::now(), true).unwrap();
        let err = runner.on_tick(&tick).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn evaluate_reports_the_transition() {
        let (runner, _broker) = runner().await;
        let tick = Pricing::new(dec!(1.10560), dec!(1.10550), Utc::now(), true).unwrap();
        let eval = runner.evaluate(&tick).await.unwrap();
        assert!(matches!(
            eval,
            Evaluation::Transition {
                to: ExitState::Closed,
                ..
            }
        ));
    }
}
