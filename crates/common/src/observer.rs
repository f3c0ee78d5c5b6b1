use async_trait::async_trait;

use crate::{Pricing, Result};

/// Receives every accepted price tick from a price observable.
#[async_trait]
pub trait PriceObserver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn on_tick(&self, tick: &Pricing) -> Result<()>;
}
