pub mod aggregator;
pub mod observable;
pub mod shutdown;

pub use aggregator::CandleAggregator;
pub use observable::{PriceObservable, SubscriptionId, Subscribers};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
