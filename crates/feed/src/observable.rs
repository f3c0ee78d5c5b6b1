use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use common::{Broker, Config, Error, PriceObserver, Pricing, Result};

use crate::Shutdown;

pub type SubscriptionId = u64;

type Entry = (SubscriptionId, Arc<dyn PriceObserver>);

#[derive(Default)]
struct SubscriberSet {
    next_id: AtomicU64,
    /// Copy-on-write: writers swap in a new list, the poll loop iterates
    /// whichever list was current when the cycle started.
    entries: RwLock<Arc<Vec<Entry>>>,
}

/// Cloneable handle for managing the observers of a [`PriceObservable`].
///
/// Safe to use while a notification cycle is in flight. A subscriber added
/// mid-cycle is first notified on the following cycle.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<SubscriberSet>,
}

impl Subscribers {
    pub fn subscribe(&self, observer: Arc<dyn PriceObserver>) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = observer.name().to_string();
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, observer));
        *entries = Arc::new(next);
        info!(id, observer = %name, "Observer subscribed");
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if !entries.iter().any(|(entry_id, _)| *entry_id == id) {
            return false;
        }
        let next: Vec<Entry> = entries
            .iter()
            .filter(|(entry_id, _)| *entry_id != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        info!(id, "Observer unsubscribed");
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Entry>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Polls the broker for the latest quote and notifies observers whenever a
/// tradable quote differs from the last one delivered.
pub struct PriceObservable {
    broker: Arc<dyn Broker>,
    instrument: String,
    interval: Duration,
    subscribers: Subscribers,
    last_accepted: Option<Pricing>,
}

impl PriceObservable {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1_000);

    /// Fails with `InvalidArgument` for a zero `interval`.
    pub fn new(
        broker: Arc<dyn Broker>,
        instrument: impl Into<String>,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::InvalidArgument(
                "price poll interval must be non-zero".into(),
            ));
        }
        Ok(Self {
            broker,
            instrument: instrument.into(),
            interval,
            subscribers: Subscribers::default(),
            last_accepted: None,
        })
    }

    pub fn from_config(broker: Arc<dyn Broker>, cfg: &Config) -> Result<Self> {
        Self::new(broker, cfg.instrument.clone(), cfg.price_poll_interval)
    }

    /// Handle for subscribing while the loop runs.
    pub fn subscribers(&self) -> Subscribers {
        self.subscribers.clone()
    }

    pub fn subscribe(&self, observer: Arc<dyn PriceObserver>) -> SubscriptionId {
        self.subscribers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn last_accepted(&self) -> Option<&Pricing> {
        self.last_accepted.as_ref()
    }

    /// Poll once. Returns the tick if it was accepted and delivered.
    pub async fn poll_once(&mut self) -> Result<Option<Pricing>> {
        let tick = self.broker.price(&self.instrument).await?;

        if !tick.tradable {
            debug!(instrument = %self.instrument, "Quote not tradable, skipped");
            return Ok(None);
        }
        if self.last_accepted.as_ref() == Some(&tick) {
            return Ok(None);
        }

        self.last_accepted = Some(tick.clone());
        self.notify(&tick).await;
        Ok(Some(tick))
    }

    async fn notify(&self, tick: &Pricing) {
        let entries = self.subscribers.snapshot();
        debug!(
            instrument = %self.instrument,
            ask = %tick.ask,
            bid = %tick.bid,
            observers = entries.len(),
            "Price changed"
        );
        for (id, observer) in entries.iter() {
            if let Err(e) = observer.on_tick(tick).await {
                warn!(id, observer = %observer.name(), error = %e, "Observer failed on tick");
            }
        }
    }

    /// Run the polling loop until shutdown. Call from `tokio::spawn`.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(
            instrument = %self.instrument,
            interval_ms = self.interval.as_millis() as u64,
            "PriceObservable running"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_once().await {
                if e.is_transient() {
                    warn!(instrument = %self.instrument, error = %e, "Price poll failed");
                } else {
                    error!(instrument = %self.instrument, error = %e, "Price poll failed");
                }
            }
        }

        info!(instrument = %self.instrument, "PriceObservable stopped");
    }
}
