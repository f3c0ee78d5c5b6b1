use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Fractional digits kept for median prices.
pub const MEDIAN_SCALE: u32 = 5;

/// Round half-up (away from zero at the midpoint) to `scale` fractional digits.
pub fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Duration covered by a single candlestick, using the broker's codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    S5,
    S10,
    S15,
    S30,
    M1,
    M2,
    M4,
    M5,
    M10,
    M15,
    M30,
    H1,
    H2,
    H3,
    H4,
    H6,
    H8,
    H12,
    D,
    W,
    /// Monthly candles; `seconds()` reports a nominal 30-day month.
    M,
}

impl Granularity {
    pub fn seconds(&self) -> u64 {
        use Granularity::*;
        match self {
            S5 => 5,
            S10 => 10,
            S15 => 15,
            S30 => 30,
            M1 => 60,
            M2 => 120,
            M4 => 240,
            M5 => 300,
            M10 => 600,
            M15 => 900,
            M30 => 1_800,
            H1 => 3_600,
            H2 => 7_200,
            H3 => 10_800,
            H4 => 14_400,
            H6 => 21_600,
            H8 => 28_800,
            H12 => 43_200,
            D => 86_400,
            W => 604_800,
            M => 2_592_000,
        }
    }

    pub fn code(&self) -> &'static str {
        use Granularity::*;
        match self {
            S5 => "S5",
            S10 => "S10",
            S15 => "S15",
            S30 => "S30",
            M1 => "M1",
            M2 => "M2",
            M4 => "M4",
            M5 => "M5",
            M10 => "M10",
            M15 => "M15",
            M30 => "M30",
            H1 => "H1",
            H2 => "H2",
            H3 => "H3",
            H4 => "H4",
            H6 => "H6",
            H8 => "H8",
            H12 => "H12",
            D => "D",
            W => "W",
            M => "M",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        use Granularity::*;
        let g = match s.trim().to_uppercase().as_str() {
            "S5" => S5,
            "S10" => S10,
            "S15" => S15,
            "S30" => S30,
            "M1" => M1,
            "M2" => M2,
            "M4" => M4,
            "M5" => M5,
            "M10" => M10,
            "M15" => M15,
            "M30" => M30,
            "H1" => H1,
            "H2" => H2,
            "H3" => H3,
            "H4" => H4,
            "H6" => H6,
            "H8" => H8,
            "H12" => H12,
            "D" => D,
            "W" => W,
            "M" => M,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown granularity '{other}'"
                )))
            }
        };
        Ok(g)
    }
}

/// Which price of a candle an indicator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Open,
    #[default]
    Close,
    High,
    Low,
    /// `(high + low) / 2`, rounded half-up to [`MEDIAN_SCALE`] digits.
    Median,
}

impl PriceSource {
    pub fn extract(&self, candle: &Candlestick) -> Decimal {
        match self {
            PriceSource::Open => candle.open,
            PriceSource::Close => candle.close,
            PriceSource::High => candle.high,
            PriceSource::Low => candle.low,
            PriceSource::Median => {
                // halve first when the sum would leave Decimal's range
                let mid = match candle.high.checked_add(candle.low) {
                    Some(sum) => sum / Decimal::TWO,
                    None => candle.high / Decimal::TWO + candle.low / Decimal::TWO,
                };
                round_half_up(mid, MEDIAN_SCALE)
            }
        }
    }
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceSource::Open => write!(f, "open"),
            PriceSource::Close => write!(f, "close"),
            PriceSource::High => write!(f, "high"),
            PriceSource::Low => write!(f, "low"),
            PriceSource::Median => write!(f, "median"),
        }
    }
}

impl FromStr for PriceSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(PriceSource::Open),
            "close" => Ok(PriceSource::Close),
            "high" => Ok(PriceSource::High),
            "low" => Ok(PriceSource::Low),
            "median" => Ok(PriceSource::Median),
            other => Err(Error::InvalidArgument(format!(
                "unknown price source '{other}'"
            ))),
        }
    }
}

/// A single OHLCV candle as reported by the broker.
///
/// Only constructible through [`Candlestick::new`] (or deserialization, which
/// goes through the same checks), so `low <= open, close <= high` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CandlestickRecord")]
pub struct Candlestick {
    granularity: Granularity,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
    timestamp: DateTime<Utc>,
    complete: bool,
}

#[derive(Deserialize)]
struct CandlestickRecord {
    granularity: Granularity,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
    timestamp: DateTime<Utc>,
    complete: bool,
}

impl TryFrom<CandlestickRecord> for Candlestick {
    type Error = Error;

    fn try_from(r: CandlestickRecord) -> Result<Self> {
        Candlestick::new(
            r.granularity,
            r.open,
            r.high,
            r.low,
            r.close,
            r.volume,
            r.timestamp,
            r.complete,
        )
    }
}

impl Candlestick {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        granularity: Granularity,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
        timestamp: DateTime<Utc>,
        complete: bool,
    ) -> Result<Self> {
        if low.is_sign_negative() {
            return Err(Error::InvalidArgument(format!(
                "candle at {timestamp} has negative low {low}"
            )));
        }
        if low > high {
            return Err(Error::InvalidArgument(format!(
                "candle at {timestamp} has low {low} above high {high}"
            )));
        }
        for (name, price) in [("open", open), ("close", close)] {
            if price < low || price > high {
                return Err(Error::InvalidArgument(format!(
                    "candle at {timestamp} has {name} {price} outside [{low}, {high}]"
                )));
            }
        }

        Ok(Self {
            granularity,
            open,
            high,
            low,
            close,
            volume,
            timestamp,
            complete,
        })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn timeframe_seconds(&self) -> u64 {
        self.granularity.seconds()
    }

    pub fn open(&self) -> Decimal {
        self.open
    }

    pub fn high(&self) -> Decimal {
        self.high
    }

    pub fn low(&self) -> Decimal {
        self.low
    }

    pub fn close(&self) -> Decimal {
        self.close
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Latest quote for an instrument.
///
/// Equality ignores `timestamp`: two quotes are the same when ask, bid and
/// tradability match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PricingRecord")]
pub struct Pricing {
    pub ask: Decimal,
    pub bid: Decimal,
    pub timestamp: DateTime<Utc>,
    /// False while the market is closed.
    pub tradable: bool,
}

impl Pricing {
    pub fn new(ask: Decimal, bid: Decimal, timestamp: DateTime<Utc>, tradable: bool) -> Result<Self> {
        if ask.is_sign_negative() || bid.is_sign_negative() {
            return Err(Error::InvalidArgument(format!(
                "negative quote ask={ask} bid={bid}"
            )));
        }
        Ok(Self {
            ask,
            bid,
            timestamp,
            tradable,
        })
    }
}

#[derive(Deserialize)]
struct PricingRecord {
    ask: Decimal,
    bid: Decimal,
    timestamp: DateTime<Utc>,
    tradable: bool,
}

impl TryFrom<PricingRecord> for Pricing {
    type Error = Error;

    fn try_from(r: PricingRecord) -> Result<Self> {
        Pricing::new(r.ask, r.bid, r.timestamp, r.tradable)
    }
}

impl PartialEq for Pricing {
    fn eq(&self, other: &Self) -> bool {
        self.ask == other.ask && self.bid == other.bid && self.tradable == other.tradable
    }
}

impl Eq for Pricing {}

/// Snapshot of the open trade as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TradeDetailsRecord")]
pub struct TradeDetails {
    pub id: String,
    pub instrument: String,
    /// Signed position size; negative for short trades, zero when flat.
    pub current_units: i64,
    pub open_price: Decimal,
    pub stop_loss_price: Option<Decimal>,
}

#[derive(Deserialize)]
struct TradeDetailsRecord {
    id: String,
    instrument: String,
    current_units: i64,
    open_price: Decimal,
    #[serde(default)]
    stop_loss_price: Option<Decimal>,
}

impl TryFrom<TradeDetailsRecord> for TradeDetails {
    type Error = Error;

    fn try_from(r: TradeDetailsRecord) -> Result<Self> {
        TradeDetails::new(
            r.id,
            r.instrument,
            r.current_units,
            r.open_price,
            r.stop_loss_price,
        )
    }
}

impl TradeDetails {
    pub fn new(
        id: impl Into<String>,
        instrument: impl Into<String>,
        current_units: i64,
        open_price: Decimal,
        stop_loss_price: Option<Decimal>,
    ) -> Result<Self> {
        let id = id.into();
        let instrument = instrument.into();
        if id.is_empty() {
            return Err(Error::InvalidArgument("trade id is empty".into()));
        }
        if instrument.is_empty() {
            return Err(Error::InvalidArgument("trade instrument is empty".into()));
        }
        if open_price.is_sign_negative() {
            return Err(Error::InvalidArgument(format!(
                "negative open price {open_price}"
            )));
        }
        if let Some(sl) = stop_loss_price {
            if sl.is_sign_negative() || sl.is_zero() {
                return Err(Error::InvalidArgument(format!(
                    "stop-loss price must be positive, got {sl}"
                )));
            }
        }
        Ok(Self {
            id,
            instrument,
            current_units,
            open_price,
            stop_loss_price,
        })
    }

    /// A flat trade has no units to manage.
    pub fn is_open(&self) -> bool {
        self.current_units != 0
    }

    pub fn is_short(&self) -> bool {
        self.current_units < 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    MarketIfTouched,
    TakeProfit,
    StopLoss,
    TrailingStopLoss,
    FixedPrice,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP",
            OrderType::MarketIfTouched => "MARKET_IF_TOUCHED",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::TrailingStopLoss => "TRAILING_STOP_LOSS",
            OrderType::FixedPrice => "FIXED_PRICE",
        };
        write!(f, "{s}")
    }
}

/// An instruction sent to the broker. Build one with [`Order::builder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: String,
    order_type: OrderType,
    instrument: String,
    units: i64,
    stop_loss_price: Option<Decimal>,
}

impl Order {
    pub fn builder() -> OrderBuilder {
        OrderBuilder::default()
    }

    /// A market order with a freshly generated id.
    pub fn market(instrument: impl Into<String>, units: i64) -> Result<Self> {
        Order::builder()
            .id(uuid::Uuid::new_v4().to_string())
            .order_type(OrderType::Market)
            .instrument(instrument)
            .units(units)
            .build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn stop_loss_price(&self) -> Option<Decimal> {
        self.stop_loss_price
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderBuilder {
    id: Option<String>,
    order_type: Option<OrderType>,
    instrument: Option<String>,
    units: Option<i64>,
    stop_loss_price: Option<Decimal>,
}

impl OrderBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = Some(order_type);
        self
    }

    pub fn instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    pub fn units(mut self, units: i64) -> Self {
        self.units = Some(units);
        self
    }

    pub fn stop_loss_price(mut self, price: Decimal) -> Self {
        self.stop_loss_price = Some(price);
        self
    }

    pub fn build(self) -> Result<Order> {
        let id = self
            .id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidArgument("order id is required".into()))?;
        let order_type = self
            .order_type
            .ok_or_else(|| Error::InvalidArgument("order type is required".into()))?;
        let instrument = self
            .instrument
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidArgument("order instrument is required".into()))?;
        let units = self
            .units
            .ok_or_else(|| Error::InvalidArgument("order units are required".into()))?;
        if units == 0 {
            return Err(Error::InvalidArgument("order units must be non-zero".into()));
        }
        if let Some(sl) = self.stop_loss_price {
            if sl.is_sign_negative() || sl.is_zero() {
                return Err(Error::InvalidArgument(format!(
                    "stop-loss price must be positive, got {sl}"
                )));
            }
        }

        Ok(Order {
            id,
            order_type,
            instrument,
            units,
            stop_loss_price: self.stop_loss_price,
        })
    }
}

/// Entry decision emitted by an entry strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy { instrument: String, units: i64 },
    Sell { instrument: String, units: i64 },
}

impl Signal {
    pub fn instrument(&self) -> &str {
        match self {
            Signal::Buy { instrument, .. } | Signal::Sell { instrument, .. } => instrument,
        }
    }

    pub fn units(&self) -> i64 {
        match self {
            Signal::Buy { units, .. } | Signal::Sell { units, .. } => *units,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy { instrument, units } => write!(f, "BUY {units} {instrument}"),
            Signal::Sell { instrument, units } => write!(f, "SELL {units} {instrument}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn candle_rejects_close_above_high() {
        let err = Candlestick::new(
            Granularity::M30,
            dec!(1.10000),
            dec!(1.10100),
            dec!(1.09900),
            dec!(1.10200),
            10,
            ts(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn candle_deserialization_enforces_bounds() {
        let json = r#"{
            "granularity": "M30",
            "open": "1.2", "high": "1.1", "low": "1.0", "close": "1.05",
            "volume": 3, "timestamp": "2024-03-01T12:00:00Z", "complete": true
        }"#;
        assert!(serde_json::from_str::<Candlestick>(json).is_err());
    }

    #[test]
    fn median_source_rounds_half_up() {
        let candle = Candlestick::new(
            Granularity::M30,
            dec!(1.00001),
            dec!(1.00002),
            dec!(1.00001),
            dec!(1.00001),
            1,
            ts(),
            true,
        )
        .unwrap();
        // (1.00002 + 1.00001) / 2 = 1.000015 -> 1.00002
        assert_eq!(PriceSource::Median.extract(&candle), dec!(1.00002));
    }

    #[test]
    fn median_source_near_decimal_max() {
        let huge = dec!(70000000000000000000000000000);
        let candle =
            Candlestick::new(Granularity::D, huge, huge, huge, huge, 1, ts(), true).unwrap();
        assert_eq!(PriceSource::Median.extract(&candle), huge);
    }

    #[test]
    fn quote_and_trade_deserialization_validate() {
        let negative_quote = r#"{ "ask": "-1.1", "bid": "1.0",
            "timestamp": "2024-03-01T12:00:00Z", "tradable": true }"#;
        assert!(serde_json::from_str::<Pricing>(negative_quote).is_err());

        let negative_open = r#"{ "id": "1", "instrument": "EUR_USD",
            "current_units": 10, "open_price": "-1.1" }"#;
        assert!(serde_json::from_str::<TradeDetails>(negative_open).is_err());

        let ok = r#"{ "id": "1", "instrument": "EUR_USD",
            "current_units": 10, "open_price": "1.1" }"#;
        let trade = serde_json::from_str::<TradeDetails>(ok).unwrap();
        assert_eq!(trade.stop_loss_price, None);
    }

    #[test]
    fn pricing_equality_ignores_timestamp() {
        let a = Pricing::new(dec!(1.10010), dec!(1.10000), ts(), true).unwrap();
        let mut b = a.clone();
        b.timestamp = ts() + chrono::Duration::seconds(5);
        assert_eq!(a, b);

        b.tradable = false;
        assert_ne!(a, b);
    }

    #[test]
    fn order_builder_requires_all_fields() {
        let missing_id = Order::builder()
            .order_type(OrderType::Market)
            .instrument("EUR_USD")
            .units(100)
            .build();
        assert!(matches!(missing_id, Err(Error::InvalidArgument(_))));

        let missing_units = Order::builder()
            .id("1")
            .order_type(OrderType::StopLoss)
            .instrument("EUR_USD")
            .build();
        assert!(matches!(missing_units, Err(Error::InvalidArgument(_))));

        let ok = Order::builder()
            .id("1")
            .order_type(OrderType::StopLoss)
            .instrument("EUR_USD")
            .units(-100)
            .stop_loss_price(dec!(1.10000))
            .build()
            .unwrap();
        assert_eq!(ok.order_type(), OrderType::StopLoss);
        assert_eq!(ok.stop_loss_price(), Some(dec!(1.10000)));
    }

    #[test]
    fn order_rejects_non_positive_stop() {
        let res = Order::builder()
            .id("1")
            .order_type(OrderType::StopLoss)
            .instrument("EUR_USD")
            .units(1)
            .stop_loss_price(dec!(-0.5))
            .build();
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn granularity_parses_codes() {
        assert_eq!("m30".parse::<Granularity>().unwrap(), Granularity::M30);
        assert_eq!(Granularity::H4.seconds(), 14_400);
        assert!("X9".parse::<Granularity>().is_err());
    }

    #[test]
    fn trade_direction() {
        let t = TradeDetails::new("7", "EUR_USD", -1000, dec!(1.1), None).unwrap();
        assert!(t.is_short());
        assert!(t.is_open());
    }
}
