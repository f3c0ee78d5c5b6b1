use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{Broker, Candlestick, CandlestickSeries, Error, Granularity};
use paper::PaperBroker;
use strategy::{StrategyFileConfig, StrategyRegistry};

const CLOSES: [Decimal; 20] = [
    dec!(1.10000), dec!(1.10120), dec!(1.10080), dec!(1.10210), dec!(1.10190),
    dec!(1.10300), dec!(1.10270), dec!(1.10150), dec!(1.10060), dec!(1.10110),
    dec!(1.10240), dec!(1.10330), dec!(1.10290), dec!(1.10410), dec!(1.10380),
    dec!(1.10450), dec!(1.10320), dec!(1.10260), dec!(1.10350), dec!(1.10400),
];

const STRATEGIES: &str = r#"
[[indicator]]
type = "sma"
name = "sma5"
[indicator.params]
period = 5

[[indicator]]
type = "wma"
name = "wma5"
[indicator.params]
period = 5

[[indicator]]
type = "rsi"
name = "rsi14"
[indicator.params]
period = 14
"#;

fn candle(i: usize, close: Decimal) -> Candlestick {
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
    Candlestick::new(
        Granularity::M15,
        close,
        close + dec!(0.00050),
        close - dec!(0.00050),
        close,
        100 + i as u64,
        start + Duration::minutes(15 * i as i64),
        true,
    )
    .unwrap()
}

#[test]
fn twenty_candles_match_hand_computed_averages() {
    let series = CandlestickSeries::new();
    let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new("EUR_USD"));
    let file = StrategyFileConfig::from_toml_str(STRATEGIES).unwrap();
    let built = StrategyRegistry::with_builtins()
        .build(&file, "EUR_USD", series.clone(), broker, 5)
        .unwrap();
    let engine = built.indicators;

    for (i, close) in CLOSES.iter().enumerate() {
        series.push(candle(i, *close)).unwrap();
        if i == 4 {
            assert_eq!(engine.value_of("sma5").unwrap().value, dec!(1.10120));
            // 16.52270 / 15
            assert_eq!(engine.value_of("wma5").unwrap().value, dec!(1.10151));
        }
    }

    assert_eq!(engine.value_of("sma5").unwrap().value, dec!(1.10356));
    // 16.55270 / 15
    assert_eq!(engine.value_of("wma5").unwrap().value, dec!(1.10351));
    assert_eq!(engine.value_of("sma5").unwrap().series_len, 20);

    assert_eq!(engine.value_of("rsi14").unwrap().value, dec!(63.10431));
}

#[test]
fn rsi_reports_warm_up_until_period_plus_one() {
    let series = CandlestickSeries::new();
    let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new("EUR_USD"));
    let file = StrategyFileConfig::from_toml_str(STRATEGIES).unwrap();
    let engine = StrategyRegistry::with_builtins()
        .build(&file, "EUR_USD", series.clone(), broker, 5)
        .unwrap()
        .indicators;

    for (i, close) in CLOSES.iter().take(14).enumerate() {
        series.push(candle(i, *close)).unwrap();
    }
    assert!(matches!(
        engine.value_of("rsi14"),
        Err(Error::InsufficientData { have: 14, need: 15 })
    ));

    series.push(candle(14, CLOSES[14])).unwrap();
    assert!(engine.value_of("rsi14").is_ok());
}

#[test]
fn median_source_uses_high_low_midpoint() {
    let series = CandlestickSeries::new();
    let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new("EUR_USD"));
    let file = StrategyFileConfig::from_toml_str(
        "[[indicator]]\ntype = \"sma\"\nname = \"m\"\n[indicator.params]\nperiod = 1\nsource = \"median\"\n",
    )
    .unwrap();
    let engine = StrategyRegistry::with_builtins()
        .build(&file, "EUR_USD", series.clone(), broker, 5)
        .unwrap()
        .indicators;

    let c = Candlestick::new(
        Granularity::M15,
        dec!(1.10000),
        dec!(1.10003),
        dec!(1.10000),
        dec!(1.10002),
        1,
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap(),
        true,
    )
    .unwrap();
    series.push(c).unwrap();
    // (1.10003 + 1.10000) / 2 = 1.100015, half-up
    assert_eq!(engine.value_of("m").unwrap().value, dec!(1.10002));
}
