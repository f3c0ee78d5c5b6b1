use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;

use common::{Pricing, TradeDetails};
use paper::PaperBroker;
use risk::{target_price, target_reached, Evaluation, ExitConfig, ExitStrategy, ExitStrategyEngine};

fn price(pips: i64) -> Decimal {
    Decimal::new(pips, 5)
}

fn quote(bid: Decimal, spread: Decimal) -> Pricing {
    Pricing::new(bid + spread, bid, Utc::now(), true).unwrap()
}

proptest! {
    /// Mirroring a trade around its open price mirrors the target.
    #[test]
    fn targets_mirror_around_open(
        open in 50_000i64..200_000,
        distance in 1i64..5_000,
        units in 1i64..1_000_000,
    ) {
        let long = TradeDetails::new("l", "EUR_USD", units, price(open), None).unwrap();
        let short = TradeDetails::new("s", "EUR_USD", -units, price(open), None).unwrap();
        let up = target_price(&long, price(distance), 5).unwrap();
        let down = target_price(&short, price(distance), 5).unwrap();
        prop_assert_eq!(up - price(open), price(open) - down);
    }

    /// A long is satisfied exactly when the bid reaches the target, whatever the spread.
    #[test]
    fn long_comparator_uses_bid(
        open in 50_000i64..200_000,
        distance in 1i64..5_000,
        offset in -5_000i64..5_000,
        spread in 0i64..100,
    ) {
        let trade = TradeDetails::new("l", "EUR_USD", 1_000, price(open), None).unwrap();
        let target = target_price(&trade, price(distance), 5).unwrap();
        let bid = target + price(offset);
        prop_assume!(bid > Decimal::ZERO);
        let tick = quote(bid, price(spread));
        prop_assert_eq!(target_reached(&trade, &tick, target), offset >= 0);
    }

    /// A short is satisfied exactly when the ask falls to the target.
    #[test]
    fn short_comparator_uses_ask(
        open in 50_000i64..200_000,
        distance in 1i64..5_000,
        offset in -5_000i64..5_000,
        spread in 0i64..100,
    ) {
        let trade = TradeDetails::new("s", "EUR_USD", -1_000, price(open), None).unwrap();
        let target = target_price(&trade, price(distance), 5).unwrap();
        let ask = target + price(offset);
        prop_assume!(ask - price(spread) > Decimal::ZERO);
        let tick = quote(ask - price(spread), price(spread));
        prop_assert_eq!(target_reached(&trade, &tick, target), offset <= 0);
    }

    /// Re-evaluating one tick against an unchanged broker view issues at most
    /// one instruction in total.
    #[test]
    fn repeated_tick_issues_at_most_one_instruction(
        open in 50_000i64..200_000,
        units in prop_oneof![-10_000i64..-1, 1i64..10_000],
        break_even in 1i64..2_000,
        extra in 1i64..2_000,
        move_pips in -5_000i64..5_000,
        repeats in 2usize..6,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let broker = Arc::new(PaperBroker::new("EUR_USD"));
            broker
                .set_trade(Some(
                    TradeDetails::new("t", "EUR_USD", units, price(open), None).unwrap(),
                ))
                .await;
            broker.set_freeze_trades(true).await;

            let config = ExitConfig::new(
                Some(price(break_even)),
                vec![price(break_even + extra)],
                Decimal::ONE,
                5,
            )
            .unwrap();
            let mut engine = ExitStrategyEngine::new("prop", broker.clone(), config);

            let tick = quote(price(open + move_pips), price(2));
            let mut transitions = 0;
            for _ in 0..repeats {
                match engine.evaluate(&tick).await.unwrap() {
                    Evaluation::Transition { .. } => transitions += 1,
                    Evaluation::Unchanged(_) => {}
                    Evaluation::NoOpenTrade => panic!("trade vanished"),
                }
            }
            assert!(transitions <= 1);
            assert!(broker.orders().await.len() <= 1);
        });
    }
}
