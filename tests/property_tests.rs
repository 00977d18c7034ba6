//! Property-based tests for the bug-prone math: tick conversions and their
//! rounding direction, the swap walk, funding neutrality, and the ledger's
//! trade/multiplier arithmetic.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use vamm_core::funding::{accrue_premium, pending_payment, FundingGrowth};
use vamm_core::tick_math::{
    amounts_for_liquidity, liquidity_for_amounts, price_to_tick, tick_to_price, tick_to_sqrt_price,
};
use vamm_core::*;

fn tick_strategy() -> impl Strategy<Value = i32> {
    -100_000i32..=100_000i32
}

fn liquidity_strategy() -> impl Strategy<Value = Decimal> {
    (10_000i64..1_000_000i64).prop_map(Decimal::from)
}

fn quote_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 .. 1000.00
}

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (100i64..10_000_000i64).prop_map(|x| Decimal::new(x, 2)) // 1.00 .. 100,000.00
}

fn size_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64).prop_map(|x| Decimal::new(x, 4)) // 0.0001 .. 1.0
}

fn test_pool(liquidity: Decimal) -> VirtualPool {
    let mut pool = VirtualPool::new(
        Price::new_unchecked(dec!(100)),
        Ratio::new_unchecked(dec!(0.01)),
        Ratio::new_unchecked(dec!(0.2)),
        60,
    )
    .unwrap();
    pool.mint(
        Tick(40020),
        Tick(52080),
        Liquidity::new_unchecked(liquidity),
    )
    .unwrap();
    pool
}

proptest! {
    /// price_to_tick inverts tick_to_price exactly.
    #[test]
    fn tick_price_inversion(t in tick_strategy()) {
        let price = tick_to_price(Tick(t)).unwrap();
        prop_assert_eq!(price_to_tick(price).unwrap(), Tick(t));
    }

    /// Higher tick, higher price.
    #[test]
    fn tick_to_price_monotonic(a in tick_strategy(), b in tick_strategy()) {
        let pa = tick_to_price(Tick(a)).unwrap().value();
        let pb = tick_to_price(Tick(b)).unwrap().value();
        if a < b {
            prop_assert!(pa < pb);
        } else if a > b {
            prop_assert!(pa > pb);
        }
    }

    /// Range amount math round-trips through liquidity_for_amounts.
    #[test]
    fn liquidity_roundtrip(
        l in liquidity_strategy(),
        lower in -50_000i32..=-60i32,
        upper in 60i32..=50_000i32,
    ) {
        let sqrt_lower = tick_to_sqrt_price(Tick(lower)).unwrap();
        let sqrt_upper = tick_to_sqrt_price(Tick(upper)).unwrap();
        let sqrt_mid = tick_to_sqrt_price(Tick(0)).unwrap();
        let liquidity = Liquidity::new_unchecked(l);

        let (base, quote) = amounts_for_liquidity(sqrt_mid, sqrt_lower, sqrt_upper, liquidity);
        prop_assert!(base > Decimal::ZERO);
        prop_assert!(quote > Decimal::ZERO);

        let back = liquidity_for_amounts(sqrt_mid, sqrt_lower, sqrt_upper, base, quote);
        let drift = (back.value() - l).abs() / l;
        prop_assert!(drift < dec!(0.000001), "drift {}", drift);
    }

    /// A round trip through the pool never pays the trader: fees and rounding
    /// both lean toward the protocol.
    #[test]
    fn swap_round_trip_never_profits(
        l in liquidity_strategy(),
        quote_in in quote_strategy(),
    ) {
        let mut pool = test_pool(l);

        let open = pool.compute_swap(SwapParams {
            is_base_to_quote: false,
            is_exact_input: true,
            amount: quote_in,
            sqrt_price_limit: None,
        }).unwrap();
        pool.apply_swap(&open);
        prop_assert!(open.exchanged_base > Decimal::ZERO);

        let close = pool.compute_swap(SwapParams {
            is_base_to_quote: true,
            is_exact_input: true,
            amount: open.exchanged_base,
            sqrt_price_limit: None,
        }).unwrap();
        pool.apply_swap(&close);

        prop_assert!(
            close.exchanged_quote <= quote_in,
            "round trip received {} for {}",
            close.exchanged_quote,
            quote_in
        );
    }

    /// Funding payments across both sides cancel for any OI mix and premium.
    #[test]
    fn funding_accrual_is_neutral(
        long_oi in (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        short_oi in (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        mark in price_strategy(),
        index in price_strategy(),
        elapsed in 1i64..86_400i64,
    ) {
        let g0 = FundingGrowth::new(Timestamp::from_secs(0));
        let g1 = accrue_premium(
            &g0,
            Price::new_unchecked(mark),
            Price::new_unchecked(index),
            long_oi,
            short_oi,
            Timestamp::from_secs(elapsed),
        );

        let longs_pay = pending_payment(
            BaseAmount::new(long_oi), &g1, Decimal::ZERO, Decimal::ZERO,
        );
        let shorts_pay = pending_payment(
            BaseAmount::new(-short_oi), &g1, Decimal::ZERO, Decimal::ZERO,
        );

        let net = longs_pay.value() + shorts_pay.value();
        let scale = longs_pay.value().abs().max(dec!(0.000001));
        prop_assert!(
            (net / scale).abs() < dec!(0.0000001),
            "net funding {} (long {}, short {})",
            net, longs_pay, shorts_pay
        );
    }

    /// Opening and fully closing a ledger position realizes exactly the two
    /// quote legs.
    #[test]
    fn full_close_realizes_both_legs(
        size in size_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
    ) {
        let mut ab = AccountBalance::new();
        let growth = FundingGrowth::new(Timestamp::from_secs(0));
        let trader = TraderId(1);
        let market = MarketId(1);

        let open_quote = -(size * entry);
        ab.apply_trade(trader, market, size, Quote::new(open_quote), &growth);

        let close_quote = size * exit;
        let app = ab.apply_trade(trader, market, -size, Quote::new(close_quote), &growth);

        prop_assert!(app.closed_position);
        prop_assert_eq!(app.realized_pnl.value(), close_quote + open_quote);
        prop_assert!(ab.position(trader, market).is_none());
    }

    /// Multiplier conversion preserves magnitude for non-flip trades.
    #[test]
    fn multiplier_conversion_preserves_pool_magnitude(
        pool_delta in (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 4)),
        factor in (1i64..50i64).prop_map(|x| Decimal::new(x, 1)), // 0.1 .. 4.9
    ) {
        let mut ab = AccountBalance::new();
        let market = MarketId(1);
        ab.rescale_multipliers(market, factor);

        let ledger = ab.modify_base_for_multiplier(market, BaseAmount::zero(), pool_delta);
        let back = ledger * factor;
        let drift = (back - pool_delta).abs() / pool_delta;
        prop_assert!(drift < dec!(0.0000000001), "drift {}", drift);
    }

    /// Margin requirement scales linearly with position size.
    #[test]
    fn margin_requirement_scales_with_size(
        size in size_strategy(),
        mark in price_strategy(),
    ) {
        let mut ab = AccountBalance::new();
        let growth = FundingGrowth::new(Timestamp::from_secs(0));
        let trader = TraderId(1);
        let market = MarketId(1);

        ab.apply_trade(trader, market, size, Quote::new(-(size * mark)), &growth);
        let mut marks = std::collections::HashMap::new();
        marks.insert(market, Price::new_unchecked(mark));

        let single = ab.margin_requirement(trader, &marks, dec!(0.1));

        // double the position, double the requirement
        ab.apply_trade(trader, market, size, Quote::new(-(size * mark)), &growth);
        let double = ab.margin_requirement(trader, &marks, dec!(0.1));

        let drift = (double.value() - single.value() * dec!(2)).abs();
        prop_assert!(drift < dec!(0.0000001), "drift {}", drift);
    }
}
