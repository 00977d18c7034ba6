//! Solvency invariants: zero-sum realized PnL, position conservation across
//! liquidity churn, margin monotonicity, liquidation economics, and the
//! collateral-liquidation path.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use vamm_core::*;

const USD: TokenId = TokenId(0);
const WETH: TokenId = TokenId(7);
const M: MarketId = MarketId(1);
const MAKER: TraderId = TraderId(1);
const TAKER: TraderId = TraderId(2);
const KEEPER: TraderId = TraderId(9);

fn wide_range() -> (Tick, Tick) {
    (Tick(40020), Tick(52080))
}

fn deadline(venue: &Venue) -> Timestamp {
    Timestamp::from_secs(venue.time().as_secs() + 600)
}

fn setup(liquidity: Decimal, params: MarketParams) -> Venue {
    let mut venue = Venue::new(VenueConfig::default());
    venue.set_time(Timestamp::from_secs(1_000));
    venue
        .add_market(M, "PUNK-USD", params, Price::new_unchecked(dec!(100)))
        .unwrap();

    venue.mint_wallet(MAKER, USD, dec!(10_000_000));
    venue.deposit(MAKER, USD, dec!(10_000_000)).unwrap();
    venue.mint_wallet(TAKER, USD, dec!(100_000));
    venue.deposit(TAKER, USD, dec!(100_000)).unwrap();

    if liquidity > Decimal::ZERO {
        let (lo, hi) = wide_range();
        venue
            .add_liquidity(MAKER, M, lo, hi, Liquidity::new_unchecked(liquidity), deadline(&venue))
            .unwrap();
    }
    venue
}

fn open(venue: &mut Venue, trader: TraderId, is_base_to_quote: bool, amount: Decimal) {
    let dl = deadline(venue);
    venue
        .open_position(OpenPositionParams {
            trader,
            market: M,
            is_base_to_quote,
            is_exact_input: true,
            amount,
            opposite_amount_bound: None,
            price_limit: None,
            deadline: dl,
        })
        .unwrap();
}

fn owed(venue: &Venue, trader: TraderId) -> Decimal {
    venue.pnl_and_pending_fee(trader).unwrap().0.value()
}

// --- zero-sum realized PnL -----------------------------------------------------

#[test]
fn full_cycle_realized_pnl_sums_to_zero() {
    let mut venue = setup(dec!(100000), MarketParams::default());
    let insurance_start = venue.state().insurance.total_value();

    open(&mut venue, TAKER, false, dec!(1000));
    venue.advance_time(60);
    venue.push_index_price(M, Price::new_unchecked(dec!(100)));
    venue
        .close_position(TAKER, M, None, deadline(&venue))
        .unwrap();

    // maker exits completely, claiming fees and realizing any imbalance
    let (lo, hi) = wide_range();
    venue
        .remove_liquidity(MAKER, M, lo, hi, Liquidity::new_unchecked(dec!(100000)), deadline(&venue))
        .unwrap();

    let total = owed(&venue, TAKER)
        + owed(&venue, MAKER)
        + (venue.state().insurance.total_value() - insurance_start);

    // rounding always leans toward the protocol, so the residue is dust-sized
    // and never negative for the venue
    assert!(
        total.abs() < dec!(0.0001),
        "realized PnL across all parties must cancel, got {total}"
    );
}

#[test]
fn funding_settlement_is_zero_sum() {
    let params = MarketParams {
        max_tick_crossed_within_block: 100_000,
        ..MarketParams::default()
    };
    let mut venue = setup(dec!(100000), params);

    let long = TraderId(3);
    let short = TraderId(4);
    for who in [long, short] {
        venue.mint_wallet(who, USD, dec!(100_000));
        venue.deposit(who, USD, dec!(100_000)).unwrap();
    }

    open(&mut venue, long, false, dec!(20_000));
    open(&mut venue, short, true, dec!(30));

    venue.advance_time(43_200);
    venue.push_index_price(M, Price::new_unchecked(dec!(100)));

    let paid_long = venue.settle_funding(long, M).unwrap().value();
    let paid_short = venue.settle_funding(short, M).unwrap().value();

    assert!(paid_long > Decimal::ZERO, "mark above index: longs pay");
    assert!(paid_short < Decimal::ZERO, "shorts receive");
    let net = paid_long + paid_short;
    assert!(
        net.abs() / paid_long < dec!(0.0000001),
        "funding payments must cancel, net {net}"
    );
}

// --- position conservation ------------------------------------------------------

#[test]
fn liquidity_churn_leaves_positions_and_price_alone() {
    let mut venue = setup(dec!(100000), MarketParams::default());
    open(&mut venue, TAKER, false, dec!(1000));

    let size_before = venue.position(TAKER, M).unwrap().size;
    let mark_before = venue.mark_price(M).unwrap();

    // a second maker joins and leaves without any trades in between
    let maker2 = TraderId(5);
    venue.mint_wallet(maker2, USD, dec!(1_000_000));
    venue.deposit(maker2, USD, dec!(1_000_000)).unwrap();
    let (lo, hi) = wide_range();
    venue
        .add_liquidity(maker2, M, lo, hi, Liquidity::new_unchecked(dec!(50000)), deadline(&venue))
        .unwrap();
    venue
        .remove_liquidity(maker2, M, lo, hi, Liquidity::new_unchecked(dec!(50000)), deadline(&venue))
        .unwrap();

    assert_eq!(venue.position(TAKER, M).unwrap().size, size_before);
    assert_eq!(venue.mark_price(M).unwrap(), mark_before);
    assert!(venue.position(maker2, M).is_none(), "no position from pure churn");

    // the round trip costs the second maker at most rounding dust
    let maker2_owed = owed(&venue, maker2);
    assert!(maker2_owed <= Decimal::ZERO);
    assert!(maker2_owed.abs() < dec!(0.0001));
}

// --- margin monotonicity -----------------------------------------------------------

#[test]
fn free_collateral_decreases_as_risk_grows() {
    let mut venue = setup(dec!(10000000), MarketParams::default());

    let mut previous = venue.free_collateral(TAKER).unwrap();
    assert!(previous.value() > Decimal::ZERO);

    for _ in 0..4 {
        open(&mut venue, TAKER, false, dec!(5_000));
        let current = venue.free_collateral(TAKER).unwrap();
        assert!(
            current < previous,
            "free collateral must shrink as |position| grows: {current} !< {previous}"
        );
        assert!(current.value() >= Decimal::ZERO, "never negative after success");
        previous = current;
    }
}

// --- liquidation economics -----------------------------------------------------------

#[test]
fn partial_liquidation_improves_the_margin_ratio() {
    let params = MarketParams {
        max_tick_crossed_within_block: 100_000,
        ..MarketParams::default()
    };
    let mut venue = setup(dec!(100000), params);

    let trader = TraderId(6);
    venue.mint_wallet(trader, USD, dec!(1_000));
    venue.deposit(trader, USD, dec!(1_000)).unwrap();
    open(&mut venue, trader, false, dec!(5_000));

    // sell-off drags the mark down ~15%
    venue.advance_time(60);
    open(&mut venue, MAKER, true, dec!(850));

    venue.advance_time(60);
    let ratio_before = venue.margin_ratio(trader).unwrap().unwrap();

    let half = venue.position(trader, M).unwrap().size.abs() / dec!(2);
    let outcome = venue.liquidate(KEEPER, trader, M, Some(half)).unwrap();

    assert!(outcome.penalty.value() > Decimal::ZERO);
    assert!(venue.position(trader, M).is_some(), "partial close leaves a position");

    let ratio_after = venue.margin_ratio(trader).unwrap().unwrap();
    assert!(
        ratio_after > ratio_before,
        "liquidation must improve the ratio: {ratio_before} -> {ratio_after}"
    );
}

#[test]
fn liquidation_penalty_splits_between_keeper_and_insurance() {
    let params = MarketParams {
        max_tick_crossed_within_block: 100_000,
        ..MarketParams::default()
    };
    let mut venue = setup(dec!(100000), params);
    venue.fund_insurance(Quote::new(dec!(10_000)));

    let trader = TraderId(6);
    venue.mint_wallet(trader, USD, dec!(1_000));
    venue.deposit(trader, USD, dec!(1_000)).unwrap();
    open(&mut venue, trader, false, dec!(8_000));

    venue.advance_time(60);
    open(&mut venue, MAKER, true, dec!(850));

    let insurance_before = venue.insurance_fund_balance().value();
    venue.advance_time(60);
    let outcome = venue.liquidate(KEEPER, trader, M, None).unwrap();

    let reward = outcome.liquidator_reward.value();
    let to_insurance = outcome.penalty.value() - reward;
    assert_eq!(reward, outcome.penalty.value() * dec!(0.5));
    assert_eq!(owed(&venue, KEEPER), reward);

    // insurance got its half, minus whatever bad debt it absorbed
    let insurance_delta = venue.insurance_fund_balance().value() - insurance_before;
    let bad_debt = outcome.bad_debt_settled.map(|q| q.value()).unwrap_or(Decimal::ZERO);
    assert!((insurance_delta - (to_insurance - bad_debt)).abs() < dec!(0.0001));
}

// --- collateral liquidation ------------------------------------------------------------

fn setup_with_weth() -> Venue {
    let params = MarketParams {
        max_tick_crossed_within_block: 100_000,
        ..MarketParams::default()
    };
    let mut venue = setup(dec!(100000), params);
    venue
        .register_collateral(
            CollateralConfig {
                token: WETH,
                collateral_ratio: Ratio::new_unchecked(dec!(0.8)),
                discount_ratio: Ratio::new_unchecked(dec!(0.1)),
                deposit_cap: dec!(1000),
            },
            Price::new_unchecked(dec!(2000)),
        )
        .unwrap();
    venue
}

#[test]
fn non_settlement_collateral_carries_margin() {
    let mut venue = setup_with_weth();
    let trader = TraderId(6);
    venue.mint_wallet(trader, WETH, dec!(1));
    venue.deposit(trader, WETH, dec!(1)).unwrap();

    // 1 WETH * 2000 * 0.8 = 1600 of margin capacity
    let value = venue.account_value(trader).unwrap();
    assert_eq!(value.value(), dec!(1600));

    open(&mut venue, trader, false, dec!(10_000));
    assert!(venue.position(trader, M).is_some());
}

#[test]
fn collateral_liquidation_clears_the_deficit() {
    let mut venue = setup_with_weth();
    let trader = TraderId(6);
    venue.mint_wallet(trader, WETH, dec!(1));
    venue.deposit(trader, WETH, dec!(1)).unwrap();
    venue.mint_wallet(KEEPER, USD, dec!(10_000));
    venue.deposit(KEEPER, USD, dec!(10_000)).unwrap();
    venue.fund_insurance(Quote::new(dec!(10_000)));

    open(&mut venue, trader, false, dec!(10_000));

    // crash and liquidate the position; the deficit lands on the settlement row
    venue.advance_time(60);
    open(&mut venue, MAKER, true, dec!(1500));
    venue.advance_time(60);
    let outcome = venue.liquidate(KEEPER, trader, M, None).unwrap();
    assert!(
        outcome.bad_debt_settled.is_none(),
        "bad debt deferred while collateral remains"
    );

    let settlement_before = venue.vault_balance(trader, USD);
    assert!(settlement_before < Decimal::ZERO, "account in deficit");

    // while positions are gone but a deficit remains, collateral can be seized
    venue
        .liquidate_collateral(KEEPER, trader, WETH, dec!(1))
        .unwrap();

    assert_eq!(venue.vault_balance(trader, WETH), Decimal::ZERO);
    assert_eq!(venue.vault_balance(KEEPER, WETH), dec!(1));
    // 1 WETH at 2000 with a 10% discount credits 1800; any deficit beyond that
    // is bad debt, which zeroes the row
    assert_eq!(
        venue.vault_balance(trader, USD),
        (settlement_before + dec!(1800)).max(Decimal::ZERO)
    );

    let seized = venue
        .events()
        .iter()
        .any(|e| matches!(e.payload, EventPayload::CollateralLiquidated(_)));
    assert!(seized);
    if settlement_before + dec!(1800) < Decimal::ZERO {
        let settled = venue
            .events()
            .iter()
            .any(|e| matches!(e.payload, EventPayload::BadDebtSettled(_)));
        assert!(settled, "residual deficit must be absorbed by the insurance fund");
    }
}

#[test]
fn collateral_liquidation_requires_a_deficit() {
    let mut venue = setup_with_weth();
    let trader = TraderId(6);
    venue.mint_wallet(trader, WETH, dec!(1));
    venue.deposit(trader, WETH, dec!(1)).unwrap();
    venue.mint_wallet(KEEPER, USD, dec!(10_000));
    venue.deposit(KEEPER, USD, dec!(10_000)).unwrap();

    let res = venue.liquidate_collateral(KEEPER, trader, WETH, dec!(1));
    assert!(matches!(res, Err(VenueError::NotLiquidatable(_))));
    assert_eq!(venue.vault_balance(trader, WETH), dec!(1));
}

// --- collateral registry limits -----------------------------------------------------

#[test]
fn deposit_cap_and_token_limit_enforced() {
    let mut config = VenueConfig::default();
    config.max_collateral_tokens_per_account = 1;
    let mut venue = Venue::new(config);
    venue.set_time(Timestamp::from_secs(1_000));
    venue
        .add_market(M, "PUNK-USD", MarketParams::default(), Price::new_unchecked(dec!(100)))
        .unwrap();

    let other = TokenId(8);
    venue
        .register_collateral(
            CollateralConfig {
                token: WETH,
                collateral_ratio: Ratio::new_unchecked(dec!(0.8)),
                discount_ratio: Ratio::new_unchecked(dec!(0.1)),
                deposit_cap: dec!(5),
            },
            Price::new_unchecked(dec!(2000)),
        )
        .unwrap();
    venue
        .register_collateral(
            CollateralConfig {
                token: other,
                collateral_ratio: Ratio::new_unchecked(dec!(0.5)),
                discount_ratio: Ratio::new_unchecked(dec!(0.2)),
                deposit_cap: dec!(100),
            },
            Price::new_unchecked(dec!(10)),
        )
        .unwrap();

    let trader = TraderId(6);
    venue.mint_wallet(trader, WETH, dec!(10));
    venue.mint_wallet(trader, other, dec!(10));

    // per-token venue-wide cap
    let res = venue.deposit(trader, WETH, dec!(6));
    assert!(matches!(
        res,
        Err(VenueError::Vault(VaultError::DepositCapExceeded { .. }))
    ));

    // one collateral kind allowed
    venue.deposit(trader, WETH, dec!(2)).unwrap();
    let res = venue.deposit(trader, other, dec!(1));
    assert!(matches!(
        res,
        Err(VenueError::Vault(VaultError::CollateralTokenLimitExceeded { .. }))
    ));

    // unsupported token refused outright
    let res = venue.deposit(trader, TokenId(42), dec!(1));
    assert!(matches!(
        res,
        Err(VenueError::Vault(VaultError::Collateral(
            CollateralError::UnsupportedCollateralToken(_)
        )))
    ));
}

// --- repeg fund accounting ---------------------------------------------------------

#[test]
fn swap_insurance_fees_accrue_to_the_repeg_fund() {
    let mut venue = setup(dec!(100000), MarketParams::default());
    assert_eq!(venue.repeg_fund(M), Quote::zero());

    open(&mut venue, TAKER, false, dec!(10_000));

    // 0.1% fee, 20% of it earmarked for repeg
    let fund = venue.repeg_fund(M).value();
    assert!(fund > Decimal::ZERO);
    let expected = dec!(10_000) * dec!(0.001) * dec!(0.2);
    assert!((fund - expected).abs() < dec!(0.01), "fund {fund} vs {expected}");
}
