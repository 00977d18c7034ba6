// 2.0: tick and sqrt-price math for the virtual pool. price = 1.0001^tick.
// all range/liquidity conversions live here so the rounding direction is decided
// in exactly one place: amounts a trader owes round up, amounts credited round down.

use crate::types::{Liquidity, Price, Tick};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Bounds keep 1.0001^tick well inside Decimal's representable range
// (roughly 1e-18 .. 2e17 in price terms). Out-of-range ticks are an error,
// never a clamp.
pub const MIN_TICK: i32 = -400_000;
pub const MAX_TICK: i32 = 400_000;

// Decimal places carried by quote/base amounts after rounding.
pub const AMOUNT_SCALE: u32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TickMathError {
    #[error("tick {0} outside [{MIN_TICK}, {MAX_TICK}]")]
    TickOutOfRange(i32),

    #[error("tick range invalid: lower {lower} must be below upper {upper}")]
    InvalidTickRange { lower: i32, upper: i32 },

    #[error("price {0} outside representable tick range")]
    PriceOutOfRange(Decimal),
}

fn tick_base() -> Decimal {
    dec!(1.0001)
}

pub fn check_tick(tick: Tick) -> Result<(), TickMathError> {
    if tick.value() < MIN_TICK || tick.value() > MAX_TICK {
        return Err(TickMathError::TickOutOfRange(tick.value()));
    }
    Ok(())
}

pub fn check_tick_range(lower: Tick, upper: Tick) -> Result<(), TickMathError> {
    check_tick(lower)?;
    check_tick(upper)?;
    if lower >= upper {
        return Err(TickMathError::InvalidTickRange {
            lower: lower.value(),
            upper: upper.value(),
        });
    }
    Ok(())
}

pub fn tick_to_price(tick: Tick) -> Result<Price, TickMathError> {
    check_tick(tick)?;
    let p = tick_base().powd(Decimal::from(tick.value()));
    Price::new(p).ok_or(TickMathError::PriceOutOfRange(p))
}

pub fn tick_to_sqrt_price(tick: Tick) -> Result<Decimal, TickMathError> {
    check_tick(tick)?;
    Ok(tick_base().powd(Decimal::from(tick.value()) / dec!(2)))
}

// 2.1: largest tick whose price does not exceed the given price.
// ln gives the neighborhood; the final adjustment makes the floor exact
// with respect to our own tick_to_price.
pub fn price_to_tick(price: Price) -> Result<Tick, TickMathError> {
    let estimate = (price.value().ln() / tick_base().ln())
        .round()
        .to_i64()
        .ok_or(TickMathError::PriceOutOfRange(price.value()))?;

    if estimate < (MIN_TICK as i64) - 2 || estimate > (MAX_TICK as i64) + 2 {
        return Err(TickMathError::PriceOutOfRange(price.value()));
    }

    let mut tick = (estimate as i32).clamp(MIN_TICK, MAX_TICK);
    while tick < MAX_TICK && tick_to_price(Tick(tick + 1))?.value() <= price.value() {
        tick += 1;
    }
    while tick > MIN_TICK && tick_to_price(Tick(tick))?.value() > price.value() {
        tick -= 1;
    }
    Ok(Tick(tick))
}

pub fn sqrt_price_to_tick(sqrt_price: Decimal) -> Result<Tick, TickMathError> {
    let price =
        Price::new(sqrt_price * sqrt_price).ok_or(TickMathError::PriceOutOfRange(sqrt_price))?;
    price_to_tick(price)
}

// 2.2: rounding direction is always against the trader.
pub fn round_owed(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::AwayFromZero)
}

pub fn round_credited(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
}

// 2.3: token amounts carried by liquidity L between two sqrt prices (a < b).
//   base  = L * (sqrt_b - sqrt_a) / (sqrt_a * sqrt_b)
//   quote = L * (sqrt_b - sqrt_a)
pub fn base_between(liquidity: Decimal, sqrt_a: Decimal, sqrt_b: Decimal) -> Decimal {
    debug_assert!(sqrt_a > Decimal::ZERO && sqrt_b > sqrt_a);
    liquidity * (sqrt_b - sqrt_a) / (sqrt_a * sqrt_b)
}

pub fn quote_between(liquidity: Decimal, sqrt_a: Decimal, sqrt_b: Decimal) -> Decimal {
    debug_assert!(sqrt_b > sqrt_a);
    liquidity * (sqrt_b - sqrt_a)
}

/// Base and quote a range position of `liquidity` holds at the current sqrt price.
pub fn amounts_for_liquidity(
    sqrt_current: Decimal,
    sqrt_lower: Decimal,
    sqrt_upper: Decimal,
    liquidity: Liquidity,
) -> (Decimal, Decimal) {
    let l = liquidity.value();
    if l.is_zero() {
        return (Decimal::ZERO, Decimal::ZERO);
    }

    if sqrt_current <= sqrt_lower {
        // entirely above the price: all base
        (base_between(l, sqrt_lower, sqrt_upper), Decimal::ZERO)
    } else if sqrt_current >= sqrt_upper {
        // entirely below the price: all quote
        (Decimal::ZERO, quote_between(l, sqrt_lower, sqrt_upper))
    } else {
        (
            base_between(l, sqrt_current, sqrt_upper),
            quote_between(l, sqrt_lower, sqrt_current),
        )
    }
}

// 2.4: inverse of 2.3, used by repeg to re-deploy freed inventory.
// in-range the binding side wins (min), so the pool never owes more than it holds.
pub fn liquidity_for_amounts(
    sqrt_current: Decimal,
    sqrt_lower: Decimal,
    sqrt_upper: Decimal,
    base: Decimal,
    quote: Decimal,
) -> Liquidity {
    let for_base = |b: Decimal, sa: Decimal, sb: Decimal| b * sa * sb / (sb - sa);
    let for_quote = |q: Decimal, sa: Decimal, sb: Decimal| q / (sb - sa);

    let l = if sqrt_current <= sqrt_lower {
        for_base(base, sqrt_lower, sqrt_upper)
    } else if sqrt_current >= sqrt_upper {
        for_quote(quote, sqrt_lower, sqrt_upper)
    } else {
        for_base(base, sqrt_current, sqrt_upper).min(for_quote(quote, sqrt_lower, sqrt_current))
    };

    Liquidity::new_unchecked(l.max(Decimal::ZERO))
}
