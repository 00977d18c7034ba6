// 3.0: the virtual concentrated-liquidity pool. tick-ranged liquidity, swap walk
// with a price limit, fee growth accounting. no real tokens are held; the pool is
// pure bookkeeping that the order book (its only writer) drives.
//
// 3.1 mint/burn, 3.2 fee growth inside a range, 3.3 the swap walk.
//
// fee convention: fees are charged in quote on every swap. buying base, the fee
// comes out of the quote paid in; selling base, out of the quote paid out. the
// maker share accrues to fee growth per unit of active liquidity; the insurance
// share is reported to the caller.

use crate::tick_math::{
    self, amounts_for_liquidity, base_between, quote_between, round_credited, round_owed,
    TickMathError,
};
use crate::types::{Liquidity, Price, Ratio, Tick};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PoolError {
    #[error(transparent)]
    TickMath(#[from] TickMathError),

    #[error("tick {tick} not aligned to spacing {spacing}")]
    TickNotAligned { tick: i32, spacing: i32 },

    #[error("liquidity amount must be positive")]
    ZeroLiquidity,

    #[error("burn of {requested} exceeds range liquidity {available}")]
    BurnExceedsLiquidity { requested: Decimal, available: Decimal },

    #[error("price limit {limit} is on the wrong side of the current price {current}")]
    InvalidPriceLimit { limit: Decimal, current: Decimal },

    #[error("pool liquidity exhausted before the requested amount was filled")]
    InsufficientLiquidity,
}

// 3.0.1: per-tick bookkeeping. liquidity_net is added when the price crosses the
// tick moving up, subtracted moving down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TickInfo {
    liquidity_gross: Decimal,
    liquidity_net: Decimal,
    fee_growth_outside: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SwapParams {
    pub is_base_to_quote: bool,
    pub is_exact_input: bool,
    /// Positive amount; base units for base-side exactness, quote units otherwise.
    pub amount: Decimal,
    /// Sqrt-price bound the walk must not cross. None = walk until filled.
    pub sqrt_price_limit: Option<Decimal>,
}

/// Outcome of a swap walk, trader-signed: positive = the trader receives.
/// `exchanged_quote` is net of the fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapComputation {
    pub exchanged_base: Decimal,
    pub exchanged_quote: Decimal,
    pub fee: Decimal,
    pub insurance_fee: Decimal,
    end_sqrt_price: Decimal,
    end_tick: Tick,
    end_liquidity: Decimal,
    end_fee_growth_global: Decimal,
    crossed: Vec<(i32, Decimal)>,
}

impl SwapComputation {
    pub fn end_tick(&self) -> Tick {
        self.end_tick
    }

    pub fn end_price(&self) -> Price {
        Price::new_unchecked(self.end_sqrt_price * self.end_sqrt_price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualPool {
    sqrt_price: Decimal,
    tick: Tick,
    /// Liquidity active at the current price.
    liquidity: Decimal,
    fee_ratio: Ratio,
    insurance_fee_share: Ratio,
    tick_spacing: i32,
    ticks: BTreeMap<i32, TickInfo>,
    /// Maker quote fees per unit of liquidity, lifetime.
    fee_growth_global: Decimal,
}

impl VirtualPool {
    pub fn new(
        initial_price: Price,
        fee_ratio: Ratio,
        insurance_fee_share: Ratio,
        tick_spacing: i32,
    ) -> Result<Self, PoolError> {
        debug_assert!(tick_spacing > 0);
        let tick = tick_math::price_to_tick(initial_price)?;
        Ok(Self {
            sqrt_price: initial_price.value().sqrt().unwrap_or(Decimal::ONE),
            tick,
            liquidity: Decimal::ZERO,
            fee_ratio,
            insurance_fee_share,
            tick_spacing,
            ticks: BTreeMap::new(),
            fee_growth_global: Decimal::ZERO,
        })
    }

    pub fn slot0(&self) -> (Decimal, Tick) {
        (self.sqrt_price, self.tick)
    }

    pub fn mark_price(&self) -> Price {
        Price::new_unchecked(self.sqrt_price * self.sqrt_price)
    }

    pub fn active_liquidity(&self) -> Liquidity {
        Liquidity::new_unchecked(self.liquidity)
    }

    pub fn tick_spacing(&self) -> i32 {
        self.tick_spacing
    }

    fn check_aligned(&self, tick: Tick) -> Result<(), PoolError> {
        if !tick.is_aligned(self.tick_spacing) {
            return Err(PoolError::TickNotAligned {
                tick: tick.value(),
                spacing: self.tick_spacing,
            });
        }
        Ok(())
    }

    // 3.1: add liquidity to [lower, upper). returns (base_owed, quote_owed),
    // rounded up: the minter owes them to the pool.
    pub fn mint(
        &mut self,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
    ) -> Result<(Decimal, Decimal), PoolError> {
        tick_math::check_tick_range(lower, upper)?;
        self.check_aligned(lower)?;
        self.check_aligned(upper)?;
        if liquidity.is_zero() {
            return Err(PoolError::ZeroLiquidity);
        }

        let l = liquidity.value();
        self.update_tick(lower, l, l)?;
        self.update_tick(upper, l, -l)?;

        let sqrt_lower = tick_math::tick_to_sqrt_price(lower)?;
        let sqrt_upper = tick_math::tick_to_sqrt_price(upper)?;
        let (base, quote) =
            amounts_for_liquidity(self.sqrt_price, sqrt_lower, sqrt_upper, liquidity);

        if lower <= self.tick && self.tick < upper {
            self.liquidity += l;
        }

        Ok((round_owed(base), round_owed(quote)))
    }

    /// Burn liquidity from [lower, upper). Returns (base_freed, quote_freed),
    /// rounded down: the pool credits them to the burner.
    pub fn burn(
        &mut self,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
    ) -> Result<(Decimal, Decimal), PoolError> {
        tick_math::check_tick_range(lower, upper)?;
        if liquidity.is_zero() {
            return Err(PoolError::ZeroLiquidity);
        }

        let l = liquidity.value();
        let available = self
            .ticks
            .get(&lower.value())
            .map(|t| t.liquidity_gross)
            .unwrap_or(Decimal::ZERO);
        if l > available {
            return Err(PoolError::BurnExceedsLiquidity {
                requested: l,
                available,
            });
        }

        self.update_tick(lower, -l, -l)?;
        self.update_tick(upper, -l, l)?;

        let sqrt_lower = tick_math::tick_to_sqrt_price(lower)?;
        let sqrt_upper = tick_math::tick_to_sqrt_price(upper)?;
        let (base, quote) =
            amounts_for_liquidity(self.sqrt_price, sqrt_lower, sqrt_upper, liquidity);

        if lower <= self.tick && self.tick < upper {
            self.liquidity -= l;
        }

        Ok((round_credited(base), round_credited(quote)))
    }

    fn update_tick(&mut self, tick: Tick, gross_delta: Decimal, net_delta: Decimal) -> Result<(), PoolError> {
        // convention: a tick initialized at or below the current price has
        // "seen" all growth so far
        let initial_outside = if tick <= self.tick {
            self.fee_growth_global
        } else {
            Decimal::ZERO
        };
        let entry = self.ticks.entry(tick.value()).or_insert_with(|| TickInfo {
            fee_growth_outside: initial_outside,
            ..TickInfo::default()
        });
        entry.liquidity_gross += gross_delta;
        entry.liquidity_net += net_delta;
        if entry.liquidity_gross <= Decimal::ZERO {
            self.ticks.remove(&tick.value());
        }
        Ok(())
    }

    // 3.2: maker fee growth accumulated inside a range, per unit liquidity.
    pub fn fee_growth_inside(&self, lower: Tick, upper: Tick) -> Decimal {
        let outside = |t: Tick| {
            self.ticks
                .get(&t.value())
                .map(|i| i.fee_growth_outside)
                .unwrap_or(Decimal::ZERO)
        };

        let below = if self.tick >= lower {
            outside(lower)
        } else {
            self.fee_growth_global - outside(lower)
        };
        let above = if self.tick < upper {
            outside(upper)
        } else {
            self.fee_growth_global - outside(upper)
        };

        self.fee_growth_global - below - above
    }

    /// Base and quote currently attributable to `liquidity` in [lower, upper).
    pub fn amounts_in_range(
        &self,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
    ) -> Result<(Decimal, Decimal), PoolError> {
        let sqrt_lower = tick_math::tick_to_sqrt_price(lower)?;
        let sqrt_upper = tick_math::tick_to_sqrt_price(upper)?;
        Ok(amounts_for_liquidity(
            self.sqrt_price,
            sqrt_lower,
            sqrt_upper,
            liquidity,
        ))
    }

    // 3.3: the swap walk. computes the full outcome without touching state;
    // apply_swap commits it. estimate = compute without apply.
    pub fn compute_swap(&self, params: SwapParams) -> Result<SwapComputation, PoolError> {
        if let Some(limit) = params.sqrt_price_limit {
            let wrong_side = if params.is_base_to_quote {
                limit >= self.sqrt_price
            } else {
                limit <= self.sqrt_price
            };
            if wrong_side {
                return Err(PoolError::InvalidPriceLimit {
                    limit,
                    current: self.sqrt_price,
                });
            }
        }

        let mut sqrt_p = self.sqrt_price;
        let mut liquidity = self.liquidity;
        let mut fee_growth = self.fee_growth_global;
        let mut crossed: Vec<(i32, Decimal)> = Vec::new();

        let mut remaining = params.amount;
        let mut total_base = Decimal::ZERO;
        let mut total_quote_pool = Decimal::ZERO; // gross quote moved through the pool
        let mut total_fee = Decimal::ZERO;
        let mut limit_reached = false;

        // exact quote input is walked net of fee; the fee is reconstructed per step
        let fee_ratio = self.fee_ratio.value();
        if !params.is_base_to_quote && params.is_exact_input {
            remaining *= Decimal::ONE - fee_ratio;
        }
        // exact quote output is requested net of fee; the pool must move more
        if params.is_base_to_quote && !params.is_exact_input {
            if fee_ratio < Decimal::ONE {
                remaining /= Decimal::ONE - fee_ratio;
            }
        }

        while remaining > Decimal::ZERO && !limit_reached {
            let boundary = if params.is_base_to_quote {
                self.next_initialized_below(sqrt_p)?
            } else {
                self.next_initialized_above(sqrt_p)?
            };

            let Some((boundary_tick, boundary_sqrt)) = boundary else {
                return Err(PoolError::InsufficientLiquidity);
            };

            // clamp the step target by the price limit
            let mut target = boundary_sqrt;
            let mut target_is_boundary = true;
            if let Some(limit) = params.sqrt_price_limit {
                let clamped = if params.is_base_to_quote {
                    limit > target
                } else {
                    limit < target
                };
                if clamped {
                    target = limit;
                    target_is_boundary = false;
                }
            }

            if liquidity.is_zero() {
                // dead zone: jump to the boundary, nothing exchanged
                sqrt_p = target;
                if target_is_boundary {
                    let flipped = fee_growth
                        - self
                            .ticks
                            .get(&boundary_tick)
                            .map(|t| t.fee_growth_outside)
                            .unwrap_or(Decimal::ZERO);
                    crossed.push((boundary_tick, flipped));
                    liquidity = self.cross_liquidity(liquidity, boundary_tick, params.is_base_to_quote);
                } else {
                    limit_reached = true;
                }
                continue;
            }

            let step = compute_step(
                sqrt_p,
                target,
                liquidity,
                remaining,
                params.is_base_to_quote,
                params.is_exact_input,
            );

            total_base += step.base;
            total_quote_pool += step.quote;
            remaining -= step.consumed;
            sqrt_p = step.end_sqrt_price;

            // fee on the quote side of this step, maker share accrues to growth
            let step_fee = if params.is_base_to_quote {
                step.quote * fee_ratio
            } else if fee_ratio < Decimal::ONE {
                step.quote * fee_ratio / (Decimal::ONE - fee_ratio)
            } else {
                Decimal::ZERO
            };
            total_fee += step_fee;
            let maker_share = step_fee * self.insurance_fee_share.complement().value();
            fee_growth += maker_share / liquidity;

            if step.hit_target {
                if target_is_boundary {
                    let flipped = fee_growth
                        - self
                            .ticks
                            .get(&boundary_tick)
                            .map(|t| t.fee_growth_outside)
                            .unwrap_or(Decimal::ZERO);
                    crossed.push((boundary_tick, flipped));
                    liquidity = self.cross_liquidity(liquidity, boundary_tick, params.is_base_to_quote);
                } else {
                    limit_reached = true;
                }
            }
        }

        let insurance_fee = total_fee * self.insurance_fee_share.value();

        // trader-signed deltas, quote net of fee
        let (exchanged_base, exchanged_quote) = if params.is_base_to_quote {
            (
                -round_owed(total_base),
                round_credited(total_quote_pool - total_fee),
            )
        } else {
            (
                round_credited(total_base),
                -round_owed(total_quote_pool + total_fee),
            )
        };

        let mut end_tick = tick_math::sqrt_price_to_tick(sqrt_p)?;
        // landing exactly on a boundary while moving down belongs to the tick below:
        // the boundary's liquidity_net was already subtracted when it was crossed
        if params.is_base_to_quote {
            if let Some((t, _)) = crossed.last() {
                if end_tick.value() == *t {
                    end_tick = Tick(t - 1);
                }
            }
        }

        Ok(SwapComputation {
            exchanged_base,
            exchanged_quote,
            fee: round_owed(total_fee),
            insurance_fee: round_credited(insurance_fee),
            end_sqrt_price: sqrt_p,
            end_tick,
            end_liquidity: liquidity,
            end_fee_growth_global: fee_growth,
            crossed,
        })
    }

    /// Teleport the pool price. Only valid while no liquidity is deployed
    /// (repeg burns everything first); fee growth bookkeeping does not survive
    /// a price jump across initialized ticks.
    pub fn recenter(&mut self, new_price: Price) -> Result<(), PoolError> {
        debug_assert!(self.ticks.is_empty(), "recenter requires an empty pool");
        self.tick = tick_math::price_to_tick(new_price)?;
        self.sqrt_price = new_price.value().sqrt().unwrap_or(self.sqrt_price);
        Ok(())
    }

    pub fn apply_swap(&mut self, computation: &SwapComputation) {
        self.sqrt_price = computation.end_sqrt_price;
        self.tick = computation.end_tick;
        self.liquidity = computation.end_liquidity;
        self.fee_growth_global = computation.end_fee_growth_global;
        for (tick, new_outside) in &computation.crossed {
            if let Some(info) = self.ticks.get_mut(tick) {
                info.fee_growth_outside = *new_outside;
            }
        }
    }

    fn cross_liquidity(&self, liquidity: Decimal, tick: i32, moving_down: bool) -> Decimal {
        let net = self
            .ticks
            .get(&tick)
            .map(|t| t.liquidity_net)
            .unwrap_or(Decimal::ZERO);
        let next = if moving_down {
            liquidity - net
        } else {
            liquidity + net
        };
        next.max(Decimal::ZERO)
    }

    fn next_initialized_above(&self, sqrt_p: Decimal) -> Result<Option<(i32, Decimal)>, PoolError> {
        for &t in self.ticks.keys() {
            let s = tick_math::tick_to_sqrt_price(Tick(t))?;
            if s > sqrt_p {
                return Ok(Some((t, s)));
            }
        }
        Ok(None)
    }

    fn next_initialized_below(&self, sqrt_p: Decimal) -> Result<Option<(i32, Decimal)>, PoolError> {
        for &t in self.ticks.keys().rev() {
            let s = tick_math::tick_to_sqrt_price(Tick(t))?;
            if s < sqrt_p {
                return Ok(Some((t, s)));
            }
        }
        Ok(None)
    }
}

#[derive(Debug)]
struct StepOutcome {
    base: Decimal,
    quote: Decimal,
    /// How much of the remaining amount this step consumed.
    consumed: Decimal,
    end_sqrt_price: Decimal,
    hit_target: bool,
}

// 3.3.1: one constant-liquidity segment of the walk, from sqrt_p toward target.
// closed forms for the four (direction, exactness) combinations:
//   price down (selling base):  quote = L * (sqrt_p - s'),  base = L * (sqrt_p - s') / (sqrt_p * s')
//   price up   (buying base):   quote = L * (s' - sqrt_p),  base = L * (s' - sqrt_p) / (sqrt_p * s')
fn compute_step(
    sqrt_p: Decimal,
    target: Decimal,
    liquidity: Decimal,
    remaining: Decimal,
    is_base_to_quote: bool,
    is_exact_input: bool,
) -> StepOutcome {
    if is_base_to_quote {
        let base_full = base_between(liquidity, target, sqrt_p);
        let quote_full = quote_between(liquidity, target, sqrt_p);

        if is_exact_input {
            if remaining >= base_full {
                return StepOutcome {
                    base: base_full,
                    quote: quote_full,
                    consumed: base_full,
                    end_sqrt_price: target,
                    hit_target: true,
                };
            }
            // s' = L * sqrt_p / (L + base_in * sqrt_p)
            let end = liquidity * sqrt_p / (liquidity + remaining * sqrt_p);
            StepOutcome {
                base: remaining,
                quote: quote_between(liquidity, end, sqrt_p),
                consumed: remaining,
                end_sqrt_price: end,
                hit_target: false,
            }
        } else {
            if remaining >= quote_full {
                return StepOutcome {
                    base: base_full,
                    quote: quote_full,
                    consumed: quote_full,
                    end_sqrt_price: target,
                    hit_target: true,
                };
            }
            // s' = sqrt_p - quote_out / L
            let end = sqrt_p - remaining / liquidity;
            StepOutcome {
                base: base_between(liquidity, end, sqrt_p),
                quote: remaining,
                consumed: remaining,
                end_sqrt_price: end,
                hit_target: false,
            }
        }
    } else {
        let base_full = base_between(liquidity, sqrt_p, target);
        let quote_full = quote_between(liquidity, sqrt_p, target);

        if is_exact_input {
            if remaining >= quote_full {
                return StepOutcome {
                    base: base_full,
                    quote: quote_full,
                    consumed: quote_full,
                    end_sqrt_price: target,
                    hit_target: true,
                };
            }
            // s' = sqrt_p + quote_in / L
            let end = sqrt_p + remaining / liquidity;
            StepOutcome {
                base: base_between(liquidity, sqrt_p, end),
                quote: remaining,
                consumed: remaining,
                end_sqrt_price: end,
                hit_target: false,
            }
        } else {
            if remaining >= base_full {
                return StepOutcome {
                    base: base_full,
                    quote: quote_full,
                    consumed: base_full,
                    end_sqrt_price: target,
                    hit_target: true,
                };
            }
            // 1/s' = 1/sqrt_p - base_out / L
            let inv = Decimal::ONE / sqrt_p - remaining / liquidity;
            let end = Decimal::ONE / inv;
            StepOutcome {
                base: remaining,
                quote: quote_between(liquidity, sqrt_p, end),
                consumed: remaining,
                end_sqrt_price: end,
                hit_target: false,
            }
        }
    }
}
