// 4.0: index price oracle. the venue is agnostic to where index prices come from
// (an NFT floor-price feed, a CEX aggregator, a keeper network); it only asks for
// a time-weighted price over an averaging window. window 0 means spot.

use crate::types::{Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OracleError {
    #[error("no price observation available")]
    NoPriceAvailable,

    #[error("newest observation is {age_secs}s old, max allowed {max_age_secs}s")]
    StalePrice { age_secs: i64, max_age_secs: i64 },
}

/// Read-only index price capability consumed by the venue.
pub trait PriceOracle {
    /// Time-weighted index price over the trailing window. `window_secs = 0` = spot.
    fn get_index_price(&self, window_secs: i64, now: Timestamp) -> Result<Price, OracleError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Observation {
    timestamp: Timestamp,
    price: Price,
}

// 4.1: ring buffer of observations with time-weighted averaging. the shipped
// implementation; tests and the sim push observations into it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOracle {
    observations: VecDeque<Observation>,
    max_observations: usize,
    /// Newest observation older than this is stale.
    max_age_secs: i64,
}

impl IndexOracle {
    pub fn new(max_age_secs: i64) -> Self {
        Self {
            observations: VecDeque::new(),
            max_observations: 1024,
            max_age_secs,
        }
    }

    pub fn with_price(price: Price, timestamp: Timestamp, max_age_secs: i64) -> Self {
        let mut oracle = Self::new(max_age_secs);
        oracle.push(price, timestamp);
        oracle
    }

    pub fn push(&mut self, price: Price, timestamp: Timestamp) {
        // observations must be pushed in time order; a same-second update replaces
        if let Some(last) = self.observations.back_mut() {
            if last.timestamp == timestamp {
                last.price = price;
                return;
            }
            debug_assert!(last.timestamp < timestamp);
        }
        self.observations.push_back(Observation { timestamp, price });
        while self.observations.len() > self.max_observations {
            self.observations.pop_front();
        }
    }

    fn check_freshness(&self, now: Timestamp) -> Result<Observation, OracleError> {
        let newest = self
            .observations
            .back()
            .copied()
            .ok_or(OracleError::NoPriceAvailable)?;
        let age = newest.timestamp.elapsed_secs(&now);
        if age > self.max_age_secs {
            return Err(OracleError::StalePrice {
                age_secs: age,
                max_age_secs: self.max_age_secs,
            });
        }
        Ok(newest)
    }
}

impl PriceOracle for IndexOracle {
    fn get_index_price(&self, window_secs: i64, now: Timestamp) -> Result<Price, OracleError> {
        let newest = self.check_freshness(now)?;
        if window_secs <= 0 {
            return Ok(newest.price);
        }

        let window_start = now.as_secs() - window_secs;

        // integrate price over [window_start, now]; each observation holds until
        // the next one
        let mut weighted = Decimal::ZERO;
        let mut covered: i64 = 0;

        let obs: Vec<Observation> = self.observations.iter().copied().collect();
        for (i, o) in obs.iter().enumerate() {
            let seg_start = o.timestamp.as_secs().max(window_start);
            let seg_end = obs
                .get(i + 1)
                .map(|n| n.timestamp.as_secs())
                .unwrap_or(now.as_secs())
                .min(now.as_secs());
            if seg_end <= seg_start {
                continue;
            }
            let span = seg_end - seg_start;
            weighted += o.price.value() * Decimal::from(span);
            covered += span;
        }

        if covered == 0 {
            // the whole window predates the first observation
            return Ok(newest.price);
        }

        // if the window starts before the first observation, the earliest price
        // backfills the gap
        if let Some(first) = obs.first() {
            let gap = first.timestamp.as_secs() - window_start;
            if gap > 0 {
                weighted += first.price.value() * Decimal::from(gap);
                covered += gap;
            }
        }

        let avg = weighted / Decimal::from(covered);
        Ok(Price::new_unchecked(avg))
    }
}
