//! Stacked imbalance detection
//!
//! Scans a finished footprint bar for runs of consecutive price levels
//! where one side's volume dominates the other by at least the configured
//! ratio. Consecutive means adjacent in the bar's price-sorted level list.

use crate::indicators::footprint::FootprintBar;
use crate::market::Side;
use rust_decimal::Decimal;
use serde::Serialize;

/// A single imbalanced price level
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Imbalance {
    pub price: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub direction: Side,
    /// Dominant/opposite ratio; `None` when the opposite side is zero
    pub ratio: Option<Decimal>,
}

impl Imbalance {
    fn dominant_volume(&self) -> Decimal {
        match self.direction {
            Side::Buy => self.buy_volume,
            Side::Sell => self.sell_volume,
        }
    }
}

/// A run of >= `min_consecutive` same-direction imbalances
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackedImbalance {
    pub direction: Side,
    pub start_price: Decimal,
    pub end_price: Decimal,
    pub level_count: usize,
    pub total_volume: Decimal,
    /// Mean ratio over levels where the ratio is finite
    pub avg_ratio: Option<Decimal>,
    pub levels: Vec<Imbalance>,
}

impl StackedImbalance {
    fn from_stack(direction: Side, levels: Vec<Imbalance>) -> Self {
        let total_volume = levels.iter().map(|i| i.dominant_volume()).sum();
        let ratios: Vec<Decimal> = levels.iter().filter_map(|i| i.ratio).collect();
        let avg_ratio = if ratios.is_empty() {
            None
        } else {
            Some(ratios.iter().copied().sum::<Decimal>() / Decimal::from(ratios.len() as i64))
        };

        Self {
            direction,
            start_price: levels.first().map(|i| i.price).unwrap_or_default(),
            end_price: levels.last().map(|i| i.price).unwrap_or_default(),
            level_count: levels.len(),
            total_volume,
            avg_ratio,
            levels,
        }
    }
}

/// Detector configured with the ratio threshold and minimum stack length
#[derive(Debug, Clone)]
pub struct ImbalanceDetector {
    pub ratio_threshold: Decimal,
    pub min_consecutive: usize,
}

impl ImbalanceDetector {
    pub fn new(ratio_threshold: Decimal, min_consecutive: usize) -> Self {
        Self {
            ratio_threshold,
            min_consecutive,
        }
    }

    /// Classify one level; `None` when neither side dominates
    pub fn classify(&self, price: Decimal, buy_volume: Decimal, sell_volume: Decimal) -> Option<Imbalance> {
        if buy_volume.is_zero() && sell_volume.is_zero() {
            return None;
        }

        if sell_volume > Decimal::ZERO && buy_volume / sell_volume >= self.ratio_threshold {
            return Some(Imbalance {
                price,
                buy_volume,
                sell_volume,
                direction: Side::Buy,
                ratio: Some(buy_volume / sell_volume),
            });
        }
        if buy_volume > Decimal::ZERO && sell_volume / buy_volume >= self.ratio_threshold {
            return Some(Imbalance {
                price,
                buy_volume,
                sell_volume,
                direction: Side::Sell,
                ratio: Some(sell_volume / buy_volume),
            });
        }
        // One side entirely absent always qualifies
        if sell_volume.is_zero() && buy_volume > Decimal::ZERO {
            return Some(Imbalance {
                price,
                buy_volume,
                sell_volume,
                direction: Side::Buy,
                ratio: None,
            });
        }
        if buy_volume.is_zero() && sell_volume > Decimal::ZERO {
            return Some(Imbalance {
                price,
                buy_volume,
                sell_volume,
                direction: Side::Sell,
                ratio: None,
            });
        }

        None
    }

    /// Find all stacked imbalances in a bar, walking levels by ascending
    /// price. A level that is absent from the bar or fails the ratio test
    /// breaks the run; direction changes start a new run.
    pub fn find_stacked(&self, bar: &FootprintBar) -> Vec<StackedImbalance> {
        let mut stacks = Vec::new();
        let mut run: Vec<Imbalance> = Vec::new();
        let mut run_direction: Option<Side> = None;

        for (price, level) in &bar.levels {
            let classified = self.classify(*price, level.buy_volume, level.sell_volume);

            match classified {
                Some(imbalance) => {
                    if run_direction == Some(imbalance.direction) || run_direction.is_none() {
                        run_direction = Some(imbalance.direction);
                        run.push(imbalance);
                    } else {
                        self.emit(&mut stacks, run_direction, std::mem::take(&mut run));
                        run_direction = Some(imbalance.direction);
                        run.push(imbalance);
                    }
                }
                None => {
                    self.emit(&mut stacks, run_direction, std::mem::take(&mut run));
                    run_direction = None;
                }
            }
        }
        self.emit(&mut stacks, run_direction, run);

        stacks
    }

    fn emit(
        &self,
        stacks: &mut Vec<StackedImbalance>,
        direction: Option<Side>,
        run: Vec<Imbalance>,
    ) {
        if let Some(direction) = direction {
            if run.len() >= self.min_consecutive {
                stacks.push(StackedImbalance::from_stack(direction, run));
            }
        }
    }
}
