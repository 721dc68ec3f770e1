//! FIFO tax lot engine
//!
//! Deterministic realized/unrealized gain computation over a BUY/SELL
//! history. One oldest-first lot queue per symbol; sells consume from the
//! front and split lots in place.
//!
//! Holding period uses `(sell_date - buy_date) > 365 days` as "held more
//! than one year". This is a calendar approximation: a lot bought on a
//! leap day or held across February 29 may classify one day differently
//! from the statutory anniversary rule.

use crate::error::AgentError;
use crate::models::{Activity, ActivityType};
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Float residue left by lot arithmetic, relative to the quantity involved
const RESIDUE_RATIO: f64 = 1e-9;

/// Days a lot must be held, strictly exceeded, to be long-term
pub const LONG_TERM_DAYS: i64 = 365;

/// Matched fragments returned to callers
pub const MAX_REPORTED_LOTS: usize = 50;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String")]
pub enum LotMethod {
    #[default]
    #[serde(rename = "FIFO")]
    Fifo,
}

/// A purchase lot, or a matched fragment of one once sell fields are set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaxLot {
    pub symbol: String,
    pub buy_date: NaiveDate,
    pub quantity: f64,
    pub cost_basis: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proceeds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_long_term: Option<bool>,
}

impl TaxLot {
    fn open(activity: &Activity) -> Self {
        Self {
            symbol: activity.symbol.clone(),
            buy_date: activity.date,
            quantity: activity.quantity,
            cost_basis: (activity.gross_amount() + activity.fee).max(0.0),
            sell_date: None,
            proceeds: None,
            gain_loss: None,
            is_long_term: None,
        }
    }

    pub fn unit_cost_basis(&self) -> f64 {
        if self.quantity <= 0.0 {
            0.0
        } else {
            self.cost_basis / self.quantity
        }
    }
}

/// Sell quantity for which no open lot existed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedSell {
    pub symbol: String,
    pub sell_date: NaiveDate,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaxLotReport {
    pub tax_year: i32,
    pub lot_method: LotMethod,
    pub realized_gain: f64,
    pub short_term_gain: f64,
    pub long_term_gain: f64,
    /// Number of matched fragments across all symbols
    pub matched_lots: usize,
    pub unrealized_cost_basis: f64,
    /// Most recent matched fragments, oldest first
    pub lots: Vec<TaxLot>,
    pub truncated: bool,
    pub unmatched_sells: Vec<UnmatchedSell>,
}

/// Run FIFO lot matching for one tax year.
///
/// Sells before the year deplete lots silently, sells inside the year are
/// reported, later sells are ignored. Buys are queued whatever their date.
pub fn compute_fifo(
    activities: &[Activity],
    tax_year: i32,
    method: LotMethod,
) -> Result<TaxLotReport> {
    let year_start = NaiveDate::from_ymd_opt(tax_year, 1, 1)
        .ok_or_else(|| AgentError::ValidationError(format!("Invalid tax year {}", tax_year)))?;
    let year_end = NaiveDate::from_ymd_opt(tax_year, 12, 31)
        .ok_or_else(|| AgentError::ValidationError(format!("Invalid tax year {}", tax_year)))?;

    let mut events: Vec<&Activity> = activities
        .iter()
        .filter(|a| matches!(a.activity_type, ActivityType::Buy | ActivityType::Sell))
        .collect();

    for activity in &events {
        validate_activity(activity)?;
    }

    // Stable: same-day buys keep input order and precede same-day sells.
    events.sort_by_key(|a| (a.date, a.activity_type == ActivityType::Sell));

    let mut queues: BTreeMap<String, VecDeque<TaxLot>> = BTreeMap::new();
    let mut fragments: Vec<TaxLot> = Vec::new();
    let mut unmatched_sells = Vec::new();

    for activity in events {
        match activity.activity_type {
            ActivityType::Buy if activity.quantity <= 0.0 => {
                warn!(
                    symbol = %activity.symbol,
                    date = %activity.date,
                    fee = activity.fee,
                    "Skipping zero-quantity buy"
                );
            }
            ActivityType::Buy => {
                queues
                    .entry(activity.symbol.clone())
                    .or_default()
                    .push_back(TaxLot::open(activity));
            }
            ActivityType::Sell if activity.date > year_end => {}
            ActivityType::Sell => {
                let queue = queues.entry(activity.symbol.clone()).or_default();
                let report = activity.date >= year_start;
                let matched = consume_fifo(queue, activity);
                let matched_quantity: f64 = matched.iter().map(|lot| lot.quantity).sum();
                let remaining = activity.quantity - matched_quantity;

                if report {
                    if remaining > activity.quantity * RESIDUE_RATIO {
                        warn!(
                            symbol = %activity.symbol,
                            quantity = remaining,
                            "Sell exceeds open lots"
                        );
                        unmatched_sells.push(UnmatchedSell {
                            symbol: activity.symbol.clone(),
                            sell_date: activity.date,
                            quantity: remaining,
                        });
                    }
                    fragments.extend(matched);
                }
            }
            _ => {}
        }
    }

    let mut realized_gain = 0.0;
    let mut short_term_gain = 0.0;
    let mut long_term_gain = 0.0;

    for fragment in &fragments {
        let gain = fragment.gain_loss.unwrap_or(0.0);
        realized_gain += gain;
        if fragment.is_long_term == Some(true) {
            long_term_gain += gain;
        } else {
            short_term_gain += gain;
        }
    }

    let unrealized_cost_basis: f64 = queues
        .values()
        .flat_map(|queue| queue.iter())
        .map(|lot| lot.cost_basis)
        .sum();

    let matched_lots = fragments.len();
    let truncated = matched_lots > MAX_REPORTED_LOTS;
    let lots = fragments.split_off(matched_lots.saturating_sub(MAX_REPORTED_LOTS));

    debug!(
        tax_year,
        matched_lots,
        realized_gain,
        unrealized_cost_basis,
        "FIFO lot matching completed"
    );

    Ok(TaxLotReport {
        tax_year,
        lot_method: method,
        realized_gain,
        short_term_gain,
        long_term_gain,
        matched_lots,
        unrealized_cost_basis,
        lots,
        truncated,
        unmatched_sells,
    })
}

/// Match `sell` against the front of `queue`, splitting the last lot
/// touched when it is larger than what remains to be sold.
fn consume_fifo(queue: &mut VecDeque<TaxLot>, sell: &Activity) -> Vec<TaxLot> {
    let mut fragments = Vec::new();
    let mut remaining = sell.quantity;
    let residue = sell.quantity * RESIDUE_RATIO;
    let proceeds_per_unit = if sell.quantity > 0.0 {
        (sell.gross_amount() - sell.fee) / sell.quantity
    } else {
        0.0
    };

    while remaining > residue {
        let Some(lot) = queue.front_mut() else {
            break;
        };

        // A whole lot carries its full basis so nothing is lost to rounding
        let whole_lot = remaining >= lot.quantity * (1.0 - RESIDUE_RATIO);
        let (matched_quantity, cost_basis) = if whole_lot {
            (lot.quantity, lot.cost_basis)
        } else {
            (remaining, lot.unit_cost_basis() * remaining)
        };
        let proceeds = proceeds_per_unit * matched_quantity;
        let held_days = (sell.date - lot.buy_date).num_days();

        fragments.push(TaxLot {
            symbol: lot.symbol.clone(),
            buy_date: lot.buy_date,
            quantity: matched_quantity,
            cost_basis,
            sell_date: Some(sell.date),
            proceeds: Some(proceeds),
            gain_loss: Some(proceeds - cost_basis),
            is_long_term: Some(held_days > LONG_TERM_DAYS),
        });

        remaining = (remaining - matched_quantity).max(0.0);
        if whole_lot {
            queue.pop_front();
        } else {
            lot.quantity -= matched_quantity;
            lot.cost_basis = (lot.cost_basis - cost_basis).max(0.0);
        }
    }

    fragments
}

fn validate_activity(activity: &Activity) -> Result<()> {
    if !activity.quantity.is_finite() || activity.quantity < 0.0 {
        return Err(AgentError::ValidationError(format!(
            "{} {} on {} has invalid quantity {}",
            activity.activity_type, activity.symbol, activity.date, activity.quantity
        )));
    }
    if !activity.unit_price.is_finite() || activity.unit_price < 0.0 {
        return Err(AgentError::ValidationError(format!(
            "{} {} on {} has invalid price {}",
            activity.activity_type, activity.symbol, activity.date, activity.unit_price
        )));
    }
    if !activity.fee.is_finite() || activity.fee < 0.0 {
        return Err(AgentError::ValidationError(format!(
            "{} {} on {} has invalid fee {}",
            activity.activity_type, activity.symbol, activity.date, activity.fee
        )));
    }
    Ok(())
}

impl FromStr for LotMethod {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "FIFO" => Ok(LotMethod::Fifo),
            other => Err(AgentError::ValidationError(format!(
                "Unsupported lot method '{}', only FIFO is available",
                other
            ))),
        }
    }
}

impl TryFrom<String> for LotMethod {
    type Error = AgentError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for LotMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LotMethod::Fifo => write!(f, "FIFO"),
        }
    }
}

//
// ================= Tests =================
//
