use chrono::NaiveDate;

use crate::models::PriceBar;

/// How the trigger bar was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMatch {
    /// A bar dated on the signal date
    Exact(usize),
    /// No bar on the signal date; the last bar is close enough
    Nearest(usize),
}

impl TriggerMatch {
    pub fn index(&self) -> usize {
        match *self {
            TriggerMatch::Exact(i) | TriggerMatch::Nearest(i) => i,
        }
    }
}

/// Why no trigger bar could be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMiss {
    NoBars,
    Outdated { last_bar: NaiveDate, gap_days: i64 },
}

/// Find the bar the signal refers to
///
/// Prefers the first bar whose date equals `signal_date`. Otherwise falls
/// back to the last bar when it lies within `tolerance_days` calendar days
/// of the signal date, in either direction.
pub fn locate_trigger_bar(
    bars: &[PriceBar],
    signal_date: NaiveDate,
    tolerance_days: i64,
) -> Result<TriggerMatch, TriggerMiss> {
    if let Some(index) = bars.iter().position(|b| b.date() == signal_date) {
        return Ok(TriggerMatch::Exact(index));
    }

    let last = bars.last().ok_or(TriggerMiss::NoBars)?;
    let gap_days = (last.date() - signal_date).num_days().abs();
    if gap_days > tolerance_days {
        return Err(TriggerMiss::Outdated {
            last_bar: last.date(),
            gap_days,
        });
    }

    Ok(TriggerMatch::Nearest(bars.len() - 1))
}
