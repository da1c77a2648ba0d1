use serde::Deserialize;

use super::trigger::{locate_trigger_bar, TriggerMiss};
use crate::indicators::{self, AnnotatedSeries, EmaPoint};
use crate::models::{AcceptedSetup, Candidate, PriceSeries, RejectReason, Verdict};

/// Thresholds for the breakout long setup
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LongSetupRules {
    pub fast_span: usize,
    pub slow_span: usize,
    pub min_bars: usize,
    pub min_spread_pct: f64, // Below this the EMAs are too squeezed
    pub max_spread_pct: f64, // Above this the trend is overextended
    pub date_tolerance_days: i64,
}

impl Default for LongSetupRules {
    fn default() -> Self {
        Self {
            fast_span: indicators::FAST_SPAN,
            slow_span: indicators::SLOW_SPAN,
            min_bars: indicators::MIN_BARS,
            min_spread_pct: 0.3,
            max_spread_pct: 1.2,
            date_tolerance_days: 5,
        }
    }
}

impl LongSetupRules {
    /// Compute the EMA pair these rules are evaluated against
    pub fn annotate(&self, series: PriceSeries) -> AnnotatedSeries {
        indicators::annotate_with(series, self.fast_span, self.slow_span, self.min_bars)
    }

    /// Classify one candidate against its annotated history
    pub fn validate(&self, candidate: &Candidate, history: &AnnotatedSeries) -> Verdict {
        if history.series.len() < self.min_bars || !history.is_annotated() {
            return Verdict::Rejected(RejectReason::InsufficientData);
        }

        let signal_date = match candidate.signal_date() {
            Ok(d) => d,
            Err(e) => return Verdict::Rejected(RejectReason::DateError(e.to_string())),
        };

        let trigger = match locate_trigger_bar(
            history.series.bars(),
            signal_date,
            self.date_tolerance_days,
        ) {
            Ok(t) => t,
            Err(TriggerMiss::Outdated { last_bar, gap_days }) => {
                tracing::debug!(
                    "{}: last bar {} is {} days from signal date {}",
                    candidate.symbol,
                    last_bar,
                    gap_days,
                    signal_date
                );
                return Verdict::Rejected(RejectReason::DataOutdated);
            }
            Err(TriggerMiss::NoBars) => return Verdict::Rejected(RejectReason::InsufficientData),
        };

        let Some((bar, ema)) = history.point(trigger.index()) else {
            return Verdict::Rejected(RejectReason::InsufficientData);
        };

        self.evaluate(candidate, bar.close, ema)
    }

    /// Verdict for a candidate at its trigger bar
    ///
    /// Gates run on the bar close; the reported close prefers the candidate's own.
    pub fn evaluate(&self, candidate: &Candidate, bar_close: f64, ema: EmaPoint) -> Verdict {
        let spread_pct = match self.check_gates(candidate, bar_close, ema) {
            Ok(spread) => spread,
            Err(reason) => return Verdict::Rejected(reason),
        };

        Verdict::Accepted(AcceptedSetup {
            symbol: candidate.symbol.clone(),
            stop_loss: candidate.stop_loss.unwrap_or(0.0),
            target: candidate.next_target.unwrap_or(0.0),
            ltp: candidate.ltp,
            close: candidate.close_at_signal.unwrap_or(bar_close),
            fast_ema: ema.fast,
            slow_ema: ema.slow,
            spread_pct,
            is_mtf: candidate.is_mtf,
            is_stage2: candidate.is_stage2,
            note: candidate.note.clone(),
        })
    }

    /// Rule gates in order; the first failing gate is reported
    ///
    /// Returns the EMA spread in percent when every gate passes.
    pub fn check_gates(
        &self,
        candidate: &Candidate,
        close: f64,
        ema: EmaPoint,
    ) -> Result<f64, RejectReason> {
        if !(ema.fast > ema.slow) {
            return Err(RejectReason::EmaCrossBelow);
        }

        if !(close > ema.fast && close > ema.slow) {
            return Err(RejectReason::PriceBelowEmas);
        }

        // Already implied by the previous gate, kept as its own reason code
        if !(close > ema.fast) {
            return Err(RejectReason::CloseBelowFastEma);
        }

        let spread_pct = (ema.fast - ema.slow).abs() / ema.slow * 100.0;
        if spread_pct < self.min_spread_pct {
            return Err(RejectReason::TooSqueezed { spread_pct });
        }
        if spread_pct > self.max_spread_pct {
            return Err(RejectReason::Overextended { spread_pct });
        }

        if !candidate.is_stage2 {
            return Err(RejectReason::NotStage2);
        }

        Ok(spread_pct)
    }
}
