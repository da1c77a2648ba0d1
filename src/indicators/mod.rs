// Trend indicators for the long-setup rules
// Fast/slow EMA pair over daily closes

pub mod moving_average;

pub use moving_average::ema_series;

use crate::models::{PriceBar, PriceSeries};

/// Bars needed before any indicator is computed
pub const MIN_BARS: usize = 20;

pub const FAST_SPAN: usize = 9;
pub const SLOW_SPAN: usize = 20;

/// EMA pair for a single bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaPoint {
    pub fast: f64,
    pub slow: f64,
}

/// Price series plus EMA values aligned 1:1 with its bars
///
/// `indicators` stays empty when the series is shorter than the warm-up.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedSeries {
    pub series: PriceSeries,
    pub indicators: Vec<EmaPoint>,
}

impl AnnotatedSeries {
    pub fn is_annotated(&self) -> bool {
        !self.indicators.is_empty() && self.indicators.len() == self.series.len()
    }

    /// Bar and its indicator values at `index`
    pub fn point(&self, index: usize) -> Option<(&PriceBar, EmaPoint)> {
        let bar = self.series.bars().get(index)?;
        let ema = self.indicators.get(index)?;
        Some((bar, *ema))
    }
}

/// Annotate with the default 9/20 EMA pair
pub fn annotate(series: PriceSeries) -> AnnotatedSeries {
    annotate_with(series, FAST_SPAN, SLOW_SPAN, MIN_BARS)
}

pub fn annotate_with(
    series: PriceSeries,
    fast_span: usize,
    slow_span: usize,
    min_bars: usize,
) -> AnnotatedSeries {
    if series.len() < min_bars {
        return AnnotatedSeries {
            series,
            indicators: Vec::new(),
        };
    }

    let closes = series.closes();
    let fast = ema_series(&closes, fast_span);
    let slow = ema_series(&closes, slow_span);

    let indicators = fast
        .into_iter()
        .zip(slow)
        .map(|(fast, slow)| EmaPoint { fast, slow })
        .collect();

    AnnotatedSeries { series, indicators }
}
