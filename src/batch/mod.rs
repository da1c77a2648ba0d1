use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::fetcher::BarSource;
use crate::models::{AcceptedSetup, Candidate, RejectReason, Rejection, SignalRow, Verdict};
use crate::strategy::LongSetupRules;

/// Progress events, serialized one JSON object per line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Status {
        message: String,
    },
    Progress {
        value: f64,
        message: String,
        current_symbol: String,
    },
    MatchFound {
        data: AcceptedSetup,
    },
    MatchRejected {
        message: String,
        current_symbol: String,
    },
    Complete {
        valid_count: usize,
        rejected_count: usize,
        valid_trades: Vec<AcceptedSetup>,
    },
    Error {
        message: String,
    },
}

impl BatchEvent {
    pub fn status(message: impl Into<String>) -> Self {
        BatchEvent::Status {
            message: message.into(),
        }
    }

    pub fn to_ndjson(&self) -> String {
        // Serializing these plain structs cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Outcome of one batch: every candidate appears exactly once
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub date: Option<NaiveDate>,
    pub accepted: Vec<AcceptedSetup>,
    pub rejected: Vec<Rejection>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }
}

/// Runs fetch → annotate → validate over a candidate list, one at a time
///
/// Candidates are never processed concurrently: the upstream rate limit is
/// per session and the retry policy assumes it is the only requester.
pub struct BatchRunner {
    source: Arc<dyn BarSource>,
    rules: LongSetupRules,
    lookback_days: i64,
    inter_candidate_delay: Duration,
}

impl BatchRunner {
    pub fn new(source: Arc<dyn BarSource>, rules: LongSetupRules) -> Self {
        Self {
            source,
            rules,
            lookback_days: 60,
            inter_candidate_delay: Duration::from_secs(1),
        }
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_inter_candidate_delay(mut self, delay: Duration) -> Self {
        self.inter_candidate_delay = delay;
        self
    }

    pub async fn run(&self, candidates: &[Candidate]) -> BatchReport {
        let rows: Vec<SignalRow> = candidates.iter().cloned().map(SignalRow::from).collect();
        self.run_with_events(&rows, None, |_| {}).await
    }

    /// Process every signal row in order, reporting through `on_event`
    pub async fn run_with_events<F>(
        &self,
        rows: &[SignalRow],
        date: Option<NaiveDate>,
        mut on_event: F,
    ) -> BatchReport
    where
        F: FnMut(BatchEvent),
    {
        let run_id = Uuid::new_v4();
        let total = rows.len();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        tracing::info!("📋 Batch {} started: {} candidates", run_id, total);

        for (i, row) in rows.iter().enumerate() {
            on_event(BatchEvent::Progress {
                value: (i + 1) as f64 / total as f64 * 100.0,
                message: format!("Processing {} ({}/{})...", row.symbol(), i + 1, total),
                current_symbol: row.symbol().to_string(),
            });

            match self.process(row).await {
                Verdict::Accepted(setup) => {
                    tracing::info!(
                        "✅ {} accepted: spread {:.2}%, SL {:.2}, target {:.2}",
                        setup.symbol,
                        setup.spread_pct,
                        setup.stop_loss,
                        setup.target
                    );
                    on_event(BatchEvent::MatchFound {
                        data: setup.clone(),
                    });
                    accepted.push(setup);
                }
                Verdict::Rejected(reason) => {
                    tracing::info!("❌ {} rejected: {}", row.symbol(), reason);
                    on_event(BatchEvent::MatchRejected {
                        message: reason.to_string(),
                        current_symbol: row.symbol().to_string(),
                    });
                    rejected.push(Rejection {
                        symbol: row.symbol().to_string(),
                        reason,
                    });
                }
            }

            if i + 1 < total && !self.inter_candidate_delay.is_zero() {
                tokio::time::sleep(self.inter_candidate_delay).await;
            }
        }

        tracing::info!(
            "📊 Batch {} complete: {} accepted, {} rejected",
            run_id,
            accepted.len(),
            rejected.len()
        );

        on_event(BatchEvent::Complete {
            valid_count: accepted.len(),
            rejected_count: rejected.len(),
            valid_trades: accepted.clone(),
        });

        BatchReport {
            run_id,
            date,
            accepted,
            rejected,
        }
    }

    /// One row to exactly one verdict; failures become rejections
    async fn process(&self, row: &SignalRow) -> Verdict {
        let candidate = match row {
            SignalRow::Valid(candidate) => candidate,
            SignalRow::Malformed { detail, .. } => {
                return Verdict::Rejected(RejectReason::Error(format!(
                    "malformed signal row: {}",
                    detail
                )))
            }
        };

        let to = match candidate.signal_datetime() {
            Ok(t) => t,
            Err(e) => {
                return Verdict::Rejected(RejectReason::Error(format!(
                    "unparseable signal time {:?}: {}",
                    candidate.signal_time, e
                )))
            }
        };
        let from = to - ChronoDuration::days(self.lookback_days);

        let series = match self.source.fetch_bars(&candidate.symbol, from, to).await {
            Ok(series) => series,
            Err(e) => return Verdict::Rejected(RejectReason::NoData(e.to_string())),
        };

        let history = self.rules.annotate(series);
        self.rules.validate(candidate, &history)
    }
}
