use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;

use crate::api::{SessionError, SignalClient, SmartApiClient, SymbolMaster};
use crate::batch::{BatchEvent, BatchReport, BatchRunner};
use crate::config::Settings;
use crate::fetcher::{MarketContext, ResilientFetcher, RetryPolicy};

/// Failures that stop a run before any candidate is processed
#[derive(Debug, Error)]
pub enum RunError {
    #[error("No signals found for {date}: {detail}")]
    NoSignals { date: NaiveDate, detail: String },

    #[error("SmartAPI login failed: {0}")]
    Authentication(#[from] SessionError),
}

/// One daily screening run: signals → session → scrip master → batch
pub struct Pipeline {
    signals: SignalClient,
    api: Arc<SmartApiClient>,
    symbols: Arc<SymbolMaster>,
    runner: BatchRunner,
}

impl Pipeline {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let smartapi = &settings.smartapi;
        let api = Arc::new(
            SmartApiClient::new(&smartapi.base_url, smartapi.credentials(), smartapi.timeout_secs)?
                .with_requests_per_second(smartapi.requests_per_second),
        );
        let symbols = Arc::new(SymbolMaster::new(
            &settings.symbol_master.url,
            &settings.symbol_master.cache_path,
            settings.symbol_master.max_age(),
        ));

        let fetcher = ResilientFetcher::new(
            MarketContext::new(api.clone(), symbols.clone()),
            RetryPolicy::from(&settings.retry),
        )
        .with_exchange(&smartapi.exchange)
        .with_interval(&smartapi.interval);

        let runner = BatchRunner::new(Arc::new(fetcher), settings.rules.clone())
            .with_lookback_days(settings.batch.lookback_days)
            .with_inter_candidate_delay(settings.batch.inter_candidate_delay());

        Ok(Self {
            signals: SignalClient::new(&settings.signals.base_url),
            api,
            symbols,
            runner,
        })
    }

    /// Screen every signal the scanner produced for `date`
    ///
    /// Per-candidate failures end up in the report as rejections; only
    /// a missing signal list or a failed login abort the run.
    pub async fn run_for_date<F>(
        &self,
        date: NaiveDate,
        mut on_event: F,
    ) -> Result<BatchReport, RunError>
    where
        F: FnMut(BatchEvent),
    {
        on_event(BatchEvent::status(format!("Fetching signals for {}...", date)));

        let rows = match self.signals.fetch_signals(date).await {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => {
                return Err(fail(
                    RunError::NoSignals {
                        date,
                        detail: "scanner returned an empty list".to_string(),
                    },
                    &mut on_event,
                ))
            }
            Err(e) => {
                return Err(fail(
                    RunError::NoSignals {
                        date,
                        detail: e.to_string(),
                    },
                    &mut on_event,
                ))
            }
        };

        on_event(BatchEvent::status(format!(
            "Found {} signals. Connecting to SmartAPI...",
            rows.len()
        )));

        if let Err(e) = self.api.login().await {
            return Err(fail(RunError::Authentication(e), &mut on_event));
        }

        on_event(BatchEvent::status("Loading scrip master..."));
        if let Err(e) = self.symbols.ensure_fresh().await {
            // Every lookup will miss and be rejected as not found
            tracing::warn!("⚠️  Scrip master unavailable: {}", e);
        }

        Ok(self
            .runner
            .run_with_events(&rows, Some(date), on_event)
            .await)
    }
}

fn fail<F: FnMut(BatchEvent)>(err: RunError, on_event: &mut F) -> RunError {
    tracing::error!("❌ {}", err);
    on_event(BatchEvent::Error {
        message: err.to_string(),
    });
    err
}
