//! Historical bar retrieval that absorbs an unreliable upstream.
//!
//! The SmartAPI historical endpoint throttles aggressively, silently expires
//! sessions (which then surface as throttling errors) and occasionally
//! rejects symbol tokens that went stale in the cached scrip master. The
//! [`ResilientFetcher`] runs every request through a [`RetryPolicy`] that
//! heals these cases instead of backing off blindly.

pub mod parse;
pub mod retry;

pub use parse::parse_rows;
pub use retry::{classify, Classified, RetryPolicy, RetryStep, Retryable};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;

use crate::api::{CandleRequest, CandleResponse, SessionError, SymbolMasterError, TransportError};
use crate::models::{PriceSeries, SeriesError};

const REQUEST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Upstream candle endpoint plus the session behind it
#[async_trait]
pub trait CandleApi: Send + Sync {
    async fn candle_data(&self, request: &CandleRequest) -> Result<CandleResponse, TransportError>;

    /// Replace the current session; later requests use the new one
    async fn relogin(&self) -> Result<(), SessionError>;
}

/// Symbol → instrument token lookup
#[async_trait]
pub trait SymbolResolver: Send + Sync {
    async fn resolve(&self, symbol: &str) -> Option<String>;

    /// Re-download the whole table and swap it in atomically
    async fn refresh(&self) -> Result<(), SymbolMasterError>;
}

/// Anything that can produce a bar series for a symbol and window
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn fetch_bars(
        &self,
        symbol: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<PriceSeries, FetchError>;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("Token Not Found for {symbol}")]
    NotFound { symbol: String },

    #[error("API Error: {message} ({code})")]
    Api { message: String, code: String },

    #[error("Exception: {0}")]
    Transport(String),

    #[error("Max Retries Exceeded")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("malformed candle row {index}: {detail}")]
    MalformedRow { index: usize, detail: String },

    #[error("invalid candle series: {0}")]
    InvalidSeries(#[from] SeriesError),
}

/// Shared upstream state for a run: the authenticated session and the symbol table
#[derive(Clone)]
pub struct MarketContext {
    pub api: Arc<dyn CandleApi>,
    pub symbols: Arc<dyn SymbolResolver>,
}

impl MarketContext {
    pub fn new(api: Arc<dyn CandleApi>, symbols: Arc<dyn SymbolResolver>) -> Self {
        Self { api, symbols }
    }
}

pub struct ResilientFetcher {
    context: MarketContext,
    policy: RetryPolicy,
    exchange: String,
    interval: String,
}

impl ResilientFetcher {
    pub fn new(context: MarketContext, policy: RetryPolicy) -> Self {
        Self {
            context,
            policy,
            exchange: "NSE".to_string(),
            interval: "ONE_DAY".to_string(),
        }
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch bars for `symbol` between `from` and `to`
    pub async fn fetch(
        &self,
        symbol: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<PriceSeries, FetchError> {
        let token = self.resolve(symbol).await?;

        let mut request = CandleRequest {
            exchange: self.exchange.clone(),
            symbol_token: token,
            interval: self.interval.clone(),
            from_date: from.format(REQUEST_TIME_FORMAT).to_string(),
            to_date: to.format(REQUEST_TIME_FORMAT).to_string(),
        };

        for attempt in 1..=self.policy.max_attempts {
            let failure = match self.context.api.candle_data(&request).await {
                Ok(response) => match classify(response) {
                    Classified::Success(rows) => {
                        if attempt > 1 {
                            tracing::info!("✓ [{}] fetched after {} attempts", symbol, attempt);
                        }
                        return parse_rows(symbol, rows);
                    }
                    Classified::Terminal { message, code } => {
                        return Err(FetchError::Api { message, code });
                    }
                    Classified::Retry(failure) => failure,
                },
                Err(e) => Retryable::Transport(e.to_string()),
            };

            let (delay, relogin, refresh_symbols) = match self.policy.next_step(attempt, &failure) {
                RetryStep::Retry {
                    delay,
                    relogin,
                    refresh_symbols,
                } => (delay, relogin, refresh_symbols),
                RetryStep::GiveUp => {
                    tracing::warn!("[{}] giving up after {} attempts: {}", symbol, attempt, failure);
                    return Err(match failure {
                        Retryable::Transport(detail) => FetchError::Transport(detail),
                        _ => FetchError::MaxRetriesExceeded { attempts: attempt },
                    });
                }
            };

            tracing::warn!(
                "[{}] {}, attempt {}/{}, retrying in {:?}",
                symbol,
                failure,
                attempt,
                self.policy.max_attempts,
                delay
            );

            if refresh_symbols {
                tracing::warn!("[{}] refreshing scrip master after token rejection", symbol);
                if let Err(e) = self.context.symbols.refresh().await {
                    tracing::warn!("Scrip master refresh failed, keeping current table: {}", e);
                }
                request.symbol_token = self.resolve(symbol).await?;
            }

            tokio::time::sleep(delay).await;

            if relogin {
                tracing::warn!("[{}] re-establishing session after repeated rate limiting", symbol);
                if let Err(e) = self.context.api.relogin().await {
                    tracing::warn!("Re-login failed: {}", e);
                }
            }
        }

        Err(FetchError::MaxRetriesExceeded {
            attempts: self.policy.max_attempts,
        })
    }

    async fn resolve(&self, symbol: &str) -> Result<String, FetchError> {
        self.context
            .symbols
            .resolve(symbol)
            .await
            .ok_or_else(|| FetchError::NotFound {
                symbol: symbol.to_string(),
            })
    }
}

#[async_trait]
impl BarSource for ResilientFetcher {
    async fn fetch_bars(
        &self,
        symbol: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<PriceSeries, FetchError> {
        self.fetch(symbol, from, to).await
    }
}
