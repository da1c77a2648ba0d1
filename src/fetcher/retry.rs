use std::time::Duration;

use crate::api::CandleResponse;

/// Error codes SmartAPI uses for throttling (and for expired sessions that look like throttling)
const RATE_LIMIT_CODES: &[&str] = &["AB1004", "AB1005", "AB2001"];
const INVALID_TOKEN_CODE: &str = "AG8001";
const INVALID_TOKEN_MESSAGE: &str = "Invalid Token";

/// A failed attempt that the policy may retry
#[derive(Debug, Clone, PartialEq)]
pub enum Retryable {
    RateLimited { code: String },
    InvalidIdentifier { message: String },
    Transport(String),
}

impl std::fmt::Display for Retryable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { code } => write!(f, "rate limited ({})", code),
            Self::InvalidIdentifier { message } => write!(f, "invalid identifier ({})", message),
            Self::Transport(detail) => write!(f, "transport error ({})", detail),
        }
    }
}

/// A decoded candle response sorted into what the fetcher does next
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Success(Vec<Vec<serde_json::Value>>),
    Retry(Retryable),
    Terminal { message: String, code: String },
}

pub fn classify(response: CandleResponse) -> Classified {
    if response.status {
        if let Some(rows) = response.data.filter(|rows| !rows.is_empty()) {
            return Classified::Success(rows);
        }
    }

    let code = response.errorcode.unwrap_or_default();
    let message = response
        .message
        .unwrap_or_else(|| "Unknown API Error".to_string());

    if RATE_LIMIT_CODES.contains(&code.as_str()) {
        return Classified::Retry(Retryable::RateLimited { code });
    }

    if code == INVALID_TOKEN_CODE || message.contains(INVALID_TOKEN_MESSAGE) {
        return Classified::Retry(Retryable::InvalidIdentifier { message });
    }

    Classified::Terminal { message, code }
}

/// What to do after a retryable failure
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStep {
    Retry {
        delay: Duration,
        /// Re-authenticate after the delay
        relogin: bool,
        /// Re-download the symbol table and re-resolve before the delay
        refresh_symbols: bool,
    },
    GiveUp,
}

/// Bounded, self-healing retry policy for the historical candle API
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_delay: Duration,
    pub invalid_identifier_delay: Duration,
    pub transport_delay: Duration,
    /// Attempt number after which a rate-limited request re-authenticates
    pub relogin_on_attempt: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limit_delay: Duration::from_secs(5),
            invalid_identifier_delay: Duration::from_secs(2),
            transport_delay: Duration::from_secs(2),
            relogin_on_attempt: 3,
        }
    }
}

impl RetryPolicy {
    /// Same escalation rules, no waiting
    pub fn immediate() -> Self {
        Self {
            rate_limit_delay: Duration::ZERO,
            invalid_identifier_delay: Duration::ZERO,
            transport_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Decide the step after `attempt` (1-based) failed with `failure`
    pub fn next_step(&self, attempt: u32, failure: &Retryable) -> RetryStep {
        if attempt >= self.max_attempts {
            return RetryStep::GiveUp;
        }

        match failure {
            Retryable::RateLimited { .. } => RetryStep::Retry {
                delay: self.rate_limit_delay,
                relogin: attempt == self.relogin_on_attempt,
                refresh_symbols: false,
            },
            Retryable::InvalidIdentifier { .. } => RetryStep::Retry {
                delay: self.invalid_identifier_delay,
                relogin: false,
                refresh_symbols: true,
            },
            Retryable::Transport(_) => RetryStep::Retry {
                delay: self.transport_delay,
                relogin: false,
                refresh_symbols: false,
            },
        }
    }
}
