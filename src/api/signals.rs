use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::models::SignalRow;

pub const SIGNALS_API_BASE: &str = "https://brkpoint.in";
const SIGNALS_PATH: &str = "/api/smc-scanner/signals";

#[derive(Debug, Error)]
pub enum SignalSourceError {
    #[error("signal request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("signal source returned HTTP {0}")]
    Status(u16),

    #[error("signal response has no results")]
    MissingResults,
}

#[derive(Debug, Deserialize)]
struct SignalsResponse {
    #[serde(default)]
    results: Option<Vec<serde_json::Value>>,
}

/// Client for the breakout scanner's daily signal list
#[derive(Clone)]
pub struct SignalClient {
    client: Client,
    base_url: String,
}

impl SignalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get all candidates the scanner produced for `date`
    /// Endpoint: GET /api/smc-scanner/signals?date=YYYY-MM-DD
    ///
    /// Rows that do not decode come back as `SignalRow::Malformed`.
    pub async fn fetch_signals(&self, date: NaiveDate) -> Result<Vec<SignalRow>, SignalSourceError> {
        let url = format!("{}{}", self.base_url, SIGNALS_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[("date", date.format("%Y-%m-%d").to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SignalSourceError::Status(response.status().as_u16()));
        }

        let body: SignalsResponse = response.json().await?;
        let rows: Vec<SignalRow> = body
            .results
            .ok_or(SignalSourceError::MissingResults)?
            .into_iter()
            .map(SignalRow::from_value)
            .collect();

        let malformed = rows
            .iter()
            .filter(|r| matches!(r, SignalRow::Malformed { .. }))
            .count();
        if malformed > 0 {
            tracing::warn!("⚠️  {} of {} signal rows could not be decoded", malformed, rows.len());
        }

        tracing::info!("Fetched {} signals for {}", rows.len(), date);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;
    use mockito::Matcher;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_signals() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", SIGNALS_PATH)
            .match_query(Matcher::UrlEncoded("date".into(), "2026-01-02".into()))
            .with_status(200)
            .with_body(
                json!({
                    "results": [
                        {
                            "tradingsymbol": "SAIL",
                            "date": "2026-01-01T18:30:00.000Z",
                            "ltp": 121.4,
                            "stop_loss": 115.0,
                            "next_target": 130.0,
                            "is_stage2": true,
                            "is_mtf": false,
                            "note": "New"
                        },
                        {"tradingsymbol": "ABCAPITAL", "date": "2026-01-01T18:30:00.000Z", "ltp": 250.0}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let rows = SignalClient::new(server.url()).fetch_signals(date()).await.unwrap();
        mock.assert_async().await;

        let candidates: Vec<&Candidate> = rows
            .iter()
            .filter_map(|r| match r {
                SignalRow::Valid(c) => Some(c),
                SignalRow::Malformed { .. } => None,
            })
            .collect();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].symbol, "SAIL");
        assert_eq!(candidates[0].stop_loss, Some(115.0));
        assert!(candidates[0].is_stage2);
        assert_eq!(candidates[1].next_target, None);
    }

    #[tokio::test]
    async fn test_bad_row_does_not_drop_the_others() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", SIGNALS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "results": [
                        {"tradingsymbol": "SAIL", "date": "2026-01-01T18:30:00.000Z", "ltp": 121.4, "is_stage2": true},
                        {"tradingsymbol": "IDEA", "date": "2026-01-01T18:30:00.000Z", "ltp": 7.2,
                         "is_mtf": null, "note": null},
                        {"tradingsymbol": "YESBANK", "date": "2026-01-01T18:30:00.000Z", "ltp": {"v": 1}}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let rows = SignalClient::new(server.url()).fetch_signals(date()).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert!(matches!(&rows[0], SignalRow::Valid(c) if c.symbol == "SAIL" && c.is_stage2));
        assert!(matches!(&rows[1], SignalRow::Valid(c) if !c.is_mtf && c.note.is_empty()));
        assert!(matches!(&rows[2], SignalRow::Malformed { symbol, .. } if symbol == "YESBANK"));
    }

    #[tokio::test]
    async fn test_missing_results_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", SIGNALS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"message": "no scan for this date"}"#)
            .create_async()
            .await;

        let err = SignalClient::new(server.url()).fetch_signals(date()).await.unwrap_err();
        assert!(matches!(err, SignalSourceError::MissingResults));
    }

    #[tokio::test]
    async fn test_non_200_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", SIGNALS_PATH)
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let err = SignalClient::new(server.url()).fetch_signals(date()).await.unwrap_err();
        assert!(matches!(err, SignalSourceError::Status(404)));
    }
}
