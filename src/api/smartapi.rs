use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{header, Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::fetcher::CandleApi;

pub const SMARTAPI_BASE_URL: &str = "https://apiconnect.angelone.in";
const LOGIN_PATH: &str = "/rest/auth/angelbroking/user/v1/loginByPassword";
const CANDLE_PATH: &str = "/rest/secure/angelbroking/historical/v1/getCandleData";
const DEFAULT_REQUESTS_PER_SECOND: u32 = 3; // Historical API limit per session

type SmartApiRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Login material for one SmartAPI account
pub struct SmartApiCredentials {
    pub api_key: SecretString,
    pub client_id: String,
    pub password: SecretString,
    /// Base32 TOTP seed
    pub totp_secret: SecretString,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("TOTP generation failed: {0}")]
    Totp(String),

    #[error("login request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("login rejected: {message} ({code})")]
    Rejected { message: String, code: String },
}

/// Failures below the API contract: network, HTTP status, undecodable bodies
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("no active session")]
    NoSession,
}

/// Body of a historical candle request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleRequest {
    pub exchange: String,
    #[serde(rename = "symboltoken")]
    pub symbol_token: String,
    pub interval: String,
    #[serde(rename = "fromdate")]
    pub from_date: String,
    #[serde(rename = "todate")]
    pub to_date: String,
}

/// Raw historical candle response
///
/// `data` rows are `[timestamp, open, high, low, close, volume]`; values are
/// kept as JSON so numeric coercion happens in one place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandleResponse {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errorcode: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<Vec<serde_json::Value>>>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    clientcode: &'a str,
    password: &'a str,
    totp: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    jwt_token: String,
    #[serde(default)]
    feed_token: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errorcode: Option<String>,
    #[serde(default)]
    data: Option<LoginData>,
}

struct Session {
    jwt_token: SecretString,
    #[allow(dead_code)]
    feed_token: Option<String>,
    logged_in_at: DateTime<Utc>,
}

/// Angel One SmartAPI client
///
/// Holds the authenticated session behind a lock so a re-login swaps the
/// token in place; requests in flight keep the token they started with and
/// the next request picks up the new one.
pub struct SmartApiClient {
    client: Client,
    base_url: String,
    credentials: SmartApiCredentials,
    session: RwLock<Option<Session>>,
    rate_limiter: Arc<SmartApiRateLimiter>,
}

impl SmartApiClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: SmartApiCredentials,
        timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            session: RwLock::new(None),
            rate_limiter: Arc::new(RateLimiter::direct(Self::quota(
                DEFAULT_REQUESTS_PER_SECOND,
            ))),
        })
    }

    pub fn with_requests_per_second(mut self, requests_per_second: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::direct(Self::quota(requests_per_second)));
        self
    }

    fn quota(requests_per_second: u32) -> Quota {
        Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN))
    }

    /// Establish (or replace) the session
    pub async fn login(&self) -> Result<(), SessionError> {
        let totp = self.current_totp()?;
        let body = LoginRequest {
            clientcode: &self.credentials.client_id,
            password: self.credentials.password.expose_secret(),
            totp: &totp,
        };

        let response: LoginResponse = self
            .request(LOGIN_PATH)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let data = match (response.status, response.data) {
            (true, Some(data)) => data,
            (_, _) => {
                return Err(SessionError::Rejected {
                    message: response
                        .message
                        .unwrap_or_else(|| "missing session data".to_string()),
                    code: response.errorcode.unwrap_or_default(),
                })
            }
        };

        *self.session.write().await = Some(Session {
            jwt_token: SecretString::new(data.jwt_token.into()),
            feed_token: data.feed_token,
            logged_in_at: Utc::now(),
        });

        tracing::info!("✓ SmartAPI login successful for {}", self.credentials.client_id);
        Ok(())
    }

    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn session_started_at(&self) -> Option<DateTime<Utc>> {
        self.session.read().await.as_ref().map(|s| s.logged_in_at)
    }

    /// Fetch historical candles
    ///
    /// API-level failures come back as a decoded `CandleResponse` with
    /// `status: false`; only transport problems are errors here.
    pub async fn get_candle_data(
        &self,
        request: &CandleRequest,
    ) -> Result<CandleResponse, TransportError> {
        self.rate_limiter.until_ready().await;

        let jwt = {
            let session = self.session.read().await;
            session
                .as_ref()
                .map(|s| s.jwt_token.expose_secret().to_string())
                .ok_or(TransportError::NoSession)?
        };

        tracing::debug!(
            "Requesting candles for token {} ({} → {})",
            request.symbol_token,
            request.from_date,
            request.to_date
        );

        let response = self
            .request(CANDLE_PATH)
            .bearer_auth(jwt)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<CandleResponse>(&body) {
            Ok(parsed)
                if status.is_success()
                    || parsed.errorcode.is_some()
                    || parsed.message.is_some() =>
            {
                Ok(parsed)
            }
            Ok(_) => Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            }),
            Err(_) if !status.is_success() => Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            }),
            Err(e) => Err(TransportError::Decode(e.to_string())),
        }
    }

    fn request(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("X-PrivateKey", self.credentials.api_key.expose_secret())
            .header("X-UserType", "USER")
            .header("X-SourceID", "WEB")
            .header("X-ClientLocalIP", "127.0.0.1")
            .header("X-ClientPublicIP", "127.0.0.1")
            .header("X-MACAddress", "00:00:00:00:00:00")
            .header(header::ACCEPT, "application/json")
    }

    fn current_totp(&self) -> Result<String, SessionError> {
        let secret = Secret::Encoded(self.credentials.totp_secret.expose_secret().to_string())
            .to_bytes()
            .map_err(|e| SessionError::Totp(format!("{:?}", e)))?;

        TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, secret)
            .generate_current()
            .map_err(|e| SessionError::Totp(e.to_string()))
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

#[async_trait]
impl CandleApi for SmartApiClient {
    async fn candle_data(&self, request: &CandleRequest) -> Result<CandleResponse, TransportError> {
        self.get_candle_data(request).await
    }

    async fn relogin(&self) -> Result<(), SessionError> {
        self.login().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn credentials() -> SmartApiCredentials {
        SmartApiCredentials {
            api_key: SecretString::new("test-key".into()),
            client_id: "A123".to_string(),
            password: SecretString::new("1234".into()),
            totp_secret: SecretString::new("JBSWY3DPEHPK3PXP".into()),
        }
    }

    fn request() -> CandleRequest {
        CandleRequest {
            exchange: "NSE".to_string(),
            symbol_token: "2885".to_string(),
            interval: "ONE_DAY".to_string(),
            from_date: "2025-01-01 09:15".to_string(),
            to_date: "2025-03-01 15:30".to_string(),
        }
    }

    async fn logged_in_client(server: &mut mockito::Server) -> SmartApiClient {
        server
            .mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_body(
                json!({
                    "status": true,
                    "message": "SUCCESS",
                    "errorcode": "",
                    "data": {"jwtToken": "jwt-abc", "refreshToken": "r", "feedToken": "f"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = SmartApiClient::new(server.url(), credentials(), 5).unwrap();
        client.login().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_login_stores_session() {
        let mut server = mockito::Server::new_async().await;
        let client = logged_in_client(&mut server).await;

        assert!(client.has_session().await);
        assert!(client.session_started_at().await.is_some());
    }

    #[tokio::test]
    async fn test_login_sends_six_digit_totp() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", LOGIN_PATH)
            .match_header("X-PrivateKey", "test-key")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"clientcode": "A123", "password": "1234"})),
                Matcher::Regex(r#""totp":"\d{6}""#.to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"status": true, "data": {"jwtToken": "jwt"}}"#)
            .create_async()
            .await;

        let client = SmartApiClient::new(server.url(), credentials(), 5).unwrap();
        client.login().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_body(r#"{"status": false, "message": "Invalid totp", "errorcode": "AB1050", "data": null}"#)
            .create_async()
            .await;

        let client = SmartApiClient::new(server.url(), credentials(), 5).unwrap();
        let err = client.login().await.unwrap_err();

        assert!(matches!(err, SessionError::Rejected { ref code, .. } if code == "AB1050"));
        assert!(!client.has_session().await);
    }

    #[tokio::test]
    async fn test_candles_require_session() {
        let server = mockito::Server::new_async().await;
        let client = SmartApiClient::new(server.url(), credentials(), 5).unwrap();

        let err = client.get_candle_data(&request()).await.unwrap_err();
        assert!(matches!(err, TransportError::NoSession));
    }

    #[tokio::test]
    async fn test_candle_success_uses_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let client = logged_in_client(&mut server).await;

        let mock = server
            .mock("POST", CANDLE_PATH)
            .match_header("authorization", "Bearer jwt-abc")
            .match_body(Matcher::PartialJson(json!({
                "exchange": "NSE",
                "symboltoken": "2885",
                "interval": "ONE_DAY",
                "fromdate": "2025-01-01 09:15",
                "todate": "2025-03-01 15:30"
            })))
            .with_status(200)
            .with_body(
                json!({
                    "status": true,
                    "message": "SUCCESS",
                    "errorcode": "",
                    "data": [["2025-01-02T00:00:00+05:30", 100.0, 101.0, 99.0, 100.5, 12345]]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = client.get_candle_data(&request()).await.unwrap();
        mock.assert_async().await;

        assert!(response.status);
        assert_eq!(response.data.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_api_error_is_not_a_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let client = logged_in_client(&mut server).await;

        server
            .mock("POST", CANDLE_PATH)
            .with_status(403)
            .with_body(r#"{"status": false, "message": "Invalid Token", "errorcode": "AG8001", "data": null}"#)
            .create_async()
            .await;

        let response = client.get_candle_data(&request()).await.unwrap();
        assert!(!response.status);
        assert_eq!(response.errorcode.as_deref(), Some("AG8001"));
    }

    #[tokio::test]
    async fn test_html_error_page_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let client = logged_in_client(&mut server).await;

        server
            .mock("POST", CANDLE_PATH)
            .with_status(502)
            .with_body("<html>Bad Gateway</html>")
            .create_async()
            .await;

        let err = client.get_candle_data(&request()).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 502, .. }));
    }
}
