pub mod error;

pub use error::{Result, SalesforceError};

use std::collections::HashMap;
use std::time::Duration;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

const API_VERSION: &str = "v59.0";

/// Assertion lifetime for the JWT bearer flow.
const ASSERTION_TTL_SECS: i64 = 300;

/// Refresh the access token this long before its session would expire.
const TOKEN_LIFETIME: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Clone)]
pub struct SalesforceOptions {
    pub client_id: String,
    /// Path to the RS256 private key PEM registered with the connected app.
    pub key_path: String,
    pub username: String,
    pub login_url: String,
    /// Max requests per second issued by this client.
    pub rate_limit: u32,
}

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    sub: String,
    aud: String,
    exp: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    instance_url: String,
    obtained_at: Instant,
}

pub struct SalesforceClient {
    client: reqwest::Client,
    options: SalesforceOptions,
    session: Mutex<Option<Session>>,
    last_request: Mutex<Option<Instant>>,
}

impl SalesforceClient {
    pub fn new(options: SalesforceOptions) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            options,
            session: Mutex::new(None),
            last_request: Mutex::new(None),
        }
    }

    async fn pace(&self) {
        let min_interval =
            Duration::from_millis(1000 / u64::from(self.options.rate_limit.max(1)));
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Authenticate via the OAuth JWT bearer flow.
    async fn authenticate(&self) -> Result<Session> {
        let key_pem = tokio::fs::read(&self.options.key_path)
            .await
            .map_err(|e| {
                SalesforceError::Auth(format!(
                    "cannot read key file {}: {e}",
                    self.options.key_path
                ))
            })?;
        let key = EncodingKey::from_rsa_pem(&key_pem)
            .map_err(|e| SalesforceError::Auth(format!("invalid RSA key: {e}")))?;

        let claims = Claims {
            iss: self.options.client_id.clone(),
            sub: self.options.username.clone(),
            aud: self.options.login_url.clone(),
            exp: chrono::Utc::now().timestamp() + ASSERTION_TTL_SECS,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| SalesforceError::Auth(format!("JWT signing failed: {e}")))?;

        let url = format!("{}/services/oauth2/token", self.options.login_url);
        let resp = self
            .client
            .post(&url)
            .form(&[
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:jwt-bearer",
                ),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SalesforceError::Auth(format!(
                "token request failed ({status}): {message}"
            )));
        }

        let token: TokenResponse = resp.json().await?;
        info!(instance = %token.instance_url, "Salesforce session established");
        Ok(Session {
            access_token: token.access_token,
            instance_url: token.instance_url,
            obtained_at: Instant::now(),
        })
    }

    async fn session(&self) -> Result<Session> {
        let mut guard = self.session.lock().await;
        if let Some(ref session) = *guard {
            if session.obtained_at.elapsed() < TOKEN_LIFETIME {
                return Ok(session.clone());
            }
        }
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Read the named fields of an Account record.
    pub async fn get_account(
        &self,
        account_id: &str,
        fields: &[String],
    ) -> Result<HashMap<String, serde_json::Value>> {
        self.pace().await;
        let session = self.session().await?;

        let url = format!(
            "{}/services/data/{API_VERSION}/sobjects/Account/{account_id}?fields={}",
            session.instance_url,
            fields.join(",")
        );

        debug!(account_id, fields = fields.len(), "Salesforce account read");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SalesforceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut record: HashMap<String, serde_json::Value> = resp.json().await?;
        record.remove("attributes");
        Ok(record)
    }

    /// Patch an Account with the given fields. No-op when `fields` is empty.
    pub async fn update_account(
        &self,
        account_id: &str,
        fields: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.pace().await;
        let session = self.session().await?;

        let url = format!(
            "{}/services/data/{API_VERSION}/sobjects/Account/{account_id}",
            session.instance_url
        );

        debug!(account_id, fields = fields.len(), "Salesforce account update");

        let resp = self
            .client
            .patch(&url)
            .bearer_auth(&session.access_token)
            .json(fields)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SalesforceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}
