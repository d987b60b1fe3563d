use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::instrument;

use kana_core::errors::GatewayError;
use kana_core::provider::BillingSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads today's organisation spend from the OpenAI costs endpoint.
/// Requires an admin key.
pub struct OpenAiBilling {
    client: Client,
    base_url: String,
    admin_key: SecretString,
}

impl OpenAiBilling {
    pub fn new(base_url: impl Into<String>, admin_key: SecretString) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NotConfigured(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_key,
        })
    }
}

#[async_trait]
impl BillingSource for OpenAiBilling {
    #[instrument(skip(self))]
    async fn spent_today(&self) -> Result<f64, GatewayError> {
        let now = Utc::now();
        let start = start_of_day(now);
        let resp = self
            .client
            .get(format!("{}/organization/costs", self.base_url))
            .header("authorization", format!("Bearer {}", self.admin_key.expose_secret()))
            .query(&[
                ("start_time", start.timestamp().to_string()),
                ("end_time", now.timestamp().to_string()),
                ("bucket_width", "1d".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        Ok(sum_costs(&body))
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now)
}

/// Sum `data[].results[].amount.value` of a costs page.
pub fn sum_costs(body: &Value) -> f64 {
    body["data"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|bucket| bucket["results"].as_array().into_iter().flatten())
        .filter_map(|r| r["amount"]["value"].as_f64())
        .sum()
}
