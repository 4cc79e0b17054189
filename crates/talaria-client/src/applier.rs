use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use talaria_core::error::{EngineError, looks_rate_limited};
use talaria_core::traits::{ApplicationRecord, ApplicationStatus, Applier, ApplyOptions};
use uuid::Uuid;

/// Form filling is browser-driven and slow; give the service generous room.
const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for an external apply service.
///
/// The service owns everything the engine scopes out: platform adapters,
/// form filling, generated text. This client only ships the item payload
/// over and maps the response into the engine's error taxonomy.
#[derive(Clone)]
pub struct HttpApplier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpApplier {
    pub fn new(endpoint: &str) -> Result<Self, EngineError> {
        Self::build(endpoint, None, DEFAULT_APPLY_TIMEOUT)
    }

    pub fn with_api_key(endpoint: &str, api_key: &str) -> Result<Self, EngineError> {
        Self::build(endpoint, Some(api_key.to_string()), DEFAULT_APPLY_TIMEOUT)
    }

    fn build(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

// ---- Apply service wire types ----

#[derive(Serialize)]
struct ApplyRequest<'a> {
    user_id: &'a str,
    job_url: &'a str,
    payload: &'a serde_json::Value,
    options: &'a ApplyOptions,
}

#[derive(Debug, Deserialize)]
struct ApplyResponse {
    application_id: Option<String>,
    status: String,
    message: Option<String>,
    error: Option<String>,
}

/// Map a service response body into the engine's record/error types.
fn into_record(response: ApplyResponse) -> Result<ApplicationRecord, EngineError> {
    if response.status == "error" {
        let text = response
            .error
            .or(response.message)
            .unwrap_or_else(|| "apply service reported an error".to_string());
        return Err(if looks_rate_limited(&text) {
            EngineError::RateLimited(text)
        } else {
            // Permanent vs transient is decided by the worker's needles.
            EngineError::Generic(text)
        });
    }

    let status = serde_json::from_value::<ApplicationStatus>(serde_json::Value::String(
        response.status.clone(),
    ))
    .unwrap_or(ApplicationStatus::Submitted);

    Ok(ApplicationRecord {
        application_id: response
            .application_id
            .unwrap_or_else(|| format!("app_{}", &Uuid::new_v4().simple().to_string()[..12])),
        status,
        message: response.message,
    })
}

/// Map a non-2xx HTTP response into the engine's error taxonomy.
fn classify_http_failure(status: u16, body: &str) -> EngineError {
    if status == 429 || looks_rate_limited(body) {
        EngineError::RateLimited(format!("HTTP {status}: {body}"))
    } else {
        EngineError::HttpError(format!("Apply service returned {status}: {body}"))
    }
}

impl Applier for HttpApplier {
    async fn apply(
        &self,
        user_id: &str,
        job_url: &str,
        payload: &serde_json::Value,
        options: &ApplyOptions,
    ) -> Result<ApplicationRecord, EngineError> {
        let mut request = self.client.post(format!("{}/apply", self.endpoint)).json(
            &ApplyRequest {
                user_id,
                job_url,
                payload,
                options,
            },
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout(DEFAULT_APPLY_TIMEOUT.as_secs())
            } else {
                EngineError::HttpError(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }

        let parsed: ApplyResponse = response
            .json()
            .await
            .map_err(|e| EngineError::HttpError(format!("Malformed apply response: {e}")))?;
        into_record(parsed)
    }
}
