use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client, Method,
};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;
use shared_models::{Alert, TuningParameters};

use crate::error::StoreError;
use crate::persistent::PersistentStore;

/// Supabase REST archive for alerts and tuning parameter sets.
pub struct SupabaseStore {
    client: Client,
    primary_url: String,
    fallback_url: Option<String>,
    base_url: RwLock<String>,
    anon_key: String,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Result<Self, StoreError> {
        let primary_url = config
            .supabase_url
            .clone()
            .ok_or_else(|| StoreError::Unavailable("SUPABASE_URL not configured".to_string()))?;

        Ok(Self::with_endpoints(
            primary_url,
            config.supabase_fallback_url.clone(),
            config.supabase_anon_key.clone(),
        ))
    }

    pub fn with_endpoints(primary_url: String, fallback_url: Option<String>, anon_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: RwLock::new(primary_url.clone()),
            primary_url,
            fallback_url,
            anon_key,
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.anon_key)
            .map_err(|e| StoreError::Unavailable(format!("invalid api key header: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.anon_key))
            .map_err(|e| StoreError::Unavailable(format!("invalid api key header: {}", e)))?;

        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static("return=minimal"));
        Ok(headers)
    }

    async fn request_at(&self, base_url: &str, method: Method, path: &str, body: Option<Value>) -> Result<(), StoreError> {
        let url = format!("{}{}", base_url, path);
        debug!("Making request to {}", url);

        let mut req = self.client.request(method, &url).headers(self.get_headers()?);
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body: error_text,
            });
        }

        Ok(())
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<(), StoreError> {
        let base_url = self.base_url.read().await.clone();
        self.request_at(&base_url, method, path, body).await
    }

    pub async fn active_url(&self) -> String {
        self.base_url.read().await.clone()
    }
}

#[async_trait]
impl PersistentStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id))]
    async fn archive_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let body = json!({
            "id": alert.id,
            "alert_type": alert.alert_type,
            "priority": alert.priority,
            "title": alert.title,
            "message": alert.message,
            "timestamp": alert.timestamp,
            "data": alert.data,
        });
        self.request(Method::POST, "/rest/v1/alerts", Some(body)).await
    }

    #[instrument(skip(self, parameters), fields(version = parameters.version))]
    async fn archive_parameters(&self, parameters: &TuningParameters) -> Result<(), StoreError> {
        let body = json!({
            "version": parameters.version,
            "parameters": serde_json::to_value(parameters)?,
        });
        self.request(Method::POST, "/rest/v1/tuning_parameters", Some(body)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.request(Method::GET, "/rest/v1/", None).await
    }

    #[instrument(skip(self))]
    async fn reconnect(&self) -> Result<(), StoreError> {
        let mut candidates = vec![self.primary_url.clone()];
        candidates.extend(self.fallback_url.clone());

        let mut last_err = None;
        for candidate in candidates {
            match self.request_at(&candidate, Method::GET, "/rest/v1/", None).await {
                Ok(()) => {
                    info!(url = %candidate, "Persistent store reconnected");
                    *self.base_url.write().await = candidate;
                    return Ok(());
                }
                Err(e) => {
                    warn!(url = %candidate, "Persistent store endpoint unreachable: {}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| StoreError::Unavailable("no persistent store endpoint".to_string())))
    }
}
