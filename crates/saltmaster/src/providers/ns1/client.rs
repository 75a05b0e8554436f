//! NS1 API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info};

use super::models::{AnswerBody, RecordBody, RecordResource};
use crate::providers::traits::{CreateRecordRequest, DnsProvider, DnsRecord, ProviderError};

/// Base URL for the NS1 API.
const API_BASE_URL: &str = "https://api.nsone.net/v1";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// NS1 DNS provider.
#[derive(Clone)]
pub struct Ns1 {
    client: Client,
    api_key: String,
    base_url: String,
}

impl Ns1 {
    /// Create a new NS1 provider.
    ///
    /// # Errors
    /// Returns error if the key is empty or the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::Config("NS1 API key is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn record_path(zone: &str, domain: &str, record_type: &str) -> String {
        format!("/zones/{zone}/{domain}/{record_type}")
    }

    /// Send a request and parse the record in the response.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&RecordBody>,
    ) -> Result<RecordResource, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, method = %method, "NS1 request");

        let mut request = self
            .client
            .request(method, &url)
            .header("X-NSONE-Key", &self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(serde_json::from_str(&text)?)
        } else if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound(text))
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    fn to_record(resource: &RecordResource) -> DnsRecord {
        DnsRecord {
            id: resource.id.clone(),
            zone: resource.zone.clone(),
            domain: resource.domain.clone(),
            record_type: resource.record_type.clone(),
            answers: resource.answer_values(),
        }
    }
}

#[async_trait]
impl DnsProvider for Ns1 {
    async fn upsert_record(&self, req: CreateRecordRequest) -> Result<DnsRecord, ProviderError> {
        let path = Self::record_path(&req.zone, &req.domain, &req.record_type);
        let body = RecordBody {
            zone: req.zone.clone(),
            domain: req.domain.clone(),
            record_type: req.record_type.clone(),
            answers: req
                .answers
                .iter()
                .map(|a| AnswerBody {
                    answer: vec![a.clone()],
                })
                .collect(),
        };

        // NS1 creates with PUT and updates with POST.
        let method = match self.send(Method::GET, &path, None).await {
            Ok(existing) if Self::to_record(&existing).answers == req.answers => {
                info!(domain = %req.domain, "DNS record already up to date");
                return Ok(Self::to_record(&existing));
            }
            Ok(_) => Method::POST,
            Err(ProviderError::NotFound(_)) => Method::PUT,
            Err(e) => return Err(e),
        };

        info!(domain = %req.domain, record_type = %req.record_type, method = %method, "Writing DNS record");
        let record = self.send(method, &path, Some(&body)).await?;
        Ok(Self::to_record(&record))
    }
}
