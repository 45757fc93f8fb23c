use crate::domain::model::{
    Confirmation, PrescriptionListRequest, PrescriptionListing, SelectionRequest, SessionToken,
};
use crate::domain::ports::ResourceService;
use crate::utils::error::{NegotiationError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Prescription service over JSON/HTTP, authorised with the session token.
pub struct HttpResourceClient {
    client: Client,
    endpoint: String,
    session: SessionToken,
    timeout: Duration,
}

impl HttpResourceClient {
    pub fn new(endpoint: &str, session: SessionToken, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            session,
            timeout,
        })
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> std::result::Result<R, NegotiationError> {
        let url = format!("{}{}", self.endpoint, path);
        tracing::debug!("Making resource request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.session.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NegotiationError::Timeout(self.timeout)
                } else {
                    NegotiationError::Service {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        tracing::debug!("Resource response status: {}", status);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::GONE => Err(NegotiationError::SessionExpired),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Err(NegotiationError::Timeout(self.timeout))
            }
            s if s.is_success() => response.json().await.map_err(|e| NegotiationError::Service {
                message: format!("unreadable response: {}", e),
            }),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(NegotiationError::Service {
                    message: format!("HTTP {}: {}", s.as_u16(), body),
                })
            }
        }
    }
}

#[async_trait]
impl ResourceService for HttpResourceClient {
    async fn request_prescriptions(
        &self,
        request: &PrescriptionListRequest,
    ) -> std::result::Result<PrescriptionListing, NegotiationError> {
        self.post("/prescriptions/list", request).await
    }

    async fn select_prescriptions(
        &self,
        selection: &SelectionRequest,
    ) -> std::result::Result<Confirmation, NegotiationError> {
        self.post("/prescriptions/select", selection).await
    }
}
