use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    CollectionRequest, GatewayConfig, GatewayScope, MobileMoneyGateway, TransferRequest,
    TransferStatusResponse,
};
use crate::error::GatewayError;
use async_trait::async_trait;

#[derive(Clone)]
struct CachedToken {
    bearer: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// HTTP client for the mobile-money network.
///
/// Bearer tokens are cached per scope and refreshed proactively, a
/// configurable margin before expiry, so a request never goes out with a
/// token about to lapse mid-flight.
pub struct HttpMomoGateway {
    http: Client,
    config: GatewayConfig,
    collection_token: RwLock<Option<CachedToken>>,
    disbursement_token: RwLock<Option<CachedToken>>,
}

impl HttpMomoGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self {
            http,
            config,
            collection_token: RwLock::new(None),
            disbursement_token: RwLock::new(None),
        })
    }

    fn token_slot(&self, scope: GatewayScope) -> &RwLock<Option<CachedToken>> {
        match scope {
            GatewayScope::Collection => &self.collection_token,
            GatewayScope::Disbursement => &self.disbursement_token,
        }
    }

    /// A bearer token for the scope, from cache if still comfortably valid.
    async fn bearer(&self, scope: GatewayScope) -> Result<String, GatewayError> {
        let margin = Duration::from_secs(self.config.token_refresh_margin_secs);
        if let Some(cached) = self.token_slot(scope).read().await.as_ref() {
            if cached.expires_at.saturating_duration_since(Instant::now()) > margin {
                return Ok(cached.bearer.clone());
            }
        }
        self.refresh_token(scope).await
    }

    async fn refresh_token(&self, scope: GatewayScope) -> Result<String, GatewayError> {
        let url = format!("{}/{}/token/", self.config.base_url, scope.as_str());
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.api_user, Some(&self.config.api_key))
            .header("Ocp-Apim-Subscription-Key", self.config.subscription_key(scope))
            .header("X-Target-Environment", &self.config.environment)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.config.timeout_secs))?;

        if response.status() != StatusCode::OK {
            return Err(GatewayError::Auth {
                scope: scope.as_str(),
                status: response.status().as_u16(),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        debug!(scope = scope.as_str(), expires_in = token.expires_in, "gateway token refreshed");

        let cached = CachedToken {
            bearer: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        };
        *self.token_slot(scope).write().await = Some(cached);
        Ok(token.access_token)
    }

    async fn post_request(
        &self,
        scope: GatewayScope,
        path: &str,
        reference: &str,
        body: &impl serde::Serialize,
    ) -> Result<(), GatewayError> {
        let bearer = self.bearer(scope).await?;
        let url = format!("{}/{}", self.config.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .header("X-Reference-Id", reference)
            .header("X-Target-Environment", &self.config.environment)
            .header("Ocp-Apim-Subscription-Key", self.config.subscription_key(scope))
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.config.timeout_secs))?;

        expect_accepted(response).await
    }
}

#[async_trait]
impl MobileMoneyGateway for HttpMomoGateway {
    async fn transfer(&self, request: &TransferRequest) -> Result<(), GatewayError> {
        self.post_request(
            GatewayScope::Disbursement,
            "disbursement/v1_0/transfer",
            &request.external_id,
            request,
        )
        .await
    }

    async fn request_to_pay(&self, request: &CollectionRequest) -> Result<(), GatewayError> {
        self.post_request(
            GatewayScope::Collection,
            "collection/v1_0/requesttopay",
            &request.external_id,
            request,
        )
        .await
    }

    async fn status(
        &self,
        scope: GatewayScope,
        reference: &str,
    ) -> Result<TransferStatusResponse, GatewayError> {
        let bearer = self.bearer(scope).await?;
        let resource = match scope {
            GatewayScope::Collection => "requesttopay",
            GatewayScope::Disbursement => "transfer",
        };
        let url = format!(
            "{}/{}/v1_0/{}/{}",
            self.config.base_url,
            scope.as_str(),
            resource,
            reference
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(bearer)
            .header("X-Target-Environment", &self.config.environment)
            .header("Ocp-Apim-Subscription-Key", self.config.subscription_key(scope))
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.config.timeout_secs))?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, reference, "gateway status check rejected");
            return Err(GatewayError::Rejected { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))
    }
}

/// The network accepts submissions with 201/202; anything else is a
/// rejection carrying whatever body the gateway produced.
async fn expect_accepted(response: Response) -> Result<(), GatewayError> {
    match response.status() {
        StatusCode::CREATED | StatusCode::ACCEPTED => Ok(()),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn map_transport_error(e: reqwest::Error, timeout_secs: u64) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(timeout_secs)
    } else {
        GatewayError::Network(e.to_string())
    }
}
