//! HTTP implementation of the remote transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::transport::{
    DownloadResponse, RemoteTransport, TransportError, UploadRequest, UploadResponse,
};
use crate::error::{Error, Result};
use crate::models::TenantId;
use crate::config::{non_blank, validate_base_url};

const UPLOAD_PATH: &str = "/v1/sync/upload";
const DOWNLOAD_PATH: &str = "/v1/sync/download";
const MAX_ERROR_BODY_CHARS: usize = 180;

/// JSON-over-HTTP sync client
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a client for `base_url` with a per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = validate_base_url(&base_url.into())
            .map_err(|error| Error::Config(error.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            auth_token: non_blank(auth_token),
            client,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> std::result::Result<T, TransportError> {
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        serde_json::from_str(&body).map_err(|error| TransportError::InvalidPayload(error.to_string()))
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn upload_changes(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<UploadResponse, TransportError> {
        let url = format!("{}{UPLOAD_PATH}", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Self::read_json(response).await
    }

    async fn download_changes(
        &self,
        tenant_id: &TenantId,
        last_synced_at: Option<i64>,
    ) -> std::result::Result<DownloadResponse, TransportError> {
        let url = format!("{}{DOWNLOAD_PATH}", self.base_url);
        let mut query = vec![("tenantId", tenant_id.to_string())];
        if let Some(since) = last_synced_at {
            query.push(("since", since.to_string()));
        }

        let response = self
            .authorize(self.client.get(&url))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Self::read_json(response).await
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_decode() {
        TransportError::InvalidPayload(error.to_string())
    } else {
        TransportError::Unreachable(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, EntityPayload, EntityType, Expense};
    use crate::sync::transport::UploadRecord;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(
            server.uri(),
            Some("secret-token".to_string()),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    fn tenant() -> TenantId {
        TenantId::new("shop-1").unwrap()
    }

    #[test]
    fn new_rejects_invalid_base_url() {
        let error =
            HttpTransport::new("api.example.com", None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(error, Error::Config(_)));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(500);
        let message = parse_api_error(StatusCode::BAD_GATEWAY, &body);
        assert_eq!(message.len(), MAX_ERROR_BODY_CHARS);
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "Bad Gateway");
    }

    #[test]
    fn debug_redacts_token() {
        let transport = HttpTransport::new(
            "https://api.example.com",
            Some("secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn upload_posts_batch_with_bearer_token() {
        let server = MockServer::start().await;
        let id = EntityId::new();

        Mock::given(method("POST"))
            .and(path("/v1/sync/upload"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "syncedAt": 1_700,
                "accepted": [{"id": id, "remoteRef": "srv-1"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = UploadRequest {
            tenant_id: tenant(),
            last_synced_at: None,
            entity_type: EntityType::Expense,
            records: vec![UploadRecord {
                id,
                local_version: 1,
                local_updated_at: 10,
                remote_ref: None,
                payload: EntityPayload::Expense(Expense {
                    description: "Rent".to_string(),
                    category: "premises".to_string(),
                    amount_cents: 50_000,
                    incurred_at: 10,
                    is_deleted: false,
                }),
            }],
        };

        let response = transport(&server).upload_changes(&request).await.unwrap();
        assert_eq!(response.synced_at, 1_700);
        assert_eq!(response.accepted[0].id, id);
        assert_eq!(response.accepted[0].remote_ref.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn download_sends_tenant_and_checkpoint() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/sync/download"))
            .and(query_param("tenantId", "shop-1"))
            .and(query_param("since", "1234"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"syncedAt": 2_000, "changes": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = transport(&server)
            .download_changes(&tenant(), Some(1234))
            .await
            .unwrap();
        assert_eq!(response.synced_at, Some(2_000));
        assert!(response.changes.is_empty());
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/sync/download"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({"error": "maintenance window"})),
            )
            .mount(&server)
            .await;

        let error = transport(&server)
            .download_changes(&tenant(), None)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            TransportError::Status {
                status: 503,
                message: "maintenance window".to_string()
            }
        );
    }

    #[tokio::test]
    async fn malformed_body_maps_to_invalid_payload() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/sync/download"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"lastSync": 1, "products": []})),
            )
            .mount(&server)
            .await;

        let error = transport(&server)
            .download_changes(&tenant(), None)
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn slow_server_maps_to_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/sync/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"changes": []}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let error = transport(&server)
            .download_changes(&tenant(), None)
            .await
            .unwrap_err();
        assert_eq!(error, TransportError::Timeout);
    }

    #[tokio::test]
    async fn unreachable_host_maps_to_unreachable() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let error = transport.download_changes(&tenant(), None).await.unwrap_err();
        assert!(matches!(
            error,
            TransportError::Unreachable(_) | TransportError::Timeout
        ));
    }
}
