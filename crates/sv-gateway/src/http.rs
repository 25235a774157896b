//! HTTP bindings for the gateway and the camera registry.
//!
//! - `GET  {base}/api/plates/authorized?plate=..&zone=..` → `{"authorized": bool}`
//! - `POST {base}/api/detections` → `{"id": "..."}`
//! - `GET  {base}/api/cameras` → `[CameraStream]`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sv_models::{CameraId, CameraStream, DetectionId, ZoneId};
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::AuthorizationGateway;
use crate::metrics::record_request;
use crate::registry::CameraRegistry;
use crate::retry::{with_retry, RetryConfig};

/// HTTP client settings shared by both bindings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl HttpConfig {
    pub fn new(base_url: &str) -> GatewayResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::config(format!("{} cannot be a base URL", base_url)));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, path: &str) -> GatewayResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn client(&self) -> GatewayResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(4)
            .user_agent(concat!("sv-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(GatewayError::Network)
    }
}

async fn timed<T, F>(operation: &str, fut: F) -> GatewayResult<T>
where
    F: std::future::Future<Output = GatewayResult<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.http_status().unwrap_or(0),
    };
    record_request(operation, status, start.elapsed().as_secs_f64());
    result
}

async fn error_for(response: Response) -> GatewayError {
    let status = response.status();
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    GatewayError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
}

#[derive(Debug, Deserialize)]
struct AuthorizationResponse {
    authorized: bool,
}

#[derive(Debug, Serialize)]
struct DetectionRequest<'a> {
    plate: &'a str,
    camera_id: CameraId,
    authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    id: serde_json::Value,
}

/// Gateway backed by the platform's REST API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    http: Client,
    config: HttpConfig,
}

impl HttpGateway {
    pub fn new(config: HttpConfig) -> GatewayResult<Self> {
        Ok(Self {
            http: config.client()?,
            config,
        })
    }
}

#[async_trait]
impl AuthorizationGateway for HttpGateway {
    async fn is_authorized(&self, plate: &str, zone: Option<&ZoneId>) -> GatewayResult<bool> {
        let url = self.config.endpoint("api/plates/authorized")?;

        timed("is_authorized", with_retry(&self.config.retry, "is_authorized", || async {
            let mut request = self.http.get(url.clone()).query(&[("plate", plate)]);
            if let Some(zone) = zone {
                request = request.query(&[("zone", zone.as_str())]);
            }
            let response = request.send().await?;

            match response.status() {
                StatusCode::OK => Ok(response.json::<AuthorizationResponse>().await?.authorized),
                StatusCode::NOT_FOUND => Ok(false),
                _ => Err(error_for(response).await),
            }
        }))
        .await
    }

    async fn record_detection(
        &self,
        plate: &str,
        camera_id: CameraId,
        authorized: bool,
        image: Option<&[u8]>,
    ) -> GatewayResult<DetectionId> {
        let url = self.config.endpoint("api/detections")?;
        let body = DetectionRequest {
            plate,
            camera_id,
            authorized,
            image_base64: image.map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        };

        timed("record_detection", with_retry(&self.config.retry, "record_detection", || async {
            let response = self.http.post(url.clone()).json(&body).send().await?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => {
                    let created: DetectionResponse = response.json().await?;
                    match created.id {
                        serde_json::Value::String(s) => Ok(DetectionId::from_string(s)),
                        serde_json::Value::Number(n) => Ok(DetectionId::from_string(n.to_string())),
                        other => Err(GatewayError::invalid_response(format!(
                            "unexpected detection id: {}",
                            other
                        ))),
                    }
                }
                _ => Err(error_for(response).await),
            }
        }))
        .await
    }
}

/// Camera registry backed by the platform's REST API.
#[derive(Debug, Clone)]
pub struct HttpCameraRegistry {
    http: Client,
    config: HttpConfig,
}

impl HttpCameraRegistry {
    pub fn new(config: HttpConfig) -> GatewayResult<Self> {
        Ok(Self {
            http: config.client()?,
            config,
        })
    }
}

#[async_trait]
impl CameraRegistry for HttpCameraRegistry {
    async fn list_cameras(&self) -> GatewayResult<Vec<CameraStream>> {
        let url = self.config.endpoint("api/cameras")?;

        timed("list_cameras", with_retry(&self.config.retry, "list_cameras", || async {
            let response = self.http.get(url.clone()).send().await?;
            if response.status() != StatusCode::OK {
                return Err(error_for(response).await);
            }
            Ok(response.json::<Vec<CameraStream>>().await?)
        }))
        .await
    }
}
