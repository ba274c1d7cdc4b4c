//! Client for an out-of-process model server.
//!
//! The OCR/layout runtime lives in its own process (typically a Python
//! runtime pinned to the GPU). This client speaks a two-endpoint JSON
//! protocol:
//!
//! ```text
//! GET  {base}/health  → {"device": "gpu" | "cpu", "model": "<name>"}
//! POST {base}/infer   ← {"image": "<base64 png>", "detect_tables": true}
//!                     → {"regions": [{"type": "text", "bbox": [l,t,r,b], "res": {...}}]}
//! ```
//!
//! Region boxes are in the pixel space of the posted image.

use super::{Device, InferOptions, LayoutModel, RawRegion};
use crate::error::ModelError;
use crate::pipeline::encode::encode_page;
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct HealthBody {
    device: Device,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    image: &'a str,
    detect_tables: bool,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    regions: Vec<RawRegion>,
}

/// A [`LayoutModel`] served over HTTP.
#[derive(Debug, Clone)]
pub struct RemoteModel {
    client: reqwest::Client,
    base_url: String,
    name: String,
    device: Device,
    reentrant: bool,
}

impl RemoteModel {
    /// Connect to the model server and read its device.
    ///
    /// `request_timeout` bounds every HTTP exchange, including inference.
    /// Fails with [`ModelError::Init`] when the server is unreachable or
    /// its health body is malformed.
    pub async fn connect(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ModelError::Init(e.to_string()))?;

        let health_url = format!("{base_url}/health");
        let response = client
            .get(&health_url)
            .send()
            .await
            .map_err(|e| ModelError::Init(format!("model server at {base_url} unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ModelError::Init(format!(
                "model server health check returned HTTP {}",
                response.status()
            )));
        }

        let health: HealthBody = response
            .json()
            .await
            .map_err(|e| ModelError::Init(format!("malformed health response: {e}")))?;

        let name = health.model.unwrap_or_else(|| "remote".to_string());
        info!(
            "Connected to model server {} ('{}' on {:?})",
            base_url, name, health.device
        );

        Ok(Self {
            client,
            base_url,
            name,
            device: health.device,
            reentrant: false,
        })
    }

    /// Declare that the server handles concurrent inference itself.
    pub fn with_reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LayoutModel for RemoteModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    async fn infer(
        &self,
        image: &DynamicImage,
        options: &InferOptions,
    ) -> Result<Vec<RawRegion>, ModelError> {
        let encoded = encode_page(image)
            .map_err(|e| ModelError::Runtime(format!("page encoding failed: {e}")))?;

        let body = InferRequest {
            image: &encoded,
            detect_tables: options.detect_tables,
        };

        let response = self
            .client
            .post(format!("{}/infer", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::Runtime(format!(
                "model server returned HTTP {}: {}",
                status,
                detail.trim()
            )));
        }

        let parsed: InferResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        debug!("Model server returned {} regions", parsed.regions.len());
        Ok(parsed.regions)
    }
}
