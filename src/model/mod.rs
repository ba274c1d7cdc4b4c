//! The inference seam: the layout/OCR model and its process-scoped handle.
//!
//! The model itself is an external collaborator. This crate only sees it as
//! `infer(page bitmap) -> regions`, expressed by the [`LayoutModel`] trait.
//! [`RemoteModel`] talks to an out-of-process GPU model server; tests plug
//! in scripted implementations.
//!
//! ## Lifecycle
//!
//! A [`Backend`] is built once at startup by [`Backend::initialize`], shared
//! behind an `Arc` by every request, and never mutated afterwards. If the
//! model could not be brought up the backend is
//! [`Backend::unavailable`] for the life of the process: `/health` reports
//! it and every parse request is refused with 503.
//!
//! ## Serialisation
//!
//! GPU runtimes are rarely reentrant on one device. Unless the model says
//! otherwise, the backend owns a single-permit semaphore and every
//! `infer()` call in the process queues on it, in FIFO order, across
//! requests.

pub mod remote;

pub use remote::RemoteModel;

use crate::error::{ModelError, ParseError};
use crate::output::{BoundingBox, RegionKind, RegionPayload};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Where the model executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Gpu,
    Cpu,
}

/// Options forwarded to every model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferOptions {
    /// Request table-structure regions.
    pub detect_tables: bool,
}

/// A region exactly as the model returned it: bbox in bitmap coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRegion {
    #[serde(rename = "type")]
    pub kind: RegionKind,
    pub bbox: BoundingBox,
    pub res: RegionPayload,
}

impl RawRegion {
    /// Check the region against the payload schema of its type.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.bbox.is_well_formed() {
            return Err(ModelError::Malformed(format!(
                "{} region has invalid bbox {:?}",
                self.kind, self.bbox
            )));
        }
        match (&self.kind, &self.res) {
            (RegionKind::Text, RegionPayload::Text { confidence, .. }) => {
                if !(0.0..=1.0).contains(confidence) {
                    return Err(ModelError::Malformed(format!(
                        "text confidence {confidence} outside [0, 1]"
                    )));
                }
                Ok(())
            }
            (RegionKind::Table, RegionPayload::Table { .. }) => Ok(()),
            (RegionKind::Text, _) => Err(ModelError::Malformed(
                "text region without {text, confidence} payload".into(),
            )),
            (RegionKind::Table, _) => Err(ModelError::Malformed(
                "table region without {html} payload".into(),
            )),
            (RegionKind::Other(_), _) => Ok(()),
        }
    }
}

/// An OCR + layout model.
#[async_trait]
pub trait LayoutModel: Send + Sync {
    /// Human-readable model name for logs and `/health`.
    fn name(&self) -> &str;

    /// Device the model was initialised on.
    fn device(&self) -> Device;

    /// Whether concurrent `infer` calls are safe. Default: false.
    fn is_reentrant(&self) -> bool {
        false
    }

    /// Detect regions on one page bitmap.
    async fn infer(
        &self,
        image: &DynamicImage,
        options: &InferOptions,
    ) -> Result<Vec<RawRegion>, ModelError>;
}

/// Startup options for [`Backend::initialize`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendOptions {
    /// Refuse a model that reports [`Device::Cpu`].
    pub require_gpu: bool,
    /// Run one inference on a blank page before serving.
    pub warmup: bool,
}

/// The process-wide inference backend handle.
pub struct Backend {
    state: BackendState,
}

enum BackendState {
    Ready {
        model: Arc<dyn LayoutModel>,
        device: Device,
        gate: Semaphore,
    },
    Unavailable {
        reason: String,
    },
}

/// Borrowed access to a ready model and its call gate.
pub(crate) struct ModelHandle<'a> {
    pub model: &'a Arc<dyn LayoutModel>,
    pub gate: &'a Semaphore,
}

impl Backend {
    /// Bring the backend up from the outcome of model construction.
    ///
    /// Never fails: a construction error, or a CPU-only model when a GPU is
    /// required, yields an unavailable backend carrying the reason.
    pub async fn initialize(
        model: Result<Arc<dyn LayoutModel>, ModelError>,
        options: BackendOptions,
    ) -> Self {
        let model = match model {
            Ok(m) => m,
            Err(e) => {
                warn!("Inference backend failed to initialise: {}", e);
                return Self::unavailable(e.to_string());
            }
        };

        let device = model.device();
        if options.require_gpu && device != Device::Gpu {
            warn!("Model '{}' is running on {:?}; GPU required", model.name(), device);
            return Self::unavailable(format!(
                "GPU not detected (model '{}' initialised on CPU)",
                model.name()
            ));
        }

        if options.warmup {
            let start = Instant::now();
            let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(128, 128, Rgb([255, 255, 255])));
            let opts = InferOptions {
                detect_tables: false,
            };
            match model.infer(&blank, &opts).await {
                Ok(_) => info!("Model warmup completed in {:?}", start.elapsed()),
                Err(e) => warn!("Model warmup failed: {}", e),
            }
        }

        info!("Inference backend ready: model '{}' on {:?}", model.name(), device);
        Self::ready(model)
    }

    /// A ready backend around an already-initialised model. No warmup.
    pub fn ready(model: Arc<dyn LayoutModel>) -> Self {
        let permits = if model.is_reentrant() {
            Semaphore::MAX_PERMITS
        } else {
            1
        };
        Self {
            state: BackendState::Ready {
                device: model.device(),
                model,
                gate: Semaphore::new(permits),
            },
        }
    }

    /// A backend that failed to come up.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: BackendState::Unavailable {
                reason: reason.into(),
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, BackendState::Ready { .. })
    }

    /// Device of a ready backend.
    pub fn device(&self) -> Option<Device> {
        match &self.state {
            BackendState::Ready { device, .. } => Some(*device),
            BackendState::Unavailable { .. } => None,
        }
    }

    /// True only for a ready backend on a GPU.
    pub fn gpu_enabled(&self) -> bool {
        self.device() == Some(Device::Gpu)
    }

    pub fn model_name(&self) -> Option<&str> {
        match &self.state {
            BackendState::Ready { model, .. } => Some(model.name()),
            BackendState::Unavailable { .. } => None,
        }
    }

    /// Why the backend is unavailable, if it is.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            BackendState::Ready { .. } => None,
            BackendState::Unavailable { reason } => Some(reason),
        }
    }

    /// Stop admitting inference calls. Calls already holding the gate finish.
    pub fn shutdown(&self) {
        if let BackendState::Ready { gate, model, .. } = &self.state {
            info!("Shutting down inference backend '{}'", model.name());
            gate.close();
        }
    }

    pub(crate) fn handle(&self) -> Result<ModelHandle<'_>, ParseError> {
        match &self.state {
            BackendState::Ready { model, gate, .. } => Ok(ModelHandle { model, gate }),
            BackendState::Unavailable { reason } => Err(ParseError::BackendUnavailable {
                reason: reason.clone(),
            }),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            BackendState::Ready { model, device, .. } => f
                .debug_struct("Backend")
                .field("model", &model.name())
                .field("device", device)
                .finish(),
            BackendState::Unavailable { reason } => f
                .debug_struct("Backend")
                .field("unavailable", reason)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        device: Device,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LayoutModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn device(&self) -> Device {
            self.device
        }

        async fn infer(
            &self,
            _image: &DynamicImage,
            _options: &InferOptions,
        ) -> Result<Vec<RawRegion>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    fn counting(device: Device) -> Arc<CountingModel> {
        Arc::new(CountingModel {
            device,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn init_failure_makes_backend_unavailable() {
        let backend = Backend::initialize(
            Err(ModelError::Init("no CUDA device".into())),
            BackendOptions::default(),
        )
        .await;
        assert!(!backend.is_ready());
        assert!(!backend.gpu_enabled());
        assert!(backend.unavailable_reason().unwrap().contains("no CUDA device"));
        assert_eq!(backend.handle().err().unwrap().status_code(), 503);
    }

    #[tokio::test]
    async fn cpu_model_rejected_when_gpu_required() {
        let backend = Backend::initialize(
            Ok(counting(Device::Cpu) as Arc<dyn LayoutModel>),
            BackendOptions {
                require_gpu: true,
                warmup: false,
            },
        )
        .await;
        assert!(!backend.is_ready());
        assert!(backend.unavailable_reason().unwrap().contains("GPU not detected"));
    }

    #[tokio::test]
    async fn warmup_runs_one_inference() {
        let model = counting(Device::Gpu);
        let backend = Backend::initialize(
            Ok(model.clone() as Arc<dyn LayoutModel>),
            BackendOptions {
                require_gpu: true,
                warmup: true,
            },
        )
        .await;
        assert!(backend.gpu_enabled());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_reentrant_model_gets_single_permit() {
        let backend = Backend::ready(counting(Device::Gpu));
        let handle = backend.handle().unwrap();
        assert_eq!(handle.gate.available_permits(), 1);
    }

    #[test]
    fn raw_region_schema_checks() {
        let ok = RawRegion {
            kind: RegionKind::Text,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            res: RegionPayload::Text {
                text: "a".into(),
                confidence: 0.9,
            },
        };
        assert!(ok.validate().is_ok());

        let mut bad_conf = ok.clone();
        bad_conf.res = RegionPayload::Text {
            text: "a".into(),
            confidence: 1.5,
        };
        assert!(bad_conf.validate().is_err());

        let table_with_text = RawRegion {
            kind: RegionKind::Table,
            ..ok.clone()
        };
        assert!(table_with_text.validate().is_err());

        let figure = RawRegion {
            kind: RegionKind::Other("figure".into()),
            ..ok
        };
        assert!(figure.validate().is_ok());
    }
}
