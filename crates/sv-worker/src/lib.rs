//! Per-camera surveillance worker.
//!
//! This crate provides:
//! - Frame ingestion from camera streams into the shared frame store
//! - The detection orchestrator loop over the model ensemble
//! - Plate routing: OCR, authorization, persistence and alerting
//! - Alert fan-out and camera health monitoring
//! - The supervisor that keeps every camera's tasks running

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod ingestor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod plate_router;
pub mod retry;
pub mod supervisor;
pub mod task;
pub mod worker;

pub use config::WorkerConfig;
pub use dispatcher::{channels_for, DispatchReport, Dispatcher};
pub use error::{WorkerError, WorkerResult};
pub use health::{HealthMonitor, HealthSummary};
pub use ingestor::{IngestExit, Ingestor};
pub use logging::CameraLogger;
pub use orchestrator::Orchestrator;
pub use plate_router::PlateRouter;
pub use supervisor::Supervisor;
pub use task::StartOutcome;
pub use worker::Worker;
