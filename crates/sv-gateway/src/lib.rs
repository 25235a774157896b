//! Authorization/persistence gateway and camera registry.
//!
//! Both are external collaborators of the pipeline. This crate defines their
//! contracts and ships HTTP, file and in-memory bindings.

pub mod error;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod retry;

pub use error::{GatewayError, GatewayResult};
pub use gateway::{normalize_plate, AllowListGateway, AuthorizationGateway, AuthorizedPlate, RecordedDetection};
pub use http::{HttpCameraRegistry, HttpConfig, HttpGateway};
pub use registry::{CameraRegistry, FileCameraRegistry, StaticCameraRegistry};
pub use retry::{with_retry, RetryConfig};
