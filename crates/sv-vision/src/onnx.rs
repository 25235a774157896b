//! ONNX Runtime session setup and tensor helpers.

use std::path::Path;

use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::error::{VisionError, VisionResult};

/// Create a session with automatic execution provider selection:
/// CUDA on Linux with the `cuda` feature, CoreML on macOS, CPU otherwise.
pub fn create_session(model_path: &Path) -> VisionResult<Session> {
    if !model_path.exists() {
        return Err(VisionError::model_not_found(model_path.display().to_string()));
    }

    let model_bytes = std::fs::read(model_path)?;

    let builder = Session::builder()
        .map_err(|e| VisionError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| VisionError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!(model = %model_path.display(), "Using CUDA execution provider");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!(model = %model_path.display(), "Using CoreML execution provider");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!(model = %model_path.display(), "Using CPU execution provider");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| VisionError::internal(format!("Failed to load ONNX model: {}", e)))
}

/// Build an NCHW `[1, 3, H, W]` tensor from an image already at model size.
///
/// Each channel is mapped as `(v / 255 - mean) / std`.
pub fn nchw_tensor(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> VisionResult<Value> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);

    for c in 0..3 {
        for pixel in image.pixels() {
            chw_data.push((pixel[c] as f32 / 255.0 - mean[c]) / std[c]);
        }
    }

    let shape = vec![1usize, 3, h, w];
    Tensor::from_array((shape, chw_data.into_boxed_slice()))
        .map(Value::from)
        .map_err(|e| VisionError::internal(format!("Failed to create tensor: {}", e)))
}

/// Run a session and flatten the named f32 output.
pub fn run_single_output(
    session: &std::sync::Mutex<Session>,
    model: &str,
    input: Value,
    output_name: &str,
) -> VisionResult<Vec<f32>> {
    let mut session = session
        .lock()
        .map_err(|_| VisionError::inference(model, "Session lock poisoned"))?;

    let outputs = session
        .run(ort::inputs![input])
        .map_err(|e| VisionError::inference(model, e.to_string()))?;

    let output = outputs
        .get(output_name)
        .ok_or_else(|| VisionError::invalid_output(model, format!("Missing {} tensor", output_name)))?;

    let tensor = output
        .try_extract_tensor::<f32>()
        .map_err(|e| VisionError::invalid_output(model, format!("Failed to extract tensor: {}", e)))?;

    Ok(tensor.1.iter().copied().collect())
}
