//! One-shot calls to the compute service and the seam the controller talks through.

mod http;

use std::sync::Arc;

use comms::{
    DeviceInfo, GaussianParam, InitializeResponse, ModelSpec, ParamSet, RenderPair,
    TrainingChannel, TrainingSpec, UpdateParamsResponse,
};

pub use http::HttpComputeService;

use crate::{error::Result, session::SourceImage};

/// The remote compute service as seen by the controller.
///
/// Every failure is normalized into a `SessionError`, request/response calls fail with
/// `Transport` and the training endpoint with `Channel`.
#[allow(unused)]
#[trait_variant::make(ComputeService: Send)]
pub trait LocalComputeService {
    /// Describes the device the service fits on, informational only.
    async fn device_info(&self) -> Result<DeviceInfo>;

    /// Uploads the source image and builds a fresh model for it.
    ///
    /// # Arguments
    /// * `image` - The image to approximate.
    /// * `model` - The number of primitives and how their spread is modelled.
    async fn initialize(&self, image: Arc<SourceImage>, model: ModelSpec)
    -> Result<InitializeResponse>;

    /// Rebuilds the model for the already uploaded image.
    async fn reinitialize(&self, model: ModelSpec) -> Result<RenderPair>;

    /// Asks the service to stop the current training run.
    async fn stop(&self) -> Result<()>;

    /// Fetches the full parameter collection of the current model.
    async fn fetch_params(&self) -> Result<ParamSet>;

    /// Replaces the model's parameters with `params`.
    async fn update_params(&self, params: Vec<GaussianParam>) -> Result<UpdateParamsResponse>;

    /// Opens a training channel and sends `spec` as its configuration frame.
    async fn open_training(&self, spec: TrainingSpec) -> Result<TrainingChannel>;
}
