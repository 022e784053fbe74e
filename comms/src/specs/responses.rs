use serde::Deserialize;

use super::params::{GaussianParam, ParamSet};
use crate::Rendering;

/// Response of `GET /device-info`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub device: String,
}

/// Response of `POST /initialize`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub source_rendering: Rendering,
    pub predicted_rendering: Rendering,
    pub points_rendering: Rendering,
}

/// The predicted image and point overlay the service renders after a model change.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPair {
    pub predicted_rendering: Rendering,
    pub points_rendering: Rendering,
}

/// Response of `GET /get-params`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsResponse {
    pub params: Vec<GaussianParam>,
    #[serde(alias = "has_covariance")]
    pub has_covariance: bool,
    #[serde(default)]
    pub count: usize,
}

impl From<ParamsResponse> for ParamSet {
    fn from(value: ParamsResponse) -> Self {
        ParamSet::new(value.params, value.has_covariance)
    }
}

/// Response of `POST /update-params`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParamsResponse {
    #[serde(flatten)]
    pub renderings: RenderPair,
    #[serde(default)]
    pub count: usize,
}
