use serde::{Deserialize, Serialize};

/// A single fitted elliptical primitive.
///
/// `index` is the stable identity of the primitive inside its collection, edits are
/// addressed by it and never by position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaussianParam {
    pub index: u32,
    #[serde(alias = "mean_x")]
    pub mean_x: f32,
    #[serde(alias = "mean_y")]
    pub mean_y: f32,
    #[serde(alias = "sigma_x")]
    pub sigma_x: f32,
    #[serde(alias = "sigma_y")]
    pub sigma_y: f32,
    #[serde(
        rename = "sigmaXY",
        alias = "sigma_xy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sigma_xy: Option<f32>,
    pub weight: f32,
}

/// The whole parameter collection of a fitted model together with its structural flag.
///
/// The flag describes the collection it travels with; it is never tracked on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    pub params: Vec<GaussianParam>,
    pub has_covariance: bool,
}

impl ParamSet {
    /// Creates a new `ParamSet` sorted by ascending index.
    ///
    /// # Arguments
    /// * `params` - The primitives of the collection, in any order.
    /// * `has_covariance` - Whether the primitives carry the `sigmaXY` cross term.
    ///
    /// # Returns
    /// A new `ParamSet` instance.
    pub fn new(mut params: Vec<GaussianParam>, has_covariance: bool) -> Self {
        params.sort_by_key(|p| p.index);
        Self {
            params,
            has_covariance,
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Request body of `POST /update-params`, the full collection and never a diff.
#[derive(Debug, Serialize)]
pub struct UpdateParamsRequest<'a> {
    pub params: &'a [GaussianParam],
}
