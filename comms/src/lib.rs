//! Wire-level types and transports shared with the remote compute service.

pub mod channel;
pub mod csv;
pub mod frame;
mod rendering;
pub mod specs;

pub use channel::{ChannelError, ChannelEvent, TrainingChannel};
pub use csv::CodecError;
pub use frame::{TrainingFrame, UpdateFrame};
pub use rendering::Rendering;
pub use specs::{
    params::{GaussianParam, ParamSet, UpdateParamsRequest},
    responses::{DeviceInfo, InitializeResponse, ParamsResponse, RenderPair, UpdateParamsResponse},
    training::{LossFn, ModelSpec, TrainingSpec, Variant},
};
