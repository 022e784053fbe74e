mod client;
mod settings;

pub use client::ClientConfig;
pub use settings::Settings;
