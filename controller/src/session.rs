use std::{fmt, path::Path, sync::Arc, time::SystemTime};

use comms::{RenderPair, Rendering};

/// High-level lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Waiting,
    Loading,
    Loaded,
    Training,
    Paused,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Training => "training",
            Self::Paused => "paused",
        }
    }

    /// Whether the model on the service is ready to be reconfigured, trained or edited.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Loaded | Self::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image picked by the user for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceImage {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// The media type guessed from the file extension.
    pub fn media_type(&self) -> &'static str {
        let ext = Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("png") => "image/png",
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("bmp") => "image/bmp",
            Some("webp") => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

/// Training progress of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    pub current_step: u32,
    pub total_steps: u32,
    pub last_loss: Option<f32>,
}

impl Progress {
    /// The completed share of the run in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.current_step as f32 / self.total_steps as f32).min(1.0)
    }
}

/// A single entry of the session log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub message: String,
}

/// Full client-visible state of one upload-to-training lifecycle.
///
/// Only the `SessionController` writes to it; everyone else reads snapshots.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub state: SessionState,
    pub active_file: Option<Arc<SourceImage>>,
    pub source_rendering: Option<Rendering>,
    pub predicted_rendering: Option<Rendering>,
    pub points_rendering: Option<Rendering>,
    pub progress: Progress,
    /// Append-only, in event arrival order.
    pub log: Vec<LogEntry>,
    pub device: Option<String>,
    /// One-shot user-visible failure message.
    pub notice: Option<String>,
}

impl Session {
    pub(crate) fn push_log(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry {
            timestamp: SystemTime::now(),
            message: message.into(),
        });
    }

    pub(crate) fn set_renderings(&mut self, pair: RenderPair) {
        self.predicted_rendering = Some(pair.predicted_rendering);
        self.points_rendering = Some(pair.points_rendering);
    }

    /// Back to `waiting` with everything cleared but the device description.
    pub(crate) fn reset(&mut self) {
        let device = self.device.take();
        *self = Self {
            device,
            ..Self::default()
        };
    }
}
