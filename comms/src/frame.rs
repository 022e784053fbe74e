//! Inbound frames of the training channel.

use serde::Deserialize;

use crate::Rendering;

/// A progress report sent every `updateInterval` steps.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFrame {
    pub step: u32,
    #[serde(default)]
    pub loss: Option<f32>,
    #[serde(default)]
    pub predicted_rendering: Option<Rendering>,
    #[serde(default)]
    pub points_rendering: Option<Rendering>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The frames the service pushes while a training run is active, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrainingFrame {
    Update(UpdateFrame),
    Complete {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        message: String,
    },
    Log {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_frame_kind() {
        let update: TrainingFrame = serde_json::from_str(
            r#"{"type":"update","step":100,"loss":0.25,"predictedRendering":"AAAA","message":"step 100"}"#,
        )
        .unwrap();
        let TrainingFrame::Update(update) = update else {
            panic!("expected update frame");
        };
        assert_eq!(update.step, 100);
        assert_eq!(update.loss, Some(0.25));
        assert!(update.predicted_rendering.is_some());
        assert!(update.points_rendering.is_none());

        let complete: TrainingFrame = serde_json::from_str(r#"{"type":"complete"}"#).unwrap();
        assert!(matches!(complete, TrainingFrame::Complete { message: None }));

        let error: TrainingFrame =
            serde_json::from_str(r#"{"type":"error","message":"cuda oom"}"#).unwrap();
        assert!(matches!(error, TrainingFrame::Error { message } if message == "cuda oom"));

        let log: TrainingFrame =
            serde_json::from_str(r#"{"type":"log","message":"warming up"}"#).unwrap();
        assert!(matches!(log, TrainingFrame::Log { message } if message == "warming up"));
    }

    #[test]
    fn update_accepts_raw_renderings() {
        let frame: TrainingFrame = serde_json::from_str(
            r#"{"type":"update","step":5,"predictedRendering":"AAAA","pointsRendering":[1,2,3]}"#,
        )
        .unwrap();
        let TrainingFrame::Update(update) = frame else {
            panic!("expected update frame");
        };

        assert_eq!(update.points_rendering, Some(Rendering::from_bytes(vec![1u8, 2, 3])));
        assert_eq!(
            update.predicted_rendering,
            Some(Rendering::from_encoded("AAAA"))
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(serde_json::from_str::<TrainingFrame>(r#"{"type":"pause"}"#).is_err());
    }
}
