//! The streaming, bidirectional connection used during a single training run.

use std::{error::Error, fmt, time::Duration};

use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    time,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{self, Message},
};
use tokio_util::sync::CancellationToken;

use crate::{
    frame::{TrainingFrame, UpdateFrame},
    specs::training::TrainingSpec,
};

/// What the controller observes from an open channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Update(UpdateFrame),
    Log(String),
    Complete(Option<String>),
    /// A server `error` frame, a dropped connection or a bounded silence.
    Failed(String),
}

impl ChannelEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Failed(_))
    }
}

impl From<TrainingFrame> for ChannelEvent {
    fn from(frame: TrainingFrame) -> Self {
        match frame {
            TrainingFrame::Update(update) => Self::Update(update),
            TrainingFrame::Log { message } => Self::Log(message),
            TrainingFrame::Complete { message } => Self::Complete(message),
            TrainingFrame::Error { message } => Self::Failed(message),
        }
    }
}

/// Failures while opening a channel.
#[derive(Debug)]
pub enum ChannelError {
    Transport(tungstenite::Error),
    Encode(serde_json::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "channel transport error: {e}"),
            Self::Encode(e) => write!(f, "cannot encode training config: {e}"),
        }
    }
}

impl Error for ChannelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Encode(e) => Some(e),
        }
    }
}

impl From<tungstenite::Error> for ChannelError {
    fn from(value: tungstenite::Error) -> Self {
        Self::Transport(value)
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// One training run's channel.
///
/// A background task reads the socket and forwards decoded frames in send order. The
/// first terminal event wins: once `Complete` or `Failed` was yielded, or `close` was
/// called, `next` returns `None` and frames still in flight are discarded.
pub struct TrainingChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    held: Option<ChannelEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl TrainingChannel {
    /// Sends the configuration frame over `ws` and starts listening for frames.
    ///
    /// # Arguments
    /// * `ws` - An already connected websocket.
    /// * `spec` - The configuration for this run, sent as the first and only outbound frame.
    /// * `silence` - How long to wait for a frame before giving up on the run.
    ///
    /// # Returns
    /// The open channel or a `ChannelError` if the configuration frame could not be sent.
    pub async fn open<S>(
        mut ws: WebSocketStream<S>,
        spec: &TrainingSpec,
        silence: Duration,
    ) -> Result<Self, ChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let frame = serde_json::to_string(spec)?;
        ws.send(Message::text(frame)).await?;
        debug!(steps = spec.num_steps.get(); "training config sent");

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(pump(ws, tx, cancel.clone(), silence));

        Ok(Self {
            events: rx,
            held: None,
            cancel,
            finished: false,
        })
    }

    /// Waits for the next event.
    ///
    /// Back-to-back updates that are already queued collapse into the newest one, each
    /// update supersedes the previous.
    ///
    /// # Returns
    /// The next event, or `None` once the channel is finished.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        if self.finished {
            return None;
        }

        let mut event = match self.held.take() {
            Some(event) => event,
            None => self
                .events
                .recv()
                .await
                .unwrap_or_else(|| ChannelEvent::Failed("channel reader stopped".into())),
        };

        if matches!(event, ChannelEvent::Update(_)) {
            while let Ok(next) = self.events.try_recv() {
                if matches!(next, ChannelEvent::Update(_)) {
                    event = next;
                } else {
                    self.held = Some(next);
                    break;
                }
            }
        }

        if event.is_terminal() {
            self.close();
        }

        Some(event)
    }

    /// Closes the channel, calling it again is a no-op.
    pub fn close(&mut self) {
        if self.finished {
            return;
        }

        self.finished = true;
        self.held = None;
        self.cancel.cancel();
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.finished
    }
}

impl Drop for TrainingChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump<S>(
    mut ws: WebSocketStream<S>,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
    silence: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = time::timeout(silence, ws.next()) => next,
        };

        let event = match next {
            Err(_) => ChannelEvent::Failed(format!(
                "no frame received for {}s",
                silence.as_secs_f32()
            )),
            Ok(None) => ChannelEvent::Failed("connection dropped before training finished".into()),
            Ok(Some(Err(e))) => ChannelEvent::Failed(format!("channel transport error: {e}")),
            Ok(Some(Ok(msg))) => match decode(msg) {
                Some(event) => event,
                None => continue,
            },
        };

        let terminal = event.is_terminal();
        if tx.send(event).is_err() || terminal {
            break;
        }
    }

    if let Err(e) = ws.close(None).await {
        debug!("closing training channel: {e}");
    }
}

fn decode(msg: Message) -> Option<ChannelEvent> {
    match msg {
        Message::Text(_) | Message::Binary(_) => {
            let data = msg.into_data();
            match serde_json::from_slice::<TrainingFrame>(&data) {
                Ok(frame) => Some(frame.into()),
                Err(e) => {
                    warn!("skipping undecodable training frame: {e}");
                    None
                }
            }
        }
        Message::Close(_) => Some(ChannelEvent::Failed(
            "the service closed the channel before training finished".into(),
        )),
        _ => None,
    }
}
