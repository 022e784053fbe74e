pub mod configs;
mod controller;
pub mod error;
mod params;
pub mod remote;
mod session;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

pub use controller::{Command, SessionController};
pub use error::SessionError;
pub use params::{ParamField, ParameterStore};
pub use session::{LogEntry, Progress, Session, SessionState, SourceImage};

use crate::{configs::Settings, remote::ComputeService};

const COMMAND_BUFFER: usize = 32;

/// A running session controller and the ends used to drive and observe it.
pub struct SessionHandle {
    pub commands: mpsc::Sender<Command>,
    pub views: watch::Receiver<Session>,
    task: JoinHandle<Session>,
}

impl SessionHandle {
    /// Closes the command stream and waits for the controller to wind down.
    ///
    /// # Returns
    /// The final session, or `None` if the controller task panicked.
    pub async fn shutdown(self) -> Option<Session> {
        drop(self.commands);
        self.task.await.ok()
    }
}

/// Spawns a session controller driving `service` on the current runtime.
///
/// # Arguments
/// * `service` - The compute service the session talks to.
/// * `settings` - The initial model and training configuration.
///
/// # Returns
/// A `SessionHandle` to send commands through and watch the session from.
pub fn start<C>(service: C, settings: Settings) -> SessionHandle
where
    C: ComputeService + Sync + 'static,
{
    log::info!(
        gaussians = settings.gaussian_count,
        steps = settings.num_steps;
        "starting session controller"
    );

    let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
    let (tx, views) = watch::channel(Session::default());
    let controller = SessionController::new(service, settings);
    let task = tokio::spawn(controller.run(rx, tx));

    SessionHandle {
        commands,
        views,
        task,
    }
}
