//! The session state machine.

use std::{future::Future, sync::Arc};

use comms::{
    ChannelEvent, DeviceInfo, InitializeResponse, ParamSet, RenderPair, TrainingChannel,
    UpdateParamsResponse,
};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    configs::Settings,
    error::{Result, SessionError},
    params::{ParamField, ParameterStore},
    remote::ComputeService,
    session::{Progress, Session, SessionState, SourceImage},
};

/// A user action, validated against the current state by [`SessionController::handle`].
#[derive(Debug)]
pub enum Command {
    SelectImage(SourceImage),
    Reinitialize { clear_log: bool },
    /// Reinitializes the model from the current settings, then opens a training channel.
    StartTraining,
    Stop,
    Reset,
    Configure(Settings),
    FetchParams,
    ApplyParams,
    /// Decodes parameter text, stores it and applies it to the service.
    ImportParams(String),
    EditParam {
        index: u32,
        field: String,
        value: String,
    },
}

impl Command {
    fn action(&self) -> &'static str {
        match self {
            Self::SelectImage(_) => "select an image",
            Self::Reinitialize { .. } => "reinitialize",
            Self::StartTraining => "start training",
            Self::Stop => "stop training",
            Self::Reset => "reset",
            Self::Configure(_) => "configure",
            Self::FetchParams => "fetch parameters",
            Self::ApplyParams => "apply parameters",
            Self::ImportParams(_) => "import parameters",
            Self::EditParam { .. } => "edit a parameter",
        }
    }
}

/// The result of an outstanding request/response call.
enum Outcome {
    Initialized(Result<InitializeResponse>),
    Reinitialized(Result<RenderPair>),
    TrainingStarted(std::result::Result<(RenderPair, TrainingChannel), StartFailure>),
    ParamsFetched(Result<ParamSet>),
    ParamsApplied(Result<UpdateParamsResponse>),
}

/// A failed train start, the reinitialize half may still have produced renderings.
struct StartFailure {
    renderings: Option<RenderPair>,
    error: SessionError,
}

/// The single outstanding gated call.
struct Pending {
    /// The state to return to if the call fails.
    resume: SessionState,
    future: BoxFuture<'static, Outcome>,
}

enum Completion {
    Call(Outcome),
    Channel(ChannelEvent),
    Device(Result<DeviceInfo>),
}

/// Owns the `Session` and sequences every call into the compute service.
///
/// At most one gated call is outstanding and at most one training channel is open,
/// which follows from there being a single slot for each. Dropping the outstanding call
/// cancels it, so a response that arrives after a reset or a stop is never applied.
pub struct SessionController<C> {
    service: Arc<C>,
    settings: Settings,
    session: Session,
    params: ParameterStore,
    pending: Option<Pending>,
    channel: Option<TrainingChannel>,
    device: Option<BoxFuture<'static, Result<DeviceInfo>>>,
    stopping: Vec<JoinHandle<()>>,
}

impl<C> SessionController<C>
where
    C: ComputeService + Sync + 'static,
{
    /// Creates a new `SessionController` in the `waiting` state.
    ///
    /// # Arguments
    /// * `service` - The compute service to drive.
    /// * `settings` - The initial model and training configuration.
    ///
    /// # Returns
    /// A new `SessionController` instance.
    pub fn new(service: C, settings: Settings) -> Self {
        Self {
            service: Arc::new(service),
            settings,
            session: Session::default(),
            params: ParameterStore::default(),
            pending: None,
            channel: None,
            device: None,
            stopping: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    /// Whether a gated call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Takes the one-shot failure notice, if any.
    pub fn take_notice(&mut self) -> Option<String> {
        self.session.notice.take()
    }

    /// Encodes the current parameter collection as delimited text.
    pub fn export_params(&self) -> String {
        self.params.export_csv()
    }

    /// Starts fetching the device description; it lands in `Session::device`.
    pub fn request_device_info(&mut self) {
        let service = Arc::clone(&self.service);
        self.device = Some(Box::pin(async move { service.device_info().await }));
    }

    /// Validates `command` against the current state and starts acting on it.
    ///
    /// Calls to the service are only issued here; their results are applied by
    /// [`Self::step`] or [`Self::run`].
    ///
    /// # Errors
    /// `IllegalTransition` and `Busy` reject the command without side effects. Any
    /// other error has already been appended to the log and raised as a notice.
    pub fn handle(&mut self, command: Command) -> Result<()> {
        let action = command.action();

        let result = match command {
            Command::SelectImage(image) => self.select_image(image),
            Command::Reinitialize { clear_log } => self.reinitialize(clear_log),
            Command::StartTraining => self.start_training(),
            Command::Stop => self.stop(),
            Command::Reset => {
                self.reset();
                Ok(())
            }
            Command::Configure(settings) => self.configure(settings),
            Command::FetchParams => self.fetch_params(),
            Command::ApplyParams => self.apply_params(),
            Command::ImportParams(text) => self.import_params(&text),
            Command::EditParam {
                index,
                field,
                value,
            } => self.edit_param(index, &field, &value),
        };

        if let Err(e) = &result {
            if e.is_rejection() {
                warn!(action = action, state = self.session.state.as_str(); "{e}");
            } else {
                self.fail(e.clone());
            }
        }

        result
    }

    /// Waits for the outstanding call, the open channel or the device query to produce
    /// something, and applies it.
    ///
    /// # Returns
    /// `false` without waiting if nothing is in flight.
    pub async fn step(&mut self) -> bool {
        if self.pending.is_none() && self.channel.is_none() && self.device.is_none() {
            return false;
        }

        let completion = self.next_completion().await;
        self.apply(completion);
        true
    }

    /// Runs the controller until `commands` is closed, publishing a snapshot of the
    /// session after every handled event.
    ///
    /// # Arguments
    /// * `commands` - User actions, handled in arrival order.
    /// * `views` - Receives the session after each event.
    ///
    /// # Returns
    /// The final session.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        views: watch::Sender<Session>,
    ) -> Session {
        self.request_device_info();
        views.send_replace(self.session.clone());

        loop {
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                completion = self.next_completion() => Wake::Completion(completion),
            };

            match wake {
                Wake::Command(Some(command)) => {
                    let _ = self.handle(command);
                }
                Wake::Command(None) => break,
                Wake::Completion(completion) => self.apply(completion),
            }

            views.send_replace(self.session.clone());
        }

        self.shutdown().await
    }

    /// Closes the training channel, waits for every stop request still in flight and
    /// hands back the final session.
    pub async fn shutdown(mut self) -> Session {
        if self.session.state == SessionState::Training {
            self.request_stop();
        }
        self.pending = None;
        self.close_channel();

        for stopping in self.stopping.drain(..) {
            let _ = stopping.await;
        }

        info!("session controller stopped");
        self.session
    }

    fn select_image(&mut self, image: SourceImage) -> Result<()> {
        self.require(SessionState::Waiting, "select an image")?;
        let model = self.settings.model_spec()?;

        info!(name = image.name.as_str(), bytes = image.bytes.len(); "uploading image");
        self.session.reset();
        self.params.clear();

        let image = Arc::new(image);
        self.session.active_file = Some(Arc::clone(&image));
        self.session.state = SessionState::Loading;

        let service = Arc::clone(&self.service);
        self.begin(SessionState::Waiting, async move {
            Outcome::Initialized(service.initialize(image, model).await)
        });
        Ok(())
    }

    fn reinitialize(&mut self, clear_log: bool) -> Result<()> {
        let prior = self.settled("reinitialize")?;
        let model = self.settings.model_spec()?;

        info!(gaussians = model.gaussian_count.get(), variant = model.variant.as_str(); "reinitializing");
        self.session.progress = Progress::default();
        if clear_log {
            self.session.log.clear();
        }
        self.session.state = SessionState::Loading;

        let service = Arc::clone(&self.service);
        self.begin(prior, async move {
            Outcome::Reinitialized(service.reinitialize(model).await)
        });
        Ok(())
    }

    /// The server-side model is always rebuilt from the current settings before the
    /// channel opens, edits made since the last reinitialize must not be trained over.
    fn start_training(&mut self) -> Result<()> {
        let prior = self.settled("start training")?;
        let model = self.settings.model_spec()?;
        let spec = self.settings.training_spec()?;

        info!(steps = spec.num_steps.get(), interval = spec.update_interval.get(); "starting training");
        self.session.progress = Progress {
            current_step: 0,
            total_steps: spec.num_steps.get(),
            last_loss: None,
        };
        self.session.state = SessionState::Training;

        let service = Arc::clone(&self.service);
        self.begin(prior, async move {
            let renderings = match service.reinitialize(model).await {
                Ok(renderings) => renderings,
                Err(error) => {
                    return Outcome::TrainingStarted(Err(StartFailure {
                        renderings: None,
                        error,
                    }));
                }
            };

            match service.open_training(spec).await {
                Ok(channel) => Outcome::TrainingStarted(Ok((renderings, channel))),
                Err(error) => Outcome::TrainingStarted(Err(StartFailure {
                    renderings: Some(renderings),
                    error,
                })),
            }
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.require(SessionState::Training, "stop training")?;

        if self.pending.take().is_some() {
            debug!("cancelled training start");
        }
        self.close_channel();
        self.session.state = SessionState::Paused;

        let Progress {
            current_step,
            total_steps,
            ..
        } = self.session.progress;
        self.session
            .push_log(format!("training stopped at step {current_step}/{total_steps}"));

        self.request_stop();
        Ok(())
    }

    fn reset(&mut self) {
        if self.session.state == SessionState::Training {
            self.request_stop();
        }

        self.pending = None;
        self.close_channel();
        self.session.reset();
        self.params.clear();
        info!("session reset");
    }

    fn configure(&mut self, settings: Settings) -> Result<()> {
        settings.validate()?;
        debug!("settings updated: {settings:?}");
        self.settings = settings;
        Ok(())
    }

    fn fetch_params(&mut self) -> Result<()> {
        let prior = self.settled("fetch parameters")?;

        let service = Arc::clone(&self.service);
        self.begin(prior, async move {
            Outcome::ParamsFetched(service.fetch_params().await)
        });
        Ok(())
    }

    fn apply_params(&mut self) -> Result<()> {
        let prior = self.settled("apply parameters")?;
        if self.params.is_empty() {
            return Err(SessionError::EmptyParameterSet);
        }

        self.send_params(prior);
        Ok(())
    }

    fn import_params(&mut self, text: &str) -> Result<()> {
        let prior = self.settled("import parameters")?;
        let set = ParameterStore::decode_csv(text)?;

        self.session.push_log(format!(
            "imported {} gaussians ({})",
            set.len(),
            if set.has_covariance {
                "covariance"
            } else {
                "variance only"
            }
        ));
        self.params.replace(set);
        self.send_params(prior);
        Ok(())
    }

    fn edit_param(&mut self, index: u32, field: &str, value: &str) -> Result<()> {
        let field: ParamField = field.parse()?;
        self.params.edit(index, field, value)
    }

    fn send_params(&mut self, prior: SessionState) {
        let params = self.params.params().to_vec();
        let service = Arc::clone(&self.service);
        self.begin(prior, async move {
            Outcome::ParamsApplied(service.update_params(params).await)
        });
    }

    /// Checks that the model is settled and no other call is outstanding.
    fn settled(&self, action: &'static str) -> Result<SessionState> {
        if !self.session.state.is_settled() {
            return Err(SessionError::IllegalTransition {
                state: self.session.state,
                action,
            });
        }
        if self.pending.is_some() {
            return Err(SessionError::Busy { action });
        }
        Ok(self.session.state)
    }

    fn require(&self, state: SessionState, action: &'static str) -> Result<()> {
        if self.session.state == state {
            return Ok(());
        }

        Err(SessionError::IllegalTransition {
            state: self.session.state,
            action,
        })
    }

    fn begin<F>(&mut self, resume: SessionState, future: F)
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        self.pending = Some(Pending {
            resume,
            future: Box::pin(future),
        });
    }

    /// Asks the service to stop without waiting for it to acknowledge.
    fn request_stop(&mut self) {
        let service = Arc::clone(&self.service);
        self.stopping.retain(|stopping| !stopping.is_finished());
        self.stopping.push(tokio::spawn(async move {
            if let Err(e) = service.stop().await {
                warn!("stop request failed: {e}");
            }
        }));
    }

    fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn fail(&mut self, error: SessionError) {
        warn!(state = self.session.state.as_str(); "{error}");
        let message = error.to_string();
        self.session.push_log(message.clone());
        self.session.notice = Some(message);
    }

    async fn next_completion(&mut self) -> Completion {
        tokio::select! {
            outcome = call_outcome(&mut self.pending) => Completion::Call(outcome),
            event = channel_event(&mut self.channel) => Completion::Channel(event),
            info = device_info(&mut self.device) => Completion::Device(info),
        }
    }

    fn apply(&mut self, completion: Completion) {
        match completion {
            Completion::Call(outcome) => self.finish_call(outcome),
            Completion::Channel(event) => self.on_channel_event(event),
            Completion::Device(info) => {
                self.device = None;
                match info {
                    Ok(info) => {
                        info!(device = info.device.as_str(); "compute device");
                        self.session.device = Some(info.device);
                    }
                    Err(e) => warn!("device info unavailable: {e}"),
                }
            }
        }
    }

    fn finish_call(&mut self, outcome: Outcome) {
        let Some(Pending { resume, .. }) = self.pending.take() else {
            return;
        };

        match outcome {
            Outcome::Initialized(Ok(response)) => {
                self.session.source_rendering = Some(response.source_rendering);
                self.session.predicted_rendering = Some(response.predicted_rendering);
                self.session.points_rendering = Some(response.points_rendering);
                self.session.state = SessionState::Loaded;

                if let Some(image) = &self.session.active_file {
                    let message = format!("uploaded {}", image.name);
                    self.session.push_log(message);
                }
                self.session.push_log(format!(
                    "initialized {} gaussians ({})",
                    self.settings.gaussian_count, self.settings.variant
                ));
            }
            Outcome::Initialized(Err(e)) => {
                self.session.state = SessionState::Waiting;
                self.session.active_file = None;
                self.fail(e);
            }
            Outcome::Reinitialized(Ok(renderings)) => {
                self.session.set_renderings(renderings);
                self.session.state = SessionState::Loaded;
                self.session.push_log(format!(
                    "reinitialized {} gaussians ({})",
                    self.settings.gaussian_count, self.settings.variant
                ));
            }
            Outcome::Reinitialized(Err(e)) => {
                self.session.state = resume;
                self.fail(e);
            }
            Outcome::TrainingStarted(Ok((renderings, channel))) => {
                debug_assert_eq!(self.session.state, SessionState::Training);
                self.session.set_renderings(renderings);
                self.channel = Some(channel);
                self.session.push_log(format!(
                    "training started: {} steps, lr={}, loss={}",
                    self.session.progress.total_steps,
                    self.settings.learning_rate,
                    self.settings.loss_function
                ));
            }
            Outcome::TrainingStarted(Err(StartFailure { renderings, error })) => {
                if let Some(renderings) = renderings {
                    self.session.set_renderings(renderings);
                }
                self.session.progress = Progress::default();
                self.session.state = resume;
                self.fail(error);
            }
            Outcome::ParamsFetched(Ok(set)) => {
                self.session
                    .push_log(format!("fetched {} gaussian parameters", set.len()));
                self.params.replace(set);
            }
            Outcome::ParamsApplied(Ok(response)) => {
                self.session.set_renderings(response.renderings);
                self.session.push_log(format!(
                    "applied {} gaussian parameters",
                    self.params.params().len()
                ));
            }
            Outcome::ParamsFetched(Err(e)) | Outcome::ParamsApplied(Err(e)) => self.fail(e),
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Update(frame) => {
                let progress = &mut self.session.progress;
                if frame.step > progress.total_steps {
                    warn!(step = frame.step, total = progress.total_steps; "update past the last step");
                }

                progress.current_step = frame.step;
                progress.last_loss = frame.loss.or(progress.last_loss);

                let message = frame.message.unwrap_or_else(|| match progress.last_loss {
                    Some(loss) => format!(
                        "step {}/{}: loss={loss:.6}",
                        progress.current_step, progress.total_steps
                    ),
                    None => format!("step {}/{}", progress.current_step, progress.total_steps),
                });

                if let Some(rendering) = frame.predicted_rendering {
                    self.session.predicted_rendering = Some(rendering);
                }
                if let Some(rendering) = frame.points_rendering {
                    self.session.points_rendering = Some(rendering);
                }
                self.session.push_log(message);
            }
            ChannelEvent::Log(message) => self.session.push_log(message),
            ChannelEvent::Complete(message) => {
                self.close_channel();
                self.session.state = SessionState::Paused;
                self.session
                    .push_log(message.unwrap_or_else(|| "training complete".to_string()));
            }
            ChannelEvent::Failed(message) => {
                self.close_channel();
                self.session.state = SessionState::Paused;
                self.fail(SessionError::Channel(message));
            }
        }
    }
}

enum Wake {
    Command(Option<Command>),
    Completion(Completion),
}

async fn call_outcome(pending: &mut Option<Pending>) -> Outcome {
    match pending {
        Some(pending) => (&mut pending.future).await,
        None => std::future::pending().await,
    }
}

async fn channel_event(channel: &mut Option<TrainingChannel>) -> ChannelEvent {
    match channel {
        Some(channel) => channel
            .next()
            .await
            .unwrap_or_else(|| ChannelEvent::Failed("channel closed".into())),
        None => std::future::pending().await,
    }
}

async fn device_info(device: &mut Option<BoxFuture<'static, Result<DeviceInfo>>>) -> Result<DeviceInfo> {
    match device {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
