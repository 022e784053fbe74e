use std::{
    io::Read,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use comms::{
    DeviceInfo, GaussianParam, InitializeResponse, ModelSpec, ParamSet, ParamsResponse,
    RenderPair, TrainingChannel, TrainingSpec, UpdateParamsRequest, UpdateParamsResponse,
};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use tokio::task;

use super::ComputeService;
use crate::{
    configs::ClientConfig,
    error::{Result, SessionError},
    session::SourceImage,
};

const MAX_ERROR_BODY_BYTES: u64 = 4 * 1024;

/// `ComputeService` over HTTP and a websocket training endpoint.
///
/// `ureq` is blocking, so every call runs on tokio's blocking pool and the event loop
/// never waits on the network.
#[derive(Clone)]
pub struct HttpComputeService {
    base_url: String,
    channel_url: String,
    silence: Duration,
    agent: ureq::Agent,
}

impl HttpComputeService {
    /// Creates a new `HttpComputeService`.
    ///
    /// # Arguments
    /// * `config` - Where the service lives and the client's timeouts.
    ///
    /// # Returns
    /// A new `HttpComputeService` instance.
    pub fn new(config: &ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .build();

        Self {
            base_url: config.server_url.clone(),
            channel_url: config.channel_url(),
            silence: config.channel_silence,
            agent,
        }
    }

    /// Runs a blocking request on the blocking pool.
    ///
    /// # Arguments
    /// * `operation` - Name of the call, used in errors and logs.
    /// * `request` - Performs the request given the agent and the base URL.
    async fn call<T, F>(&self, operation: &'static str, request: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ureq::Agent, &str) -> Result<T> + Send + 'static,
    {
        let agent = self.agent.clone();
        let base = self.base_url.clone();
        debug!(operation = operation; "calling compute service");

        task::spawn_blocking(move || request(&agent, &base))
            .await
            .map_err(|e| SessionError::transport(operation, e))?
    }
}

impl ComputeService for HttpComputeService {
    async fn device_info(&self) -> Result<DeviceInfo> {
        const OP: &str = "device info";
        self.call(OP, |agent, base| {
            let response = agent.get(&format!("{base}/device-info")).call();
            json(OP, checked(OP, response)?)
        })
        .await
    }

    async fn initialize(
        &self,
        image: Arc<SourceImage>,
        model: ModelSpec,
    ) -> Result<InitializeResponse> {
        const OP: &str = "initialize";
        self.call(OP, move |agent, base| {
            let boundary = boundary();
            let body = multipart_body(&boundary, &image, &model);
            let response = agent
                .post(&format!("{base}/initialize"))
                .set(
                    "Content-Type",
                    &format!("multipart/form-data; boundary={boundary}"),
                )
                .send_bytes(&body);
            json(OP, checked(OP, response)?)
        })
        .await
    }

    async fn reinitialize(&self, model: ModelSpec) -> Result<RenderPair> {
        const OP: &str = "reinitialize";
        self.call(OP, move |agent, base| {
            let response = agent
                .post(&format!("{base}/reinitialize"))
                .query("gaussianCount", &model.gaussian_count.to_string())
                .query("variantId", model.variant.as_str())
                .call();
            json(OP, checked(OP, response)?)
        })
        .await
    }

    async fn stop(&self) -> Result<()> {
        const OP: &str = "stop";
        self.call(OP, |agent, base| {
            let response = agent.post(&format!("{base}/stop")).call();
            checked(OP, response).map(drop)
        })
        .await
    }

    async fn fetch_params(&self) -> Result<ParamSet> {
        const OP: &str = "fetch parameters";
        let response: ParamsResponse = self
            .call(OP, |agent, base| {
                let response = agent.get(&format!("{base}/get-params")).call();
                json(OP, checked(OP, response)?)
            })
            .await?;

        if response.count != 0 && response.count != response.params.len() {
            warn!(
                count = response.count,
                received = response.params.len();
                "parameter count does not match the received collection"
            );
        }

        Ok(response.into())
    }

    async fn update_params(&self, params: Vec<GaussianParam>) -> Result<UpdateParamsResponse> {
        const OP: &str = "apply parameters";
        self.call(OP, move |agent, base| {
            let response = agent
                .post(&format!("{base}/update-params"))
                .send_json(UpdateParamsRequest { params: &params });
            json(OP, checked(OP, response)?)
        })
        .await
    }

    async fn open_training(&self, spec: TrainingSpec) -> Result<TrainingChannel> {
        let (ws, _) = tokio_tungstenite::connect_async(self.channel_url.as_str())
            .await
            .map_err(|e| {
                SessionError::Channel(format!("cannot connect to {}: {e}", self.channel_url))
            })?;

        let channel = TrainingChannel::open(ws, &spec, self.silence).await?;
        Ok(channel)
    }
}

fn checked(
    operation: &'static str,
    response: std::result::Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response> {
    match response {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(code, response)) => {
            let mut body = String::new();
            let _ = response
                .into_reader()
                .take(MAX_ERROR_BODY_BYTES)
                .read_to_string(&mut body);
            Err(SessionError::transport(
                operation,
                format!("HTTP {code}: {}", body.trim()),
            ))
        }
        Err(ureq::Error::Transport(e)) => Err(SessionError::transport(operation, e)),
    }
}

fn json<T: DeserializeOwned>(operation: &'static str, response: ureq::Response) -> Result<T> {
    response
        .into_json()
        .map_err(|e| SessionError::transport(operation, format!("invalid response body: {e}")))
}

fn boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("----splat-client-{nanos:x}")
}

/// Builds the `multipart/form-data` body of an upload: the image file part followed by
/// the `gaussianCount` and `variantId` fields.
fn multipart_body(boundary: &str, image: &SourceImage, model: &ModelSpec) -> Vec<u8> {
    let mut body = Vec::with_capacity(image.bytes.len() + 512);

    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\n\
             Content-Type: {}\r\n\r\n",
            image.name.replace('"', "'"),
            image.media_type()
        )
        .as_bytes(),
    );
    body.extend_from_slice(&image.bytes);
    body.extend_from_slice(b"\r\n");

    let fields = [
        ("gaussianCount", model.gaussian_count.to_string()),
        ("variantId", model.variant.as_str().to_string()),
    ];
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\n\
                 Content-Disposition: form-data; name=\"{name}\"\r\n\r\n\
                 {value}\r\n"
            )
            .as_bytes(),
        );
    }

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
