use std::{env, fs, path::Path};

use anyhow::{Context, bail};
use controller::{
    Command, Session, SessionController, SessionState, SourceImage,
    configs::{ClientConfig, Settings},
    remote::HttpComputeService,
};
use log::info;
use tokio::signal;

const USAGE: &str = "usage: splat-client <image> [settings.json]";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(image_path) = args.next() else {
        bail!(USAGE);
    };
    let settings = match args.next() {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };
    settings.validate()?;

    let config = ClientConfig::from_env()?;
    info!(server = config.server_url.as_str(); "using compute service");

    let bytes = fs::read(&image_path).with_context(|| format!("reading {image_path}"))?;
    let name = Path::new(&image_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_path.clone());

    let mut controller = SessionController::new(HttpComputeService::new(&config), settings);
    let mut printed = 0;

    controller.request_device_info();
    controller.handle(Command::SelectImage(SourceImage::new(name, bytes)))?;
    settle(&mut controller, &mut printed).await;

    if controller.session().state != SessionState::Loaded {
        let notice = controller.take_notice().unwrap_or_default();
        bail!("failed to load the image: {notice}");
    }
    if let Some(device) = &controller.session().device {
        println!("training on {device}");
    }

    controller.handle(Command::StartTraining)?;
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while controller.session().state == SessionState::Training {
        let interrupted = tokio::select! {
            _ = controller.step() => false,
            _ = &mut ctrl_c => true,
        };

        if interrupted {
            info!("received SIGINT, stopping training");
            controller.handle(Command::Stop)?;
        }
        print_log(controller.session(), &mut printed);
    }

    if let Some(notice) = controller.take_notice() {
        bail!("training failed: {notice}");
    }
    let progress = controller.session().progress;
    println!(
        "paused at step {}/{} ({:.0}%)",
        progress.current_step,
        progress.total_steps,
        progress.fraction() * 100.0
    );

    controller.handle(Command::FetchParams)?;
    settle(&mut controller, &mut printed).await;
    if let Some(notice) = controller.take_notice() {
        bail!("failed to fetch parameters: {notice}");
    }

    if let Ok(path) = env::var("SPLAT_EXPORT") {
        fs::write(&path, controller.export_params()).with_context(|| format!("writing {path}"))?;
        println!("exported {} gaussians to {path}", controller.params().params().len());
    }

    let session = controller.shutdown().await;
    info!(state = session.state.as_str(), entries = session.log.len(); "done");
    Ok(())
}

/// Steps the controller until its outstanding call has been applied.
async fn settle(controller: &mut SessionController<HttpComputeService>, printed: &mut usize) {
    while controller.is_busy() && controller.step().await {
        print_log(controller.session(), printed);
    }
}

fn print_log(session: &Session, printed: &mut usize) {
    if *printed > session.log.len() {
        *printed = 0;
    }

    for entry in &session.log[*printed..] {
        println!("{}", entry.message);
    }
    *printed = session.log.len();
}
