use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;
use traffic_core::media::{FacingMode, MediaDevices};
use traffic_core::{FrameSamplerConfig, SessionHandle, SessionManager, SessionSettings};
use traffic_monitor::config::{Config, MAX_FPS, MIN_FPS};
use traffic_monitor::dashboard::ConsoleView;
use traffic_monitor::file_media::FileDevices;
use traffic_monitor::gemini_adapter::GeminiConnector;
use traffic_monitor::prompt_loader;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Facing {
    User,
    Environment,
}

impl From<Facing> for FacingMode {
    fn from(facing: Facing) -> Self {
        match facing {
            Facing::User => FacingMode::User,
            Facing::Environment => FacingMode::Environment,
        }
    }
}

/// Counts vehicles on a camera feed with a Gemini Live session.
///
/// While running, type `c` + Enter to switch cameras, `r` to reset the
/// counters and `q` to quit.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Camera to start with
    #[arg(long, value_enum, default_value = "environment")]
    facing: Facing,
    /// Frames sent to the model per second (0.02 to 30)
    #[arg(long, default_value_t = 1.0, value_parser = parse_fps)]
    fps: f32,
    /// Width of the frames sent to the model
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Image directory used as the camera (optional `user/` and `environment/` subfolders)
    #[arg(long)]
    frames: Option<PathBuf>,
    /// WAV file replayed as the microphone
    #[arg(long)]
    audio_in: Option<PathBuf>,
    /// Where to save the model's speech as WAV
    #[arg(long)]
    audio_out: Option<PathBuf>,
    /// System instruction file, or a prompts directory with traffic_monitor.md
    #[arg(long)]
    instructions: Option<PathBuf>,
    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
    /// Use the default microphone and speaker
    #[arg(long)]
    native_audio: bool,
}

fn parse_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value.parse().map_err(|e| format!("{e}"))?;
    if (MIN_FPS..=MAX_FPS).contains(&fps) {
        Ok(fps)
    } else {
        Err(format!("must be between {MIN_FPS} and {MAX_FPS}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    tracing::info!("Configuration loaded. Starting traffic monitor with model {}", config.model);

    // --- 4. Session Settings ---
    let mut settings = SessionSettings {
        model: config.model.clone(),
        voice: config.voice.clone(),
        frame_sampler: FrameSamplerConfig {
            fps: args.fps,
            width: args.width,
            ..FrameSamplerConfig::default()
        },
        ..SessionSettings::default()
    }
    .with_credential(config.gemini_api_key.clone());
    if let Some(path) = &args.instructions {
        settings.instructions =
            prompt_loader::load_instructions(path).context("Failed to load instructions")?;
        tracing::info!("Loaded instructions from {}", path.display());
    }

    // --- 5. Devices and Connector ---
    let devices = media_devices(&args)?;
    let gemini_config = gemini_live::Config::builder()
        .with_api_key(config.gemini_api_key.clone())
        .with_model(&config.model)
        .build();
    let connector = Arc::new(GeminiConnector::new(gemini_config));

    // --- 6. Run ---
    let (handle, actor) = SessionManager::spawn(settings, devices, connector);
    let view = tokio::spawn(ConsoleView::new().run(handle.subscribe()));

    handle
        .start(Some(args.facing.into()))
        .await
        .context("Failed to start the session")?;

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, stopping."),
        _ = deadline => tracing::info!("Duration elapsed, stopping."),
        _ = read_controls(handle.clone()) => tracing::info!("Quit requested, stopping."),
    }

    handle.shutdown().await?;
    actor.await.context("session manager panicked")?;
    view.await.context("console view panicked")?;
    Ok(())
}

fn media_devices(args: &Cli) -> Result<Arc<dyn MediaDevices>> {
    if args.native_audio {
        return native_devices(args);
    }
    Ok(Arc::new(FileDevices {
        audio_in: args.audio_in.clone(),
        frames: args.frames.clone(),
        audio_out: args.audio_out.clone(),
    }))
}

#[cfg(feature = "native-audio")]
fn native_devices(args: &Cli) -> Result<Arc<dyn MediaDevices>> {
    use traffic_native_utils::device;
    tracing::debug!("Input devices:\n{}", device::get_available_inputs()?);
    tracing::debug!("Output devices:\n{}", device::get_available_outputs()?);
    Ok(Arc::new(traffic_monitor::native_audio::NativeDevices {
        input: None,
        output: None,
        frames: args.frames.clone(),
    }))
}

#[cfg(not(feature = "native-audio"))]
fn native_devices(_args: &Cli) -> Result<Arc<dyn MediaDevices>> {
    anyhow::bail!("--native-audio needs a build with the `native-audio` feature")
}

/// Reads single-letter commands from stdin. Returns on `q` or end of input.
async fn read_controls(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let result = match line.trim() {
            "c" => handle.toggle_camera().await.map(|facing| {
                tracing::info!("Switching to {} camera", facing);
            }),
            "r" => handle.reset().await,
            "s" => handle.start(None).await,
            "x" => handle.stop().await,
            "q" => return,
            "" => Ok(()),
            other => {
                println!("unknown command {other:?} (c: camera, r: reset, s: start, x: stop, q: quit)");
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!("{}", e);
        }
    }
    // Stdin closed: keep running until Ctrl-C or the deadline.
    std::future::pending::<()>().await
}
