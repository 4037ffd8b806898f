use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecheck_hw::{CameraDevice, V4lCamera};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "facecheck", about = "facecheck attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera, or close it if open
    Camera,
    /// Capture a face in the guide circle and enroll it under a name
    Register {
        /// Name to store with the captured face
        #[arg(short, long)]
        name: String,
        /// Seconds to wait for a usable face
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Start recording attendance for recognised faces
    Check,
    /// Stop registering or checking
    Idle,
    /// Show daemon status
    Status,
    /// List enrolled identities
    List,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device to open
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the last captured frame as an image
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// `#[zbus::proxy]` generates both `AttendanceProxy` (async) and
// `AttendanceProxyBlocking`. Only the async variant is used here.
#[zbus::proxy(
    interface = "org.facecheck.Attendance1",
    default_service = "org.facecheck.Attendance1",
    default_path = "/org/facecheck/Attendance1"
)]
trait Attendance {
    async fn toggle_camera(&self) -> zbus::Result<bool>;
    async fn enter_register_mode(&self) -> zbus::Result<String>;
    async fn enter_check_mode(&self) -> zbus::Result<String>;
    async fn return_to_idle(&self) -> zbus::Result<String>;
    async fn submit_name(&self, name: &str) -> zbus::Result<u32>;
    async fn cancel_enrollment(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Test { device, output } = &cli.command {
        return run_camera_test(device, output.as_deref());
    }

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&connection)
        .await
        .context("facecheckd is not reachable")?;

    match cli.command {
        Commands::Camera => {
            let open = proxy.toggle_camera().await?;
            println!("camera {}", if open { "opened" } else { "closed" });
        }
        Commands::Register { name, timeout } => {
            register(&proxy, &name, Duration::from_secs(timeout)).await?;
        }
        Commands::Check => {
            let mode = proxy.enter_check_mode().await?;
            println!("mode: {mode}");
        }
        Commands::Idle => {
            let mode = proxy.return_to_idle().await?;
            println!("mode: {mode}");
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::List => {
            let identities: Vec<serde_json::Value> =
                serde_json::from_str(&proxy.list_identities().await?)?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                println!(
                    "{:>4}  {}",
                    identity["identifier"].as_u64().unwrap_or_default(),
                    identity["name"].as_str().unwrap_or_default()
                );
            }
        }
        Commands::Test { .. } => unreachable!("handled before connecting"),
    }

    Ok(())
}

/// Enter register mode, wait for the daemon to capture a face, then name it.
async fn register(proxy: &AttendanceProxy<'_>, name: &str, timeout: Duration) -> Result<()> {
    let status = daemon_status(proxy).await?;
    if status["camera_active"].as_bool() != Some(true) {
        bail!("camera is closed; run `facecheck camera` first");
    }
    if status["pending_enrollment"].as_bool() == Some(true) {
        tracing::info!("discarding an earlier unnamed capture");
        proxy.cancel_enrollment().await?;
    }

    proxy.enter_register_mode().await?;
    println!("Look at the camera and keep your face inside the circle...");

    let deadline = Instant::now() + timeout;
    let mut last_text = String::new();
    loop {
        let status = daemon_status(proxy).await?;
        let text = status["status"].as_str().unwrap_or_default();
        if text != last_text {
            println!("  {text}");
            last_text = text.to_string();
        }
        if status["pending_enrollment"].as_bool() == Some(true) {
            break;
        }
        if Instant::now() >= deadline {
            proxy.return_to_idle().await?;
            bail!("no usable face within {}s", timeout.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let identifier = proxy.submit_name(name).await?;
    println!("Registered {name} with id {identifier}");
    Ok(())
}

async fn daemon_status(proxy: &AttendanceProxy<'_>) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(&proxy.status().await?)?)
}

/// Open the camera directly, grab a few frames and optionally save the last one.
fn run_camera_test(device: &str, output: Option<&std::path::Path>) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = V4lCamera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for info in &devices {
        println!("  {}  {} ({})", info.path, info.name, info.driver);
    }

    let mut camera = V4lCamera::open(device, 640, 480)
        .with_context(|| format!("failed to open {device}"))?;
    println!("Opened {device} at {}x{}", camera.width, camera.height);

    let mut last = None;
    for _ in 0..5 {
        let started = Instant::now();
        match camera.read_frame() {
            Ok(frame) => {
                println!(
                    "  frame #{} {}x{} {:?} in {:?}",
                    frame.sequence,
                    frame.width,
                    frame.height,
                    frame.layout,
                    started.elapsed()
                );
                last = Some(frame);
            }
            Err(e) => println!("  capture failed: {e}"),
        }
    }
    Box::new(camera).release();

    let Some(frame) = last else {
        bail!("no frames captured from {device}");
    };

    if let Some(path) = output {
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.to_rgb())
            .context("frame buffer does not match its dimensions")?;
        image
            .save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved snapshot to {}", path.display());
    }

    Ok(())
}
