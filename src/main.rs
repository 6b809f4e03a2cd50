use anyhow::{anyhow, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process;

use rpi_camera_fb::camera::{Camera, CaptureError, V4l2Backend};
use rpi_camera_fb::config::Config;
use rpi_camera_fb::display::DisplaySurface;
use rpi_camera_fb::event_loop::{PollEvents, Session};
use rpi_camera_fb::render::JpegDecoder;
use rpi_camera_fb::shutdown;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// V4L2 capture device, e.g. /dev/video0
    capture_device: PathBuf,

    /// Framebuffer device, e.g. /dev/fb0
    display_device: PathBuf,

    /// Optional TOML file overriding resolutions, timeouts and snapshot naming
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: &CliArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    shutdown::install().context("Failed to install signal handlers")?;

    let surface = DisplaySurface::initialize(&args.display_device)
        .context("Failed to set up the display")?;

    let backend = V4l2Backend::open(&args.capture_device).map_err(|source| CaptureError::Open {
        path: args.capture_device.display().to_string(),
        source,
    })?;
    log::info!("Opened capture device {}", backend.path().display());
    let camera = Camera::initialize(backend, &config.capture)
        .context("Failed to start the capture device")?;
    let camera_fd = camera
        .raw_fd()
        .ok_or_else(|| anyhow!("capture device has no descriptor to wait on"))?;

    let mut session = Session::new(camera, surface, JpegDecoder, &config);
    let mut events = PollEvents::stdin(camera_fd).context("Failed to watch stdin")?;

    log::info!("Press [Enter] to capture a snapshot, Ctrl+C to exit.");
    let outcome = session.run(&mut events);
    session.shutdown();

    outcome.context("Event loop failed")
}

fn main() {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                process::exit(-1);
            }
        },
    };

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    log::info!("Starting with args: {:?}", args);

    // Every resource is dropped inside run() before the process exits
    let code = match run(&args) {
        Ok(()) => {
            log::info!("Exiting");
            0
        }
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    process::exit(code);
}
