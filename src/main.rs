use anyhow::Result;
use clap::Parser;
use songsift::config::Config;
use songsift::ui::App;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "songsift")]
#[command(about = "Preview songs in sections and sort them into folders")]
struct Args {
    /// Keep stderr attached (ALSA noise and all) and log at debug level
    #[arg(long)]
    dev: bool,

    /// Sort this folder instead of the configured source directory
    #[arg(long)]
    source: Option<PathBuf>,
}

fn init_logging(dev: bool) -> Result<()> {
    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "songsift.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if dev { "debug" } else { "info,songsift=debug" }));

    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(base_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // The non-blocking writer stops flushing once its guard drops.
    std::mem::forget(guard);

    Ok(())
}

/// Redirect stderr to /dev/null so ALSA error spam cannot corrupt the TUI.
fn redirect_stderr_to_null() -> Result<()> {
    unsafe {
        let null_fd = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_WRONLY);
        if null_fd == -1 {
            return Err(anyhow::anyhow!("Failed to open /dev/null"));
        }

        if libc::dup2(null_fd, libc::STDERR_FILENO) == -1 {
            libc::close(null_fd);
            return Err(anyhow::anyhow!("Failed to redirect stderr"));
        }

        libc::close(null_fd);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.dev)?;
    info!("songsift starting up");

    if !args.dev {
        debug!("redirecting stderr to suppress ALSA errors");
        redirect_stderr_to_null()?;
    }

    let mut config = Config::load_or_default();
    if let Some(source) = args.source {
        config.source_directory = source;
    }

    let mut app = App::new(config)?;
    app.run().await?;

    Ok(())
}
