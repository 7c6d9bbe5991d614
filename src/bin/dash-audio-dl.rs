// dash-audio-dl.rs
//
// Command-line tool to download the audio track of a DASH manifest to a single media file.
//
// Run with `cargo run -- --url <MPD-URL> --output audio.mp4`

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use clap::Parser;
use fs_err as fs;
use indicatif::{ProgressBar, ProgressStyle};
use anyhow::{Context, Result};
use tracing::info;
use dash_audio_dl::fetch::{DashAudioDownloader, ProgressObserver};


const DEFAULT_MPD_URL: &str = "https://aod-dash-ww-live.akamaized.net/usp/auth/vod/piff_abr_full_audio/2e5865-m002bqm5/vf_m002bqm5_7834cc7e-477d-49b1-a600-b218ffd6d43f.ism/pc_hd_abr_v2_nonuk_dash_master.mpd?__gda__=1751100115_3eabb45df13f66a60892be55d10fa5fd";

/// DASH MPD Downloader - Download audio from DASH manifests
#[derive(Parser, Debug)]
#[command(name = "dash-audio-dl", version, about,
          after_help = "Example:\n  dash-audio-dl --url https://example.com/manifest.mpd --output audio.mp4")]
struct Cli {
    /// MPD manifest URL
    #[arg(long, value_name = "URL", default_value = DEFAULT_MPD_URL, hide_default_value = true)]
    url: String,
    /// Output file name
    #[arg(short, long, value_name = "FILE", default_value = "output.mp4")]
    output: PathBuf,
    /// Level of verbosity (can be used several times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Don't display a progress bar
    #[arg(short, long)]
    quiet: bool,
}


struct DownloadProgressBar {
    bar: ProgressBar,
}

impl DownloadProgressBar {
    pub fn new() -> Result<Self> {
        let style = ProgressStyle::with_template("[{bar:40}] {pos:>3}% {msg}")
            .context("building progress bar style")?
            .progress_chars("#-");
        let bar = ProgressBar::new(100).with_style(style);
        Ok(Self { bar })
    }
}

impl ProgressObserver for DownloadProgressBar {
    fn update(&self, percent: u32, message: &str) {
        if percent <= 100 {
            self.bar.set_position(percent.into());
            self.bar.set_message(message.to_string());
        }
        if percent >= 100 {
            self.bar.finish_and_clear();
        }
    }
}


fn setup_logging() {
    use tracing_subscriber::{EnvFilter, fmt, fmt::time::LocalTime, prelude::*};
    use time::macros::format_description;

    let timer = LocalTime::new(format_description!("[hour]:[minute]:[second]"));
    let fmt_layer = fmt::layer()
        .compact()
        .with_timer(timer)
        .with_target(false);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,reqwest=warn,hyper=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    info!("MPD URL: {}", cli.url);
    info!("Output File: {}", cli.output.display());
    if let Some(dir) = cli.output.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)
                .context("creating output directory")?;
        }
    }
    let mut dl = DashAudioDownloader::new(&cli.url)
        .verbosity(cli.verbose.saturating_add(1));
    if !cli.quiet {
        dl = dl.add_progress_observer(Arc::new(DownloadProgressBar::new()?));
    }
    let path = dl.download_to(&cli.output).await?;
    println!("Download complete. Output file: {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        for cause in e.chain().skip(1) {
            eprintln!("Caused by: {cause}");
        }
        eprintln!("Use --help for usage information.");
        process::exit(1);
    }
}
