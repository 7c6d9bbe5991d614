//! Support for downloading the audio track of a DASH MPD manifest.

use std::env;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tracing::{info, trace, warn};
use url::Url;
use crate::{DashAudioError, FetchError, Manifest};
use crate::{parse, plan};
use crate::assemble::Assembler;

/// A `Client` from the `reqwest` crate, that we use to download content over HTTP.
pub type HttpClient = reqwest::Client;


/// Receives updates concerning the progression of the download, and can display this information to
/// the user, for example using a progress bar.
pub trait ProgressObserver: Send + Sync {
    fn update(&self, percent: u32, message: &str);
}


/// Retrieves the content of a single URL. A failed request (transport error or a non-success HTTP
/// status) is reported as a `FetchError`; implementations don't retry.
pub trait SegmentFetcher: Send + Sync {
    /// Retrieve the full body at `url`.
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<Bytes, FetchError>> + Send;

    /// Retrieve the manifest at `url`, returning its text and the URL it was served from (which
    /// differs from `url` if the request was redirected).
    fn fetch_manifest(&self, url: &Url) -> impl Future<Output = Result<(String, Url), FetchError>> + Send {
        async move {
            let body = self.fetch(url).await?;
            let xml = String::from_utf8(body.to_vec())
                .map_err(|e| FetchError::new(url.as_str(), "manifest is not valid UTF-8").with_source(e))?;
            Ok((xml, url.clone()))
        }
    }
}


/// Fetches segments over HTTP or HTTPS using a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: HttpClient,
}

impl HttpFetcher {
    pub fn new(client: HttpClient) -> HttpFetcher {
        HttpFetcher { client }
    }

    async fn get(&self, url: &Url, accept: &str) -> Result<reqwest::Response, FetchError> {
        let response = self.client.get(url.clone())
            .header("Accept", accept)
            .header("Accept-Language", "en-US,en")
            .header("Sec-Fetch-Mode", "navigate")
            .send().await
            .map_err(|e| transport_error(url, e))?;
        let status = response.status();
        if !status.is_success() {
            let msg = format!("HTTP error {}", status.as_str());
            return Err(FetchError::new(url.as_str(), msg).with_status(status.as_u16()));
        }
        Ok(response)
    }
}

impl SegmentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        // Don't use only "audio/*" in Accept header because some web servers are misconfigured and
        // reject requests for valid audio content (eg .m4s)
        let response = self.get(url, "audio/*;q=0.9,*/*;q=0.5").await?;
        response.bytes().await
            .map_err(|e| transport_error(url, e))
    }

    async fn fetch_manifest(&self, url: &Url) -> Result<(String, Url), FetchError> {
        let response = self.get(url, "application/dash+xml,video/vnd.mpeg.dash.mpd").await?;
        let redirected_url = response.url().clone();
        let xml = response.text().await
            .map_err(|e| transport_error(url, e))?;
        Ok((xml, redirected_url))
    }
}

fn transport_error(url: &Url, e: reqwest::Error) -> FetchError {
    let reason = if e.is_timeout() {
        "operation timed out"
    } else if e.is_connect() {
        "connection failed"
    } else if e.is_body() || e.is_decode() {
        "reading response body"
    } else {
        "request failed"
    };
    let fe = FetchError::new(url.as_str(), reason);
    match e.status() {
        Some(s) => fe.with_status(s.as_u16()).with_source(e),
        None => fe.with_source(e),
    }
}

fn default_http_client() -> Result<HttpClient, DashAudioError> {
    reqwest::Client::builder()
        .timeout(Duration::new(30, 0))
        .build()
        .map_err(|e| DashAudioError::Network(format!("building HTTP client: {e}")))
}


/// The stages of a download. Stages are traversed in declaration order, with a transition to
/// `Failed` on the first error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    FetchingManifest,
    Parsing,
    Planning,
    DownloadingInit,
    DownloadingSegments { current: u64, total: u64 },
    Complete,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::FetchingManifest => write!(f, "fetching manifest"),
            RunState::Parsing => write!(f, "parsing manifest"),
            RunState::Planning => write!(f, "planning segments"),
            RunState::DownloadingInit => write!(f, "downloading initialization segment"),
            RunState::DownloadingSegments { current, total } =>
                write!(f, "downloading segment {current}/{total}"),
            RunState::Complete => write!(f, "complete"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

fn advance(state: &mut RunState, next: RunState) {
    trace!("{state} -> {next}");
    *state = next;
}


/// The DashAudioDownloader allows the download of the audio track described by a DASH MPD
/// manifest. This involves fetching the manifest file, parsing it, identifying the audio
/// representation and its segments, then downloading the initialization segment and every media
/// segment one after the other, appending each to the output file as it arrives.
///
/// Downloads are strictly sequential, and the first error aborts the download. If some segments
/// were already written, the truncated output file is left in place.
///
/// Example
/// ```rust,no_run
/// use dash_audio_dl::fetch::DashAudioDownloader;
///
/// # async fn run() {
/// let url = "https://example.com/audio/manifest.mpd";
/// match DashAudioDownloader::new(url)
///        .download_to("audio.mp4")
///        .await
/// {
///    Ok(path) => println!("Downloaded to {path:?}"),
///    Err(e) => eprintln!("Download failed: {e}"),
/// }
/// # }
/// ```
pub struct DashAudioDownloader {
    pub mpd_url: String,
    http_client: Option<HttpClient>,
    progress_observers: Vec<Arc<dyn ProgressObserver>>,
    verbosity: u8,
}

impl DashAudioDownloader {
    /// Create a `DashAudioDownloader` for the specified DASH manifest URL `mpd_url`.
    pub fn new(mpd_url: &str) -> DashAudioDownloader {
        DashAudioDownloader {
            mpd_url: String::from(mpd_url),
            http_client: None,
            progress_observers: vec![],
            verbosity: 0,
        }
    }

    /// Use the specified HTTP client to retrieve the manifest and segments. This allows the
    /// configuration of timeouts, proxies, default headers and so on. By default, a client with a
    /// 30 second timeout is used.
    pub fn with_http_client(mut self, client: HttpClient) -> DashAudioDownloader {
        self.http_client = Some(client);
        self
    }

    /// Add an observer implementing the ProgressObserver trait, that will receive updates
    /// concerning the progression of the download (allows implementation of a progress bar, for
    /// example).
    pub fn add_progress_observer(mut self, observer: Arc<dyn ProgressObserver>) -> DashAudioDownloader {
        self.progress_observers.push(observer);
        self
    }

    /// Set the verbosity level of the download process. Possible values for level:
    /// - 0: no information is logged
    /// - 1: details of the selected audio stream
    /// - 2: the number of segments and the output file
    /// - 3 or larger: the size of each downloaded segment
    pub fn verbosity(mut self, level: u8) -> DashAudioDownloader {
        self.verbosity = level;
        self
    }

    /// Download the audio content to the file named by `out`. If the output file `out` already
    /// exists, its content will be overwritten. Returns the absolute path of the output file.
    pub async fn download_to<P: Into<PathBuf>>(mut self, out: P) -> Result<PathBuf, DashAudioError> {
        let client = match self.http_client.take() {
            Some(c) => c,
            None => default_http_client()?,
        };
        let fetcher = HttpFetcher::new(client);
        self.run(&fetcher, out.into()).await
    }

    /// Download the audio content to a file in the current working directory and return the
    /// corresponding `PathBuf`. The name of the output file is derived from the manifest URL.
    /// The output file will be overwritten if it already exists.
    pub async fn download(self) -> Result<PathBuf, DashAudioError> {
        let cwd = env::current_dir()
            .map_err(|e| DashAudioError::Write(e, String::from("obtaining current directory")))?;
        let outpath = cwd.join(generate_filename_from_url(&self.mpd_url));
        self.download_to(outpath).await
    }

    /// Download the audio content to `out`, retrieving the manifest and every segment with
    /// `fetcher` instead of the default HTTP client.
    pub async fn download_with_fetcher<F, P>(self, fetcher: &F, out: P) -> Result<PathBuf, DashAudioError>
    where
        F: SegmentFetcher,
        P: Into<PathBuf>,
    {
        self.run(fetcher, out.into()).await
    }

    fn notify(&self, percent: u32, message: &str) {
        for observer in &self.progress_observers {
            observer.update(percent, message);
        }
    }

    fn describe_stream(&self, manifest: &Manifest) {
        if self.verbosity > 0 {
            let unknown = String::from("?");
            let repr = &manifest.period.audio.representation;
            let minutes = manifest.presentation_duration.as_secs_f64() / 60.0;
            info!("Media duration: {minutes:.2} minutes");
            info!("Audio format: {} {}, Bandwidth: {} kbps",
                  repr.mime_type.as_ref().unwrap_or(&unknown),
                  repr.codecs.as_ref().unwrap_or(&unknown),
                  repr.bandwidth.unwrap_or(0) / 1000);
            info!("Using Representation: {}", repr.id);
        }
    }

    async fn run<F: SegmentFetcher>(&self, fetcher: &F, output_path: PathBuf) -> Result<PathBuf, DashAudioError> {
        let mut state = RunState::Idle;
        let outcome = self.run_stages(fetcher, output_path, &mut state).await;
        match &outcome {
            Ok(path) => {
                advance(&mut state, RunState::Complete);
                if self.verbosity > 1 {
                    info!("Download complete. Output file: {}", path.display());
                }
            },
            Err(e) => {
                warn!("Download failed while {state}: {e}");
                advance(&mut state, RunState::Failed);
            },
        }
        outcome
    }

    async fn run_stages<F: SegmentFetcher>(
        &self,
        fetcher: &F,
        output_path: PathBuf,
        state: &mut RunState) -> Result<PathBuf, DashAudioError>
    {
        advance(state, RunState::FetchingManifest);
        self.notify(1, "Fetching DASH manifest");
        let mpd_url = Url::parse(&self.mpd_url)
            .map_err(|e| DashAudioError::ManifestFetch(
                FetchError::new(&self.mpd_url, "invalid manifest URL").with_source(e)))?;
        let (xml, redirected_url) = fetcher.fetch_manifest(&mpd_url).await
            .map_err(DashAudioError::ManifestFetch)?;
        if redirected_url != mpd_url {
            info!("Manifest request redirected to {redirected_url}");
        }

        advance(state, RunState::Parsing);
        let manifest = parse(&xml, &redirected_url)?;
        self.describe_stream(&manifest);

        advance(state, RunState::Planning);
        let plan = plan(&manifest)?;
        let total = plan.segment_count();
        if self.verbosity > 1 {
            info!("Downloading {total} segments to {}", output_path.display());
        }

        let mut assembler = Assembler::open(output_path)?;
        // The additional +2 is for our initial .mpd fetch and for the initialization segment. The
        // percentage counts completed steps, so 100 is only reached once the output is closed.
        let step_count = total + 2;
        for segment in plan.iter() {
            if segment.is_init() {
                advance(state, RunState::DownloadingInit);
            } else {
                advance(state, RunState::DownloadingSegments { current: segment.number, total });
            }
            let progress_percent = ((100 * (segment.number + 1)) / step_count).max(1) as u32;
            if segment.is_init() {
                self.notify(progress_percent, "Fetching initialization segment");
            } else {
                self.notify(progress_percent, &format!("Fetching audio segment {}/{total}", segment.number));
            }
            let bytes = fetcher.fetch(&segment.url).await
                .map_err(|source| DashAudioError::SegmentFetch { number: segment.number, source })?;
            if self.verbosity > 2 {
                info!("  Audio segment {} -> {} octets", segment.url, bytes.len());
            }
            assembler.append(&bytes)?;
        }
        let path = assembler.close()?;
        self.notify(100, "Download complete");
        Ok(path)
    }
}

// Derive an output filename from the manifest URL, such as "example.com_audio_manifest.mp4" for
// "https://www.example.com/audio/manifest.mpd?token=42". The query string and fragment are dropped.
fn generate_filename_from_url(url: &str) -> PathBuf {
    use sanitise_file_name::{sanitise_with_options, Options};

    let mut path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    if let Some(p) = path.strip_prefix("http://") {
        path = p;
    } else if let Some(p) = path.strip_prefix("https://") {
        path = p;
    }
    if let Some(p) = path.strip_prefix("www.") {
        path = p;
    }
    if let Some(p) = path.strip_suffix(".mpd") {
        path = p;
    }
    let mut sanitize_opts = Options::DEFAULT;
    sanitize_opts.length_limit = 150;
    PathBuf::from(sanitise_with_options(path, &sanitize_opts) + ".mp4")
}
