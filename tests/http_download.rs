// Tests for downloading over HTTP, against a local axum server.
//
// To run tests while enabling printing to stdout/stderr
//
//    RUST_LOG=info cargo test --test http_download -- --show-output
//
// What happens in these tests:
//
//   - Start an axum HTTP server on an ephemeral port, serving the standard manifest at
//     /path/manifest.mpd, a redirect to it at /moved.mpd, and the segments under /path/media/.
//
//   - Download with DashAudioDownloader and check the output file and the requests seen by the
//     server.


pub mod common;
use fs_err as fs;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use axum::{routing::get, Router};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use anyhow::{Context, Result};
use pretty_assertions::assert_eq;
use dash_audio_dl::DashAudioError;
use dash_audio_dl::fetch::DashAudioDownloader;
use common::{setup_logging, standard_manifest, segment_content};


#[derive(Debug, Default)]
struct AppState {
    // Segment files that the server answers with a 404.
    missing: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl AppState {
    fn record(&self, path: &str) {
        self.requests.lock().unwrap().push(path.to_string());
    }
}

async fn send_mpd(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.record("manifest.mpd");
    ([(header::CONTENT_TYPE, "application/dash+xml")], standard_manifest())
}

async fn send_redirect(State(state): State<Arc<AppState>>) -> Redirect {
    state.record("moved.mpd");
    Redirect::temporary("/path/manifest.mpd")
}

async fn send_segment(State(state): State<Arc<AppState>>, Path(file): Path<String>) -> Response {
    state.record(&file);
    if state.missing.contains(&file) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let number = if file == "init-a1.mp4" {
        0
    } else {
        match file.strip_prefix("chunk-")
            .and_then(|f| f.strip_suffix(".m4s"))
            .and_then(|n| n.parse::<u64>().ok())
        {
            Some(n) => n,
            None => return StatusCode::NOT_FOUND.into_response(),
        }
    };
    ([(header::CONTENT_TYPE, "audio/mp4")], segment_content(number)).into_response()
}

// Start the server on an ephemeral port, returning its address.
async fn start_server(state: Arc<AppState>) -> Result<SocketAddr> {
    setup_logging();
    let app = Router::new()
        .route("/path/manifest.mpd", get(send_mpd))
        .route("/moved.mpd", get(send_redirect))
        .route("/path/media/{file}", get(send_segment))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await
        .context("binding test server")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await
    });
    Ok(addr)
}

fn test_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::new(10, 0))
        .no_proxy()
        .build()
        .context("creating HTTP client")
}

fn all_segments() -> Vec<u8> {
    (0..=4).flat_map(segment_content).collect()
}


#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_download() -> Result<()> {
    let state = Arc::new(AppState::default());
    let addr = start_server(state.clone()).await?;
    let tmpd = tempfile::tempdir()?;
    let out = tmpd.path().join("audio.mp4");
    let path = DashAudioDownloader::new(&format!("http://{addr}/path/manifest.mpd"))
        .with_http_client(test_client()?)
        .verbosity(2)
        .download_to(&out).await?;
    assert!(path.is_absolute());
    assert_eq!(fs::read(&out)?, all_segments());
    let requests = state.requests.lock().unwrap().clone();
    assert_eq!(requests, vec!["manifest.mpd", "init-a1.mp4",
                              "chunk-1.m4s", "chunk-2.m4s", "chunk-3.m4s", "chunk-4.m4s"]);
    Ok(())
}

// Relative URLs in the manifest are resolved against the URL it was finally served from.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_redirected_manifest() -> Result<()> {
    let state = Arc::new(AppState::default());
    let addr = start_server(state.clone()).await?;
    let tmpd = tempfile::tempdir()?;
    let out = tmpd.path().join("redirected.mp4");
    DashAudioDownloader::new(&format!("http://{addr}/moved.mpd"))
        .with_http_client(test_client()?)
        .download_to(&out).await?;
    assert_eq!(fs::read(&out)?, all_segments());
    let requests = state.requests.lock().unwrap().clone();
    assert_eq!(requests[0], "moved.mpd");
    assert_eq!(requests[1], "manifest.mpd");
    assert_eq!(requests.len(), 7);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_missing_segment() -> Result<()> {
    let state = Arc::new(AppState {
        missing: HashSet::from([String::from("chunk-3.m4s")]),
        ..Default::default()
    });
    let addr = start_server(state.clone()).await?;
    let tmpd = tempfile::tempdir()?;
    let out = tmpd.path().join("truncated.mp4");
    let result = DashAudioDownloader::new(&format!("http://{addr}/path/manifest.mpd"))
        .with_http_client(test_client()?)
        .download_to(&out).await;
    match result {
        Err(DashAudioError::SegmentFetch { number, source }) => {
            assert_eq!(number, 3);
            assert_eq!(source.status, Some(404));
            assert!(source.url.ends_with("/path/media/chunk-3.m4s"), "{}", source.url);
        },
        other => panic!("expecting a SegmentFetch error, got {other:?}"),
    }
    let expected: Vec<u8> = (0..=2).flat_map(segment_content).collect();
    assert_eq!(fs::read(&out)?, expected);
    let requests = state.requests.lock().unwrap().clone();
    assert!(!requests.contains(&String::from("chunk-4.m4s")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_missing_manifest() -> Result<()> {
    let state = Arc::new(AppState::default());
    let addr = start_server(state.clone()).await?;
    let tmpd = tempfile::tempdir()?;
    let out = tmpd.path().join("unused.mp4");
    let result = DashAudioDownloader::new(&format!("http://{addr}/nothere.mpd"))
        .with_http_client(test_client()?)
        .download_to(&out).await;
    match result {
        Err(DashAudioError::ManifestFetch(e)) => assert_eq!(e.status, Some(404)),
        other => panic!("expecting a ManifestFetch error, got {other:?}"),
    }
    assert!(!out.exists());
    assert!(state.requests.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_http_connection_refused() -> Result<()> {
    // Bind then drop a listener to obtain a port on which nothing is listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    let tmpd = tempfile::tempdir()?;
    let out = tmpd.path().join("unused.mp4");
    let result = DashAudioDownloader::new(&format!("http://{addr}/manifest.mpd"))
        .with_http_client(test_client()?)
        .download_to(&out).await;
    match result {
        Err(DashAudioError::ManifestFetch(e)) => {
            assert_eq!(e.status, None);
            assert_eq!(e.reason, "connection failed");
        },
        other => panic!("expecting a ManifestFetch error, got {other:?}"),
    }
    Ok(())
}
