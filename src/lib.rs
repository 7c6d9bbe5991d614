//! A Rust library (and command-line tool) for downloading the audio track described by a DASH MPD
//! manifest, reassembling it as a single playable media file.
//!
//! [DASH](https://en.wikipedia.org/wiki/Dynamic_Adaptive_Streaming_over_HTTP) (dynamic adaptive
//! streaming over HTTP), also called MPEG-DASH, splits media content into a sequence of small
//! segments that are fetched over HTTP. The Media Presentation Description (MPD) is an XML
//! manifest describing where these segments live and how long they last. For an on-demand audio
//! stream using `SegmentTemplate@duration` addressing, the content is reconstructed by fetching
//! an initialization segment followed by media segments `1..N`, and concatenating them in order.
//!
//! The work is split into four stages:
//!
//! - [`manifest::parse`] checks the manifest and produces a validated [`Manifest`]
//! - [`plan::plan`] derives the number of segments and their absolute URLs
//! - [`fetch::SegmentFetcher`] retrieves the bytes of one segment (HTTP via `reqwest` by default)
//! - [`assemble::Assembler`] appends each segment to the output file, strictly in order
//!
//! The [`fetch::DashAudioDownloader`] drives these stages one after the other.
//!
//!
//! ## DASH features supported
//!
//! - VOD (static) manifests with a single Period
//! - The first AdaptationSet with `@contentType="audio"`, first Representation
//! - `SegmentTemplate@duration` addressing with `$RepresentationID$` and `$Number$` placeholders
//! - A relative or absolute `Period>BaseURL`
//!
//!
//! ## Limitations / unsupported features
//!
//! - Video, subtitles and multi-Period content
//! - Adaptive bitrate switching, SegmentTimeline, SegmentList and SegmentBase addressing
//! - Retrying or resuming failed downloads: the first error aborts the download


#![allow(non_snake_case)]

pub mod manifest;
pub mod plan;
#[cfg(feature = "fetch")]
pub mod assemble;
#[cfg(feature = "fetch")]
pub mod fetch;

pub use crate::manifest::{parse, Manifest, Period, AdaptationSet, SegmentTemplate, Representation};
pub use crate::manifest::ManifestParseError;
pub use crate::plan::{plan, SegmentDescriptor, SegmentPlan};


/// Identifies the URL that could not be retrieved, with the HTTP status when the server answered.
#[derive(thiserror::Error, Debug)]
#[error("fetching {url}: {reason}")]
pub struct FetchError {
    pub url: String,
    pub status: Option<u16>,
    pub reason: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl FetchError {
    pub fn new(url: &str, reason: impl Into<String>) -> FetchError {
        FetchError {
            url: url.to_string(),
            status: None,
            reason: reason.into(),
            source: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> FetchError {
        self.status = Some(status);
        self
    }

    pub fn with_source<E>(mut self, e: E) -> FetchError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(e));
        self
    }
}


/// Every error is fatal to a download. The `Display` message gives the stage that failed, and
/// `std::error::Error::source` gives the underlying cause.
#[derive(thiserror::Error, Debug)]
pub enum DashAudioError {
    #[error("couldn't fetch DASH manifest")]
    ManifestFetch(#[source] FetchError),
    #[error("invalid DASH manifest")]
    ManifestParse(#[from] ManifestParseError),
    #[error("planning error {0}")]
    Planning(String),
    #[error("couldn't fetch segment {number}")]
    SegmentFetch {
        number: u64,
        #[source]
        source: FetchError,
    },
    #[error("I/O error {1}")]
    Write(#[source] std::io::Error, String),
    #[error("network error {0}")]
    Network(String),
}
