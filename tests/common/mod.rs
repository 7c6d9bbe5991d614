// Shared code for our test harness.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Mutex, Once};
use bytes::Bytes;
use lazy_static::lazy_static;
use url::Url;
use dash_audio_dl::FetchError;
use dash_audio_dl::fetch::{ProgressObserver, SegmentFetcher};


lazy_static! {
    static ref TRACING_INIT: Once = Once::new();
}

pub fn setup_logging() {
    use tracing_subscriber::{EnvFilter, fmt, fmt::time::LocalTime, prelude::*};
    use time::macros::format_description;

    TRACING_INIT.call_once(|| {
        let timer = LocalTime::new(format_description!("[hour]:[minute]:[second]"));
        let fmt_layer = fmt::layer()
            .compact()
            .with_timer(timer)
            .with_target(false)
            .with_test_writer();
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info,reqwest=warn,hyper=warn"))
            .expect("initializing logging");
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    });
}


/// A manifest in the shape served by on-demand audio services: a video AdaptationSet that must be
/// ignored, then the audio AdaptationSet with two Representations.
pub fn audio_manifest(duration: &str, base_url: &str, init: &str, media: &str, timescale: u64, seg_duration: u64) -> String {
    format!(r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" profiles="urn:mpeg:dash:profile:isoff-live:2011"
     mediaPresentationDuration="{duration}" minBufferTime="PT2S">
  <ProgramInformation><Title>Test card</Title></ProgramInformation>
  <Period id="1" start="PT0S">
    <BaseURL>{base_url}</BaseURL>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate initialization="video-init.mp4" media="video-$Number$.m4s" timescale="1000" duration="2000"/>
      <Representation id="v1" bandwidth="800000" width="640" height="360"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" lang="en" mimeType="audio/mp4" segmentAlignment="true">
      <SegmentTemplate initialization="{init}" media="{media}" timescale="{timescale}" duration="{seg_duration}" startNumber="1"/>
      <Representation id="a1" mimeType="audio/mp4" codecs="mp4a.40.2" bandwidth="128000" audioSamplingRate="48000">
        <AudioChannelConfiguration schemeIdUri="urn:mpeg:dash:23003:3:audio_channel_configuration:2011" value="2"/>
      </Representation>
      <Representation id="a2" mimeType="audio/mp4" codecs="mp4a.40.2" bandwidth="96000"/>
    </AdaptationSet>
  </Period>
</MPD>"#)
}

/// The manifest used by most download tests: 20 seconds of audio in 5-second segments, served
/// from http://host/path/manifest.mpd with segments under http://host/path/media/.
pub fn standard_manifest() -> String {
    audio_manifest("PT20S", "media/", "init-$RepresentationID$.mp4", "chunk-$Number$.m4s", 1000, 5000)
}

/// Distinct, deterministic content for each segment, so that any reordering or loss is visible in
/// the output file.
pub fn segment_content(number: u64) -> Vec<u8> {
    let len = 100 + number as usize * 37;
    (0..len).map(|i| ((i as u64 * 31 + number * 17) % 251) as u8).collect()
}


/// A SegmentFetcher that serves bodies from memory and records every requested URL. A URL with no
/// registered body gives an HTTP 404 error.
#[derive(Default)]
pub struct MapFetcher {
    bodies: HashMap<String, Bytes>,
    requests: Mutex<Vec<String>>,
}

impl MapFetcher {
    pub fn new() -> MapFetcher {
        MapFetcher::default()
    }

    pub fn serve(mut self, url: &str, body: impl Into<Bytes>) -> MapFetcher {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl SegmentFetcher for MapFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.bodies.get(url.as_str()) {
            Some(body) => Ok(body.clone()),
            None => Err(FetchError::new(url.as_str(), "HTTP error 404").with_status(404)),
        }
    }
}


/// Records every progress update.
#[derive(Default)]
pub struct RecordingObserver {
    pub updates: Mutex<Vec<(u32, String)>>,
}

impl ProgressObserver for RecordingObserver {
    fn update(&self, percent: u32, message: &str) {
        self.updates.lock().unwrap().push((percent, message.to_string()));
    }
}
