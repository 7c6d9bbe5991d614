//! Derivation of the ordered list of segments to download from a validated manifest.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;
use crate::{DashAudioError, Manifest};


/// Refuse manifests which would require more requests than this. At 2 seconds per segment this
/// corresponds to more than three weeks of audio.
pub const MAX_SEGMENTS: u64 = 1_000_000;

/// One segment to download. Number 0 is the initialization segment, media segments are numbered
/// from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub number: u64,
    pub url: Url,
}

impl SegmentDescriptor {
    pub fn is_init(&self) -> bool {
        self.number == 0
    }
}

/// The initialization segment and the media segments of the audio track, in download order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub init: SegmentDescriptor,
    /// Media segments numbered `1..=N`, in ascending order.
    pub media: Vec<SegmentDescriptor>,
}

impl SegmentPlan {
    /// The number of media segments (excluding the initialization segment).
    pub fn segment_count(&self) -> u64 {
        self.media.len() as u64
    }

    /// All segments in the order in which they must be concatenated: the initialization segment,
    /// then media segments in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &SegmentDescriptor> {
        std::iter::once(&self.init).chain(self.media.iter())
    }
}


fn planning_error(why: &str, e: impl std::error::Error) -> DashAudioError {
    DashAudioError::Planning(format!("{why}: {e}"))
}

/// The number of media segments needed to cover `presentation`, when each segment lasts
/// `duration / timescale` seconds. The count is rounded up, so a final partial segment is
/// included.
//
// The quotient presentation_secs / (duration / timescale) is computed exactly with integer
// arithmetic on nanoseconds, so that for example PT20S with 5-second segments gives exactly 4.
pub fn segment_count(presentation: Duration, timescale: u64, duration: u64) -> Result<u64, DashAudioError> {
    if timescale == 0 || duration == 0 {
        return Err(DashAudioError::Planning(String::from("segment duration is zero")));
    }
    let numerator = presentation.as_nanos()
        .checked_mul(u128::from(timescale))
        .ok_or_else(|| DashAudioError::Planning(String::from("segment count is not finite")))?;
    let denominator = u128::from(duration) * 1_000_000_000;
    let total = numerator.div_ceil(denominator);
    if total == 0 {
        return Err(DashAudioError::Planning(String::from("manifest describes zero segments")));
    }
    match u64::try_from(total) {
        Ok(n) if n <= MAX_SEGMENTS => Ok(n),
        _ => Err(DashAudioError::Planning(format!("too many segments ({total})"))),
    }
}

// Substitute every occurrence of the $RepresentationID$ and $Number$ identifiers in a
// SegmentTemplate@initialization or SegmentTemplate@media attribute, as per the DASH
// specification section 5.3.9.4.4 (Template-based Segment URL construction). The number is
// formatted in decimal without padding.
//
// Example template: "$RepresentationID$/chunk-$Number$.m4s"
fn resolve_url_template(template: &str, params: &HashMap<&str, String>) -> String {
    let mut result = template.to_string();
    for k in ["RepresentationID", "Number"] {
        let ident = format!("${k}$");
        if let Some(value) = params.get(k) {
            result = result.replace(&ident, value);
        }
    }
    result
}

/// Compute the initialization and media segment URLs of the manifest's audio track.
///
/// Segment paths are resolved in two steps: the Period's BaseURL is resolved against the manifest
/// URL, and each substituted template is then resolved against that combined base. A template that
/// is an absolute URL replaces the base entirely.
#[instrument(level = "debug", skip(manifest), fields(manifest_url = %manifest.base_url))]
pub fn plan(manifest: &Manifest) -> Result<SegmentPlan, DashAudioError> {
    let audio = &manifest.period.audio;
    let st = &audio.segment_template;
    let total = segment_count(manifest.presentation_duration, st.timescale, st.duration)?;
    let base_url = manifest.base_url.join(&manifest.period.base_url)
        .map_err(|e| planning_error("joining with Period BaseURL", e))?;
    let mut dict = HashMap::from([("RepresentationID", audio.representation.id.clone())]);
    // Initialization segments are not numbered.
    dict.insert("Number", String::new());
    let init_path = resolve_url_template(&st.initialization, &dict);
    let init = SegmentDescriptor {
        number: 0,
        url: base_url.join(&init_path)
            .map_err(|e| planning_error("joining initialization with BaseURL", e))?,
    };
    let mut media = Vec::with_capacity(total as usize);
    for number in 1..=total {
        dict.insert("Number", number.to_string());
        let path = resolve_url_template(&st.media, &dict);
        let url = base_url.join(&path)
            .map_err(|e| planning_error("joining media with BaseURL", e))?;
        media.push(SegmentDescriptor { number, url });
    }
    debug!("{total} media segments of {:.3}s under {base_url}", st.segment_duration().as_secs_f64());
    Ok(SegmentPlan { init, media })
}
