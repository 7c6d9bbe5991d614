//! Parsing and validation of the subset of the DASH MPD manifest format that describes an
//! on-demand audio stream.
//
// We deserialize the XML with quick-xml + serde into permissive "node" structs, in which every
// attribute and child element is optional, and then run an explicit validation pass that either
// builds a fully checked `Manifest` or reports exactly which element or attribute is missing or
// invalid. Serde ignores unknown elements and attributes, so anything we don't use is skipped.

use std::time::Duration;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::trace;
use url::Url;


#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestParseError {
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("MPD manifest does not contain mediaPresentationDuration attribute")]
    MissingPresentationDuration,
    #[error("invalid duration {0}")]
    InvalidDuration(String),
    #[error("Period element not found in the MPD")]
    MissingPeriod,
    #[error("audio AdaptationSet not found in the MPD")]
    NoAudioAdaptationSet,
    #[error("SegmentTemplate not found in the audio AdaptationSet")]
    MissingSegmentTemplate,
    #[error("missing @{attribute} attribute on {element}")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("invalid integer {value:?} for @{attribute}")]
    InvalidInteger {
        attribute: &'static str,
        value: String,
    },
    #[error("@{attribute} must be greater than zero")]
    ZeroValue {
        attribute: &'static str,
    },
    #[error("no Representation found in the audio AdaptationSet")]
    MissingRepresentation,
    #[error("Representation @id is missing or empty")]
    MissingRepresentationId,
}


lazy_static! {
    static ref XS_DURATION: Regex = Regex::new(concat!(r"^(?P<sign>[+-])?P",
                                                       r"(?:(?P<years>\d+)Y)?",
                                                       r"(?:(?P<months>\d+)M)?",
                                                       r"(?:(?P<weeks>\d+)W)?",
                                                       r"(?:(?P<days>\d+)D)?",
                                                       r"(?:(?P<hastime>T)", // time part must begin with a T
                                                       r"(?:(?P<hours>\d+)H)?",
                                                       r"(?:(?P<minutes>\d+)M)?",
                                                       r"(?:(?P<seconds>\d+)(?:(?P<nanoseconds>[.,]\d+)?)S)?",
                                                       r")?$")).unwrap();
}

// Number of seconds represented by one named component of an xs:duration, such as the "3" in
// "PT3M" (180 seconds).
fn xs_component(m: &Captures, name: &str, unit_secs: u64) -> Result<u64, ManifestParseError> {
    match m.name(name) {
        Some(s) => s.as_str().parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(unit_secs))
            .ok_or_else(|| ManifestParseError::InvalidDuration(format!("{name} out of range"))),
        None => Ok(0),
    }
}

// Parse an XML duration string, as per https://www.w3.org/TR/xmlschema-2/#duration
//
// The lexical representation for duration is the ISO 8601 extended format PnYnMnDTnHnMnS. The
// number of seconds can include decimal digits to arbitrary precision (we keep nanoseconds).
//
// Examples: "PT0H0M30.030S", "PT1.2S", "PT1004199059S", "PT130S", "P1DT2H"
//
// Months count as 30 days and years as 365 days. We can't represent negative durations, and only
// accept a fractional part on the seconds (we reject for example "P0.5Y" and "PT2.3H").
pub(crate) fn parse_xs_duration(s: &str) -> Result<Duration, ManifestParseError> {
    let m = XS_DURATION.captures(s)
        .ok_or_else(|| ManifestParseError::InvalidDuration(format!("couldn't parse XS duration {s:?}")))?;
    if m.name("hastime").is_none() &&
       m.name("years").is_none() &&
       m.name("months").is_none() &&
       m.name("weeks").is_none() &&
       m.name("days").is_none() {
          return Err(ManifestParseError::InvalidDuration(format!("empty duration {s:?}")));
    }
    // a T must be followed by at least one time component
    if m.name("hastime").is_some() &&
       m.name("hours").is_none() &&
       m.name("minutes").is_none() &&
       m.name("seconds").is_none() {
          return Err(ManifestParseError::InvalidDuration(format!("empty time part in {s:?}")));
    }
    if m.name("sign").is_some_and(|s| s.as_str() == "-") {
        return Err(ManifestParseError::InvalidDuration(String::from("can't represent negative durations")));
    }
    let mut nsecs: u32 = 0;
    if let Some(s) = m.name("nanoseconds") {
        let mut s = &s.as_str()[1..]; // drop initial "."
        if s.len() > 9 {
            s = &s[..9];
        }
        let padded = format!("{s:0<9}");
        nsecs = padded.parse::<u32>()
            .map_err(|_| ManifestParseError::InvalidDuration(format!("fractional seconds in {s:?}")))?;
    }
    let components = [
        xs_component(&m, "seconds", 1)?,
        xs_component(&m, "minutes", 60)?,
        xs_component(&m, "hours", 60 * 60)?,
        xs_component(&m, "days", 60 * 60 * 24)?,
        xs_component(&m, "weeks", 60 * 60 * 24 * 7)?,
        xs_component(&m, "months", 60 * 60 * 24 * 30)?,
        xs_component(&m, "years", 60 * 60 * 24 * 365)?,
    ];
    let secs = components.iter()
        .try_fold(0u64, |acc, c| acc.checked_add(*c))
        .ok_or_else(|| ManifestParseError::InvalidDuration(format!("{s:?} is too long")))?;
    Ok(Duration::new(secs, nsecs))
}


// The MPD format is documented by ISO using an XML Schema at
// https://standards.iso.org/ittf/PubliclyAvailableStandards/MPEG-DASH_schema_files/DASH-MPD.xsd
// Only the attributes and elements we need are declared here. Numeric attributes are kept as
// strings so that the validation pass can report which one is invalid.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BaseUrlNode {
    #[serde(rename = "$text")]
    base: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SegmentTemplateNode {
    #[serde(rename = "@initialization")]
    initialization: Option<String>,
    #[serde(rename = "@media")]
    media: Option<String>,
    #[serde(rename = "@timescale")]
    timescale: Option<String>,
    #[serde(rename = "@duration")]
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RepresentationNode {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@mimeType")]
    mimeType: Option<String>,
    #[serde(rename = "@codecs")]
    codecs: Option<String>,
    #[serde(rename = "@bandwidth")]
    bandwidth: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AdaptationSetNode {
    // eg "audio", "video", "text"
    #[serde(rename = "@contentType")]
    contentType: Option<String>,
    SegmentTemplate: Option<SegmentTemplateNode>,
    #[serde(rename = "Representation")]
    representations: Vec<RepresentationNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PeriodNode {
    BaseURL: Vec<BaseUrlNode>,
    #[serde(rename = "AdaptationSet")]
    adaptations: Vec<AdaptationSetNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MpdNode {
    #[serde(rename = "@mediaPresentationDuration")]
    mediaPresentationDuration: Option<String>,
    #[serde(rename = "Period")]
    periods: Vec<PeriodNode>,
}


/// The URL templates and timing information used to derive segment URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTemplate {
    /// Template for the initialization segment, such as `init-$RepresentationID$.mp4`.
    pub initialization: String,
    /// Template for the media segments, such as `chunk-$RepresentationID$-$Number$.m4s`.
    pub media: String,
    /// Units per second.
    pub timescale: u64,
    /// Duration of each media segment, in units of `timescale`.
    pub duration: u64,
}

impl SegmentTemplate {
    pub fn segment_duration(&self) -> Duration {
        let timescale = self.timescale.max(1);
        let secs = self.duration / timescale;
        let rem = u128::from(self.duration % timescale);
        // rem < timescale, so this is below one second
        let nanos = rem * 1_000_000_000 / u128::from(timescale);
        Duration::new(secs, nanos as u32)
    }
}

/// The encoded variant of the audio content that will be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    pub id: String,
    pub mime_type: Option<String>,
    /// An RFC6381 string, <https://tools.ietf.org/html/rfc6381>
    pub codecs: Option<String>,
    /// In bits per second.
    pub bandwidth: Option<u64>,
}

/// The audio AdaptationSet, with its SegmentTemplate and the first of its Representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptationSet {
    pub content_type: String,
    pub segment_template: SegmentTemplate,
    pub representation: Representation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    /// The Period's BaseURL, empty when the manifest doesn't specify one.
    pub base_url: String,
    pub audio: AdaptationSet,
}

/// A validated DASH manifest, reduced to what is needed to download its audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// The `MPD@mediaPresentationDuration`.
    pub presentation_duration: Duration,
    /// The URL the manifest was retrieved from, which relative BaseURLs are resolved against.
    pub base_url: Url,
    pub period: Period,
}


fn required(
    element: &'static str,
    attribute: &'static str,
    value: Option<String>) -> Result<String, ManifestParseError>
{
    value.ok_or(ManifestParseError::MissingAttribute { element, attribute })
}

fn parse_integer(attribute: &'static str, value: &str) -> Result<u64, ManifestParseError> {
    value.trim().parse::<u64>()
        .map_err(|_| ManifestParseError::InvalidInteger { attribute, value: value.to_string() })
}

fn parse_positive(attribute: &'static str, value: &str) -> Result<u64, ManifestParseError> {
    let n = parse_integer(attribute, value)?;
    if n == 0 {
        return Err(ManifestParseError::ZeroValue { attribute });
    }
    Ok(n)
}

// quick-xml's deserializer ignores the name of the root element, so we check it ourselves to
// avoid accepting other XML formats (eg. SmoothStreamingMedia manifests).
fn check_root_element(xml: &str) -> Result<(), ManifestParseError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"MPD" {
                    return Ok(());
                }
                let found = String::from_utf8_lossy(name.as_ref()).into_owned();
                return Err(ManifestParseError::Xml(format!("root element is <{found}>, expecting <MPD>")));
            },
            Ok(Event::Eof) => return Err(ManifestParseError::Xml(String::from("no root element"))),
            Err(e) => return Err(ManifestParseError::Xml(e.to_string())),
            Ok(_) => (),
        }
    }
}

fn validate(mpd: MpdNode, manifest_url: &Url) -> Result<Manifest, ManifestParseError> {
    let mpd_duration = mpd.mediaPresentationDuration
        .ok_or(ManifestParseError::MissingPresentationDuration)?;
    let presentation_duration = parse_xs_duration(mpd_duration.trim())?;
    let period = mpd.periods.into_iter()
        .next()
        .ok_or(ManifestParseError::MissingPeriod)?;
    let base_url = period.BaseURL.first()
        .map(|bu| bu.base.trim().to_string())
        .unwrap_or_default();
    // Only the contentType attribute is examined; there is no fallback to mimeType.
    let audio = period.adaptations.into_iter()
        .find(|a| a.contentType.as_deref() == Some("audio"))
        .ok_or(ManifestParseError::NoAudioAdaptationSet)?;
    let st = audio.SegmentTemplate
        .ok_or(ManifestParseError::MissingSegmentTemplate)?;
    let initialization = required("SegmentTemplate", "initialization", st.initialization)?;
    let media = required("SegmentTemplate", "media", st.media)?;
    let timescale = required("SegmentTemplate", "timescale", st.timescale)?;
    let duration = required("SegmentTemplate", "duration", st.duration)?;
    let segment_template = SegmentTemplate {
        initialization,
        media,
        timescale: parse_positive("timescale", &timescale)?,
        duration: parse_positive("duration", &duration)?,
    };
    let repr = audio.representations.into_iter()
        .next()
        .ok_or(ManifestParseError::MissingRepresentation)?;
    let id = repr.id
        .filter(|id| !id.is_empty())
        .ok_or(ManifestParseError::MissingRepresentationId)?;
    let bandwidth = match repr.bandwidth {
        Some(bw) => Some(parse_integer("bandwidth", &bw)?),
        None => None,
    };
    let representation = Representation {
        id,
        mime_type: repr.mimeType,
        codecs: repr.codecs,
        bandwidth,
    };
    Ok(Manifest {
        presentation_duration,
        base_url: manifest_url.clone(),
        period: Period {
            base_url,
            audio: AdaptationSet {
                content_type: String::from("audio"),
                segment_template,
                representation,
            },
        },
    })
}

/// Parse an MPD manifest, provided as an XML string retrieved from `manifest_url`, returning a
/// validated `Manifest` describing its audio track.
pub fn parse(xml: &str, manifest_url: &Url) -> Result<Manifest, ManifestParseError> {
    check_root_element(xml)?;
    let mpd: MpdNode = quick_xml::de::from_str(xml)
        .map_err(|e| ManifestParseError::Xml(e.to_string()))?;
    trace!("MPD has {} Period(s)", mpd.periods.len());
    validate(mpd, manifest_url)
}
