use serde::{Deserialize, Serialize};

/// A fully parsed VAST document (Video Ad Serving Template)
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct VastDocument {
    /// The VAST version; defaults to "4.0" when the attribute is absent
    pub version: String,

    /// The Ad elements within the document, in document order
    pub ads: Vec<Ad>,

    /// Document-level error tracking URLs
    pub error_urls: Vec<String>,
}

impl VastDocument {
    pub fn empty() -> Self {
        VastDocument {
            version: "4.0".to_string(),
            ads: Vec::new(),
            error_urls: Vec::new(),
        }
    }
}

/// One Ad entry, either inline or a wrapper pointing at another document
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Ad {
    /// The ad ID
    pub id: Option<String>,

    /// The ad sequence number (for ad pods)
    pub sequence: Option<u32>,

    /// Impression tracking URLs
    pub impressions: Vec<String>,

    /// Error tracking URLs
    pub error_urls: Vec<String>,

    /// Creative elements
    pub creatives: Vec<Creative>,

    /// Inline/wrapper variant, decided once at parse time
    pub kind: AdKind,
}

/// The variant of an Ad. An Ad element carrying neither an InLine nor a
/// Wrapper child parses as Inline with empty creatives.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub enum AdKind {
    Inline,
    Wrapper(WrapperLink),
}

impl Ad {
    pub fn is_wrapper(&self) -> bool {
        matches!(self.kind, AdKind::Wrapper(_))
    }

    /// First Linear creative of this ad, if any
    pub fn first_linear(&self) -> Option<&Linear> {
        self.creatives.iter().find_map(|c| c.linear.as_ref())
    }
}

/// Pointer from a wrapper Ad to the next VAST document in the chain
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WrapperLink {
    /// The URI of the next VAST document
    pub tag_uri: String,

    /// Whether wrappers found in the nested response may themselves be
    /// followed (default true)
    pub follow_additional_wrappers: bool,

    /// Whether the nested response may contribute more than one ad
    pub allow_multiple_ads: bool,

    /// Whether a failed nested resolution collapses to zero ads instead of
    /// failing the whole chain
    pub fallback_on_no_ad: bool,
}

impl WrapperLink {
    pub fn new(tag_uri: String) -> Self {
        WrapperLink {
            tag_uri,
            follow_additional_wrappers: true,
            allow_multiple_ads: false,
            fallback_on_no_ad: false,
        }
    }
}

/// One creative unit inside an Ad
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Creative {
    /// The creative ID
    pub id: Option<String>,

    /// The creative sequence number
    pub sequence: Option<u32>,

    /// The creative ad ID
    pub ad_id: Option<String>,

    /// Linear ad payload; only Linear creatives participate in playback
    pub linear: Option<Linear>,

    /// CompanionAds details (modeled, never rendered)
    pub companion_ads: Option<CompanionAds>,

    /// NonLinearAds details (modeled, never rendered)
    pub non_linear_ads: Option<NonLinearAds>,
}

/// A linear (video) ad payload
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Linear {
    /// Duration in seconds; 0 means unknown
    pub duration: f64,

    /// Skip offset in seconds, when the creative declares one
    pub skip_offset: Option<f64>,

    /// Media files
    pub media_files: Vec<MediaFile>,

    /// Tracking events
    pub tracking_events: Vec<TrackingEvent>,

    /// Video clicks
    pub video_clicks: Option<VideoClicks>,
}

impl Linear {
    pub fn new(duration: f64) -> Self {
        Linear {
            duration,
            skip_offset: None,
            media_files: Vec::new(),
            tracking_events: Vec::new(),
            video_clicks: None,
        }
    }
}

/// One playable rendition
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct MediaFile {
    /// The media file URL
    pub url: String,

    /// The media file MIME type
    pub mime_type: String,

    /// The delivery mode (progressive or streaming)
    pub delivery: Option<String>,

    /// Width in pixels; 0 when absent or unparseable
    pub width: u32,

    /// Height in pixels; 0 when absent or unparseable
    pub height: u32,

    /// Bitrate in kbps
    pub bitrate: Option<u32>,

    /// The media file codec
    pub codec: Option<String>,
}

/// Video click-through and click-tracking URLs
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct VideoClicks {
    /// The click-through URL
    pub click_through: Option<String>,

    /// Click tracking URLs
    pub click_tracking: Vec<String>,
}

/// One delivery endpoint for one playback milestone
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TrackingEvent {
    /// The event type
    pub event: TrackingEventType,

    /// The tracking URL
    pub url: String,

    /// Offset in seconds, used by progress events
    pub offset: Option<f64>,
}

/// Closed set of tracking event types. Strings outside the known set are
/// preserved verbatim in `Other` but are never auto-fired by the player.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
pub enum TrackingEventType {
    CreativeView,
    Start,
    FirstQuartile,
    Midpoint,
    ThirdQuartile,
    Complete,
    Pause,
    Resume,
    Skip,
    Mute,
    Unmute,
    Progress,
    ClickTracking,
    Other(String),
}

impl TrackingEventType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "creativeView" => TrackingEventType::CreativeView,
            "start" => TrackingEventType::Start,
            "firstQuartile" => TrackingEventType::FirstQuartile,
            "midpoint" => TrackingEventType::Midpoint,
            "thirdQuartile" => TrackingEventType::ThirdQuartile,
            "complete" => TrackingEventType::Complete,
            "pause" => TrackingEventType::Pause,
            "resume" => TrackingEventType::Resume,
            "skip" => TrackingEventType::Skip,
            "mute" => TrackingEventType::Mute,
            "unmute" => TrackingEventType::Unmute,
            "progress" => TrackingEventType::Progress,
            "clickTracking" => TrackingEventType::ClickTracking,
            other => TrackingEventType::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TrackingEventType::CreativeView => "creativeView",
            TrackingEventType::Start => "start",
            TrackingEventType::FirstQuartile => "firstQuartile",
            TrackingEventType::Midpoint => "midpoint",
            TrackingEventType::ThirdQuartile => "thirdQuartile",
            TrackingEventType::Complete => "complete",
            TrackingEventType::Pause => "pause",
            TrackingEventType::Resume => "resume",
            TrackingEventType::Skip => "skip",
            TrackingEventType::Mute => "mute",
            TrackingEventType::Unmute => "unmute",
            TrackingEventType::Progress => "progress",
            TrackingEventType::ClickTracking => "clickTracking",
            TrackingEventType::Other(s) => s,
        }
    }
}

/// Represents companion ads (parsed past, not rendered)
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct CompanionAds {
    pub companions: Vec<Companion>,
}

/// Represents a companion ad
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Companion {
    pub id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub resource: String,
}

/// Represents non-linear ads (parsed past, not rendered)
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct NonLinearAds {
    pub non_linears: Vec<NonLinear>,
}

/// Represents a non-linear overlay ad
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct NonLinear {
    pub id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub resource: String,
}
