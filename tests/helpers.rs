// Shared test doubles: an in-memory document fetcher, a recording pixel
// transport, a scripted playback surface and a fixed platform provider.
// Nothing in here touches the network.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use vast_player::error::{Result, VastError};
use vast_player::player::{PlatformCapabilities, PlaybackSurface, PlayerAction, StartRejected};
use vast_player::resolver::Fetch;
use vast_player::tracker::{DeliveryCapabilities, PixelTransport};

/// Serves canned documents by URI; unknown URIs fail like a dead ad server.
#[allow(dead_code)]
pub struct StubFetch {
    docs: HashMap<String, String>,
    delay: Option<Duration>,
}

#[allow(dead_code)]
impl StubFetch {
    pub fn new(docs: Vec<(&str, String)>) -> Self {
        StubFetch {
            docs: docs
                .into_iter()
                .map(|(uri, xml)| (uri.to_string(), xml))
                .collect(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Fetch for StubFetch {
    async fn fetch(&self, uri: &str) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.docs
            .get(uri)
            .cloned()
            .ok_or_else(|| VastError::WrapperNoResponse(uri.to_string()))
    }
}

/// Records every delivered URL; delivery always succeeds via keep-alive.
#[allow(dead_code)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn new() -> Self {
        RecordingTransport {
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    /// Count of deliveries whose URL contains `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.delivered()
            .iter()
            .filter(|url| url.contains(needle))
            .count()
    }
}

#[async_trait]
impl PixelTransport for RecordingTransport {
    async fn send_beacon(&self, _url: &str) -> bool {
        false
    }

    async fn keepalive_get(&self, url: &str) -> std::result::Result<(), String> {
        self.delivered.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn load_pixel(&self, url: &str) -> std::result::Result<(), String> {
        self.delivered.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Playback surface whose start attempts follow a script; everything else is
/// recorded for assertions.
#[allow(dead_code)]
pub struct ScriptedSurface {
    start_script: Mutex<VecDeque<std::result::Result<(), StartRejected>>>,
    pub loaded: Mutex<Option<String>>,
    pub stop_calls: AtomicUsize,
    pub muted: Mutex<bool>,
    pub media_duration: f64,
}

#[allow(dead_code)]
impl ScriptedSurface {
    /// Every start attempt succeeds.
    pub fn accepting(media_duration: f64) -> Self {
        Self::scripted(media_duration, vec![])
    }

    /// Start attempts pop outcomes from the script; an exhausted script
    /// accepts.
    pub fn scripted(
        media_duration: f64,
        script: Vec<std::result::Result<(), StartRejected>>,
    ) -> Self {
        ScriptedSurface {
            start_script: Mutex::new(script.into()),
            loaded: Mutex::new(None),
            stop_calls: AtomicUsize::new(0),
            muted: Mutex::new(false),
            media_duration,
        }
    }

    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackSurface for ScriptedSurface {
    fn load(&self, url: &str, _attributes: &[(String, String)]) {
        *self.loaded.lock().unwrap() = Some(url.to_string());
    }

    async fn start(&self) -> std::result::Result<(), StartRejected> {
        self.start_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn set_muted(&self, muted: bool) {
        *self.muted.lock().unwrap() = muted;
    }

    fn position(&self) -> f64 {
        0.0
    }

    fn duration(&self) -> f64 {
        self.media_duration
    }
}

/// Fixed platform: keep-alive delivery only, a small TV remote key table.
#[allow(dead_code)]
pub struct StubPlatform;

impl PlatformCapabilities for StubPlatform {
    fn delivery_capabilities(&self) -> DeliveryCapabilities {
        DeliveryCapabilities {
            beacon: false,
            keepalive: true,
        }
    }

    fn normalize_input(&self, raw_code: u32) -> Option<PlayerAction> {
        match raw_code {
            13 => Some(PlayerAction::Select),
            415 | 19 => Some(PlayerAction::PlayPause),
            413 => Some(PlayerAction::Stop),
            10009 => Some(PlayerAction::Back),
            _ => None,
        }
    }

    fn surface_attributes(&self) -> Vec<(String, String)> {
        vec![("autoplay".to_string(), "true".to_string())]
    }
}

/// Wrap ads in a VAST 4.0 root.
#[allow(dead_code)]
pub fn vast(ads: &str) -> String {
    format!(r#"<VAST version="4.0">{}</VAST>"#, ads)
}

/// An inline Ad with the given InLine body.
#[allow(dead_code)]
pub fn inline_ad(id: &str, body: &str) -> String {
    format!(r#"<Ad id="{id}"><InLine>{body}</InLine></Ad>"#)
}

/// A wrapper Ad pointing at `uri`, with optional extra Wrapper attributes
/// and body elements.
#[allow(dead_code)]
pub fn wrapper_ad(id: &str, uri: &str, attrs: &str, body: &str) -> String {
    format!(
        r#"<Ad id="{id}"><Wrapper {attrs}><VASTAdTagURI><![CDATA[{uri}]]></VASTAdTagURI>{body}</Wrapper></Ad>"#
    )
}
