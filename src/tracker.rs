use crate::codec::{substitute_macros, MacroContext, MacroContextUpdate};
use crate::models::{TrackingEvent, TrackingEventType};
use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Delivery mechanisms the host platform advertises. The dispatcher only
/// branches on these flags; it never special-cases platforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCapabilities {
    /// A beacon-style non-blocking send is available
    pub beacon: bool,

    /// A keep-alive-capable background GET is available
    pub keepalive: bool,
}

/// The transport behind pixel delivery. All three tiers are best-effort;
/// the dispatcher decides the order of attempts.
#[async_trait]
pub trait PixelTransport: Send + Sync {
    /// Non-blocking beacon send. Returns true when the transport accepted
    /// the payload for delivery.
    async fn send_beacon(&self, url: &str) -> bool;

    /// Keep-alive background GET, no credentials.
    async fn keepalive_get(&self, url: &str) -> std::result::Result<(), String>;

    /// 1x1 pixel image load, last resort.
    async fn load_pixel(&self, url: &str) -> std::result::Result<(), String>;
}

/// Plain HTTP transport. There is no beacon facility over reqwest, so
/// `send_beacon` always declines and the keep-alive GET carries the load.
pub struct HttpPixelTransport {
    client: reqwest::Client,
}

impl HttpPixelTransport {
    pub fn new() -> std::result::Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;
        Ok(HttpPixelTransport { client })
    }

    async fn get(&self, url: &str) -> std::result::Result<(), String> {
        self.client
            .get(url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl PixelTransport for HttpPixelTransport {
    async fn send_beacon(&self, _url: &str) -> bool {
        false
    }

    async fn keepalive_get(&self, url: &str) -> std::result::Result<(), String> {
        self.get(url).await
    }

    async fn load_pixel(&self, url: &str) -> std::result::Result<(), String> {
        self.get(url).await
    }
}

/// Fire-and-forget tracking dispatcher.
///
/// Endpoints are grouped by event type once at construction. `track`
/// deduplicates per (event type, URL) pair; impression and error firing
/// bypass both the grouping and the dedup. Deliveries guarantee an attempt,
/// never a confirmation: every transport failure is swallowed after a debug
/// log.
pub struct TrackingDispatcher {
    endpoints: HashMap<TrackingEventType, Vec<String>>,
    fired: HashSet<(TrackingEventType, String)>,
    context: MacroContext,
    transport: Arc<dyn PixelTransport>,
    capabilities: DeliveryCapabilities,
}

impl TrackingDispatcher {
    pub fn new(
        events: &[TrackingEvent],
        transport: Arc<dyn PixelTransport>,
        capabilities: DeliveryCapabilities,
    ) -> Self {
        let mut endpoints: HashMap<TrackingEventType, Vec<String>> = HashMap::new();
        for event in events {
            endpoints
                .entry(event.event.clone())
                .or_default()
                .push(event.url.clone());
        }
        TrackingDispatcher {
            endpoints,
            fired: HashSet::new(),
            context: MacroContext::default(),
            transport,
            capabilities,
        }
    }

    /// Fire every endpoint registered for `event`. With `once`, endpoints
    /// already delivered for this (type, URL) pair are skipped; without it
    /// the fired set is neither consulted nor updated. An event type with
    /// no registered endpoints is a silent no-op.
    pub async fn track(&mut self, event: &TrackingEventType, once: bool) {
        let urls = match self.endpoints.get(event) {
            Some(urls) => urls.clone(),
            None => {
                debug!("no endpoints registered for event {}", event.name());
                return;
            }
        };

        for url in urls {
            if once {
                let key = (event.clone(), url.clone());
                if self.fired.contains(&key) {
                    continue;
                }
                self.fired.insert(key);
            }
            self.deliver(&url, &self.context).await;
        }
    }

    /// Deliver every impression URL unconditionally, no dedup.
    pub async fn fire_impressions(&self, urls: &[String]) {
        for url in urls {
            self.deliver(url, &self.context).await;
        }
    }

    /// Deliver every error URL unconditionally. The error code is injected
    /// into the macro context for this call only; the live context is not
    /// mutated.
    pub async fn fire_error(&self, urls: &[String], error_code: u32) {
        let mut ctx = self.context.clone();
        ctx.error_code = Some(error_code);
        for url in urls {
            self.deliver(url, &ctx).await;
        }
    }

    /// Merge fields into the live macro context. Already-fired deliveries
    /// are unaffected.
    pub fn update_context(&mut self, update: MacroContextUpdate) {
        self.context.merge(update);
    }

    /// Clear only the fired set so a new playback session can refire
    /// first-time events. The macro context and the endpoint map survive.
    pub fn reset(&mut self) {
        self.fired.clear();
    }

    /// Macro-expand and attempt delivery through the capability-ranked tier
    /// chain: beacon, then keep-alive GET, then pixel load.
    async fn deliver(&self, url: &str, ctx: &MacroContext) {
        let expanded = substitute_macros(url, ctx);

        if self.capabilities.beacon && self.transport.send_beacon(&expanded).await {
            return;
        }
        if self.capabilities.keepalive {
            match self.transport.keepalive_get(&expanded).await {
                Ok(()) => return,
                Err(e) => debug!("keep-alive delivery failed for {}: {}", expanded, e),
            }
        }
        if let Err(e) = self.transport.load_pixel(&expanded).await {
            debug!("pixel delivery failed for {}: {}", expanded, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackingEventType as E;
    use std::sync::Mutex;

    /// Records every transport call; configurable per-tier outcomes.
    struct RecordingTransport {
        calls: Mutex<Vec<(&'static str, String)>>,
        beacon_accepts: bool,
        keepalive_ok: bool,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(RecordingTransport {
                calls: Mutex::new(Vec::new()),
                beacon_accepts: true,
                keepalive_ok: true,
            })
        }

        fn with_outcomes(beacon_accepts: bool, keepalive_ok: bool) -> Arc<Self> {
            Arc::new(RecordingTransport {
                calls: Mutex::new(Vec::new()),
                beacon_accepts,
                keepalive_ok,
            })
        }

        fn calls(&self) -> Vec<(&'static str, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn delivered(&self) -> Vec<String> {
            self.calls().into_iter().map(|(_, url)| url).collect()
        }
    }

    #[async_trait]
    impl PixelTransport for RecordingTransport {
        async fn send_beacon(&self, url: &str) -> bool {
            self.calls.lock().unwrap().push(("beacon", url.to_string()));
            self.beacon_accepts
        }

        async fn keepalive_get(&self, url: &str) -> std::result::Result<(), String> {
            self.calls
                .lock()
                .unwrap()
                .push(("keepalive", url.to_string()));
            if self.keepalive_ok {
                Ok(())
            } else {
                Err("connection refused".to_string())
            }
        }

        async fn load_pixel(&self, url: &str) -> std::result::Result<(), String> {
            self.calls.lock().unwrap().push(("pixel", url.to_string()));
            Ok(())
        }
    }

    fn events() -> Vec<TrackingEvent> {
        vec![
            TrackingEvent {
                event: E::Start,
                url: "https://t.example/start1".to_string(),
                offset: None,
            },
            TrackingEvent {
                event: E::Start,
                url: "https://t.example/start2".to_string(),
                offset: None,
            },
            TrackingEvent {
                event: E::Complete,
                url: "https://t.example/complete".to_string(),
                offset: None,
            },
        ]
    }

    fn caps() -> DeliveryCapabilities {
        DeliveryCapabilities {
            beacon: true,
            keepalive: true,
        }
    }

    #[tokio::test]
    async fn track_once_delivers_each_url_exactly_once() {
        let transport = RecordingTransport::new();
        let mut dispatcher = TrackingDispatcher::new(&events(), transport.clone(), caps());

        dispatcher.track(&E::Start, true).await;
        dispatcher.track(&E::Start, true).await;

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.contains(&"https://t.example/start1".to_string()));
        assert!(delivered.contains(&"https://t.example/start2".to_string()));
    }

    #[tokio::test]
    async fn track_without_once_bypasses_dedup() {
        let transport = RecordingTransport::new();
        let mut dispatcher = TrackingDispatcher::new(&events(), transport.clone(), caps());

        dispatcher.track(&E::Start, false).await;
        dispatcher.track(&E::Start, false).await;
        assert_eq!(transport.delivered().len(), 4);

        // The fired set was never updated, so a once-tracked call still goes out.
        dispatcher.track(&E::Start, true).await;
        assert_eq!(transport.delivered().len(), 6);
    }

    #[tokio::test]
    async fn reset_allows_refiring() {
        let transport = RecordingTransport::new();
        let mut dispatcher = TrackingDispatcher::new(&events(), transport.clone(), caps());

        dispatcher.track(&E::Start, true).await;
        dispatcher.reset();
        dispatcher.track(&E::Start, true).await;

        assert_eq!(transport.delivered().len(), 4);
    }

    #[tokio::test]
    async fn unknown_event_is_a_silent_no_op() {
        let transport = RecordingTransport::new();
        let mut dispatcher = TrackingDispatcher::new(&events(), transport.clone(), caps());

        dispatcher.track(&E::Skip, true).await;
        dispatcher
            .track(&E::Other("midRollBonus".to_string()), true)
            .await;

        assert!(transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn fire_error_injects_code_without_mutating_context() {
        let transport = RecordingTransport::new();
        let dispatcher = TrackingDispatcher::new(&[], transport.clone(), caps());

        let urls = vec!["https://e.example/p?code=[ERRORCODE]".to_string()];
        dispatcher.fire_error(&urls, 302).await;

        let delivered = transport.delivered();
        assert_eq!(delivered, vec!["https://e.example/p?code=302"]);
        assert_eq!(dispatcher.context.error_code, None);
    }

    #[tokio::test]
    async fn impressions_fire_unconditionally_without_dedup() {
        let transport = RecordingTransport::new();
        let dispatcher = TrackingDispatcher::new(&[], transport.clone(), caps());

        let urls = vec![
            "https://i.example/1".to_string(),
            "https://i.example/1".to_string(),
        ];
        dispatcher.fire_impressions(&urls).await;
        dispatcher.fire_impressions(&urls).await;

        assert_eq!(transport.delivered().len(), 4);
    }

    #[tokio::test]
    async fn beacon_success_short_circuits_the_chain() {
        let transport = RecordingTransport::with_outcomes(true, true);
        let dispatcher = TrackingDispatcher::new(&[], transport.clone(), caps());

        dispatcher
            .fire_impressions(&["https://i.example/1".to_string()])
            .await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "beacon");
    }

    #[tokio::test]
    async fn declined_beacon_falls_through_to_keepalive() {
        let transport = RecordingTransport::with_outcomes(false, true);
        let dispatcher = TrackingDispatcher::new(&[], transport.clone(), caps());

        dispatcher
            .fire_impressions(&["https://i.example/1".to_string()])
            .await;

        let tiers: Vec<&str> = transport.calls().iter().map(|(t, _)| *t).collect();
        assert_eq!(tiers, vec!["beacon", "keepalive"]);
    }

    #[tokio::test]
    async fn failed_keepalive_falls_through_to_pixel_and_is_swallowed() {
        let transport = RecordingTransport::with_outcomes(false, false);
        let dispatcher = TrackingDispatcher::new(&[], transport.clone(), caps());

        dispatcher
            .fire_impressions(&["https://i.example/1".to_string()])
            .await;

        let tiers: Vec<&str> = transport.calls().iter().map(|(t, _)| *t).collect();
        assert_eq!(tiers, vec!["beacon", "keepalive", "pixel"]);
    }

    #[tokio::test]
    async fn unadvertised_capabilities_skip_their_tiers() {
        let transport = RecordingTransport::new();
        let dispatcher = TrackingDispatcher::new(
            &[],
            transport.clone(),
            DeliveryCapabilities {
                beacon: false,
                keepalive: false,
            },
        );

        dispatcher
            .fire_impressions(&["https://i.example/1".to_string()])
            .await;

        let tiers: Vec<&str> = transport.calls().iter().map(|(t, _)| *t).collect();
        assert_eq!(tiers, vec!["pixel"]);
    }

    #[tokio::test]
    async fn context_updates_apply_to_subsequent_deliveries() {
        let transport = RecordingTransport::new();
        let mut dispatcher = TrackingDispatcher::new(&[], transport.clone(), caps());

        let urls = vec!["https://i.example/p?u=[ASSETURI]".to_string()];
        dispatcher.fire_impressions(&urls).await;
        dispatcher.update_context(MacroContextUpdate {
            asset_uri: Some("https://cdn.example/ad.mp4".to_string()),
            ..Default::default()
        });
        dispatcher.fire_impressions(&urls).await;

        let delivered = transport.delivered();
        assert!(delivered[0].contains("[ASSETURI]"));
        assert!(delivered[1].contains("https%3A%2F%2Fcdn.example%2Fad.mp4"));
    }
}
