use crate::codec::MacroContextUpdate;
use crate::error::VastError;
use crate::models::{MediaFile, TrackingEvent, TrackingEventType, VastDocument};
use crate::resolver::{
    aggregate_error_urls, aggregate_impression_urls, aggregate_tracking_events,
    select_best_media_file, Fetch, Resolver, ResolverConfig,
};
use crate::tracker::{DeliveryCapabilities, PixelTransport, TrackingDispatcher};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of one ad session. `Completed` and `Error` are terminal; a new
/// session needs a new player instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Loading,
    Ready,
    WaitingForInteraction,
    Playing,
    Paused,
    Completed,
    Error,
}

/// A 25/50/75% playback milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quartile {
    First,
    Midpoint,
    Third,
}

/// Events emitted to registered listeners.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Loaded,
    Start,
    Progress {
        current: f64,
        duration: f64,
        percentage: f64,
        quartile: Option<Quartile>,
    },
    Quartile(Quartile),
    Complete,
    Skip,
    Click(Option<String>),
    Pause,
    Resume,
    Mute,
    Unmute,
    Error {
        code: u32,
        message: String,
        recoverable: bool,
    },
    Destroy,
}

/// Semantic remote-control actions after platform normalization. The player
/// never sees raw key codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Select,
    PlayPause,
    Stop,
    Back,
}

/// Marker for a host runtime declining a playback-start attempt (autoplay
/// denial). Recovery is a state transition, not an error.
#[derive(Debug, Clone, Copy)]
pub struct StartRejected;

/// The video playback capability owned by the collaborator layer. The player
/// coordinates it as a black box and never creates or styles it.
#[async_trait]
pub trait PlaybackSurface: Send + Sync {
    /// Attach a media source and the platform's autoplay-compliance
    /// attributes before the first start attempt.
    fn load(&self, url: &str, attributes: &[(String, String)]);

    /// Attempt to begin playback. `Err` means the host declined.
    async fn start(&self) -> std::result::Result<(), StartRejected>;

    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn set_muted(&self, muted: bool);
    fn position(&self) -> f64;
    fn duration(&self) -> f64;
}

/// Platform capability provider, injected at construction rather than looked
/// up through process-global state.
pub trait PlatformCapabilities: Send + Sync {
    /// Which delivery tiers the platform advertises.
    fn delivery_capabilities(&self) -> DeliveryCapabilities;

    /// Normalize a raw input code into a semantic action; `None` means the
    /// input is not handled.
    fn normalize_input(&self, raw_code: u32) -> Option<PlayerAction>;

    /// Attributes the playback surface needs for autoplay compliance.
    fn surface_attributes(&self) -> Vec<(String, String)>;
}

/// One ad session's configuration.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Root VAST document URI
    pub root_uri: String,

    /// Target bitrate for media selection, kbps
    pub target_bitrate_kbps: u32,

    /// Maximum wrapper chain depth
    pub max_wrapper_depth: usize,

    /// Document fetch timeout, milliseconds
    pub timeout_ms: u64,

    /// Verbose state-transition logging
    pub debug: bool,

    /// Label for the skip affordance
    pub skip_button_label: String,

    /// Overrides the creative's own skip offset when set
    pub skip_offset_override: Option<f64>,

    /// Whether the platform only permits muted autoplay
    pub autoplay_requires_mute: bool,
}

impl PlayerConfig {
    pub fn new(root_uri: impl Into<String>) -> Self {
        PlayerConfig {
            root_uri: root_uri.into(),
            target_bitrate_kbps: 2500,
            max_wrapper_depth: 5,
            timeout_ms: 10_000,
            debug: false,
            skip_button_label: "Skip Ad".to_string(),
            skip_offset_override: None,
            autoplay_requires_mute: false,
        }
    }
}

pub type ListenerId = u64;

type Listener = Box<dyn Fn(&PlayerEvent) + Send>;

/// Observer set with explicit unsubscribe. A panicking listener does not
/// abort delivery to the remaining listeners.
struct ListenerSet {
    next_id: ListenerId,
    listeners: Vec<(ListenerId, Listener)>,
}

impl ListenerSet {
    fn new() -> Self {
        ListenerSet {
            next_id: 1,
            listeners: Vec::new(),
        }
    }

    fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    fn unsubscribe(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    fn emit(&self, event: &PlayerEvent) {
        for (id, listener) in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("listener {} panicked during event dispatch", id);
            }
        }
    }

    fn clear(&mut self) {
        self.listeners.clear();
    }
}

/// Drives one ad session: resolution, media selection, autoplay with soft
/// fail, quartile and skip tracking, and teardown. Owns its tracking
/// dispatcher and its set of host-event registrations exclusively for the
/// session lifetime.
pub struct AdPlayer {
    config: PlayerConfig,
    surface: Arc<dyn PlaybackSurface>,
    platform: Arc<dyn PlatformCapabilities>,
    fetch: Arc<dyn Fetch>,
    transport: Arc<dyn PixelTransport>,

    state: PlayerState,
    tracker: TrackingDispatcher,
    impressions: Vec<String>,
    error_urls: Vec<String>,
    media: Option<MediaFile>,
    duration: f64,
    position: f64,
    creative_skip_offset: Option<f64>,
    click_through: Option<String>,

    fired_quartiles: HashSet<Quartile>,
    start_fired: bool,
    start_in_flight: bool,
    skip_enabled: bool,
    muted: bool,
    destroyed: bool,

    listeners: ListenerSet,
}

impl AdPlayer {
    pub fn new(
        config: PlayerConfig,
        surface: Arc<dyn PlaybackSurface>,
        platform: Arc<dyn PlatformCapabilities>,
        fetch: Arc<dyn Fetch>,
        transport: Arc<dyn PixelTransport>,
    ) -> Self {
        let capabilities = platform.delivery_capabilities();
        AdPlayer {
            config,
            surface,
            platform,
            fetch,
            transport: transport.clone(),
            state: PlayerState::Idle,
            tracker: TrackingDispatcher::new(&[], transport, capabilities),
            impressions: Vec::new(),
            error_urls: Vec::new(),
            media: None,
            duration: 0.0,
            position: 0.0,
            creative_skip_offset: None,
            click_through: None,
            fired_quartiles: HashSet::new(),
            start_fired: false,
            start_in_flight: false,
            skip_enabled: false,
            muted: false,
            destroyed: false,
            listeners: ListenerSet::new(),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn subscribe(&mut self, listener: impl Fn(&PlayerEvent) + Send + 'static) -> ListenerId {
        self.listeners.subscribe(Box::new(listener))
    }

    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.listeners.unsubscribe(id);
    }

    pub fn skip_button_label(&self) -> &str {
        &self.config.skip_button_label
    }

    /// Whether the skip affordance is currently usable.
    pub fn can_skip(&self) -> bool {
        self.skip_enabled
    }

    /// Seconds until skip becomes available; `None` when the creative is
    /// never skippable.
    pub fn skip_remaining(&self) -> Option<f64> {
        self.effective_skip_offset()
            .map(|offset| (offset - self.position).max(0.0))
    }

    /// Begin the session: resolve the wrapper chain, select a rendition and
    /// arm the surface. Leaves the player in `Ready` (emit `Loaded`) or
    /// `Error`.
    pub async fn init(&mut self) {
        if self.destroyed || self.state != PlayerState::Idle {
            warn!("init called in state {:?}, ignoring", self.state);
            return;
        }
        self.set_state(PlayerState::Loading);

        let resolver = Resolver::new(
            self.fetch.clone(),
            ResolverConfig {
                max_wrapper_depth: self.config.max_wrapper_depth,
                timeout: Duration::from_millis(self.config.timeout_ms),
            },
        );

        match resolver.resolve(&self.config.root_uri).await {
            Ok(doc) => self.on_resolved(doc).await,
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_resolved(&mut self, doc: VastDocument) {
        // Error URLs are collected before the remaining load checks so a
        // no-linear or no-media failure still reaches every endpoint seen
        // so far.
        self.error_urls = aggregate_error_urls(&doc);

        if doc.ads.is_empty() {
            self.fail(VastError::WrapperNoResponse(
                "resolved document contains no ads".to_string(),
            ))
            .await;
            return;
        }

        let linear = match doc.ads.iter().find_map(|ad| ad.first_linear()) {
            Some(linear) => linear.clone(),
            None => {
                self.fail(VastError::LinearGeneral(
                    "no linear creative found".to_string(),
                ))
                .await;
                return;
            }
        };

        let media = match select_best_media_file(&linear.media_files, self.config.target_bitrate_kbps)
        {
            Some(media) => media.clone(),
            None => {
                self.fail(VastError::MediaNotSupported(
                    "no acceptable media file".to_string(),
                ))
                .await;
                return;
            }
        };

        let mut events = aggregate_tracking_events(&doc.ads);
        if let Some(clicks) = &linear.video_clicks {
            // Click tracking rides the dispatcher as clickTracking events.
            events.extend(clicks.click_tracking.iter().map(|url| TrackingEvent {
                event: TrackingEventType::ClickTracking,
                url: url.clone(),
                offset: None,
            }));
            self.click_through = clicks.click_through.clone();
        }

        self.tracker = TrackingDispatcher::new(
            &events,
            self.transport.clone(),
            self.platform.delivery_capabilities(),
        );
        self.tracker.update_context(MacroContextUpdate {
            asset_uri: Some(media.url.clone()),
            ..Default::default()
        });

        self.impressions = aggregate_impression_urls(&doc.ads);
        self.duration = linear.duration;
        self.creative_skip_offset = linear.skip_offset;

        self.surface.load(&media.url, &self.platform.surface_attributes());
        if self.config.autoplay_requires_mute {
            self.surface.set_muted(true);
            self.muted = true;
        }
        self.media = Some(media);

        self.set_state(PlayerState::Ready);
        self.listeners.emit(&PlayerEvent::Loaded);
    }

    /// Attempt autoplay. A host rejection is a soft fail into
    /// `WaitingForInteraction`, never an error.
    pub async fn begin_playback(&mut self) {
        if self.destroyed || self.state != PlayerState::Ready {
            return;
        }
        match self.surface.start().await {
            Ok(()) => self.enter_playing().await,
            Err(StartRejected) => {
                info!("autoplay rejected by host, waiting for interaction");
                self.set_state(PlayerState::WaitingForInteraction);
            }
        }
    }

    /// User-driven start after an autoplay rejection. A failure here is a
    /// real error, unlike the initial rejection.
    pub async fn confirm_interaction(&mut self) {
        if self.destroyed || self.state != PlayerState::WaitingForInteraction || self.start_in_flight {
            return;
        }
        self.start_in_flight = true;
        let result = self.surface.start().await;
        self.start_in_flight = false;

        match result {
            Ok(()) => self.enter_playing().await,
            Err(StartRejected) => {
                self.fail(VastError::MediaNotSupported(
                    "interactive start attempt failed".to_string(),
                ))
                .await;
            }
        }
    }

    /// Shared Ready/WaitingForInteraction -> Playing effect. `start` and
    /// `creativeView` never double-fire even when start succeeds twice.
    async fn enter_playing(&mut self) {
        self.set_state(PlayerState::Playing);
        if self.start_fired {
            return;
        }
        self.start_fired = true;

        let impressions = self.impressions.clone();
        self.tracker.fire_impressions(&impressions).await;
        self.tracker.track(&TrackingEventType::Start, true).await;
        self.tracker
            .track(&TrackingEventType::CreativeView, true)
            .await;

        if let Some(offset) = self.effective_skip_offset() {
            debug!(
                "skip available in {:.1}s (label: {})",
                offset, self.config.skip_button_label
            );
        }
        self.listeners.emit(&PlayerEvent::Start);
    }

    /// Playback-position update from the host surface. Quartiles fire once
    /// each; the 100% boundary is deliberately not position-driven, so
    /// completion only ever comes from `on_ended`.
    pub async fn on_position(&mut self, position: f64) {
        if self.destroyed || self.state != PlayerState::Playing {
            return;
        }
        self.position = position;
        self.tracker.update_context(MacroContextUpdate {
            ad_playhead: Some(position),
            content_playhead: Some(position),
            ..Default::default()
        });

        let duration = if self.duration > 0.0 {
            self.duration
        } else {
            self.surface.duration()
        };
        let percentage = if duration > 0.0 {
            position / duration * 100.0
        } else {
            0.0
        };

        let mut crossed = None;
        let thresholds = [
            (25.0, Quartile::First, TrackingEventType::FirstQuartile),
            (50.0, Quartile::Midpoint, TrackingEventType::Midpoint),
            (75.0, Quartile::Third, TrackingEventType::ThirdQuartile),
        ];
        for (threshold, quartile, event) in thresholds {
            if percentage >= threshold && self.fired_quartiles.insert(quartile) {
                self.tracker.track(&event, true).await;
                self.listeners.emit(&PlayerEvent::Quartile(quartile));
                crossed = Some(quartile);
            }
        }

        if let Some(remaining) = self.skip_remaining() {
            if remaining <= 0.0 && !self.skip_enabled {
                self.skip_enabled = true;
                debug!("skip affordance enabled");
            }
        }

        self.listeners.emit(&PlayerEvent::Progress {
            current: position,
            duration,
            percentage,
            quartile: crossed,
        });
    }

    /// Natural end of media reported by the host surface.
    pub async fn on_ended(&mut self) {
        if self.destroyed || self.state != PlayerState::Playing {
            return;
        }
        self.set_state(PlayerState::Completed);
        self.tracker.track(&TrackingEventType::Complete, true).await;
        self.listeners.emit(&PlayerEvent::Complete);
    }

    /// Pause reported by the host surface. End-of-media often arrives as a
    /// pause on TV runtimes; a completed session ignores it.
    pub async fn on_pause_reported(&mut self) {
        if self.destroyed || self.state != PlayerState::Playing {
            return;
        }
        self.set_state(PlayerState::Paused);
        self.tracker.track(&TrackingEventType::Pause, false).await;
        self.listeners.emit(&PlayerEvent::Pause);
    }

    pub async fn resume(&mut self) {
        if self.destroyed || self.state != PlayerState::Paused {
            return;
        }
        self.surface.resume();
        self.set_state(PlayerState::Playing);
        self.tracker.track(&TrackingEventType::Resume, false).await;
        self.listeners.emit(&PlayerEvent::Resume);
    }

    /// Request a pause; the state transition happens when the host surface
    /// reports it back through `on_pause_reported`.
    pub fn request_pause(&self) {
        if self.state == PlayerState::Playing {
            self.surface.pause();
        }
    }

    /// Skip the ad. Only honored once elapsed time has reached the effective
    /// skip offset; the configured override takes precedence over the
    /// creative's own offset, and no offset (or one <= 0) means the ad is
    /// never skippable. Tears the session down after firing.
    pub async fn skip(&mut self) {
        if self.destroyed
            || matches!(self.state, PlayerState::Completed | PlayerState::Error)
        {
            return;
        }
        let offset = match self.effective_skip_offset() {
            Some(offset) => offset,
            None => return,
        };
        if self.position < offset {
            debug!(
                "skip requested at {:.1}s, available at {:.1}s",
                self.position, offset
            );
            return;
        }

        self.tracker.track(&TrackingEventType::Skip, true).await;
        self.listeners.emit(&PlayerEvent::Skip);
        self.destroy();
    }

    /// Playback error from the host surface; unrecoverable from any
    /// non-terminal state.
    pub async fn on_surface_error(&mut self) {
        if self.destroyed
            || matches!(self.state, PlayerState::Completed | PlayerState::Error)
        {
            return;
        }
        self.fail(VastError::MediaNotSupported(
            "playback surface reported an error".to_string(),
        ))
        .await;
    }

    /// Funnel for unexpected host conditions the taxonomy has no code for.
    pub async fn report_unexpected(&mut self, message: impl Into<String>) {
        self.fail(VastError::Undefined(message.into())).await;
    }

    /// Click on the creative. Fires click tracking and surfaces the
    /// click-through URL to listeners; navigation is the collaborator's job.
    pub async fn click(&mut self) {
        if self.destroyed || !matches!(self.state, PlayerState::Playing | PlayerState::Paused) {
            return;
        }
        self.tracker
            .track(&TrackingEventType::ClickTracking, false)
            .await;
        self.listeners
            .emit(&PlayerEvent::Click(self.click_through.clone()));
    }

    pub async fn set_muted(&mut self, muted: bool) {
        if self.destroyed || muted == self.muted {
            return;
        }
        self.surface.set_muted(muted);
        self.muted = muted;
        if muted {
            self.tracker.track(&TrackingEventType::Mute, false).await;
            self.listeners.emit(&PlayerEvent::Mute);
        } else {
            self.tracker.track(&TrackingEventType::Unmute, false).await;
            self.listeners.emit(&PlayerEvent::Unmute);
        }
    }

    /// Route a raw input code through the platform normalizer. The player
    /// branches only on the semantic action, never on platform key tables.
    pub async fn handle_input(&mut self, raw_code: u32) {
        let action = match self.platform.normalize_input(raw_code) {
            Some(action) => action,
            None => return,
        };
        match action {
            PlayerAction::Select => match self.state {
                PlayerState::WaitingForInteraction => self.confirm_interaction().await,
                PlayerState::Playing | PlayerState::Paused => self.click().await,
                _ => {}
            },
            PlayerAction::PlayPause => match self.state {
                PlayerState::WaitingForInteraction => self.confirm_interaction().await,
                PlayerState::Playing => self.request_pause(),
                PlayerState::Paused => self.resume().await,
                _ => {}
            },
            PlayerAction::Back => {
                if self.can_skip() {
                    self.skip().await;
                }
            }
            PlayerAction::Stop => self.destroy(),
        }
    }

    /// Release every owned resource. Idempotent and callable from any
    /// non-terminal state. The listener registry is cleared before the final
    /// destroy event goes out, so subscribers wanting post-teardown notice
    /// must hook an earlier event.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.surface.stop();
        self.listeners.clear();
        self.listeners.emit(&PlayerEvent::Destroy);
    }

    fn effective_skip_offset(&self) -> Option<f64> {
        self.config
            .skip_offset_override
            .or(self.creative_skip_offset)
            .filter(|offset| *offset > 0.0)
    }

    async fn fail(&mut self, err: VastError) {
        if self.destroyed
            || matches!(self.state, PlayerState::Completed | PlayerState::Error)
        {
            return;
        }
        let code = err.code();
        error!("ad session failed ({}): {}", code, err);

        let urls = self.error_urls.clone();
        self.tracker.fire_error(&urls, code).await;

        self.set_state(PlayerState::Error);
        self.listeners.emit(&PlayerEvent::Error {
            code,
            message: err.to_string(),
            recoverable: false,
        });
    }

    fn set_state(&mut self, next: PlayerState) {
        if self.config.debug {
            debug!("state {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }
}
