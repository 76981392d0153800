use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use regex::Regex;
use std::time::{SystemTime, UNIX_EPOCH};

static TIMECODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2}):(\d{2}):(\d{2})(?:\.(\d{1,3}))?$").unwrap());

/// Parse a VAST time expression into seconds.
///
/// Accepts `HH:MM:SS` or `HH:MM:SS.mmm`, a trailing-`%` percentage (returned
/// as a bare fraction, e.g. "50%" -> 0.5, NOT scaled by any duration; callers
/// relying on percentage skip offsets get the literal fraction), or a bare
/// numeric string taken as seconds. Anything unparseable yields 0.
pub fn parse_time_expression(input: &str) -> f64 {
    let input = input.trim();

    if let Some(caps) = TIMECODE_RE.captures(input) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        let millis: f64 = caps
            .get(4)
            .and_then(|m| format!("0.{}", m.as_str()).parse().ok())
            .unwrap_or(0.0);
        return hours * 3600.0 + minutes * 60.0 + seconds + millis;
    }

    if let Some(pct) = input.strip_suffix('%') {
        return pct.trim().parse::<f64>().map(|p| p / 100.0).unwrap_or(0.0);
    }

    input.parse::<f64>().unwrap_or(0.0)
}

/// Format seconds as a zero-padded `HH:MM:SS.mmm` timecode.
///
/// Hours, minutes, seconds and milliseconds are all floored; 59.9995 stays
/// "00:00:59.999" rather than carrying into the next second.
pub fn format_timecode(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let total = seconds.floor() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    // The epsilon absorbs representation error (3661.123 * 1000 lands just
    // under 3661123) without ever carrying a .5 boundary upward.
    let millis = ((seconds * 1000.0 + 1e-6).floor() as u64) % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

/// Mutable substitution values for tracking-URL macros. Fields left `None`
/// leave their macro token untouched in the output URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacroContext {
    pub asset_uri: Option<String>,
    pub content_playhead: Option<f64>,
    pub ad_playhead: Option<f64>,
    pub error_code: Option<u32>,
    pub break_position: Option<String>,
    pub ad_type: Option<String>,
}

/// Partial update merged into a live MacroContext.
#[derive(Debug, Clone, Default)]
pub struct MacroContextUpdate {
    pub asset_uri: Option<String>,
    pub content_playhead: Option<f64>,
    pub ad_playhead: Option<f64>,
    pub error_code: Option<u32>,
    pub break_position: Option<String>,
    pub ad_type: Option<String>,
}

impl MacroContext {
    /// Merge the populated fields of `update` into this context.
    pub fn merge(&mut self, update: MacroContextUpdate) {
        if update.asset_uri.is_some() {
            self.asset_uri = update.asset_uri;
        }
        if update.content_playhead.is_some() {
            self.content_playhead = update.content_playhead;
        }
        if update.ad_playhead.is_some() {
            self.ad_playhead = update.ad_playhead;
        }
        if update.error_code.is_some() {
            self.error_code = update.error_code;
        }
        if update.break_position.is_some() {
            self.break_position = update.break_position;
        }
        if update.ad_type.is_some() {
            self.ad_type = update.ad_type;
        }
    }
}

fn cache_busting_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Substitute tracking macros into a URL.
///
/// `[TIMESTAMP]` and `[CACHEBUSTING]` are always replaced with fresh values
/// (a new random token per occurrence). The conditional macros are replaced
/// only when the corresponding context field is present; absent ones stay as
/// literal bracketed tokens. This non-replacement is part of the contract:
/// downstream ad servers key off the literal token to detect missing values.
pub fn substitute_macros(url: &str, ctx: &MacroContext) -> String {
    let mut out = url.replace("[TIMESTAMP]", &epoch_millis().to_string());

    while let Some(pos) = out.find("[CACHEBUSTING]") {
        out.replace_range(pos..pos + "[CACHEBUSTING]".len(), &cache_busting_token());
    }

    if let Some(asset_uri) = &ctx.asset_uri {
        out = out.replace("[ASSETURI]", &urlencoding::encode(asset_uri));
    }
    if let Some(playhead) = ctx.content_playhead {
        out = out.replace("[CONTENTPLAYHEAD]", &format_timecode(playhead));
    }
    if let Some(playhead) = ctx.ad_playhead {
        out = out.replace("[ADPLAYHEAD]", &format_timecode(playhead));
    }
    if let Some(code) = ctx.error_code {
        out = out.replace("[ERRORCODE]", &code.to_string());
    }
    if let Some(pos) = &ctx.break_position {
        out = out.replace("[BREAKPOSITION]", pos);
    }
    if let Some(ad_type) = &ctx.ad_type {
        out = out.replace("[ADTYPE]", ad_type);
    }

    out
}
