use crate::error::{Result, VastError};
use crate::models::*;
use crate::parser::parse_document;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Injectable document transport. Production uses [`HttpFetcher`]; tests
/// supply a stub so no network is touched.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch the raw document text behind `uri`. A non-2xx status is a
    /// failure from the resolver's point of view, not the transport's.
    async fn fetch(&self, uri: &str) -> Result<String>;
}

/// HTTP transport backed by reqwest. The resolver applies its own cancellable
/// timeout around each call, so the client itself carries none.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VastError::Undefined(format!("failed to build HTTP client: {}", e)))?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, uri: &str) -> Result<String> {
        let url = url::Url::parse(uri)
            .map_err(|e| VastError::WrapperGeneral(format!("invalid URI {}: {}", uri, e)))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VastError::WrapperNoResponse(format!("{}: {}", uri, e)))?;

        if !response.status().is_success() {
            return Err(VastError::WrapperNoResponse(format!(
                "{}: HTTP status {}",
                uri,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| VastError::WrapperNoResponse(format!("{}: {}", uri, e)))
    }
}

/// Transport for the CLI: reads `file://` URIs and plain file paths from disk
/// and delegates everything else to [`HttpFetcher`].
pub struct FileOrHttpFetcher {
    http: HttpFetcher,
}

impl FileOrHttpFetcher {
    pub fn new() -> Result<Self> {
        Ok(FileOrHttpFetcher {
            http: HttpFetcher::new()?,
        })
    }
}

#[async_trait]
impl Fetch for FileOrHttpFetcher {
    async fn fetch(&self, uri: &str) -> Result<String> {
        if let Some(path) = uri.strip_prefix("file://") {
            debug!("reading from file: {}", path);
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|e| VastError::WrapperNoResponse(format!("{}: {}", uri, e)));
        }

        if Path::new(uri).exists() {
            debug!("reading from local file: {}", uri);
            return tokio::fs::read_to_string(uri)
                .await
                .map_err(|e| VastError::WrapperNoResponse(format!("{}: {}", uri, e)));
        }

        self.http.fetch(uri).await
    }
}

/// Resolution options.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum wrapper chain depth; a fetch at this depth fails outright
    pub max_wrapper_depth: usize,

    /// Per-fetch timeout
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            max_wrapper_depth: 5,
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Resolves a root VAST URI into a flattened, tracking-merged document.
///
/// Resolution is depth-first within a chain and breadth-parallel across
/// sibling wrapper ads of the same document. There are no retries anywhere:
/// a timeout cancels the in-flight fetch and surfaces as a failure.
pub struct Resolver {
    fetch: Arc<dyn Fetch>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(fetch: Arc<dyn Fetch>, config: ResolverConfig) -> Self {
        Resolver { fetch, config }
    }

    /// Resolve `root_uri` into a single document whose ads are all inline,
    /// with wrapper impressions, error URLs and tracking merged in. A
    /// document with zero ads resolves successfully; "no ads" is the
    /// caller's decision.
    pub async fn resolve(&self, root_uri: &str) -> Result<VastDocument> {
        self.resolve_at_depth(root_uri.to_string(), 0, true).await
    }

    /// Fetch and flatten one document of the chain. The depth bound is
    /// checked at entry, so a chain of exactly `max_wrapper_depth` nested
    /// wrappers fails and one fewer succeeds. `follow_wrappers` is false
    /// when the parent wrapper forbade following further wrappers; such
    /// ads are dropped rather than resolved.
    fn resolve_at_depth(
        &self,
        uri: String,
        depth: usize,
        follow_wrappers: bool,
    ) -> BoxFuture<'_, Result<VastDocument>> {
        async move {
            if depth >= self.config.max_wrapper_depth {
                return Err(VastError::WrapperLimit(uri));
            }

            debug!("fetching VAST document at depth {}: {}", depth, uri);
            let body = match tokio::time::timeout(self.config.timeout, self.fetch.fetch(&uri)).await
            {
                Ok(result) => result?,
                Err(_) => return Err(VastError::WrapperTimeout(uri)),
            };

            let VastDocument {
                version,
                ads,
                mut error_urls,
            } = parse_document(&body)?;

            // Sibling wrapper chains run concurrently; join_all keeps
            // document order when reassembling.
            let branches = ads
                .into_iter()
                .map(|ad| self.resolve_ad(ad, depth, follow_wrappers));
            let mut resolved = Vec::new();
            for branch in join_all(branches).await {
                let (branch_ads, branch_errors) = branch?;
                resolved.extend(branch_ads);
                error_urls.extend(branch_errors);
            }

            Ok(VastDocument {
                version,
                ads: resolved,
                error_urls,
            })
        }
        .boxed()
    }

    /// Resolve one ad of a document into its flattened contribution, plus
    /// any nested document-level error URLs.
    async fn resolve_ad(
        &self,
        ad: Ad,
        depth: usize,
        follow_wrappers: bool,
    ) -> Result<(Vec<Ad>, Vec<String>)> {
        let link = match &ad.kind {
            AdKind::Inline => return Ok((vec![ad], Vec::new())),
            AdKind::Wrapper(link) => link.clone(),
        };

        if !follow_wrappers {
            warn!(
                "dropping wrapper ad {:?}: parent forbade following additional wrappers",
                ad.id
            );
            return Ok((Vec::new(), Vec::new()));
        }

        let nested = match self
            .resolve_at_depth(link.tag_uri.clone(), depth + 1, link.follow_additional_wrappers)
            .await
        {
            Ok(nested) => nested,
            Err(e) if link.fallback_on_no_ad => {
                // The wrapper opted into collapsing a failed subtree to zero
                // ads instead of failing the whole resolution.
                warn!("wrapper chain failed, falling back to no ad: {}", e);
                return Ok((Vec::new(), Vec::new()));
            }
            Err(e) => return Err(e),
        };

        let mut nested_ads = nested.ads;
        if !link.allow_multiple_ads {
            nested_ads.truncate(1);
        }

        let wrapper_tracking = aggregate_tracking_events(std::slice::from_ref(&ad));
        let wrapper_clicks = collect_click_tracking(&ad);

        let merged = nested_ads
            .into_iter()
            .map(|nested_ad| merge_wrapper_into(&ad, &wrapper_tracking, &wrapper_clicks, nested_ad))
            .collect();

        Ok((merged, nested.error_urls))
    }
}

/// Prepend a wrapper's impressions, error URLs, linear tracking and click
/// tracking onto an ad produced by its nested document. The merge keeps both
/// sets; wrapper tracking fires in addition to inline tracking.
fn merge_wrapper_into(
    wrapper: &Ad,
    wrapper_tracking: &[TrackingEvent],
    wrapper_clicks: &[String],
    mut nested: Ad,
) -> Ad {
    let mut impressions = wrapper.impressions.clone();
    impressions.append(&mut nested.impressions);
    nested.impressions = impressions;

    let mut error_urls = wrapper.error_urls.clone();
    error_urls.append(&mut nested.error_urls);
    nested.error_urls = error_urls;

    if let Some(linear) = nested.creatives.iter_mut().find_map(|c| c.linear.as_mut()) {
        let mut tracking = wrapper_tracking.to_vec();
        tracking.append(&mut linear.tracking_events);
        linear.tracking_events = tracking;

        if !wrapper_clicks.is_empty() {
            let clicks = linear.video_clicks.get_or_insert_with(VideoClicks::default);
            let mut click_tracking = wrapper_clicks.to_vec();
            click_tracking.append(&mut clicks.click_tracking);
            clicks.click_tracking = click_tracking;
        }
    }

    nested
}

fn collect_click_tracking(ad: &Ad) -> Vec<String> {
    ad.creatives
        .iter()
        .filter_map(|c| c.linear.as_ref())
        .filter_map(|l| l.video_clicks.as_ref())
        .flat_map(|v| v.click_tracking.iter().cloned())
        .collect()
}

/// Pick the best rendition for a target bitrate.
///
/// MP4 renditions are preferred over any other container when both exist.
/// Each candidate scores `|bitrate - target|` plus a 10000 penalty above
/// 1080p, so a ≤1080p rendition always beats a 4K one regardless of bitrate
/// closeness. Ties keep the earliest candidate.
pub fn select_best_media_file(files: &[MediaFile], target_bitrate_kbps: u32) -> Option<&MediaFile> {
    let mp4: Vec<&MediaFile> = files.iter().filter(|f| f.mime_type.contains("mp4")).collect();
    let pool: Vec<&MediaFile> = if mp4.is_empty() {
        files.iter().collect()
    } else {
        mp4
    };

    let mut best: Option<(&MediaFile, i64)> = None;
    for file in pool {
        let bitrate = i64::from(file.bitrate.unwrap_or(0));
        let mut score = (bitrate - i64::from(target_bitrate_kbps)).abs();
        if file.height > 1080 {
            score += 10_000;
        }
        match best {
            Some((_, best_score)) if score >= best_score => {}
            _ => best = Some((file, score)),
        }
    }
    best.map(|(file, _)| file)
}

/// Flatten every Linear tracking event across `ads`, preserving document
/// order. No dedup here; at-most-once delivery is the dispatcher's job.
pub fn aggregate_tracking_events(ads: &[Ad]) -> Vec<TrackingEvent> {
    ads.iter()
        .flat_map(|ad| ad.creatives.iter())
        .filter_map(|c| c.linear.as_ref())
        .flat_map(|l| l.tracking_events.iter().cloned())
        .collect()
}

/// Flatten impression URLs across `ads`, preserving document order.
pub fn aggregate_impression_urls(ads: &[Ad]) -> Vec<String> {
    ads.iter()
        .flat_map(|ad| ad.impressions.iter().cloned())
        .collect()
}

/// Every error URL in the document: document-level first, then per-ad, in
/// document order.
pub fn aggregate_error_urls(doc: &VastDocument) -> Vec<String> {
    doc.error_urls
        .iter()
        .cloned()
        .chain(doc.ads.iter().flat_map(|ad| ad.error_urls.iter().cloned()))
        .collect()
}
