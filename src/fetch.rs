// Hotel search orchestration
// Picks a fetch strategy for the requested mode, then sorts, truncates and
// summarizes whatever that strategy produced.

use crate::browser::{acquire_document, build_search_url, BrowserSource, HttpBrowser, SourceError, WaitBudget};
use crate::extraction::{HotelExtractor, RenderedDocument, DEFAULT_MAX_CANDIDATES};
use crate::filter::{create_filter, FilterOverrides};
use crate::models::{HotelRecord, HotelSearchResult, PartyComposition, ResultOrigin, SearchRequest, ValidationError};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const LOCAL_CATALOG_JSON: &str = include_str!("../samples/local_catalog.json");

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("Local catalog error: {0}")]
    Catalog(String),
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: String,
    pub user_agent: String,
    pub page_timeout: Duration,
    // Pause after navigation so client-side rendering can finish
    pub settle_delay: Duration,
    // Budget for each readiness selector tier
    pub selector_timeout: Duration,
    pub max_candidates: usize,
    // When set, the HTML of every live fetch is written here
    pub debug_dump_path: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.google.com/travel/hotels".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            page_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(5),
            selector_timeout: Duration::from_secs(15),
            max_candidates: DEFAULT_MAX_CANDIDATES,
            debug_dump_path: None,
        }
    }
}

impl FetchConfig {
    pub fn wait_budget(&self) -> WaitBudget {
        WaitBudget {
            page_timeout: self.page_timeout,
            settle_delay: self.settle_delay,
            selector_timeout: self.selector_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Local,
    Live,
    // Live first, local catalog when the live source is unavailable
    Common,
}

impl FetchMode {
    fn empty_origin(self) -> ResultOrigin {
        match self {
            FetchMode::Local => ResultOrigin::Local,
            FetchMode::Live | FetchMode::Common => ResultOrigin::Live,
        }
    }
}

impl FromStr for FetchMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(FetchMode::Local),
            "live" => Ok(FetchMode::Live),
            "common" => Ok(FetchMode::Common),
            other => Err(ValidationError::new(
                "fetch_mode",
                format!("'{}' is not one of local, live, common", other),
            )),
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchMode::Local => "local",
            FetchMode::Live => "live",
            FetchMode::Common => "common",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    // ascending
    Price,
    // descending, unrated hotels last
    Rating,
}

impl SortKey {
    // Unknown keys mean "keep insertion order"
    pub fn parse(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "price" => Some(SortKey::Price),
            "rating" => Some(SortKey::Rating),
            _ => None,
        }
    }

    fn compare(self, a: &HotelRecord, b: &HotelRecord) -> Ordering {
        match self {
            SortKey::Price => a.price().total_cmp(&b.price()),
            SortKey::Rating => match (a.rating(), b.rating()) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub sort_by: Option<String>,
    pub room_type: Option<String>,
    pub amenities: Option<Vec<String>>,
    // Echoed on the result for display, prices are never converted
    pub currency: Option<String>,
}

impl SearchOptions {
    fn overrides(&self) -> FilterOverrides {
        FilterOverrides {
            room_type: self.room_type.clone(),
            amenities: self.amenities.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedHotels {
    pub hotels: Vec<HotelRecord>,
    pub origin: ResultOrigin,
}

#[async_trait]
pub trait HotelFetcher: Send + Sync {
    fn mode(&self) -> FetchMode;

    async fn fetch(
        &self,
        requests: &[SearchRequest],
        party: &PartyComposition,
    ) -> Result<FetchedHotels, SearchError>;
}

#[derive(Deserialize)]
struct LocalCatalog {
    hotels: Vec<HotelRecord>,
}

// Fixed catalog for demos, tests and offline fallback
pub struct LocalFetcher {
    catalog: Vec<HotelRecord>,
}

impl LocalFetcher {
    pub fn new(catalog: Vec<HotelRecord>) -> Self {
        Self { catalog }
    }

    pub fn from_embedded() -> Result<Self, SearchError> {
        let catalog: LocalCatalog = serde_json::from_str(LOCAL_CATALOG_JSON)
            .map_err(|e| SearchError::Catalog(e.to_string()))?;
        Ok(Self::new(catalog.hotels))
    }

    pub fn catalog(&self) -> &[HotelRecord] {
        &self.catalog
    }
}

#[async_trait]
impl HotelFetcher for LocalFetcher {
    fn mode(&self) -> FetchMode {
        FetchMode::Local
    }

    async fn fetch(
        &self,
        _requests: &[SearchRequest],
        _party: &PartyComposition,
    ) -> Result<FetchedHotels, SearchError> {
        Ok(FetchedHotels {
            hotels: self.catalog.clone(),
            origin: ResultOrigin::Local,
        })
    }
}

// Loads the results page for the first request and extracts hotels from it
pub struct LiveFetcher {
    browser: Arc<dyn BrowserSource>,
    extractor: Arc<HotelExtractor>,
    config: FetchConfig,
}

impl LiveFetcher {
    pub fn new(
        browser: Arc<dyn BrowserSource>,
        extractor: Arc<HotelExtractor>,
        config: FetchConfig,
    ) -> Self {
        Self {
            browser,
            extractor,
            config,
        }
    }

    fn extract(&self, html: &str, url: Url) -> Vec<HotelRecord> {
        let document = RenderedDocument::parse(html, Some(url));
        self.extractor.extract(&document, self.config.max_candidates)
    }

    async fn dump_page(&self, html: &str) {
        if let Some(path) = &self.config.debug_dump_path {
            match tokio::fs::write(path, html).await {
                Ok(()) => debug!(path = %path.display(), "Saved rendered page"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to save rendered page"),
            }
        }
    }
}

#[async_trait]
impl HotelFetcher for LiveFetcher {
    fn mode(&self) -> FetchMode {
        FetchMode::Live
    }

    async fn fetch(
        &self,
        requests: &[SearchRequest],
        party: &PartyComposition,
    ) -> Result<FetchedHotels, SearchError> {
        let Some(request) = requests.first() else {
            return Ok(FetchedHotels {
                hotels: Vec::new(),
                origin: ResultOrigin::Live,
            });
        };
        if requests.len() > 1 {
            warn!(
                ignored = requests.len() - 1,
                "Live mode fetches only the first search request"
            );
        }

        let url = build_search_url(&self.config.base_url, request, party)?;
        let page = acquire_document(
            self.browser.as_ref(),
            &url,
            &self.extractor.profile().readiness,
            &self.config.wait_budget(),
        )
        .await?;
        self.dump_page(&page.html).await;

        let hotels = self.extract(&page.html, page.url);
        info!(location = request.location(), hotels = hotels.len(), "Live fetch finished");

        Ok(FetchedHotels {
            hotels,
            origin: ResultOrigin::Live,
        })
    }
}

pub struct CommonFetcher {
    live: Arc<LiveFetcher>,
    local: Arc<LocalFetcher>,
}

impl CommonFetcher {
    pub fn new(live: Arc<LiveFetcher>, local: Arc<LocalFetcher>) -> Self {
        Self { live, local }
    }
}

#[async_trait]
impl HotelFetcher for CommonFetcher {
    fn mode(&self) -> FetchMode {
        FetchMode::Common
    }

    async fn fetch(
        &self,
        requests: &[SearchRequest],
        party: &PartyComposition,
    ) -> Result<FetchedHotels, SearchError> {
        match self.live.fetch(requests, party).await {
            Err(SearchError::SourceUnavailable(reason)) => {
                warn!(reason = %reason, "Live source unavailable, serving local catalog");
                let fetched = self.local.fetch(requests, party).await?;
                Ok(FetchedHotels {
                    hotels: fetched.hotels,
                    origin: ResultOrigin::LocalFallback,
                })
            }
            other => other,
        }
    }
}

pub struct HotelSearch {
    local: Arc<LocalFetcher>,
    live: Arc<LiveFetcher>,
    common: CommonFetcher,
}

impl HotelSearch {
    // Live pages are fetched over plain HTTP
    pub fn new(config: FetchConfig) -> Result<Self, SearchError> {
        let browser = HttpBrowser::new(&config.user_agent, config.page_timeout)?;
        Self::with_browser(config, Arc::new(browser))
    }

    pub fn with_browser(
        config: FetchConfig,
        browser: Arc<dyn BrowserSource>,
    ) -> Result<Self, SearchError> {
        Self::with_parts(config, browser, HotelExtractor::default())
    }

    pub fn with_parts(
        config: FetchConfig,
        browser: Arc<dyn BrowserSource>,
        extractor: HotelExtractor,
    ) -> Result<Self, SearchError> {
        let local = Arc::new(LocalFetcher::from_embedded()?);
        let live = Arc::new(LiveFetcher::new(browser, Arc::new(extractor), config));
        let common = CommonFetcher::new(Arc::clone(&live), Arc::clone(&local));

        Ok(Self {
            local,
            live,
            common,
        })
    }

    // Replaces the catalog served by local mode and the common-mode fallback
    pub fn with_catalog(mut self, catalog: Vec<HotelRecord>) -> Self {
        self.local = Arc::new(LocalFetcher::new(catalog));
        self.common = CommonFetcher::new(Arc::clone(&self.live), Arc::clone(&self.local));
        self
    }

    fn fetcher(&self, mode: FetchMode) -> &dyn HotelFetcher {
        match mode {
            FetchMode::Local => &*self.local,
            FetchMode::Live => &*self.live,
            FetchMode::Common => &self.common,
        }
    }

    pub async fn get_hotels(
        &self,
        requests: &[SearchRequest],
        party: &PartyComposition,
        mode: FetchMode,
        options: &SearchOptions,
    ) -> Result<HotelSearchResult, SearchError> {
        if options.limit == Some(0) {
            return Err(ValidationError::new("limit", "must be a positive number").into());
        }

        let sort_key = match options.sort_by.as_deref() {
            Some(key) => {
                let parsed = SortKey::parse(key);
                if parsed.is_none() {
                    debug!(sort_by = key, "Unrecognized sort key, keeping insertion order");
                }
                parsed
            }
            None => None,
        };

        if requests.is_empty() {
            debug!(mode = %mode, "No search requests, returning an empty result");
            return Ok(HotelSearchResult::empty(mode.empty_origin())
                .with_currency(options.currency.clone()));
        }

        let filter = create_filter(requests, party, &options.overrides());
        debug!(mode = %mode, filter = %filter, "Searching hotels");

        let fetcher = self.fetcher(mode);
        let FetchedHotels { mut hotels, origin } = fetcher.fetch(requests, party).await?;

        // the local catalog is served cheapest-first when it gets truncated
        // without an explicit sort key
        let sort_key = match (options.sort_by.is_some(), origin) {
            (false, ResultOrigin::Local | ResultOrigin::LocalFallback) if options.limit.is_some() => {
                Some(SortKey::Price)
            }
            _ => sort_key,
        };
        if let Some(key) = sort_key {
            hotels.sort_by(|a, b| key.compare(a, b));
        }
        if let Some(limit) = options.limit {
            hotels.truncate(limit);
        }

        let result = HotelSearchResult::new(hotels, origin)
            .with_currency(options.currency.clone())
            .with_filter(Some(filter));
        info!(
            mode = %fetcher.mode(),
            origin = ?result.origin(),
            hotels = result.len(),
            lowest_price = ?result.lowest_price(),
            "Hotel search finished"
        );
        Ok(result)
    }
}

// One-shot search with the default configuration
pub async fn get_hotels(
    requests: &[SearchRequest],
    party: &PartyComposition,
    mode: FetchMode,
    options: &SearchOptions,
) -> Result<HotelSearchResult, SearchError> {
    HotelSearch::new(FetchConfig::default())?
        .get_hotels(requests, party, mode, options)
        .await
}
