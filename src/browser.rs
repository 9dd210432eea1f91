// Document acquisition for live searches
//
// A BrowserSource hands out sessions that can load a page, wait for markup to show
// up and return the rendered HTML. `acquire_document` drives one session through
// navigation, settle delay and the readiness selector tiers, and always closes it.

use crate::extraction::{parse_selector, ReadinessTiers, RenderedDocument};
use crate::models::{PartyComposition, SearchRequest, ValidationError, DATE_FORMAT};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out waiting for {stage} after {after_ms}ms")]
    Timeout { stage: &'static str, after_ms: u64 },

    #[error("Neither '{primary}' nor '{fallback}' appeared on the page")]
    SelectorsNotFound { primary: String, fallback: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait BrowserSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, SourceError>;
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &Url) -> Result<(), SourceError>;

    // Ok(false) when the selector did not show up within `timeout`
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, SourceError>;

    async fn content(&mut self) -> Result<String, SourceError>;

    // Where the session ended up after redirects
    fn current_url(&self) -> Option<Url>;

    async fn close(&mut self) -> Result<(), SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    pub page_timeout: Duration,
    pub settle_delay: Duration,
    pub selector_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AcquiredPage {
    pub url: Url,
    pub html: String,
}

// `{base_url}/{location}?checkin=..&checkout=..&adults=..&children=..`
pub fn build_search_url(
    base_url: &str,
    request: &SearchRequest,
    party: &PartyComposition,
) -> Result<Url, ValidationError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ValidationError::new("base_url", format!("'{}': {}", base_url, e)))?;

    url.path_segments_mut()
        .map_err(|_| ValidationError::new("base_url", format!("'{}' cannot take a path", base_url)))?
        .pop_if_empty()
        .push(request.location());

    url.query_pairs_mut()
        .append_pair("checkin", &request.check_in().format(DATE_FORMAT).to_string())
        .append_pair("checkout", &request.check_out().format(DATE_FORMAT).to_string())
        .append_pair("adults", &party.adults().to_string())
        .append_pair("children", &party.children().to_string());

    Ok(url)
}

// Owns an open session until it is closed. A guard dropped before `close`
// (cancelled future, panic in the session) hands the session to a background
// task that closes it.
struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
}

impl SessionGuard {
    fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn session(&mut self) -> Result<&mut dyn BrowserSession, SourceError> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(SourceError::Browser("session already closed".to_string())),
        }
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            close_session(session).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    debug!("Browser session dropped mid-search, closing in background");
                    handle.spawn(close_session(session));
                }
                Err(_) => warn!("Browser session dropped outside a runtime, left open"),
            }
        }
    }
}

async fn close_session(mut session: Box<dyn BrowserSession>) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close browser session");
    }
}

pub async fn acquire_document(
    source: &dyn BrowserSource,
    url: &Url,
    readiness: &ReadinessTiers,
    budget: &WaitBudget,
) -> Result<AcquiredPage, SourceError> {
    let mut guard = SessionGuard::new(source.open().await?);
    let outcome = match guard.session() {
        Ok(session) => load_page(session, url, readiness, budget).await,
        Err(e) => Err(e),
    };

    guard.close().await;
    outcome
}

async fn load_page(
    session: &mut dyn BrowserSession,
    url: &Url,
    readiness: &ReadinessTiers,
    budget: &WaitBudget,
) -> Result<AcquiredPage, SourceError> {
    info!(%url, "Navigating to search page");
    with_timeout("page load", budget.page_timeout, session.navigate(url)).await?;
    let landed = session.current_url().unwrap_or_else(|| url.clone());
    debug!(%landed, "Page loaded");

    tokio::time::sleep(budget.settle_delay).await;

    if !wait_tier(session, &readiness.primary, budget.selector_timeout).await? {
        warn!(
            selector = %readiness.primary,
            fallback = %readiness.fallback,
            "Primary selector timed out, trying fallback"
        );
        if !wait_tier(session, &readiness.fallback, budget.selector_timeout).await? {
            warn!(selector = %readiness.fallback, "Fallback selector timed out");
            return Err(SourceError::SelectorsNotFound {
                primary: readiness.primary.clone(),
                fallback: readiness.fallback.clone(),
            });
        }
    }

    let html = with_timeout("page content", budget.page_timeout, session.content()).await?;
    Ok(AcquiredPage { url: landed, html })
}

async fn wait_tier(
    session: &mut dyn BrowserSession,
    selector: &str,
    limit: Duration,
) -> Result<bool, SourceError> {
    match tokio::time::timeout(limit, session.wait_for_selector(selector, limit)).await {
        Ok(found) => found,
        Err(_) => Ok(false),
    }
}

async fn with_timeout<T>(
    stage: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, SourceError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout {
            stage,
            after_ms: limit.as_millis() as u64,
        }),
    }
}

// Plain HTTP fetcher. Pages are not scripted, so the readiness check is answered
// from the document as delivered.
pub struct HttpBrowser {
    client: Client,
}

impl HttpBrowser {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BrowserSource for HttpBrowser {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, SourceError> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            page: None,
        }))
    }
}

struct HttpSession {
    client: Client,
    page: Option<AcquiredPage>,
}

impl HttpSession {
    fn loaded(&self) -> Result<&AcquiredPage, SourceError> {
        self.page
            .as_ref()
            .ok_or_else(|| SourceError::Browser("no page loaded".to_string()))
    }
}

fn page_contains(html: &str, selector: &str) -> Result<bool, SourceError> {
    let selector = parse_selector(selector).map_err(|e| SourceError::Browser(e.to_string()))?;
    Ok(RenderedDocument::parse(html, None).contains(&selector))
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn navigate(&mut self, url: &Url) -> Result<(), SourceError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Navigation {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let final_url = response.url().clone();
        let html = response.text().await?;
        self.page = Some(AcquiredPage {
            url: final_url,
            html,
        });
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<bool, SourceError> {
        page_contains(&self.loaded()?.html, selector)
    }

    async fn content(&mut self) -> Result<String, SourceError> {
        Ok(self.loaded()?.html.clone())
    }

    fn current_url(&self) -> Option<Url> {
        self.page.as_ref().map(|p| p.url.clone())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.page = None;
        Ok(())
    }
}

// Scripted browser for exercising live searches without a network
#[cfg(test)]
pub mod mock_browser {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    pub struct Script {
        pub html: String,
        pub ready_selectors: Vec<String>,
        pub navigation_error: Option<String>,
        pub navigation_delay: Duration,
        pub panic_on_content: bool,
    }

    #[derive(Default)]
    pub struct ScriptedBrowser {
        script: Script,
        pub opened: Arc<AtomicUsize>,
        pub closed: Arc<AtomicUsize>,
        pub visited: Arc<Mutex<Vec<String>>>,
        pub waited_for: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedBrowser {
        pub fn new(script: Script) -> Self {
            Self {
                script,
                ..Default::default()
            }
        }

        // Serves `html` with both Google Hotels readiness selectors present
        pub fn serving(html: &str) -> Self {
            Self::new(Script {
                html: html.to_string(),
                ready_selectors: vec!["div.x2A2jf".to_string(), "div.GIPbOc.sSHqwe".to_string()],
                ..Default::default()
            })
        }

        pub fn failing(reason: &str) -> Self {
            Self::new(Script {
                navigation_error: Some(reason.to_string()),
                ..Default::default()
            })
        }

        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BrowserSource for ScriptedBrowser {
        async fn open(&self) -> Result<Box<dyn BrowserSession>, SourceError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSession {
                script: self.script.clone(),
                closed: Arc::clone(&self.closed),
                visited: Arc::clone(&self.visited),
                waited_for: Arc::clone(&self.waited_for),
                current: None,
            }))
        }
    }

    struct ScriptedSession {
        script: Script,
        closed: Arc<AtomicUsize>,
        visited: Arc<Mutex<Vec<String>>>,
        waited_for: Arc<Mutex<Vec<String>>>,
        current: Option<Url>,
    }

    #[async_trait]
    impl BrowserSession for ScriptedSession {
        async fn navigate(&mut self, url: &Url) -> Result<(), SourceError> {
            self.visited.lock().await.push(url.to_string());
            if !self.script.navigation_delay.is_zero() {
                tokio::time::sleep(self.script.navigation_delay).await;
            }
            if let Some(reason) = &self.script.navigation_error {
                return Err(SourceError::Navigation {
                    url: url.to_string(),
                    reason: reason.clone(),
                });
            }
            self.current = Some(url.clone());
            Ok(())
        }

        async fn wait_for_selector(
            &mut self,
            selector: &str,
            timeout: Duration,
        ) -> Result<bool, SourceError> {
            self.waited_for.lock().await.push(selector.to_string());
            if self.script.ready_selectors.iter().any(|s| s == selector) {
                return Ok(true);
            }
            tokio::time::sleep(timeout).await;
            Ok(false)
        }

        async fn content(&mut self) -> Result<String, SourceError> {
            if self.script.panic_on_content {
                panic!("renderer crashed");
            }
            Ok(self.script.html.clone())
        }

        fn current_url(&self) -> Option<Url> {
            self.current.clone()
        }

        async fn close(&mut self) -> Result<(), SourceError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock_browser::{Script, ScriptedBrowser};
    use super::*;
    use std::sync::Arc;

    fn budget() -> WaitBudget {
        WaitBudget {
            page_timeout: Duration::from_millis(200),
            settle_delay: Duration::from_millis(1),
            selector_timeout: Duration::from_millis(20),
        }
    }

    fn tiers() -> ReadinessTiers {
        ReadinessTiers {
            primary: "div.x2A2jf".to_string(),
            fallback: "div.GIPbOc.sSHqwe".to_string(),
        }
    }

    fn target() -> Url {
        Url::parse("https://www.google.com/travel/hotels/Tokyo").unwrap()
    }

    #[test]
    fn test_build_search_url() {
        let request = SearchRequest::parse("2025-06-23", "2025-06-25", "New York").unwrap();
        let party = PartyComposition::new(2, 1).unwrap();
        let url = build_search_url("https://www.google.com/travel/hotels", &request, &party).unwrap();

        assert_eq!(
            url.as_str(),
            "https://www.google.com/travel/hotels/New%20York?checkin=2025-06-23&checkout=2025-06-25&adults=2&children=1"
        );
    }

    #[test]
    fn test_build_search_url_escapes_location() {
        let request = SearchRequest::parse("2025-06-23", "2025-06-25", "Paris/../?x=1").unwrap();
        let party = PartyComposition::new(1, 0).unwrap();
        let url = build_search_url("https://example.com/hotels/", &request, &party).unwrap();

        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.path_segments().unwrap().count(), 2);
        assert_eq!(url.query_pairs().count(), 4);
    }

    #[test]
    fn test_build_search_url_rejects_bad_base() {
        let request = SearchRequest::parse("2025-06-23", "2025-06-25", "Tokyo").unwrap();
        let party = PartyComposition::new(1, 0).unwrap();
        let err = build_search_url("not a url", &request, &party).unwrap_err();
        assert_eq!(err.field, "base_url");
    }

    #[tokio::test]
    async fn test_acquire_returns_content_and_closes_session() {
        let browser = ScriptedBrowser::serving("<div class=\"x2A2jf\"></div>");
        let page = acquire_document(&browser, &target(), &tiers(), &budget())
            .await
            .unwrap();

        assert_eq!(page.html, "<div class=\"x2A2jf\"></div>");
        assert_eq!(page.url, target());
        assert_eq!(browser.opened(), 1);
        assert_eq!(browser.closed(), 1);
        assert_eq!(*browser.waited_for.lock().await, vec!["div.x2A2jf".to_string()]);
    }

    #[tokio::test]
    async fn test_acquire_uses_fallback_tier() {
        let browser = ScriptedBrowser::new(Script {
            html: "<div class=\"GIPbOc sSHqwe\"></div>".to_string(),
            ready_selectors: vec!["div.GIPbOc.sSHqwe".to_string()],
            ..Default::default()
        });

        let page = acquire_document(&browser, &target(), &tiers(), &budget()).await;
        assert!(page.is_ok());
        assert_eq!(
            *browser.waited_for.lock().await,
            vec!["div.x2A2jf".to_string(), "div.GIPbOc.sSHqwe".to_string()]
        );
    }

    #[tokio::test]
    async fn test_acquire_fails_when_no_tier_appears() {
        let browser = ScriptedBrowser::new(Script {
            html: "<p>consent form</p>".to_string(),
            ..Default::default()
        });

        let err = acquire_document(&browser, &target(), &tiers(), &budget())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::SelectorsNotFound { .. }));
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn test_navigation_failure_still_closes_session() {
        let browser = ScriptedBrowser::failing("net::ERR_NAME_NOT_RESOLVED");
        let err = acquire_document(&browser, &target(), &tiers(), &budget())
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Navigation { .. }));
        assert_eq!(browser.opened(), 1);
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn test_slow_navigation_times_out() {
        let browser = ScriptedBrowser::new(Script {
            navigation_delay: Duration::from_secs(5),
            ..Default::default()
        });

        let err = acquire_document(&browser, &target(), &tiers(), &budget())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Timeout { stage: "page load", .. }));
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_acquisition_still_closes_session() {
        let browser = ScriptedBrowser::serving("<div class=\"x2A2jf\"></div>");
        let slow = WaitBudget {
            settle_delay: Duration::from_millis(500),
            ..budget()
        };

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            acquire_document(&browser, &target(), &tiers(), &slow),
        )
        .await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(browser.opened(), 1);
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn test_panicking_session_is_still_closed() {
        let browser = ScriptedBrowser::new(Script {
            ready_selectors: vec!["div.x2A2jf".to_string()],
            panic_on_content: true,
            ..Default::default()
        });
        let closed = Arc::clone(&browser.closed);

        let task = tokio::spawn(async move {
            acquire_document(&browser, &target(), &tiers(), &budget()).await
        });
        assert!(task.await.unwrap_err().is_panic());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http_session_requires_a_loaded_page() {
        let browser = HttpBrowser::new("fast_hotels-test", Duration::from_secs(1)).unwrap();
        let mut session = browser.open().await.unwrap();

        assert!(session.current_url().is_none());
        assert!(matches!(session.content().await, Err(SourceError::Browser(_))));
        assert!(session.close().await.is_ok());
    }

    #[test]
    fn test_page_contains() {
        let html = r#"<div class="GIPbOc sSHqwe">$10</div>"#;
        assert!(page_contains(html, "div.GIPbOc.sSHqwe").unwrap());
        assert!(!page_contains(html, "div.x2A2jf").unwrap());
        assert!(page_contains(html, "div[[").is_err());
    }
}
