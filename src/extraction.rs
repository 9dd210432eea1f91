// Turns a rendered search results page into normalized hotel records
//
// Each field is resolved by an ordered cascade of strategies; the first strategy
// that yields a value wins. A candidate without a name or a price is skipped,
// nothing on this path returns an error.

use crate::models::HotelRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, trace};

pub const DEFAULT_MAX_CANDIDATES: usize = 10;

static OUT_OF_FIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]+(?:\.[0-9]+)?) out of 5")
        .expect("BUG: hardcoded rating pattern is invalid")
});

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

pub fn parse_selector(css: &str) -> Result<Selector, ProfileError> {
    Selector::parse(css).map_err(|e| ProfileError::InvalidSelector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

fn builtin_selector(css: &str) -> Selector {
    Selector::parse(css).expect("BUG: hardcoded CSS selector is invalid")
}

// A parsed page plus the URL it was loaded from, used to resolve relative links
pub struct RenderedDocument {
    html: Html,
    url: Option<Url>,
}

impl RenderedDocument {
    pub fn parse(html: &str, url: Option<Url>) -> Self {
        Self {
            html: Html::parse_document(html),
            url,
        }
    }

    pub fn select<'a, 'b>(&'a self, selector: &'b Selector) -> scraper::html::Select<'a, 'b> {
        self.html.select(selector)
    }

    pub fn contains(&self, selector: &Selector) -> bool {
        self.html.select(selector).next().is_some()
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }
}

// One hotel entry on the page. Some layouts keep the price in a sibling card
// that lines up with the listing card by position.
pub struct Candidate<'a> {
    pub index: usize,
    pub card: ElementRef<'a>,
    pub price_card: Option<ElementRef<'a>>,
    pub page_url: Option<&'a Url>,
}

impl<'a> Candidate<'a> {
    pub fn price_scope(&self) -> ElementRef<'a> {
        self.price_card.unwrap_or(self.card)
    }
}

pub trait FieldStrategy<T>: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, candidate: &Candidate<'_>) -> Option<T>;
}

pub struct FieldCascade<T> {
    field: &'static str,
    strategies: Vec<Box<dyn FieldStrategy<T>>>,
}

impl<T> FieldCascade<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    pub fn with(mut self, strategy: impl FieldStrategy<T> + 'static) -> Self {
        self.push(strategy);
        self
    }

    pub fn push(&mut self, strategy: impl FieldStrategy<T> + 'static) {
        self.strategies.push(Box::new(strategy));
    }

    pub fn clear(&mut self) {
        self.strategies.clear();
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn resolve(&self, candidate: &Candidate<'_>) -> Option<T> {
        for strategy in &self.strategies {
            match strategy.extract(candidate) {
                Some(value) => {
                    trace!(
                        field = self.field,
                        strategy = strategy.name(),
                        candidate = candidate.index,
                        "strategy matched"
                    );
                    return Some(value);
                }
                None => trace!(
                    field = self.field,
                    strategy = strategy.name(),
                    candidate = candidate.index,
                    "strategy found nothing"
                ),
            }
        }
        None
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

// Trimmed text of the first matching element
pub struct FirstText {
    name: String,
    selector: Selector,
}

impl FirstText {
    pub fn new(name: impl Into<String>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            selector,
        }
    }
}

impl FieldStrategy<String> for FirstText {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, candidate: &Candidate<'_>) -> Option<String> {
        let text = element_text(candidate.card.select(&self.selector).next()?);
        (!text.is_empty()).then_some(text)
    }
}

// Text of the first matching element read as a number
pub struct NumericText {
    name: String,
    selector: Selector,
}

impl NumericText {
    pub fn new(name: impl Into<String>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            selector,
        }
    }
}

impl FieldStrategy<f64> for NumericText {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, candidate: &Candidate<'_>) -> Option<f64> {
        let text = element_text(candidate.card.select(&self.selector).next()?);
        text.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

// First capture group of `pattern` applied to an attribute of the first match
pub struct AttributePattern {
    name: String,
    selector: Selector,
    attribute: String,
    pattern: Regex,
}

impl AttributePattern {
    pub fn new(
        name: impl Into<String>,
        selector: Selector,
        attribute: impl Into<String>,
        pattern: Regex,
    ) -> Self {
        Self {
            name: name.into(),
            selector,
            attribute: attribute.into(),
            pattern,
        }
    }
}

impl FieldStrategy<f64> for AttributePattern {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, candidate: &Candidate<'_>) -> Option<f64> {
        let element = candidate.card.select(&self.selector).next()?;
        let value = element.value().attr(&self.attribute)?;
        let captures = self.pattern.captures(value)?;
        captures.get(1)?.as_str().parse::<f64>().ok()
    }
}

// Text of every matching element; finding none counts as no match
pub struct AllTexts {
    name: String,
    selector: Selector,
}

impl AllTexts {
    pub fn new(name: impl Into<String>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            selector,
        }
    }
}

impl FieldStrategy<Vec<String>> for AllTexts {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, candidate: &Candidate<'_>) -> Option<Vec<String>> {
        let texts: Vec<String> = candidate
            .card
            .select(&self.selector)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect();
        (!texts.is_empty()).then_some(texts)
    }
}

// Looks inside a price container for the first node mentioning a currency marker
// and reads the amount that follows it
pub struct MarkedPrice {
    name: String,
    container: Selector,
    nodes: Selector,
    markers: Vec<char>,
}

impl MarkedPrice {
    pub fn new(
        name: impl Into<String>,
        container: Selector,
        nodes: Selector,
        markers: Vec<char>,
    ) -> Self {
        Self {
            name: name.into(),
            container,
            nodes,
            markers,
        }
    }
}

impl FieldStrategy<f64> for MarkedPrice {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, candidate: &Candidate<'_>) -> Option<f64> {
        let container = candidate.price_scope().select(&self.container).next()?;
        let text = container
            .select(&self.nodes)
            .map(element_text)
            .find(|t| t.contains(self.markers.as_slice()))?;
        parse_marked_price(&text, &self.markers)
    }
}

// "$1,234.50 per night" -> 1234.5
pub fn parse_marked_price(text: &str, markers: &[char]) -> Option<f64> {
    let start = text.find(markers)?;
    let after = text[start..]
        .trim_start_matches(markers)
        .trim_start();
    let amount: String = after
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    let amount = amount.trim_end_matches('.');
    amount.parse::<f64>().ok().filter(|v| v.is_finite())
}

// href of the first matching link, made absolute against the page URL
pub struct LinkHref {
    name: String,
    selector: Selector,
}

impl LinkHref {
    pub fn new(name: impl Into<String>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            selector,
        }
    }
}

impl FieldStrategy<String> for LinkHref {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, candidate: &Candidate<'_>) -> Option<String> {
        let href = candidate
            .card
            .select(&self.selector)
            .find_map(|a| a.value().attr("href"))?
            .trim();
        if href.is_empty() {
            return None;
        }

        match Url::parse(href) {
            Ok(url) => Some(url.to_string()),
            Err(_) => candidate
                .page_url
                .and_then(|base| base.join(href).ok())
                .map(|url| url.to_string()),
        }
    }
}

// Selectors a page must show before it is worth extracting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessTiers {
    pub primary: String,
    pub fallback: String,
}

pub struct ExtractionProfile {
    pub card: Selector,
    pub price_card: Option<Selector>,
    pub readiness: ReadinessTiers,
    pub name: FieldCascade<String>,
    pub rating: FieldCascade<f64>,
    pub amenities: FieldCascade<Vec<String>>,
    pub price: FieldCascade<f64>,
    pub url: FieldCascade<String>,
}

impl ExtractionProfile {
    // Layout of the Google Hotels result list
    pub fn google_hotels() -> Self {
        Self {
            card: builtin_selector("div.uaTTDe"),
            price_card: Some(builtin_selector("div.x2A2jf")),
            readiness: ReadinessTiers {
                primary: "div.x2A2jf".to_string(),
                fallback: "div.GIPbOc.sSHqwe".to_string(),
            },
            name: FieldCascade::new("name")
                .with(FirstText::new("h2.BgYkof", builtin_selector("h2.BgYkof"))),
            rating: FieldCascade::new("rating")
                .with(NumericText::new(
                    "span.KFi5wf.lA0BZ",
                    builtin_selector("span.KFi5wf.lA0BZ"),
                ))
                .with(AttributePattern::new(
                    "aria-label out of 5",
                    builtin_selector(r#"span[aria-label*="out of 5"]"#),
                    "aria-label",
                    Regex::clone(&OUT_OF_FIVE),
                )),
            amenities: FieldCascade::new("amenities")
                .with(AllTexts::new("span.LtjZ2d", builtin_selector("span.LtjZ2d")))
                .with(AllTexts::new(
                    "span[class*=QYEgn]",
                    builtin_selector(r#"span[class*="QYEgn"]"#),
                )),
            price: FieldCascade::new("price").with(MarkedPrice::new(
                "div.GIPbOc.sSHqwe",
                builtin_selector("div.GIPbOc.sSHqwe"),
                builtin_selector("div"),
                vec!['$', '€', '£', '¥'],
            )),
            url: FieldCascade::new("url").with(LinkHref::new("a[href]", builtin_selector("a[href]"))),
        }
    }
}

impl Default for ExtractionProfile {
    fn default() -> Self {
        Self::google_hotels()
    }
}

pub struct HotelExtractor {
    profile: ExtractionProfile,
}

impl Default for HotelExtractor {
    fn default() -> Self {
        Self::new(ExtractionProfile::default())
    }
}

impl HotelExtractor {
    pub fn new(profile: ExtractionProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &ExtractionProfile {
        &self.profile
    }

    pub fn extract(&self, document: &RenderedDocument, max_candidates: usize) -> Vec<HotelRecord> {
        let cards: Vec<ElementRef<'_>> = document.select(&self.profile.card).collect();
        let price_cards: Option<Vec<ElementRef<'_>>> = self
            .profile
            .price_card
            .as_ref()
            .map(|selector| document.select(selector).collect());

        let available = match &price_cards {
            Some(price_cards) => cards.len().min(price_cards.len()),
            None => cards.len(),
        };
        let count = available.min(max_candidates);
        debug!(
            cards = cards.len(),
            price_cards = ?price_cards.as_ref().map(Vec::len),
            max_candidates,
            count,
            "Extracting hotel candidates"
        );

        let mut hotels = Vec::with_capacity(count);
        for index in 0..count {
            let candidate = Candidate {
                index,
                card: cards[index],
                price_card: price_cards.as_ref().map(|p| p[index]),
                page_url: document.url(),
            };
            if let Some(hotel) = self.extract_candidate(&candidate) {
                hotels.push(hotel);
            }
        }

        debug!(extracted = hotels.len(), "Extraction finished");
        hotels
    }

    fn extract_candidate(&self, candidate: &Candidate<'_>) -> Option<HotelRecord> {
        let Some(name) = self.profile.name.resolve(candidate) else {
            debug!(candidate = candidate.index, reason = "missing name", "Skipping candidate");
            return None;
        };
        let rating = self.profile.rating.resolve(candidate);
        let amenities = self.profile.amenities.resolve(candidate).unwrap_or_default();
        let Some(price) = self.profile.price.resolve(candidate) else {
            debug!(candidate = candidate.index, name = %name, reason = "missing price", "Skipping candidate");
            return None;
        };
        let url = self.profile.url.resolve(candidate);

        match HotelRecord::new(&name, price) {
            Ok(record) => Some(
                record
                    .with_rating(rating)
                    .with_amenities(amenities)
                    .with_url(url),
            ),
            Err(e) => {
                debug!(candidate = candidate.index, reason = %e, "Skipping candidate");
                None
            }
        }
    }
}

// Convenience wrapper using the default profile
pub fn extract(document: &RenderedDocument, max_candidates: usize) -> Vec<HotelRecord> {
    HotelExtractor::default().extract(document, max_candidates)
}
