// Search request, guest party and normalized hotel result types
// Every constructor validates; once built the values are never mutated in place.

use crate::aggregate::{aggregate, PriceSummary};
use crate::filter::EncodedFilter;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

// One stay/location query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSearchRequest")]
pub struct SearchRequest {
    check_in: NaiveDate,
    check_out: NaiveDate,
    location: String,
    room_type: Option<String>,
    amenities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSearchRequest {
    check_in: NaiveDate,
    check_out: NaiveDate,
    location: String,
    #[serde(default)]
    room_type: Option<String>,
    #[serde(default)]
    amenities: Vec<String>,
}

impl TryFrom<RawSearchRequest> for SearchRequest {
    type Error = ValidationError;

    fn try_from(raw: RawSearchRequest) -> Result<Self, Self::Error> {
        let request = SearchRequest::new(raw.check_in, raw.check_out, &raw.location)?
            .with_amenities(raw.amenities);
        Ok(match raw.room_type {
            Some(room_type) => request.with_room_type(room_type),
            None => request,
        })
    }
}

impl SearchRequest {
    pub fn new(
        check_in: NaiveDate,
        check_out: NaiveDate,
        location: &str,
    ) -> Result<Self, ValidationError> {
        if check_out <= check_in {
            return Err(ValidationError::new(
                "check_out",
                format!("{} is not after check-in {}", check_out, check_in),
            ));
        }

        let location = location.trim();
        if location.is_empty() {
            return Err(ValidationError::new("location", "must not be empty"));
        }

        Ok(Self {
            check_in,
            check_out,
            location: location.to_string(),
            room_type: None,
            amenities: Vec::new(),
        })
    }

    // Same as `new` but takes YYYY-MM-DD strings
    pub fn parse(check_in: &str, check_out: &str, location: &str) -> Result<Self, ValidationError> {
        let check_in = parse_date("check_in", check_in)?;
        let check_out = parse_date("check_out", check_out)?;
        Self::new(check_in, check_out, location)
    }

    pub fn with_room_type(mut self, room_type: impl Into<String>) -> Self {
        let room_type = room_type.into();
        let room_type = room_type.trim();
        self.room_type = (!room_type.is_empty()).then(|| room_type.to_string());
        self
    }

    // Amenities keep their first-seen order, duplicates and blanks are dropped
    pub fn with_amenities<I, S>(mut self, amenities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.amenities = normalize_tags(amenities);
        self
    }

    pub fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    pub fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn room_type(&self) -> Option<&str> {
        self.room_type.as_deref()
    }

    pub fn amenities(&self) -> &[String] {
        &self.amenities
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| ValidationError::new(field, format!("'{}' is not a YYYY-MM-DD date: {}", value, e)))
}

pub(crate) fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.into();
        let tag = tag.trim();
        if !tag.is_empty() && !normalized.iter().any(|t| t == tag) {
            normalized.push(tag.to_string());
        }
    }
    normalized
}

// Guest counts for a search. Infant categories are carried for parity with
// flight searches; hotel URLs only use adults and children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPartyComposition")]
pub struct PartyComposition {
    adults: u32,
    children: u32,
    infants_in_seat: u32,
    infants_on_lap: u32,
}

#[derive(Debug, Deserialize)]
struct RawPartyComposition {
    adults: u32,
    #[serde(default)]
    children: u32,
    #[serde(default)]
    infants_in_seat: u32,
    #[serde(default)]
    infants_on_lap: u32,
}

impl TryFrom<RawPartyComposition> for PartyComposition {
    type Error = ValidationError;

    fn try_from(raw: RawPartyComposition) -> Result<Self, Self::Error> {
        Ok(PartyComposition::new(raw.adults, raw.children)?
            .with_infants(raw.infants_in_seat, raw.infants_on_lap))
    }
}

impl PartyComposition {
    pub fn new(adults: u32, children: u32) -> Result<Self, ValidationError> {
        if adults < 1 {
            return Err(ValidationError::new("adults", "at least one adult is required"));
        }
        Ok(Self {
            adults,
            children,
            infants_in_seat: 0,
            infants_on_lap: 0,
        })
    }

    pub fn with_infants(mut self, in_seat: u32, on_lap: u32) -> Self {
        self.infants_in_seat = in_seat;
        self.infants_on_lap = on_lap;
        self
    }

    pub fn adults(&self) -> u32 {
        self.adults
    }

    pub fn children(&self) -> u32 {
        self.children
    }

    pub fn infants_in_seat(&self) -> u32 {
        self.infants_in_seat
    }

    pub fn infants_on_lap(&self) -> u32 {
        self.infants_on_lap
    }

    pub fn total(&self) -> u32 {
        self.adults
            .saturating_add(self.children)
            .saturating_add(self.infants_in_seat)
            .saturating_add(self.infants_on_lap)
    }
}

// One normalized hotel. Price is a plain number, currency is applied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHotelRecord")]
pub struct HotelRecord {
    name: String,
    price: f64,
    rating: Option<f64>,
    address: Option<String>,
    url: Option<String>,
    amenities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawHotelRecord {
    name: String,
    price: f64,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    amenities: Vec<String>,
}

impl TryFrom<RawHotelRecord> for HotelRecord {
    type Error = ValidationError;

    fn try_from(raw: RawHotelRecord) -> Result<Self, Self::Error> {
        let mut record = HotelRecord::new(&raw.name, raw.price)?.with_amenities(raw.amenities);
        record.rating = raw.rating;
        record.address = raw.address;
        record.url = raw.url;
        Ok(record)
    }
}

impl HotelRecord {
    pub fn new(name: &str, price: f64) -> Result<Self, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::new("name", "must not be empty"));
        }
        if !price.is_finite() || price < 0.0 {
            return Err(ValidationError::new(
                "price",
                format!("{} is not a non-negative amount", price),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            price,
            rating: None,
            address: None,
            url: None,
            amenities: Vec::new(),
        })
    }

    pub fn with_rating(mut self, rating: Option<f64>) -> Self {
        self.rating = rating.filter(|r| r.is_finite());
        self
    }

    pub fn with_address(mut self, address: Option<String>) -> Self {
        self.address = address;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn with_amenities<I, S>(mut self, amenities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.amenities = normalize_tags(amenities);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn rating(&self) -> Option<f64> {
        self.rating
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn amenities(&self) -> &[String] {
        &self.amenities
    }
}

// Where the hotel list of a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    Local,
    Live,
    // Common mode could not reach the live source and served the local catalog
    LocalFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawHotelSearchResult")]
pub struct HotelSearchResult {
    hotels: Vec<HotelRecord>,
    lowest_price: Option<f64>,
    current_price: Option<f64>,
    origin: ResultOrigin,
    currency: Option<String>,
    filter: Option<EncodedFilter>,
}

// Serialized price fields are ignored, they are always derived from the hotels
#[derive(Debug, Deserialize)]
struct RawHotelSearchResult {
    #[serde(default)]
    hotels: Vec<HotelRecord>,
    origin: ResultOrigin,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    filter: Option<EncodedFilter>,
}

impl From<RawHotelSearchResult> for HotelSearchResult {
    fn from(raw: RawHotelSearchResult) -> Self {
        HotelSearchResult::new(raw.hotels, raw.origin)
            .with_currency(raw.currency)
            .with_filter(raw.filter)
    }
}

impl HotelSearchResult {
    pub fn new(hotels: Vec<HotelRecord>, origin: ResultOrigin) -> Self {
        let PriceSummary {
            lowest_price,
            current_price,
        } = aggregate(&hotels);

        Self {
            hotels,
            lowest_price,
            current_price,
            origin,
            currency: None,
            filter: None,
        }
    }

    pub fn empty(origin: ResultOrigin) -> Self {
        Self::new(Vec::new(), origin)
    }

    pub fn with_currency(mut self, currency: Option<String>) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_filter(mut self, filter: Option<EncodedFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn hotels(&self) -> &[HotelRecord] {
        &self.hotels
    }

    pub fn into_hotels(self) -> Vec<HotelRecord> {
        self.hotels
    }

    pub fn is_empty(&self) -> bool {
        self.hotels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hotels.len()
    }

    pub fn lowest_price(&self) -> Option<f64> {
        self.lowest_price
    }

    pub fn current_price(&self) -> Option<f64> {
        self.current_price
    }

    pub fn origin(&self) -> ResultOrigin {
        self.origin
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == ResultOrigin::LocalFallback
    }

    pub fn currency(&self) -> Option<&str> {
        self.currency.as_deref()
    }

    pub fn filter(&self) -> Option<&EncodedFilter> {
        self.filter.as_ref()
    }
}
