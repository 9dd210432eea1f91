// Deterministic filter token for a hotel search
// The search is flattened into an ordered XML parameter list and base64 encoded,
// so the token is safe to log or pass along as a query parameter.

use crate::models::{normalize_tags, PartyComposition, SearchRequest, DATE_FORMAT};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::error;

const FILTER_VERSION: &str = "1";

#[derive(Error, Debug)]
pub enum FilterDecodeError {
    #[error("Token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Token is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("XML parse error: {0}")]
    XmlParseError(String),
}

// Room type and amenities that take precedence over the ones on each request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOverrides {
    pub room_type: Option<String>,
    pub amenities: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedFilter(String);

impl EncodedFilter {
    pub fn as_encoded_text(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Recover the ordered key/value pairs the token was built from
    pub fn decode(&self) -> Result<Vec<(String, String)>, FilterDecodeError> {
        let bytes = URL_SAFE_NO_PAD.decode(&self.0)?;
        let xml = String::from_utf8(bytes)?;
        let filter: XmlFilter = quick_xml::de::from_str(&xml)
            .map_err(|e| FilterDecodeError::XmlParseError(e.to_string()))?;

        Ok(filter
            .parameters
            .into_iter()
            .map(|p| (p.key, p.value))
            .collect())
    }
}

impl fmt::Display for EncodedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename = "Filter")]
struct XmlFilter {
    #[serde(rename = "Parameter")]
    parameters: Vec<XmlParameter>,
}

#[derive(Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
struct XmlParameter {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "@value")]
    value: String,
}

pub fn create_filter(
    requests: &[SearchRequest],
    party: &PartyComposition,
    overrides: &FilterOverrides,
) -> EncodedFilter {
    let filter = XmlFilter {
        parameters: canonical_params(requests, party, overrides)
            .into_iter()
            .map(|(key, value)| XmlParameter { key, value })
            .collect(),
    };

    // Only string attributes, so the serializer has no failing path here
    let xml = match quick_xml::se::to_string(&filter) {
        Ok(xml) => xml,
        Err(e) => {
            error!(error = %e, "Filter serialization failed");
            String::new()
        }
    };

    EncodedFilter(URL_SAFE_NO_PAD.encode(xml.as_bytes()))
}

// Single-request form of `create_filter`
pub fn encode(
    request: &SearchRequest,
    party: &PartyComposition,
    overrides: &FilterOverrides,
) -> EncodedFilter {
    create_filter(std::slice::from_ref(request), party, overrides)
}

fn canonical_params(
    requests: &[SearchRequest],
    party: &PartyComposition,
    overrides: &FilterOverrides,
) -> Vec<(String, String)> {
    let mut params = vec![("version".to_string(), FILTER_VERSION.to_string())];

    let override_amenities = overrides.amenities.clone().map(normalize_tags);

    for (i, request) in requests.iter().enumerate() {
        let prefix = format!("stay.{}", i);
        params.push((
            format!("{}.checkin", prefix),
            request.check_in().format(DATE_FORMAT).to_string(),
        ));
        params.push((
            format!("{}.checkout", prefix),
            request.check_out().format(DATE_FORMAT).to_string(),
        ));
        params.push((format!("{}.location", prefix), request.location().to_string()));

        let room_type = overrides.room_type.as_deref().or(request.room_type());
        if let Some(room_type) = room_type {
            params.push((format!("{}.room_type", prefix), room_type.to_string()));
        }

        let amenities = override_amenities
            .as_deref()
            .unwrap_or_else(|| request.amenities());
        for amenity in amenities {
            params.push((format!("{}.amenity", prefix), amenity.clone()));
        }
    }

    params.push(("guests.adults".to_string(), party.adults().to_string()));
    params.push(("guests.children".to_string(), party.children().to_string()));
    params.push((
        "guests.infants_in_seat".to_string(),
        party.infants_in_seat().to_string(),
    ));
    params.push((
        "guests.infants_on_lap".to_string(),
        party.infants_on_lap().to_string(),
    ));

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn tokyo() -> SearchRequest {
        SearchRequest::parse("2025-06-23", "2025-06-25", "Tokyo").unwrap()
    }

    fn family() -> PartyComposition {
        PartyComposition::new(2, 1).unwrap()
    }

    fn values<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let overrides = FilterOverrides {
            room_type: Some("Suite".to_string()),
            amenities: Some(vec!["pool".to_string(), "spa".to_string()]),
        };
        let first = encode(&tokyo(), &family(), &overrides);
        let second = encode(&tokyo(), &family(), &overrides);
        assert_eq!(first, second);
        assert_eq!(first.as_encoded_text(), second.as_encoded_text());
    }

    #[test]
    fn test_token_is_url_safe_text() {
        let request = SearchRequest::parse("2025-06-23", "2025-06-25", "São Paulo & <Centro>").unwrap();
        let token = encode(&request, &family(), &FilterOverrides::default());
        let text = std::str::from_utf8(token.as_encoded_text()).unwrap();
        assert!(text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test_case(SearchRequest::parse("2025-06-24", "2025-06-25", "Tokyo").unwrap(), family(), FilterOverrides::default(); "check-in")]
    #[test_case(SearchRequest::parse("2025-06-23", "2025-06-26", "Tokyo").unwrap(), family(), FilterOverrides::default(); "check-out")]
    #[test_case(SearchRequest::parse("2025-06-23", "2025-06-25", "Osaka").unwrap(), family(), FilterOverrides::default(); "location")]
    #[test_case(tokyo().with_room_type("Suite"), family(), FilterOverrides::default(); "room type")]
    #[test_case(tokyo().with_amenities(vec!["wifi"]), family(), FilterOverrides::default(); "amenities")]
    #[test_case(tokyo(), PartyComposition::new(3, 1).unwrap(), FilterOverrides::default(); "adults")]
    #[test_case(tokyo(), PartyComposition::new(2, 0).unwrap(), FilterOverrides::default(); "children")]
    #[test_case(tokyo(), family().with_infants(0, 1), FilterOverrides::default(); "infants")]
    #[test_case(tokyo(), family(), FilterOverrides { room_type: Some("Double".to_string()), amenities: None }; "room type override")]
    #[test_case(tokyo(), family(), FilterOverrides { room_type: None, amenities: Some(vec!["pool".to_string()]) }; "amenity override")]
    fn test_single_field_change_changes_token(
        request: SearchRequest,
        party: PartyComposition,
        overrides: FilterOverrides,
    ) {
        let baseline = encode(&tokyo(), &family(), &FilterOverrides::default());
        assert_ne!(encode(&request, &party, &overrides), baseline);
    }

    #[test]
    fn test_decode_shows_overrides_applied() {
        let request = tokyo()
            .with_room_type("Twin")
            .with_amenities(vec!["breakfast"]);
        let overrides = FilterOverrides {
            room_type: Some("Suite".to_string()),
            amenities: Some(vec!["pool".to_string(), "pool".to_string(), "spa".to_string()]),
        };

        let params = encode(&request, &family(), &overrides).decode().unwrap();

        assert_eq!(values(&params, "stay.0.checkin"), vec!["2025-06-23"]);
        assert_eq!(values(&params, "stay.0.location"), vec!["Tokyo"]);
        assert_eq!(values(&params, "stay.0.room_type"), vec!["Suite"]);
        assert_eq!(values(&params, "stay.0.amenity"), vec!["pool", "spa"]);
        assert_eq!(values(&params, "guests.adults"), vec!["2"]);
    }

    #[test]
    fn test_escaped_values_survive_decoding() {
        let request = SearchRequest::parse("2025-06-23", "2025-06-25", r#"Rock & "Roll" <Inn>"#).unwrap();
        let params = encode(&request, &family(), &FilterOverrides::default())
            .decode()
            .unwrap();
        assert!(params
            .iter()
            .any(|(k, v)| k == "stay.0.location" && v == r#"Rock & "Roll" <Inn>"#));
    }

    #[test]
    fn test_multiple_stays_are_indexed() {
        let requests = vec![
            tokyo(),
            SearchRequest::parse("2025-06-25", "2025-06-28", "Kyoto").unwrap(),
        ];
        let params = create_filter(&requests, &family(), &FilterOverrides::default())
            .decode()
            .unwrap();
        assert!(params.iter().any(|(k, v)| k == "stay.1.location" && v == "Kyoto"));
    }

    #[test]
    fn test_token_wraps_parameter_xml() {
        let token = encode(&tokyo(), &family(), &FilterOverrides::default());
        let xml = String::from_utf8(URL_SAFE_NO_PAD.decode(token.as_str()).unwrap()).unwrap();

        assert!(xml.starts_with("<Filter>"));
        assert!(xml.ends_with("</Filter>"));
        assert!(xml.contains(r#"<Parameter key="version" value="1""#));
        assert!(xml.contains(r#"<Parameter key="stay.0.location" value="Tokyo""#));
    }

    #[test]
    fn test_garbage_token_fails_to_decode() {
        let token = EncodedFilter("not*base64".to_string());
        assert!(matches!(token.decode(), Err(FilterDecodeError::Base64(_))));
    }
}
