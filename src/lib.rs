// Hotel price search: request model, filter tokens, page extraction and fetch modes

pub mod aggregate;
pub mod browser;
pub mod extraction;
pub mod fetch;
pub mod filter;
pub mod models;

// Re-export key types for convenience
pub use aggregate::{aggregate, PriceSummary};
pub use browser::{
    acquire_document, build_search_url, AcquiredPage, BrowserSession, BrowserSource,
    HttpBrowser, SourceError, WaitBudget,
};
pub use extraction::{
    extract, parse_selector, ExtractionProfile, FieldCascade, FieldStrategy, HotelExtractor,
    ProfileError, ReadinessTiers, RenderedDocument,
};
pub use fetch::{
    get_hotels, CommonFetcher, FetchConfig, FetchMode, FetchedHotels, HotelFetcher, HotelSearch,
    LiveFetcher, LocalFetcher, SearchError, SearchOptions, SortKey,
};
pub use filter::{create_filter, encode, EncodedFilter, FilterDecodeError, FilterOverrides};
pub use models::{
    HotelRecord, HotelSearchResult, PartyComposition, ResultOrigin, SearchRequest,
    ValidationError,
};
