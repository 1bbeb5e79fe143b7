use serde::{Deserialize, Serialize};

/// Structured location parsed heuristically from a free-text string
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub district: String,
}

/// One extracted supplier result
///
/// Every field except `name` is best-effort and defaults to the empty string
/// when the page does not provide it. A card with no resolvable name is never
/// turned into a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierRecord {
    /// Ordinal position across the whole crawl (1-based)
    pub index: usize,

    /// Canonical (latin) company name
    pub name: String,

    /// Localized company name, if the card carries one
    #[serde(default)]
    pub local_name: String,

    /// Normalized absolute URL of the supplier detail page
    #[serde(default)]
    pub detail_url: String,

    #[serde(default)]
    pub phone: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub location: Location,

    /// Year the company was established, as shown on the card
    #[serde(default)]
    pub established_year: String,

    #[serde(default)]
    pub registration_no: String,

    #[serde(default)]
    pub business_scope: String,
}

/// One page's worth of records, emitted as soon as the page is extracted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageBatch {
    pub page_number: u32,
    pub records: Vec<SupplierRecord>,
    /// Running total of records streamed so far, this batch included
    pub total_so_far: usize,
}

/// Terminal state of a search task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchOutcome {
    Completed,
    Cancelled,
    Failed { reason: String },
}

/// Final summary sent as the last event of every search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSummary {
    pub keyword: String,
    pub outcome: SearchOutcome,
    /// Number of pages that yielded a batch
    pub pages_crawled: u32,
    pub total_records: usize,
}

/// Events streamed to the caller while a search runs
///
/// Batches arrive in page order; `Finished` is always the final event, even
/// on failure, so a caller can distinguish "no suppliers found" from a crawl
/// that broke partway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SearchEvent {
    PageStarted { page: u32 },
    Batch(PageBatch),
    PageSkipped { page: u32, reason: String },
    Finished(SearchSummary),
}
