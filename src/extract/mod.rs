pub mod location;

#[cfg(test)]
mod tests;

use crate::config::ExtractionConfig;
use crate::error::CrawlError;
use crate::records::SupplierRecord;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// An ordered list of selector candidates for one field.
///
/// Candidates are tried in order and the first non-empty match wins, which
/// keeps extraction working across markup revisions of the target site.
/// Invalid selectors are dropped at construction time with a warning.
pub struct SelectorList {
    selectors: Vec<Selector>,
}

impl SelectorList {
    pub fn parse(candidates: &[String]) -> Self {
        let mut selectors = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match Selector::parse(candidate) {
                Ok(sel) => selectors.push(sel),
                Err(_) => ::log::warn!("Dropping invalid selector: {}", candidate),
            }
        }
        Self { selectors }
    }

    /// True when no candidate survived parsing
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// First non-empty text content under `scope`
    pub fn first_text(&self, scope: &ElementRef) -> Option<String> {
        for sel in &self.selectors {
            if let Some(el) = scope.select(sel).next() {
                let text = el.text().collect::<Vec<_>>().join(" ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
        None
    }

    /// First non-empty attribute value under `scope`
    pub fn first_attr(&self, scope: &ElementRef, attr: &str) -> Option<String> {
        for sel in &self.selectors {
            if let Some(el) = scope.select(sel).next() {
                if let Some(value) = el.value().attr(attr) {
                    let value = value.trim();
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
        None
    }

    /// All elements matched by the first candidate that matches anything
    pub fn select_all<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        for sel in &self.selectors {
            let matches: Vec<_> = doc.select(sel).collect();
            if !matches.is_empty() {
                return matches;
            }
        }
        Vec::new()
    }
}

/// Normalizes a link extracted from a card into an absolute https URL.
///
/// Protocol-relative and root-relative forms are resolved against the site's
/// canonical origin; bare host strings get a scheme. Normalizing an already
/// normalized URL is a no-op.
pub fn normalize_url(raw: &str, origin: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    if raw.starts_with('/') {
        return format!("{}{}", origin.trim_end_matches('/'), raw);
    }
    format!("https://{}", raw)
}

/// Pulls structured supplier records out of a results page.
pub struct ExtractionEngine {
    config: ExtractionConfig,
    cards: SelectorList,
    title_link: SelectorList,
    local_name: SelectorList,
    phone: SelectorList,
    email: SelectorList,
    location: SelectorList,
    established: SelectorList,
    registration: SelectorList,
    scope: SelectorList,
    year_re: Regex,
}

impl ExtractionEngine {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            cards: SelectorList::parse(&config.card_selectors),
            title_link: SelectorList::parse(&config.title_link_selectors),
            local_name: SelectorList::parse(&config.local_name_selectors),
            phone: SelectorList::parse(&config.phone_selectors),
            email: SelectorList::parse(&config.email_selectors),
            location: SelectorList::parse(&config.location_selectors),
            established: SelectorList::parse(&config.established_selectors),
            registration: SelectorList::parse(&config.registration_selectors),
            scope: SelectorList::parse(&config.scope_selectors),
            year_re: Regex::new(r"\b(19|20)\d{2}\b").expect("year regex"),
            config,
        }
    }

    /// Extracts records from page source HTML.
    ///
    /// Cards are processed in small batches with a short pause between them.
    /// A card with no resolvable name is dropped; any other missing field
    /// defaults to empty. Whatever has been gathered is returned even when a
    /// card fails partway, so a hostile card never costs the whole page.
    /// Errors only when the selector configuration leaves no way to find
    /// cards or names at all; an empty page would otherwise be
    /// indistinguishable from "no suppliers found".
    pub async fn extract(
        &self,
        html: &str,
        page_number: u32,
        start_index: usize,
    ) -> Result<Vec<SupplierRecord>, CrawlError> {
        if self.cards.is_empty() || self.title_link.is_empty() {
            return Err(CrawlError::ExtractionFailed {
                page: page_number,
                reason: "no usable card or title selector".to_string(),
            });
        }

        // Parsing happens up front; `Html` is not Send, so it must not be
        // held across the inter-batch await points.
        let card_htmls: Vec<String> = {
            let doc = Html::parse_document(html);
            self.cards
                .select_all(&doc)
                .iter()
                .map(|card| card.html())
                .collect()
        };

        ::log::info!(
            "Found {} result cards on page {}",
            card_htmls.len(),
            page_number
        );

        let mut records = Vec::with_capacity(card_htmls.len());
        for chunk in card_htmls.chunks(self.config.batch_size.max(1)) {
            for card_html in chunk {
                let index = start_index + records.len() + 1;
                match self.extract_card(card_html, index) {
                    Some(record) => records.push(record),
                    None => ::log::debug!("Dropped card without a resolvable name"),
                }
            }
            if card_htmls.len() > self.config.batch_size {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.batch_pause_ms,
                ))
                .await;
            }
        }

        ::log::info!(
            "Extracted {} records from page {}",
            records.len(),
            page_number
        );
        Ok(records)
    }

    /// Extracts one card. Returns None when the card has no usable name.
    fn extract_card(&self, card_html: &str, index: usize) -> Option<SupplierRecord> {
        let fragment = Html::parse_fragment(card_html);
        let root = fragment.root_element();

        let name = self.title_link.first_text(&root)?;
        if name.trim().is_empty() {
            return None;
        }

        let detail_url = self
            .title_link
            .first_attr(&root, "href")
            .map(|href| normalize_url(&href, &self.config.origin))
            .unwrap_or_default();

        let established_year = self
            .established
            .first_text(&root)
            .and_then(|text| self.year_re.find(&text).map(|m| m.as_str().to_string()))
            .unwrap_or_default();

        let location = self
            .location
            .first_text(&root)
            .map(|text| location::parse(&text))
            .unwrap_or_default();

        Some(SupplierRecord {
            index,
            name: name.trim().to_string(),
            local_name: self.local_name.first_text(&root).unwrap_or_default(),
            detail_url,
            phone: self.phone.first_text(&root).unwrap_or_default(),
            email: self.email.first_text(&root).unwrap_or_default(),
            location,
            established_year,
            registration_no: self.registration.first_text(&root).unwrap_or_default(),
            business_scope: self.scope.first_text(&root).unwrap_or_default(),
        })
    }
}
