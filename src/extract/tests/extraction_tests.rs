use crate::config::ExtractionConfig;
use crate::error::CrawlError;
use crate::extract::ExtractionEngine;

fn engine() -> ExtractionEngine {
    ExtractionEngine::new(ExtractionConfig::default())
}

fn card(name_html: &str, extra: &str) -> String {
    format!(
        r#"<div class="fy23-search-card">
            <div class="search-card-e-company">{name_html}</div>
            {extra}
        </div>"#
    )
}

fn results_page(cards: &[String]) -> String {
    format!(
        r#"<html><body><div data-content="search-results">{}</div></body></html>"#,
        cards.join("\n")
    )
}

#[tokio::test]
async fn test_three_cards_all_named() {
    let html = results_page(&[
        card(r#"<a href="/company/1.html">Hangzhou Woodcraft Co.</a>"#, ""),
        card(r#"<a href="//supplier.example.com/2">Ningbo Seating Ltd.</a>"#, ""),
        card(r#"<a href="https://x.example.com/3">Foshan Tables Inc.</a>"#, ""),
    ]);

    let records = engine().extract(&html, 1, 0).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].name, "Hangzhou Woodcraft Co.");
    assert_eq!(records[0].index, 1);
    assert_eq!(records[2].index, 3);
    assert_eq!(
        records[0].detail_url,
        "https://www.alibaba.com/company/1.html"
    );
    assert_eq!(records[1].detail_url, "https://supplier.example.com/2");
    assert_eq!(records[2].detail_url, "https://x.example.com/3");
}

#[tokio::test]
async fn test_record_order_matches_card_order() {
    let html = results_page(&[
        card(r#"<a href="/a">Alpha</a>"#, ""),
        card(r#"<a href="/b">Beta</a>"#, ""),
    ]);
    let records = engine().extract(&html, 1, 0).await.unwrap();
    let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["Alpha", "Beta"]);
}

#[tokio::test]
async fn test_nameless_card_is_dropped() {
    let html = results_page(&[
        card(r#"<a href="/a">Alpha Furniture</a>"#, ""),
        // Card with an empty title link: no identity, no record
        card(r#"<a href="/b">   </a>"#, ""),
        // Card with no title link at all
        card("", r#"<span class="supplier-location">China</span>"#),
    ]);

    let records = engine().extract(&html, 1, 0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Alpha Furniture");
    assert!(records.iter().all(|r| !r.name.is_empty()));
}

#[tokio::test]
async fn test_missing_fields_default_empty() {
    let html = results_page(&[card(r#"<a href="/only">Bare Minimum Co.</a>"#, "")]);
    let records = engine().extract(&html, 1, 0).await.unwrap();
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.phone, "");
    assert_eq!(r.email, "");
    assert_eq!(r.local_name, "");
    assert_eq!(r.established_year, "");
    assert_eq!(r.registration_no, "");
    assert_eq!(r.business_scope, "");
    assert_eq!(r.location.country, "");
}

#[tokio::test]
async fn test_full_card_fields() {
    let extra = r#"
        <span class="search-card-e-company-local">杭州木工有限公司</span>
        <span class="contact-phone">+86-571-0000000</span>
        <span class="contact-email">sales@woodcraft.example</span>
        <span class="supplier-location">China, Zhejiang, Hangzhou</span>
        <span class="search-card-e-review"><strong>Est. 2011</strong></span>
        <span class="search-card-m-sale-features__item">Office chairs</span>
    "#;
    let html = results_page(&[card(r#"<a href="/c/9.html">Woodcraft</a>"#, extra)]);

    let records = engine().extract(&html, 1, 0).await.unwrap();
    let r = &records[0];
    assert_eq!(r.local_name, "杭州木工有限公司");
    assert_eq!(r.phone, "+86-571-0000000");
    assert_eq!(r.email, "sales@woodcraft.example");
    assert_eq!(r.location.country, "China");
    assert_eq!(r.location.province, "Zhejiang");
    assert_eq!(r.location.city, "Hangzhou");
    assert_eq!(r.established_year, "2011");
    assert_eq!(r.business_scope, "Office chairs");
}

#[tokio::test]
async fn test_empty_results_page() {
    let html = results_page(&[]);
    let records = engine().extract(&html, 1, 0).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_start_index_continues_numbering() {
    let html = results_page(&[card(r#"<a href="/a">Second Page Co.</a>"#, "")]);
    let records = engine().extract(&html, 2, 40).await.unwrap();
    assert_eq!(records[0].index, 41);
}

#[tokio::test]
async fn test_unusable_selector_config_is_an_error() {
    // Every candidate invalid: silently returning zero records would be
    // indistinguishable from an empty listing, so this must be an error.
    let mut config = ExtractionConfig::default();
    config.card_selectors = vec![":::broken".to_string()];
    let engine = ExtractionEngine::new(config);

    let err = engine.extract("<html></html>", 1, 0).await.unwrap_err();
    assert!(matches!(err, CrawlError::ExtractionFailed { page: 1, .. }));
}

#[tokio::test]
async fn test_fallback_card_selector() {
    // Old-style markup: no fy23 cards, falls back to the legacy wrapper
    let html = r#"<html><body>
        <div class="J-offer-wrapper">
            <h2 class="title"><a href="/legacy">Legacy Supplier</a></h2>
        </div>
    </body></html>"#;
    let records = engine().extract(html, 1, 0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Legacy Supplier");
}
