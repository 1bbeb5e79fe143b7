use crate::config::ClassifierConfig;
use scraper::{Html, Selector};

/// Classification of a loaded search page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    /// A results page carrying supplier cards (possibly zero that match)
    Results,
    /// The site signalled there are no further results for this keyword
    NoMoreResults,
    /// An anti-bot challenge is being shown instead of content
    Challenge,
    /// None of the known signatures matched; the orchestrator stops
    /// paginating rather than looping on a page it cannot interpret
    Unknown,
}

/// Classifies a page from its source HTML.
///
/// A definitive results marker takes precedence over challenge detection:
/// the challenge selectors are broad class fragments that can also appear in
/// dormant widgets embedded on a normal results page. Without the marker the
/// challenge check runs first, since the site can substitute a challenge for
/// a results page at any point in a crawl.
pub fn classify(html: &str, config: &ClassifierConfig) -> PageClass {
    let doc = Html::parse_document(html);

    let has_marker = matches_any(&doc, &config.results_marker);
    let no_more = matches_any(&doc, &config.no_more_selector);

    if has_marker || no_more {
        if no_more {
            return PageClass::NoMoreResults;
        }
        return PageClass::Results;
    }

    for selector in &config.challenge_selectors {
        if matches_any(&doc, selector) {
            ::log::debug!("Challenge signature matched: {}", selector);
            return PageClass::Challenge;
        }
    }

    PageClass::Unknown
}

/// True when at least one element matches the (possibly comma-separated)
/// selector. Invalid selectors are logged and treated as non-matching.
fn matches_any(doc: &Html, selector: &str) -> bool {
    match Selector::parse(selector) {
        Ok(sel) => doc.select(&sel).next().is_some(),
        Err(_) => {
            ::log::warn!("Invalid classifier selector: {}", selector);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClassifierConfig {
        ClassifierConfig::default()
    }

    #[test]
    fn test_results_page() {
        let html = r#"<html><body>
            <div data-content="search-results">
                <div class="fy23-search-card"></div>
            </div>
        </body></html>"#;
        assert_eq!(classify(html, &config()), PageClass::Results);
    }

    #[test]
    fn test_no_more_results() {
        let html = r#"<html><body>
            <div data-content="search-results"></div>
            <div class="no-more-results">That's all</div>
        </body></html>"#;
        assert_eq!(classify(html, &config()), PageClass::NoMoreResults);
    }

    #[test]
    fn test_challenge_page() {
        let html = r#"<html><body>
            <div class="nc-container">
                <span id="nc_1_n1z" class="nc_iconfont btn_slide"></span>
            </div>
        </body></html>"#;
        assert_eq!(classify(html, &config()), PageClass::Challenge);
    }

    #[test]
    fn test_challenge_iframe() {
        let html = r#"<html><body>
            <iframe src="https://g.alicdn.com/captcha/frame.html"></iframe>
        </body></html>"#;
        assert_eq!(classify(html, &config()), PageClass::Challenge);
    }

    #[test]
    fn test_unknown_page() {
        let html = "<html><body><h1>Service temporarily unavailable</h1></body></html>";
        assert_eq!(classify(html, &config()), PageClass::Unknown);
    }

    #[test]
    fn test_marker_wins_over_dormant_challenge_widget() {
        // A dormant slider container embedded in a genuine results page must
        // not shadow the results marker.
        let html = r#"<html><body>
            <div data-content="search-results">
                <div class="fy23-search-card"></div>
            </div>
            <div class="nc-container" style="display:none"></div>
        </body></html>"#;
        assert_eq!(classify(html, &config()), PageClass::Results);
    }
}
