//! NeurIPS proceedings connector.
//!
//! Scrapes `proceedings.neurips.cc`: the yearly index page lists every
//! accepted paper, and each paper page carries title, authors, abstract, and
//! a PDF button. The proceedings site does not expose per-paper dates, so
//! papers are stamped with December 1 of the volume year.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

use crate::connector::{http_client, SourceConnector};
use crate::error::{Error, Result};
use crate::models::{LinkRef, PaperDraft};

const BASE_URL: &str = "https://proceedings.neurips.cc";

#[derive(Debug)]
pub struct NeurIpsConnector {
    year: i32,
    base_url: String,
    client: reqwest::Client,
    selectors: Selectors,
}

#[derive(Debug)]
struct Selectors {
    index_links: Selector,
    heading: Selector,
    buttons: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            index_links: Selector::parse(".paper-list li a").expect("paper list selector"),
            heading: Selector::parse("h4").expect("heading selector"),
            buttons: Selector::parse("a.btn[href]").expect("button selector"),
        }
    }
}

impl NeurIpsConnector {
    pub fn new(volume: &str, timeout: Duration) -> Result<Self> {
        Self::with_base_url(volume, timeout, BASE_URL)
    }

    /// Point the connector at a different host (mock servers in tests).
    pub fn with_base_url(volume: &str, timeout: Duration, base_url: &str) -> Result<Self> {
        let year: i32 = volume.parse().map_err(|_| {
            Error::Configuration(format!("invalid NeurIPS volume year: '{}'", volume))
        })?;
        Ok(Self {
            year,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
            selectors: Selectors::new(),
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e))?;
        let resp = resp.error_for_status().map_err(|e| Error::fetch(url, e))?;
        resp.text().await.map_err(|e| Error::fetch(url, e))
    }
}

#[async_trait]
impl SourceConnector for NeurIpsConnector {
    fn conference(&self) -> &str {
        "NeurIPS"
    }

    async fn extract_links(&self) -> Result<Vec<LinkRef>> {
        let index_url = format!("{}/paper/{}", self.base_url, self.year);
        tracing::info!(url = %index_url, "fetching NeurIPS paper list");

        let body = self.fetch_page(&index_url).await?;
        let document = Html::parse_document(&body);

        let mut links = Vec::new();
        for anchor in document.select(&self.selectors.index_links) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let title = anchor.text().collect::<String>().trim().to_string();
            links.push(LinkRef::new(title, format!("{}{}", self.base_url, href)));
        }

        Ok(links)
    }

    async fn process_link(&self, link: &LinkRef) -> Result<PaperDraft> {
        tracing::info!(url = %link.url, "fetching NeurIPS paper page");
        let body = self.fetch_page(&link.url).await?;
        let document = Html::parse_document(&body);

        let title = document
            .select(&self.selectors.heading)
            .next()
            .map(|h| h.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::extraction(&link.url, "missing paper title"))?;

        let authors = heading_sibling_text(&document, &self.selectors.heading, "Authors")
            .map(|text| {
                text.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let abstract_text =
            heading_sibling_text(&document, &self.selectors.heading, "Abstract")
                .filter(|a| !a.is_empty());

        let mut pdf_url = None;
        for btn in document.select(&self.selectors.buttons) {
            let label = btn.text().collect::<String>();
            if label.contains("Paper") {
                if let Some(href) = btn.value().attr("href") {
                    pdf_url = Some(if href.starts_with("http") {
                        href.to_string()
                    } else {
                        format!("{}{}", self.base_url, href)
                    });
                }
                break;
            }
        }

        Ok(PaperDraft {
            title,
            authors,
            publication_date: Utc
                .with_ymd_and_hms(self.year, 12, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| Error::extraction(&link.url, "invalid volume year"))?,
            url: pdf_url,
            abstract_text,
            conference: Some("NeurIPS".to_string()),
            keywords: Vec::new(),
        })
    }
}

/// Text of the first `<p>` element following an `h4` whose own text equals
/// `heading` (the proceedings pages label sections this way).
fn heading_sibling_text(document: &Html, headings: &Selector, heading: &str) -> Option<String> {
    for h in document.select(headings) {
        let text = h.text().collect::<String>();
        if text.trim() == heading {
            let sibling = h
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "p")?;
            return Some(sibling.text().collect::<String>().trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const INDEX_HTML: &str = r#"
        <html><body>
        <ul class="paper-list">
          <li><a href="/paper_files/paper/2023/hash/aaa-Abstract.html">Attention Revisited</a></li>
          <li><a href="/paper_files/paper/2023/hash/bbb-Abstract.html">Graph Learning at Scale</a></li>
        </ul>
        </body></html>
    "#;

    const PAPER_HTML: &str = r#"
        <html><body>
        <h4>Attention Revisited</h4>
        <h4>Authors</h4>
        <p>Ada Lovelace, Alan Turing</p>
        <h4>Abstract</h4>
        <p>We revisit attention mechanisms for sequence modeling.</p>
        <a class="btn" href="/paper_files/paper/2023/file/aaa-Paper.pdf">Paper</a>
        </body></html>
    "#;

    #[tokio::test]
    async fn extracts_index_links() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/paper/2023");
            then.status(200).body(INDEX_HTML);
        });

        let connector =
            NeurIpsConnector::with_base_url("2023", Duration::from_secs(5), &server.base_url())
                .unwrap();
        let links = connector.extract_links().await.unwrap();

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].label, "Attention Revisited");
        assert!(links[0].url.ends_with("aaa-Abstract.html"));
    }

    #[tokio::test]
    async fn parses_paper_page() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/paper/aaa");
            then.status(200).body(PAPER_HTML);
        });

        let connector =
            NeurIpsConnector::with_base_url("2023", Duration::from_secs(5), &server.base_url())
                .unwrap();
        let link = LinkRef::new("Attention Revisited", format!("{}/paper/aaa", server.base_url()));
        let draft = connector.process_link(&link).await.unwrap();

        assert_eq!(draft.title, "Attention Revisited");
        assert_eq!(draft.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(
            draft.abstract_text.as_deref(),
            Some("We revisit attention mechanisms for sequence modeling.")
        );
        assert!(draft.url.as_deref().unwrap().ends_with("aaa-Paper.pdf"));
        assert_eq!(draft.conference.as_deref(), Some("NeurIPS"));
    }

    #[tokio::test]
    async fn http_error_is_fetch_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/paper/2023");
            then.status(500);
        });

        let connector =
            NeurIpsConnector::with_base_url("2023", Duration::from_secs(5), &server.base_url())
                .unwrap();
        let err = connector.extract_links().await.unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[tokio::test]
    async fn missing_title_is_extraction_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/paper/empty");
            then.status(200).body("<html><body></body></html>");
        });

        let connector =
            NeurIpsConnector::with_base_url("2023", Duration::from_secs(5), &server.base_url())
                .unwrap();
        let link = LinkRef::new("empty", format!("{}/paper/empty", server.base_url()));
        let err = connector.process_link(&link).await.unwrap_err();
        assert!(matches!(err, Error::RecordExtraction { .. }));
    }

    #[test]
    fn invalid_year_rejected_at_construction() {
        let err = NeurIpsConnector::new("twenty23", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
