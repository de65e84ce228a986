//! PMLR (Proceedings of Machine Learning Research) connector.
//!
//! A volume index page at `proceedings.mlr.press/v{volume}/` lists one
//! `div.paper` per paper with an `abs` link to its abstract page. The
//! abstract pages carry Google Scholar `citation_*` meta tags, which is
//! where titles, authors, dates, and PDF URLs are read from.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use scraper::{Html, Selector};
use std::time::Duration;

use crate::connector::{http_client, SourceConnector};
use crate::error::{Error, Result};
use crate::models::{LinkRef, PaperDraft};

const BASE_URL: &str = "https://proceedings.mlr.press";

#[derive(Debug)]
pub struct PmlrConnector {
    volume: String,
    base_url: String,
    client: reqwest::Client,
    selectors: Selectors,
}

#[derive(Debug)]
struct Selectors {
    paper_divs: Selector,
    title: Selector,
    links: Selector,
    conference: Selector,
    meta: Selector,
    abstract_div: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            paper_divs: Selector::parse("div.paper").expect("paper div selector"),
            title: Selector::parse("p.title").expect("title selector"),
            links: Selector::parse("a[href]").expect("link selector"),
            conference: Selector::parse("h1").expect("conference heading selector"),
            meta: Selector::parse("meta[name][content]").expect("meta selector"),
            abstract_div: Selector::parse("div.abstract").expect("abstract selector"),
        }
    }
}

impl PmlrConnector {
    pub fn new(volume: &str, timeout: Duration) -> Result<Self> {
        Self::with_base_url(volume, timeout, BASE_URL)
    }

    pub fn with_base_url(volume: &str, timeout: Duration, base_url: &str) -> Result<Self> {
        if volume.is_empty() || !volume.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Configuration(format!(
                "invalid PMLR volume: '{}'",
                volume
            )));
        }
        Ok(Self {
            volume: volume.to_string(),
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

    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}{}", self.base_url, href)
        }
    }
}

#[async_trait]
impl SourceConnector for PmlrConnector {
    fn conference(&self) -> &str {
        "PMLR"
    }

    async fn extract_links(&self) -> Result<Vec<LinkRef>> {
        let index_url = format!("{}/v{}/", self.base_url, self.volume);
        tracing::info!(url = %index_url, "fetching PMLR volume index");

        let body = self.fetch_page(&index_url).await?;
        let document = Html::parse_document(&body);

        let conference = document
            .select(&self.selectors.conference)
            .next()
            .map(|h| h.text().collect::<String>().trim().to_string());

        let mut links = Vec::new();
        for paper in document.select(&self.selectors.paper_divs) {
            let title = paper
                .select(&self.selectors.title)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .unwrap_or_default();

            // The "abs" anchor points at the paper's abstract page.
            let abs_href = paper.select(&self.selectors.links).find_map(|a| {
                let label = a.text().collect::<String>();
                if label.trim() == "abs" {
                    a.value().attr("href").map(str::to_string)
                } else {
                    None
                }
            });

            if let Some(href) = abs_href {
                let mut link = LinkRef::new(title, self.absolute(&href));
                if let Some(ref name) = conference {
                    link = link.with_raw(serde_json::json!({ "conference": name }));
                }
                links.push(link);
            }
        }

        Ok(links)
    }

    async fn process_link(&self, link: &LinkRef) -> Result<PaperDraft> {
        tracing::info!(url = %link.url, "fetching PMLR abstract page");
        let body = self.fetch_page(&link.url).await?;
        let document = Html::parse_document(&body);

        let mut title = None;
        let mut authors = Vec::new();
        let mut pdf_url = None;
        let mut publication_date = None;
        let mut keywords = Vec::new();

        for meta in document.select(&self.selectors.meta) {
            let (Some(name), Some(content)) =
                (meta.value().attr("name"), meta.value().attr("content"))
            else {
                continue;
            };
            match name {
                "citation_title" => title = Some(content.trim().to_string()),
                "citation_author" => authors.push(content.trim().to_string()),
                "citation_pdf_url" => pdf_url = Some(content.trim().to_string()),
                "citation_publication_date" => {
                    publication_date = parse_citation_date(content.trim())
                }
                "citation_keywords" => keywords.push(content.trim().to_string()),
                _ => {}
            }
        }

        let title = title
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::extraction(&link.url, "missing citation_title meta tag"))?;

        let publication_date = publication_date
            .ok_or_else(|| Error::extraction(&link.url, "missing citation_publication_date"))?;

        let abstract_text = document
            .select(&self.selectors.abstract_div)
            .next()
            .map(|d| d.text().collect::<String>().trim().to_string())
            .filter(|a| !a.is_empty());

        let conference = link
            .raw
            .as_ref()
            .and_then(|raw| raw.get("conference"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .or_else(|| Some("PMLR".to_string()));

        Ok(PaperDraft {
            title,
            authors,
            publication_date,
            url: pdf_url,
            abstract_text,
            conference,
            keywords,
        })
    }
}

/// Citation dates appear as `YYYY/MM/DD`, `YYYY-MM-DD`, or a bare year.
fn parse_citation_date(value: &str) -> Option<DateTime<Utc>> {
    for format in ["%Y/%m/%d", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    let year: i32 = value.split(['-', '/']).next()?.parse().ok()?;
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const VOLUME_HTML: &str = r#"
        <html><body>
        <h1>Proceedings of the 40th International Conference on Machine Learning</h1>
        <div class="paper">
          <p class="title">Scaling Laws for Sparse Models</p>
          <p class="links">
            <a href="/v202/smith23a.html">abs</a>
            <a href="/v202/smith23a/smith23a.pdf">Download PDF</a>
          </p>
        </div>
        </body></html>
    "#;

    const ABS_HTML: &str = r#"
        <html><head>
        <meta name="citation_title" content="Scaling Laws for Sparse Models" />
        <meta name="citation_author" content="Jane Smith" />
        <meta name="citation_author" content="Wei Chen" />
        <meta name="citation_publication_date" content="2023/07/23" />
        <meta name="citation_pdf_url" content="https://proceedings.mlr.press/v202/smith23a/smith23a.pdf" />
        </head><body>
        <div class="abstract">Sparse models follow distinct scaling laws.</div>
        </body></html>
    "#;

    #[tokio::test]
    async fn extracts_abs_links_from_volume_index() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v202/");
            then.status(200).body(VOLUME_HTML);
        });

        let connector =
            PmlrConnector::with_base_url("202", Duration::from_secs(5), &server.base_url())
                .unwrap();
        let links = connector.extract_links().await.unwrap();

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].label, "Scaling Laws for Sparse Models");
        assert!(links[0].url.ends_with("/v202/smith23a.html"));
    }

    #[tokio::test]
    async fn parses_citation_meta_tags() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v202/smith23a.html");
            then.status(200).body(ABS_HTML);
        });

        let connector =
            PmlrConnector::with_base_url("202", Duration::from_secs(5), &server.base_url())
                .unwrap();
        let link = LinkRef::new(
            "Scaling Laws for Sparse Models",
            format!("{}/v202/smith23a.html", server.base_url()),
        );
        let draft = connector.process_link(&link).await.unwrap();

        assert_eq!(draft.title, "Scaling Laws for Sparse Models");
        assert_eq!(draft.authors, vec!["Jane Smith", "Wei Chen"]);
        assert_eq!(
            draft.abstract_text.as_deref(),
            Some("Sparse models follow distinct scaling laws.")
        );
        assert_eq!(draft.publication_date.format("%Y-%m-%d").to_string(), "2023-07-23");
    }

    #[tokio::test]
    async fn page_without_citation_tags_is_extraction_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v202/broken.html");
            then.status(200).body("<html><body>not a paper</body></html>");
        });

        let connector =
            PmlrConnector::with_base_url("202", Duration::from_secs(5), &server.base_url())
                .unwrap();
        let link = LinkRef::new("broken", format!("{}/v202/broken.html", server.base_url()));
        let err = connector.process_link(&link).await.unwrap_err();
        assert!(matches!(err, Error::RecordExtraction { .. }));
    }

    #[test]
    fn citation_date_formats() {
        assert_eq!(
            parse_citation_date("2023/07/23").unwrap().format("%Y-%m-%d").to_string(),
            "2023-07-23"
        );
        assert_eq!(
            parse_citation_date("2023-07-23").unwrap().format("%Y-%m-%d").to_string(),
            "2023-07-23"
        );
        assert_eq!(
            parse_citation_date("2023").unwrap().format("%Y-%m-%d").to_string(),
            "2023-01-01"
        );
        assert!(parse_citation_date("unknown").is_none());
    }
}
