//! Run inputs from outside the engine.
//!
//! Defines the `HeadlineSource` and `ExternalDocumentFetcher` contracts the
//! orchestrator reads from. Headline ingestion itself lives elsewhere; the
//! stores in `crate::storage` implement `HeadlineSource` over whatever the
//! ingestion pipeline has written.

pub mod documents;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::types::Headline;

pub use documents::HttpDocumentFetcher;

/// Filter for a headline fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadlineQuery {
    /// Categories to include; empty means all.
    pub categories: Vec<String>,
    pub limit: usize,
}

impl HeadlineQuery {
    pub fn matches(&self, headline: &Headline) -> bool {
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&headline.category))
    }
}

/// Source of intelligence headlines.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HeadlineSource: Send + Sync {
    /// Headlines matching `query`, most recent first, at most `query.limit`.
    async fn query(&self, query: &HeadlineQuery) -> Result<Vec<Headline>>;
}

/// Fetches the text of an external context document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalDocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// A context document as it will appear in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextDocument {
    pub url: String,
    /// Fetched text, or the fetch error rendered as a string.
    pub content: Result<String, String>,
}

/// Fetch every URL in order. Failures are kept as visible markers, never raised.
pub async fn fetch_all(fetcher: &dyn ExternalDocumentFetcher, urls: &[String]) -> Vec<ContextDocument> {
    let mut documents = Vec::with_capacity(urls.len());
    for url in urls {
        let content = match fetcher.fetch(url).await {
            Ok(text) => {
                debug!(url = %url, chars = text.len(), "Fetched context document");
                Ok(text)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Context document fetch failed");
                Err(format!("{e:#}"))
            }
        };
        documents.push(ContextDocument {
            url: url.clone(),
            content,
        });
    }
    documents
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn headline(category: &str) -> Headline {
        Headline {
            id: "h".into(),
            title: "t".into(),
            category: category.into(),
            magnitude: 1.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_query_matches_categories() {
        let all = HeadlineQuery { categories: vec![], limit: 10 };
        assert!(all.matches(&headline("energy")));

        let some = HeadlineQuery {
            categories: vec!["Energy".into(), "conflict".into()],
            limit: 10,
        };
        assert!(some.matches(&headline("energy")));
        assert!(!some.matches(&headline("sports")));
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_order_and_failures() {
        let mut fetcher = MockExternalDocumentFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://a.example/report")
            .times(1)
            .returning(|_| Ok("OPEC output steady".into()));
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://b.example/missing")
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("HTTP 404")));

        let urls = vec![
            "https://a.example/report".to_string(),
            "https://b.example/missing".to_string(),
        ];
        let docs = fetch_all(&fetcher, &urls).await;

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].content, Ok("OPEC output steady".to_string()));
        assert_eq!(docs[1].url, "https://b.example/missing");
        assert_eq!(docs[1].content, Err("HTTP 404".to_string()));
    }

    #[tokio::test]
    async fn test_mock_headline_source() {
        let mut source = MockHeadlineSource::new();
        source
            .expect_query()
            .returning(|q| Ok(vec![headline("energy"); q.limit]));

        let got = source
            .query(&HeadlineQuery { categories: vec![], limit: 3 })
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
    }
}
