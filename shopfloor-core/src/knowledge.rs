//! External knowledge lookups
//!
//! Provides a `KnowledgeSource` trait with implementations for:
//! - **Wikipedia** — opensearch for titles, then the REST page summary
//! - **DuckDuckGo** — instant answers (abstract, then related topics)
//!
//! `ExternalKnowledge` queries both concurrently under one deadline. A
//! failed or slow branch contributes nothing; the other branch is kept.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::KnowledgeConfig;
use crate::error::ShopfloorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetOrigin {
    Encyclopedia,
    Web,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub title: String,
    pub summary: String,
    pub url: String,
    pub origin: SnippetOrigin,
}

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lookup returned status {0}")]
    Status(u16),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// At most `max_results` snippets relevant to `query`.
    async fn lookup(&self, query: &str, max_results: usize) -> Result<Vec<Snippet>, KnowledgeError>;

    fn name(&self) -> &str;
}

fn http_client(timeout: Duration) -> Result<Client, KnowledgeError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Cut `text` to `max_chars` characters.
fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Everything up to and including the first sentence terminator.
fn first_sentence(text: &str) -> &str {
    match text.find(". ") {
        Some(i) => &text[..=i],
        None => text.trim_end(),
    }
}

// ============================================================================
// WikipediaClient
// ============================================================================

/// `[query, titles, descriptions, urls]`
type OpenSearchResponse = (String, Vec<String>, Vec<String>, Vec<String>);

#[derive(Debug, Deserialize)]
struct PageSummary {
    title: Option<String>,
    #[serde(default)]
    extract: String,
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

#[derive(Debug, Clone)]
pub struct WikipediaClient {
    client: Client,
    base_url: String,
}

impl WikipediaClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, KnowledgeError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn search_titles(&self, query: &str, max_results: usize) -> Result<OpenSearchResponse, KnowledgeError> {
        let limit = max_results.to_string();
        let response = self
            .client
            .get(format!("{}/w/api.php", self.base_url))
            .query(&[
                ("action", "opensearch"),
                ("search", query),
                ("limit", limit.as_str()),
                ("namespace", "0"),
                ("format", "json"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(KnowledgeError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn summary(&self, title: &str) -> Result<PageSummary, KnowledgeError> {
        let slug = title.replace(' ', "_");
        let mut url = Url::parse(&self.base_url).map_err(|e| KnowledgeError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| KnowledgeError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "rest_v1", "page", "summary", slug.as_str()]);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(KnowledgeError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl KnowledgeSource for WikipediaClient {
    async fn lookup(&self, query: &str, max_results: usize) -> Result<Vec<Snippet>, KnowledgeError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let (_, titles, _, urls) = self.search_titles(query, max_results).await?;

        let mut snippets = Vec::new();
        for (i, title) in titles.iter().take(max_results).enumerate() {
            // a title whose summary cannot be fetched is skipped
            let page = match self.summary(title).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::debug!(title = %title, error = %e, "Skipping Wikipedia page");
                    continue;
                }
            };

            let url = page
                .content_urls
                .and_then(|c| c.desktop)
                .map(|d| d.page)
                .or_else(|| urls.get(i).cloned())
                .unwrap_or_default();

            snippets.push(Snippet {
                title: page.title.unwrap_or_else(|| title.clone()),
                summary: first_sentence(&page.extract).to_string(),
                url,
                origin: SnippetOrigin::Encyclopedia,
            });
        }
        Ok(snippets)
    }

    fn name(&self) -> &str {
        "wikipedia"
    }
}

// ============================================================================
// WebSearchClient
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Topic groups carry no `Text`; they are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedTopic {
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
}

/// DuckDuckGo instant-answer API.
#[derive(Debug, Clone)]
pub struct WebSearchClient {
    client: Client,
    base_url: String,
    description_max_chars: usize,
}

impl WebSearchClient {
    pub fn new(base_url: String, timeout: Duration, description_max_chars: usize) -> Result<Self, KnowledgeError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            description_max_chars,
        })
    }
}

#[async_trait]
impl KnowledgeSource for WebSearchClient {
    async fn lookup(&self, query: &str, max_results: usize) -> Result<Vec<Snippet>, KnowledgeError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(KnowledgeError::Status(response.status().as_u16()));
        }
        let answer: InstantAnswer = response.json().await?;

        let mut snippets = Vec::new();
        if !answer.abstract_text.is_empty() {
            snippets.push(Snippet {
                title: if answer.heading.is_empty() { query.to_string() } else { answer.heading },
                summary: clip(&answer.abstract_text, self.description_max_chars),
                url: answer.abstract_url,
                origin: SnippetOrigin::Web,
            });
        }

        for topic in answer.related_topics {
            if snippets.len() >= max_results {
                break;
            }
            if let (Some(text), Some(url)) = (topic.text, topic.first_url) {
                let title = text.split(" - ").next().unwrap_or(&text).to_string();
                snippets.push(Snippet {
                    title,
                    summary: clip(&text, self.description_max_chars),
                    url,
                    origin: SnippetOrigin::Web,
                });
            }
        }

        snippets.truncate(max_results);
        Ok(snippets)
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

// ============================================================================
// ExternalKnowledge
// ============================================================================

/// Results of one fork-join lookup, one list per branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KnowledgeBundle {
    pub encyclopedia: Vec<Snippet>,
    pub web: Vec<Snippet>,
}

impl KnowledgeBundle {
    pub fn is_empty(&self) -> bool {
        self.encyclopedia.is_empty() && self.web.is_empty()
    }

    pub fn snippets(&self) -> impl Iterator<Item = &Snippet> {
        self.encyclopedia.iter().chain(self.web.iter())
    }

    /// Snippet URLs in encyclopedia-then-web order, without blanks.
    pub fn sources(&self) -> Vec<String> {
        self.snippets()
            .filter(|s| !s.url.is_empty())
            .map(|s| s.url.clone())
            .collect()
    }
}

#[derive(Clone)]
pub struct ExternalKnowledge {
    encyclopedia: Arc<dyn KnowledgeSource>,
    web: Arc<dyn KnowledgeSource>,
    lookup_timeout: Duration,
    stage_timeout: Duration,
    max_results: usize,
}

impl ExternalKnowledge {
    pub fn new(
        encyclopedia: Arc<dyn KnowledgeSource>,
        web: Arc<dyn KnowledgeSource>,
        lookup_timeout: Duration,
        stage_timeout: Duration,
        max_results: usize,
    ) -> Self {
        Self {
            encyclopedia,
            web,
            lookup_timeout,
            stage_timeout,
            max_results,
        }
    }

    pub fn from_config(config: &KnowledgeConfig) -> Result<Self, KnowledgeError> {
        let lookup_timeout = Duration::from_millis(config.lookup_timeout_ms);
        let encyclopedia = WikipediaClient::new(config.wikipedia_url.clone(), lookup_timeout)?;
        let web = WebSearchClient::new(
            config.web_search_url.clone(),
            lookup_timeout,
            config.description_max_chars,
        )?;

        Ok(Self::new(
            Arc::new(encyclopedia),
            Arc::new(web),
            lookup_timeout,
            Duration::from_millis(config.stage_timeout_ms),
            config.max_results,
        ))
    }

    /// Query both sources concurrently. Never fails.
    pub async fn fetch(&self, query: &str) -> KnowledgeBundle {
        let now = Instant::now();
        let deadline = std::cmp::min(now + self.lookup_timeout, now + self.stage_timeout);

        let (encyclopedia, web) = tokio::join!(
            self.bounded(self.encyclopedia.as_ref(), query, deadline),
            self.bounded(self.web.as_ref(), query, deadline),
        );

        tracing::debug!(
            encyclopedia = encyclopedia.len(),
            web = web.len(),
            elapsed_ms = now.elapsed().as_millis() as u64,
            "External knowledge lookup finished"
        );

        KnowledgeBundle { encyclopedia, web }
    }

    async fn bounded(&self, source: &dyn KnowledgeSource, query: &str, deadline: Instant) -> Vec<Snippet> {
        let failure = match tokio::time::timeout_at(deadline, source.lookup(query, self.max_results)).await {
            Ok(Ok(mut snippets)) => {
                snippets.truncate(self.max_results);
                return snippets;
            }
            Ok(Err(e)) => ShopfloorError::ExternalLookupFailed(format!("{}: {}", source.name(), e)),
            Err(_) => ShopfloorError::ExternalLookupFailed(format!("{}: deadline exceeded", source.name())),
        };

        tracing::warn!(source = source.name(), error = %failure, "Knowledge lookup abandoned");
        Vec::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StubSource {
        name: &'static str,
        delay: Duration,
        result: Option<Snippet>,
    }

    #[async_trait]
    impl KnowledgeSource for StubSource {
        async fn lookup(&self, _query: &str, _max_results: usize) -> Result<Vec<Snippet>, KnowledgeError> {
            tokio::time::sleep(self.delay).await;
            match &self.result {
                Some(s) => Ok(vec![s.clone(), s.clone()]),
                None => Err(KnowledgeError::Status(503)),
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn snippet(origin: SnippetOrigin, url: &str) -> Snippet {
        Snippet {
            title: "Lathe".to_string(),
            summary: "A machine tool.".to_string(),
            url: url.to_string(),
            origin,
        }
    }

    fn knowledge(encyclopedia: StubSource, web: StubSource) -> ExternalKnowledge {
        ExternalKnowledge::new(
            Arc::new(encyclopedia),
            Arc::new(web),
            Duration::from_millis(150),
            Duration::from_millis(200),
            1,
        )
    }

    #[tokio::test]
    async fn test_slow_branch_is_abandoned_fast_branch_kept() {
        let knowledge = knowledge(
            StubSource {
                name: "slow",
                delay: Duration::from_secs(10),
                result: Some(snippet(SnippetOrigin::Encyclopedia, "https://slow")),
            },
            StubSource {
                name: "fast",
                delay: Duration::ZERO,
                result: Some(snippet(SnippetOrigin::Web, "https://fast")),
            },
        );

        let started = std::time::Instant::now();
        let bundle = knowledge.fetch("lathe").await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(bundle.encyclopedia.is_empty());
        assert_eq!(bundle.web.len(), 1, "max_results caps each branch");
        assert_eq!(bundle.sources(), vec!["https://fast".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_branch_yields_empty_list() {
        let knowledge = knowledge(
            StubSource {
                name: "broken",
                delay: Duration::ZERO,
                result: None,
            },
            StubSource {
                name: "broken-too",
                delay: Duration::ZERO,
                result: None,
            },
        );
        assert!(knowledge.fetch("lathe").await.is_empty());
    }

    #[tokio::test]
    async fn test_wikipedia_search_then_summary() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("action", "opensearch"))
            .and(query_param("search", "CNC spindle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                "CNC spindle",
                ["Numerical control"],
                [""],
                ["https://en.wikipedia.org/wiki/Numerical_control"]
            ])))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/rest_v1/page/summary/Numerical_control"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Numerical control",
                "extract": "Numerical control is the automated control of machining tools. It uses a computer.",
                "content_urls": { "desktop": { "page": "https://en.wikipedia.org/wiki/Numerical_control" } }
            })))
            .mount(&mock_server)
            .await;

        let client = WikipediaClient::new(mock_server.uri(), Duration::from_secs(2)).unwrap();
        let snippets = client.lookup("CNC spindle", 1).await.unwrap();

        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].title, "Numerical control");
        assert_eq!(snippets[0].summary, "Numerical control is the automated control of machining tools.");
        assert_eq!(snippets[0].url, "https://en.wikipedia.org/wiki/Numerical_control");
        assert_eq!(snippets[0].origin, SnippetOrigin::Encyclopedia);
    }

    #[tokio::test]
    async fn test_web_search_prefers_abstract_and_clips_description() {
        let mock_server = MockServer::start().await;
        let long_text = "x".repeat(300);

        Mock::given(method("GET"))
            .and(query_param("q", "hydraulic press"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Heading": "Hydraulic press",
                "AbstractText": long_text,
                "AbstractURL": "https://example.org/press",
                "RelatedTopics": [{ "Text": "Forging - shaping metal", "FirstURL": "https://example.org/forging" }]
            })))
            .mount(&mock_server)
            .await;

        let client = WebSearchClient::new(mock_server.uri(), Duration::from_secs(2), 100).unwrap();
        let snippets = client.lookup("hydraulic press", 1).await.unwrap();

        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].title, "Hydraulic press");
        assert_eq!(snippets[0].summary.chars().count(), 100);
        assert_eq!(snippets[0].url, "https://example.org/press");
    }

    #[tokio::test]
    async fn test_web_search_falls_back_to_related_topics() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Heading": "",
                "AbstractText": "",
                "AbstractURL": "",
                "RelatedTopics": [
                    { "Name": "Group", "Topics": [] },
                    { "Text": "Forging - shaping metal with compressive forces", "FirstURL": "https://example.org/forging" }
                ]
            })))
            .mount(&mock_server)
            .await;

        let client = WebSearchClient::new(mock_server.uri(), Duration::from_secs(2), 100).unwrap();
        let snippets = client.lookup("forging", 1).await.unwrap();

        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].title, "Forging");
        assert_eq!(snippets[0].url, "https://example.org/forging");
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("One. Two."), "One.");
        assert_eq!(first_sentence("No terminator"), "No terminator");
    }
}
