use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::error::{Result, RuntimeError};

/// Source of the installable-model names. The production implementation
/// scrapes the runtime's public library index; tests substitute a fixed set.
#[async_trait]
pub trait AvailableModelsSource: Send + Sync {
    async fn fetch(&self) -> Result<HashSet<String>>;
}

/// Scrapes the model library index page and extracts model names from the
/// `/library/<name>` links.
pub struct LibraryScrapeSource {
    client: reqwest::Client,
    url: String,
}

pub const DEFAULT_LIBRARY_URL: &str = "https://ollama.com/library";

impl LibraryScrapeSource {
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.unwrap_or_else(|| DEFAULT_LIBRARY_URL.to_string()),
        }
    }

    fn extract_names(html: &str) -> HashSet<String> {
        // Anchors look like href="/library/llama3.2"; names are lowercase
        // alphanumerics plus dot, dash and underscore.
        let re = Regex::new(r#"href="/library/([a-z0-9][a-z0-9._-]*)""#).expect("static regex");
        re.captures_iter(html)
            .map(|c| c[1].to_string())
            .collect()
    }
}

#[async_trait]
impl AvailableModelsSource for LibraryScrapeSource {
    async fn fetch(&self) -> Result<HashSet<String>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(RuntimeError::from_transport)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(RuntimeError::Api {
                status,
                message: format!("library index returned {status}"),
            });
        }

        let html = resp
            .text()
            .await
            .map_err(|e| RuntimeError::Parse(e.to_string()))?;
        let names = Self::extract_names(&html);
        debug!(count = names.len(), "scraped library index");
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_unique_names_from_library_links() {
        let html = r#"
            <a href="/library/llama3.2">llama</a>
            <a href="/library/qwen2.5-coder">qwen</a>
            <a href="/library/llama3.2">dup</a>
            <a href="/blog/something">not a model</a>
        "#;
        let names = LibraryScrapeSource::extract_names(html);
        assert_eq!(names.len(), 2);
        assert!(names.contains("llama3.2"));
        assert!(names.contains("qwen2.5-coder"));
    }

    #[test]
    fn ignores_uppercase_and_malformed_links() {
        let html = r#"<a href="/library/Bad Name">x</a><a href="/library/">y</a>"#;
        assert!(LibraryScrapeSource::extract_names(html).is_empty());
    }
}
