//! CourtListener-style case-law lookup over HTTP.
//!
//! `citation-lookup` resolves a reporter citation to opinion clusters; the
//! first cluster's opinion text is fetched for the quote and holding
//! checks. Statutes are not indexed there, so they surface as lookup
//! errors and the claim is deferred to attorney review.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::citation::{CaseLawLookup, CaseRecord, Citation, CitationKind, LookupResult, Treatment};
use crate::config::CaseLawConfig;
use crate::gateway::ProviderError;

pub struct CourtListenerLookup {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupEntry {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    clusters: Vec<Cluster>,
}

#[derive(Debug, Deserialize)]
struct Cluster {
    id: i64,
    #[serde(default)]
    case_name: Option<String>,
    #[serde(default)]
    date_filed: Option<String>,
    #[serde(default)]
    court_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpinionPage {
    #[serde(default)]
    results: Vec<Opinion>,
}

#[derive(Debug, Deserialize)]
struct Opinion {
    #[serde(default)]
    plain_text: Option<String>,
}

impl CourtListenerLookup {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build case-law HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Anonymous access works at a lower rate limit, so a missing token is
    /// not an error.
    pub fn from_config(config: &CaseLawConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            std::env::var(&config.token_env).ok(),
            config.timeout(),
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Token {}", token)),
            None => request,
        }
    }

    async fn opinion_text(&self, cluster_id: i64) -> Option<String> {
        let cluster = cluster_id.to_string();
        let request = self
            .client
            .get(format!("{}/opinions/", self.base_url))
            .query(&[("cluster", cluster.as_str()), ("fields", "plain_text")]);
        let result = async {
            let resp = self.authorize(request).send().await?.error_for_status()?;
            resp.json::<OpinionPage>().await
        }
        .await;
        match result {
            Ok(page) => page
                .results
                .into_iter()
                .filter_map(|o| o.plain_text)
                .find(|t| !t.trim().is_empty()),
            Err(e) => {
                warn!(cluster_id, error = %e, "Opinion text unavailable");
                None
            }
        }
    }
}

fn record_from_cluster(cluster: Cluster) -> CaseRecord {
    CaseRecord {
        source_id: format!("cl-{}", cluster.id),
        case_name: cluster.case_name,
        court: cluster.court_id,
        decided: cluster
            .date_filed
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        text: None,
        treatment: Treatment::Unknown,
    }
}

/// Interpret a `citation-lookup` answer. Only a definite 404 (or an empty
/// cluster list) is `NotFound`; any other non-200 entry is an error.
fn interpret(entries: Vec<LookupEntry>) -> Result<(LookupResult, Option<i64>)> {
    let Some(entry) = entries.into_iter().next() else {
        return Ok((LookupResult::NotFound, None));
    };
    match entry.status {
        200 => match entry.clusters.into_iter().next() {
            Some(cluster) => {
                let id = cluster.id;
                Ok((LookupResult::Found(record_from_cluster(cluster)), Some(id)))
            }
            None => Ok((LookupResult::NotFound, None)),
        },
        404 => Ok((LookupResult::NotFound, None)),
        status => anyhow::bail!("citation lookup returned entry status {}", status),
    }
}

#[async_trait]
impl CaseLawLookup for CourtListenerLookup {
    async fn lookup(&self, citation: &Citation) -> Result<LookupResult> {
        if citation.kind == CitationKind::Statute {
            anyhow::bail!("statute lookup is not supported: {}", citation.reporter_cite());
        }
        let text = citation.reporter_cite();
        let request = self
            .client
            .post(format!("{}/citation-lookup/", self.base_url))
            .form(&[("text", text.as_str())]);
        let resp = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::Error::from(ProviderError::Timeout(Duration::ZERO))
            } else {
                anyhow::Error::from(ProviderError::Http(e))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body).into());
        }

        let entries: Vec<LookupEntry> = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let (result, cluster_id) = interpret(entries)?;
        debug!(citation = %text, found = cluster_id.is_some(), "Citation lookup");

        match (result, cluster_id) {
            (LookupResult::Found(mut record), Some(id)) => {
                record.text = self.opinion_text(id).await;
                Ok(LookupResult::Found(record))
            }
            (result, _) => Ok(result),
        }
    }
}
