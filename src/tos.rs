//! Terms of Service resolution.
//!
//! Finds a tool's TOS document, downloads it, and hands it to the
//! analysis client. When no document can be located or fetched the
//! client falls back to interpreting the tool from its name alone, so a
//! scan always yields an analysis value (possibly empty).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::ai::{truncate_chars, AnalysisClient};
use crate::models::{TosAnalysis, Tool};
use crate::store;

/// How much of the raw document is cached on the tool row.
const TOS_CACHE_CHARS: usize = 1000;

pub struct TosService {
    client: Arc<AnalysisClient>,
    http: reqwest::Client,
}

impl TosService {
    pub fn new(client: Arc<AnalysisClient>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client for TOS fetching")?;
        Ok(Self { client, http })
    }

    async fn fetch_document(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch TOS document from {url}"))?
            .error_for_status()
            .with_context(|| format!("TOS document request rejected: {url}"))?;
        Ok(response.text().await?)
    }

    /// Locate, download, and analyze a tool's TOS, persisting the URL and
    /// a content preview on the tool row. Returns an empty analysis when
    /// every stage fails.
    pub async fn resolve_and_analyze(&self, pool: &SqlitePool, tool: &Tool) -> Result<TosAnalysis> {
        let tos_url = match self.client.search_tos_url(&tool.name).await {
            Ok(url) => url,
            Err(err) => {
                warn!(tool = %tool.name, error = %err, "TOS URL search failed");
                None
            }
        };

        if let Some(url) = &tos_url {
            info!(tool = %tool.name, url = %url, "TOS document located");
            match self.fetch_document(url).await {
                Ok(content) => match self.client.analyze_tos(&tool.name, &content).await {
                    Ok(analysis) if !analysis.is_empty() => {
                        let cached = json!({
                            "content": truncate_chars(&content, TOS_CACHE_CHARS),
                            "analysis": analysis,
                        });
                        store::update_tool_tos(pool, tool.id, Some(url), &cached.to_string())
                            .await?;
                        return Ok(analysis);
                    }
                    Ok(_) => warn!(tool = %tool.name, "TOS analysis came back empty"),
                    Err(err) => warn!(tool = %tool.name, error = %err, "TOS analysis failed"),
                },
                Err(err) => warn!(tool = %tool.name, error = %err, "TOS fetch failed"),
            }
        } else {
            warn!(tool = %tool.name, "no TOS URL found, analyzing from name alone");
        }

        // Fall back to interpreting the tool without its document.
        match self.client.analyze_directly(&tool.name).await {
            Ok(Some(analysis)) => {
                let cached = serde_json::to_string(&analysis)?;
                store::update_tool_tos(pool, tool.id, tos_url.as_deref(), &cached).await?;
                info!(tool = %tool.name, "direct analysis succeeded");
                Ok(analysis)
            }
            Ok(None) => {
                warn!(tool = %tool.name, "direct analysis returned no structured result");
                Ok(TosAnalysis::default())
            }
            Err(err) => {
                warn!(tool = %tool.name, error = %err, "direct analysis failed");
                Ok(TosAnalysis::default())
            }
        }
    }
}
