//! HTTP clients for a remote chunk index and reranker service.
//!
//! Endpoints (relative to the base URL):
//! - `POST /search` with `{production_id, query, limit, mode}` where `mode`
//!   is `"semantic"` or `"keyword"`, returning `{hits: [IndexHit]}`
//! - `POST /rerank` with `{query, documents: [text]}`, returning `{scores}`

use std::time::Duration;

use async_trait::async_trait;
use deficiency_core::EvidenceChunk;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{IndexHit, Reranker, RetrievalError, VectorIndex};

fn transport_error(err: reqwest::Error) -> RetrievalError {
    if err.is_timeout() {
        RetrievalError::Timeout
    } else if err.is_decode() {
        RetrievalError::Malformed(err.to_string())
    } else {
        RetrievalError::Unavailable(err.to_string())
    }
}

async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    body: &Req,
) -> Result<Resp, RetrievalError>
where
    Req: Serialize + ?Sized,
    Resp: for<'de> Deserialize<'de>,
{
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(transport_error)?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(RetrievalError::Unavailable(format!(
            "server returned {}: {body}",
            status.as_u16()
        )));
    }
    resp.json().await.map_err(transport_error)
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, RetrievalError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RetrievalError::Unavailable(e.to_string()))
}

// ── HttpIndex ──

#[derive(Serialize)]
struct SearchRequest<'a> {
    production_id: &'a str,
    query: &'a str,
    limit: usize,
    mode: &'static str,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<IndexHit>,
}

/// Remote chunk index.
pub struct HttpIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIndex {
    /// `base_url` like `http://localhost:8080` (a trailing slash is trimmed).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn search(
        &self,
        production_id: &str,
        query: &str,
        limit: usize,
        mode: &'static str,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        let url = format!("{}/search", self.base_url);
        let request = SearchRequest {
            production_id,
            query,
            limit,
            mode,
        };
        let resp: SearchResponse = post_json(&self.client, &url, &request).await?;
        debug!(production_id, mode, hits = resp.hits.len(), "index search");
        Ok(resp.hits)
    }
}

#[async_trait]
impl VectorIndex for HttpIndex {
    async fn semantic_search(
        &self,
        production_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        self.search(production_id, query_text, limit, "semantic").await
    }

    async fn keyword_search(
        &self,
        production_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        self.search(production_id, query_text, limit, "keyword").await
    }
}

// ── HttpReranker ──

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: Vec<&'a str>,
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// Remote cross-encoder reranker.
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReranker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query_text: &str,
        candidates: &[EvidenceChunk],
    ) -> Result<Vec<f32>, RetrievalError> {
        let url = format!("{}/rerank", self.base_url);
        let request = RerankRequest {
            query: query_text,
            documents: candidates.iter().map(|c| c.chunk_text.as_str()).collect(),
        };
        let resp: RerankResponse = post_json(&self.client, &url, &request)
            .await
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        Ok(resp.scores)
    }
}
