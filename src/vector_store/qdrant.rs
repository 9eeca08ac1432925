//! HTTP client wrapper for a Qdrant collection holding the knowledge base.

use super::payload::{build_payload, chunk_from_payload, indexed_at, point_id};
use super::{VectorStore, VectorStoreError, check_batch};
use crate::resilience::{CallPolicy, guarded};
use crate::types::{Chunk, RankedChunk};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Qdrant-backed [`VectorStore`] bound to one cosine collection.
pub struct QdrantVectorStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    vector_size: usize,
    policy: CallPolicy,
}

impl QdrantVectorStore {
    /// Construct a store for `collection` at `url`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
        vector_size: usize,
        policy: CallPolicy,
    ) -> Result<Self, VectorStoreError> {
        let client = Client::builder().user_agent("docent/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(VectorStoreError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
            collection: collection.into(),
            vector_size,
            policy,
        })
    }

    /// Name of the backing collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection when it is missing.
    pub async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        guarded("qdrant.ensure_collection", &self.policy, || async move {
            if self.collection_exists().await? {
                return Ok(());
            }
            tracing::debug!(
                collection = %self.collection,
                vector_size = self.vector_size,
                "Creating collection"
            );
            self.create_collection().await
        })
        .await
    }

    async fn create_collection(&self) -> Result<(), VectorStoreError> {
        let body = json!({
            "vectors": {
                "size": self.vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection created");
        })
        .await
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = VectorStoreError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    async fn upsert_points(&self, points: &[Value]) -> Result<(), VectorStoreError> {
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, points = points.len(), "Points indexed");
        })
        .await
    }

    async fn query_points(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryPoint>, VectorStoreError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        Ok(match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points, .. } => points,
        })
    }

    async fn count_points(&self) -> Result<usize, VectorStoreError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/count", self.collection),
            )
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::UnexpectedStatus { status, body });
        }

        let payload: CountResponse = response.json().await?;
        Ok(payload.result.count)
    }

    async fn drop_collection(&self) -> Result<(), VectorStoreError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{}", self.collection))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection dropped");
        })
        .await
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), VectorStoreError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn add(
        &self,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize, VectorStoreError> {
        check_batch(chunks, &vectors, self.vector_size)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let now = indexed_at();
        let points: Vec<Value> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                json!({
                    "id": point_id(chunk),
                    "vector": vector,
                    "payload": build_payload(chunk, &now),
                })
            })
            .collect();

        guarded("qdrant.upsert", &self.policy, || self.upsert_points(&points)).await?;
        Ok(points.len())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<RankedChunk>, VectorStoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let points = guarded("qdrant.search", &self.policy, || {
            self.query_points(&vector, k)
        })
        .await?;

        let mut ranked: Vec<RankedChunk> = points
            .into_iter()
            .map(|point| RankedChunk {
                chunk: chunk_from_payload(point.payload),
                distance: 1.0 - point.score,
            })
            .collect();
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        ranked.truncate(k);
        Ok(ranked)
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        guarded("qdrant.count", &self.policy, || self.count_points()).await
    }

    async fn delete_all(&self) -> Result<(), VectorStoreError> {
        guarded("qdrant.reset", &self.policy, || async move {
            self.drop_collection().await?;
            self.create_collection().await
        })
        .await?;
        tracing::info!(collection = %self.collection, "Knowledge base reset");
        Ok(())
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{DELETE, GET, POST, PUT},
        MockServer,
    };

    fn store(server: &MockServer) -> QdrantVectorStore {
        QdrantVectorStore::new(
            &server.base_url(),
            Some("secret".into()),
            "documents",
            2,
            CallPolicy::new(5, 0),
        )
        .expect("store")
    }

    #[tokio::test]
    async fn search_maps_scores_to_distances() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .header("api-key", "secret")
                    .json_body_partial(r#"{"limit":2,"with_payload":true}"#);
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            {
                                "id": "b",
                                "score": 0.5,
                                "payload": { "content": "second", "source": "kb.pdf", "page": 3, "header": "H" }
                            },
                            {
                                "id": "a",
                                "score": 0.9,
                                "payload": { "content": "first", "source": "kb.pdf", "page": 1, "header": "H", "questions": "q1|q2" }
                            }
                        ]
                    }
                }));
            })
            .await;

        let results = store(&server)
            .search(vec![0.1, 0.2], 2)
            .await
            .expect("search");

        mock.assert_async().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.content, "first");
        assert!((results[0].similarity() - 0.9).abs() < 1e-6);
        assert_eq!(results[0].chunk.questions, vec!["q1", "q2"]);
        assert_eq!(results[1].chunk.page, 3);
    }

    #[tokio::test]
    async fn add_upserts_points_with_payload() {
        let server = MockServer::start_async().await;
        let chunks = vec![Chunk::new("alpha", 1, "H", "kb.pdf")];
        let expected_id = format!("\"id\":\"{}\"", point_id(&chunks[0]));
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/documents/points")
                    .query_param("wait", "true")
                    .body_contains("\"source\":\"kb.pdf\"")
                    .body_contains(expected_id.as_str());
                then.status(200).json_body(json!({ "status": "ok", "result": {} }));
            })
            .await;

        let stored = store(&server)
            .add(&chunks, vec![vec![0.1, 0.2]])
            .await
            .expect("add");

        mock.assert_async().await;
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn add_rejects_wrong_dimension_without_calling_qdrant() {
        let server = MockServer::start_async().await;
        let chunks = vec![Chunk::new("alpha", 1, "H", "kb.pdf")];
        let error = store(&server)
            .add(&chunks, vec![vec![0.1, 0.2, 0.3]])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn count_reads_exact_count_and_treats_missing_collection_as_empty() {
        let server = MockServer::start_async().await;
        let mut count_mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/documents/points/count");
                then.status(200)
                    .json_body(json!({ "status": "ok", "result": { "count": 42 } }));
            })
            .await;

        let store = store(&server);
        assert_eq!(store.count().await.expect("count"), 42);
        count_mock.delete_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/documents/points/count");
                then.status(404).body("missing");
            })
            .await;
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn delete_all_drops_and_recreates_collection() {
        let server = MockServer::start_async().await;
        let drop = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/collections/documents");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/documents")
                    .json_body(json!({ "vectors": { "size": 2, "distance": "Cosine" } }));
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        store(&server).delete_all().await.expect("reset");

        drop.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn ensure_collection_skips_existing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/documents");
                then.status(200);
            })
            .await;

        store(&server).ensure_collection().await.expect("ensure");
        create.assert_hits_async(0).await;
    }

    #[test]
    fn endpoint_formatting_trims_slashes() {
        assert_eq!(
            format_endpoint("http://q:6333/", "/collections/x"),
            "http://q:6333/collections/x"
        );
        assert!(normalize_base_url("not a url").is_err());
    }
}
