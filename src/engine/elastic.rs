use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{
    BulkResponse, FieldKind, FragmentQuery, IndexSchema, SearchEngine, SearchHit, SearchResponse,
    SENTENCE_FIELD, VARIETY_FIELD,
};
use crate::config::ElasticsearchConfig;
use crate::models::VideoFragmentDocument;
use crate::{ContextSearchError, Result};

/// Search engine speaking the Elasticsearch REST API
pub struct ElasticsearchEngine {
    base_url: Url,
    credentials: Option<(String, Option<String>)>,
    client: reqwest::Client,
}

impl ElasticsearchEngine {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.url).map_err(|e| {
            ContextSearchError::Configuration(format!("Invalid Elasticsearch URL '{}': {}", config.url, e))
        })?;
        // keep a path prefix such as `/es` when joining request paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            base_url,
            credentials: config
                .username
                .clone()
                .map(|username| (username, config.password.clone())),
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(path).map_err(|e| {
            ContextSearchError::SearchEngine(format!("Invalid request path '{}': {}", path, e))
        })?;

        let request = self.client.request(method, url);
        Ok(match &self.credentials {
            Some((username, password)) => request.basic_auth(username, password.as_ref()),
            None => request,
        })
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        check_status(request.send().await?, what).await
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(ContextSearchError::SearchEngine(format!(
        "{} failed with {}: {}",
        what, status, text
    )))
}

/// Index settings for the given schema
pub fn mapping_body(schema: &IndexSchema) -> Value {
    let properties: Map<String, Value> = schema
        .fields
        .iter()
        .map(|(name, kind)| {
            let mapping = match kind {
                FieldKind::Keyword => json!({ "type": "keyword" }),
                FieldKind::Text => json!({ "type": "text" }),
                FieldKind::Stored => json!({ "type": "object", "enabled": false }),
                FieldKind::StoredInteger => json!({ "type": "integer", "index": false }),
            };
            (name.clone(), mapping)
        })
        .collect();

    json!({ "mappings": { "properties": properties } })
}

/// Newline-delimited bulk payload indexing every document
pub fn bulk_body(documents: &[VideoFragmentDocument]) -> Result<String> {
    let mut body = String::new();
    for document in documents {
        body.push_str("{\"index\":{}}\n");
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
    }
    Ok(body)
}

pub fn delete_by_field_body(field: &str, value: &str) -> Value {
    json!({ "query": { "term": { field: value } } })
}

/// Alias actions that move `alias` from `previous` to `index` in one request
pub fn alias_actions(alias: &str, previous: Option<&str>, index: &str) -> Value {
    let mut actions = Vec::new();
    if let Some(previous) = previous.filter(|previous| *previous != index) {
        actions.push(json!({ "remove": { "index": previous, "alias": alias } }));
    }
    actions.push(json!({ "add": { "index": index, "alias": alias } }));
    json!({ "actions": actions })
}

/// Phrase query on the sentence with the whole field highlighted as one fragment
pub fn search_body(query: &FragmentQuery) -> Value {
    let mut filter = Vec::new();
    if !query.variety.is_wildcard() {
        filter.push(json!({ "term": { VARIETY_FIELD: query.variety.as_str() } }));
    }

    json!({
        "from": query.from,
        "size": query.size,
        "track_total_hits": true,
        "query": {
            "bool": {
                "must": [{ "match_phrase": { SENTENCE_FIELD: query.phrase } }],
                "filter": filter
            }
        },
        "highlight": {
            "fields": {
                SENTENCE_FIELD: { "number_of_fragments": 0 }
            }
        }
    })
}

pub fn parse_bulk_response(response: &Value) -> BulkResponse {
    let items = response["items"].as_array().map(Vec::as_slice).unwrap_or_default();
    let failures = items
        .iter()
        .filter_map(|item| {
            let error = item
                .as_object()
                .and_then(|actions| actions.values().next())
                .map(|action| &action["error"])
                .filter(|error| !error.is_null())?;
            Some(
                error["reason"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            )
        })
        .collect::<Vec<_>>();

    // some clusters report `errors: true` without per-item detail
    let failures = if failures.is_empty() && response["errors"].as_bool() == Some(true) {
        vec!["bulk request reported errors".to_string()]
    } else {
        failures
    };

    BulkResponse {
        took_ms: response["took"].as_u64().unwrap_or_default(),
        items: items.len(),
        failures,
    }
}

pub fn parse_search_response(response: Value) -> Result<SearchResponse> {
    let total = response["hits"]["total"]["value"]
        .as_u64()
        .or_else(|| response["hits"]["total"].as_u64())
        .unwrap_or_default();

    let hits = response["hits"]["hits"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|hit| {
            let document: VideoFragmentDocument = serde_json::from_value(hit["_source"].clone())?;
            let highlight = hit["highlight"][SENTENCE_FIELD][0].as_str().map(str::to_string);
            Ok(SearchHit {
                document,
                highlight,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SearchResponse { total, hits })
}

/// `_meta` of the first index in a `GET /{index}/_mapping` response
pub fn parse_mapping_meta(response: &Value) -> HashMap<String, Value> {
    response
        .as_object()
        .and_then(|indices| indices.values().next())
        .and_then(|index| index["mappings"]["_meta"].as_object())
        .map(|meta| meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[async_trait]
impl SearchEngine for ElasticsearchEngine {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self.request(Method::HEAD, index)?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(ContextSearchError::SearchEngine(format!(
                "Checking index {} failed with {}",
                index, status
            ))),
        }
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        let request = self.request(Method::PUT, index)?.json(&mapping_body(schema));
        self.send(request, &format!("Creating index {}", index)).await?;
        debug!("📂 Created index {}", index);
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let response = self.request(Method::DELETE, index)?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                warn!("Index {} was already gone", index);
                Ok(())
            }
            status if status.is_success() => Ok(()),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(ContextSearchError::SearchEngine(format!(
                    "Deleting index {} failed with {}: {}",
                    index, status, text
                )))
            }
        }
    }

    async fn bulk_write(
        &self,
        index: &str,
        documents: &[VideoFragmentDocument],
    ) -> Result<BulkResponse> {
        let request = self
            .request(Method::POST, &format!("{}/_bulk", index))?
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(documents)?);

        let response: Value = self
            .send(request, &format!("Bulk write to {}", index))
            .await?
            .json()
            .await?;
        Ok(parse_bulk_response(&response))
    }

    async fn delete_by_field(&self, index: &str, field: &str, value: &str) -> Result<u64> {
        let request = self
            .request(Method::POST, &format!("{}/_delete_by_query?refresh=true", index))?
            .json(&delete_by_field_body(field, value));

        let response: Value = self
            .send(request, &format!("Deleting {}={} from {}", field, value, index))
            .await?
            .json()
            .await?;
        Ok(response["deleted"].as_u64().unwrap_or_default())
    }

    async fn put_alias(&self, index: &str, alias: &str) -> Result<()> {
        let previous = self.aliased_index_name(alias).await?;
        let request = self
            .request(Method::POST, "_aliases")?
            .json(&alias_actions(alias, previous.as_deref(), index));

        self.send(request, &format!("Pointing alias {} at {}", alias, index))
            .await?;
        Ok(())
    }

    async fn aliased_index_name(&self, alias: &str) -> Result<Option<String>> {
        let response = self
            .request(Method::GET, &format!("_alias/{}", alias))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response: Value = check_status(response, &format!("Reading alias {}", alias))
            .await?
            .json()
            .await?;
        Ok(response
            .as_object()
            .and_then(|indices| indices.keys().next().cloned()))
    }

    async fn index_metadata(&self, index: &str) -> Result<HashMap<String, Value>> {
        let request = self.request(Method::GET, &format!("{}/_mapping", index))?;
        let response: Value = self
            .send(request, &format!("Reading mapping of {}", index))
            .await?
            .json()
            .await?;
        Ok(parse_mapping_meta(&response))
    }

    async fn set_index_metadata(&self, index: &str, metadata: HashMap<String, Value>) -> Result<()> {
        let request = self
            .request(Method::PUT, &format!("{}/_mapping", index))?
            .json(&json!({ "_meta": metadata }));
        self.send(request, &format!("Writing metadata of {}", index))
            .await?;
        Ok(())
    }

    async fn search(&self, index: &str, query: &FragmentQuery) -> Result<SearchResponse> {
        let request = self
            .request(Method::POST, &format!("{}/_search", index))?
            .json(&search_body(query));

        let response: Value = self
            .send(request, &format!("Searching {}", index))
            .await?
            .json()
            .await?;
        parse_search_response(response)
    }
}
