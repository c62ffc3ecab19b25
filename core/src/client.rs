//! Stateless HTTP request builder and response parser for the inventory API.
//!
//! # Design
//! `ApiClient` holds only its configuration and carries no mutable state
//! between calls. Each endpoint operation is split into a `build_*` method
//! that produces an `HttpRequest` and a `parse_*` method that consumes an
//! `HttpResponse`. The caller executes the actual HTTP round-trip, keeping
//! the core deterministic and free of I/O dependencies.
//!
//! `list_all` is the one async entry point: it drains a whole collection
//! through `batch_get`, using a caller-supplied transport closure for each
//! page.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::batch::{batch_get, BatchConfig};
use crate::config::{ClientConfig, Credentials};
use crate::error::{ApiError, ApiResult};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::query::{compose, Pagination, QueryOptions};
use crate::types::{BatchResult, ErrorBody, ListResponse, Meta, MetaRef};

const ACCEPT: &str = "application/json;charset=utf-8";
const CONTENT_TYPE: &str = "application/json";

/// Stateless client for the inventory API's entity endpoints.
///
/// Builds `HttpRequest` values and parses `HttpResponse` values without
/// touching the network. The caller is responsible for executing the HTTP
/// round-trip between `build_*` and `parse_*`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    credentials: Credentials,
    user_agent: String,
    batch: BatchConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials: config.credentials,
            user_agent: config.user_agent,
            batch: config.batch,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }

    /// `{base}/entity/{entity}`
    pub fn entity_url(&self, entity: &str) -> String {
        format!("{}/entity/{entity}", self.base_url)
    }

    /// `{base}/entity/{entity}/{id}`
    pub fn entity_href(&self, entity: &str, id: Uuid) -> String {
        format!("{}/{id}", self.entity_url(entity))
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    pub fn build_list(&self, entity: &str, options: &QueryOptions) -> ApiResult<HttpRequest> {
        let path = with_query(self.entity_url(entity), options)?;
        Ok(self.request(HttpMethod::Get, path, None))
    }

    pub fn build_get(&self, entity: &str, id: Uuid, options: &QueryOptions) -> ApiResult<HttpRequest> {
        let path = with_query(self.entity_href(entity, id), options)?;
        Ok(self.request(HttpMethod::Get, path, None))
    }

    pub fn build_create<T: Serialize + ?Sized>(&self, entity: &str, input: &T) -> ApiResult<HttpRequest> {
        let body = to_json(input)?;
        Ok(self.request(HttpMethod::Post, self.entity_url(entity), Some(body)))
    }

    /// Create or update several entities in one call. Items carrying a
    /// `meta` are updated, the rest are created.
    pub fn build_batch_create<T: Serialize>(&self, entity: &str, items: &[T]) -> ApiResult<HttpRequest> {
        self.build_create(entity, items)
    }

    pub fn build_update<T: Serialize + ?Sized>(
        &self,
        entity: &str,
        id: Uuid,
        input: &T,
    ) -> ApiResult<HttpRequest> {
        let body = to_json(input)?;
        Ok(self.request(HttpMethod::Put, self.entity_href(entity, id), Some(body)))
    }

    pub fn build_delete(&self, entity: &str, id: Uuid) -> HttpRequest {
        self.request(HttpMethod::Delete, self.entity_href(entity, id), None)
    }

    pub fn build_batch_delete(&self, entity: &str, ids: &[Uuid]) -> ApiResult<HttpRequest> {
        let refs: Vec<MetaRef> = ids
            .iter()
            .map(|id| MetaRef {
                meta: Meta {
                    href: self.entity_href(entity, *id),
                    entity_type: entity.to_string(),
                    media_type: Some(CONTENT_TYPE.to_string()),
                },
            })
            .collect();
        let body = to_json(&refs)?;
        let path = format!("{}/delete", self.entity_url(entity));
        Ok(self.request(HttpMethod::Post, path, Some(body)))
    }

    fn request(&self, method: HttpMethod, path: String, body: Option<String>) -> HttpRequest {
        let mut headers = vec![
            ("authorization".to_string(), self.credentials.authorization_header()),
            ("user-agent".to_string(), self.user_agent.clone()),
            ("accept".to_string(), ACCEPT.to_string()),
        ];
        if body.is_some() {
            headers.push(("content-type".to_string(), CONTENT_TYPE.to_string()));
        }
        HttpRequest {
            method,
            path,
            headers,
            body,
        }
    }

    // -----------------------------------------------------------------------
    // Parsers
    // -----------------------------------------------------------------------

    pub fn parse_list<T, C>(&self, response: HttpResponse) -> ApiResult<ListResponse<T, C>>
    where
        T: DeserializeOwned,
        C: DeserializeOwned,
    {
        check_status(&response)?;
        from_json(&response.body)
    }

    /// Parse a single entity from a get, create or update response.
    pub fn parse_entity<T: DeserializeOwned>(&self, response: HttpResponse) -> ApiResult<T> {
        check_status(&response)?;
        from_json(&response.body)
    }

    /// Parse the array returned by a batch create.
    pub fn parse_entities<T: DeserializeOwned>(&self, response: HttpResponse) -> ApiResult<Vec<T>> {
        check_status(&response)?;
        from_json(&response.body)
    }

    pub fn parse_delete(&self, response: HttpResponse) -> ApiResult<()> {
        check_status(&response)
    }

    pub fn parse_batch_delete(&self, response: HttpResponse) -> ApiResult<()> {
        check_status(&response)
    }

    // -----------------------------------------------------------------------
    // Fetch-all
    // -----------------------------------------------------------------------

    /// Fetch every row of `entity` matching `options`.
    ///
    /// `execute` performs one HTTP round-trip; it is called once for the
    /// first page and then concurrently, up to the configured concurrency
    /// limit, for the rest. Any pagination in `options` is replaced by the
    /// drain's own paging.
    #[tracing::instrument(skip_all, fields(entity = entity))]
    pub async fn list_all<T, C, X, Fut>(
        &self,
        entity: &str,
        options: &QueryOptions,
        execute: X,
    ) -> ApiResult<BatchResult<T, C>>
    where
        T: DeserializeOwned,
        C: DeserializeOwned,
        X: Fn(HttpRequest) -> Fut,
        Fut: Future<Output = ApiResult<HttpResponse>>,
    {
        let execute = &execute;
        let has_expand = options.has_expand();
        batch_get(
            &self.batch,
            |limit, offset| {
                let page = QueryOptions {
                    pagination: Some(Pagination {
                        limit: Some(limit),
                        offset: Some(offset),
                    }),
                    ..options.clone()
                };
                let request = self.build_list(entity, &page);
                async move {
                    let response = execute(request?).await?;
                    self.parse_list(response)
                }
            },
            has_expand,
        )
        .await
    }
}

fn with_query(url: String, options: &QueryOptions) -> ApiResult<String> {
    Ok(match compose(options)? {
        Some(params) => format!("{url}?{}", params.to_query_string()),
        None => url,
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> ApiResult<String> {
    serde_json::to_string(value).map_err(|e| ApiError::SerializationError(e.to_string()))
}

fn from_json<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse) -> ApiResult<()> {
    if response.is_success() {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    match serde_json::from_str::<ErrorBody>(&response.body) {
        Ok(body) if !body.errors.is_empty() => Err(ApiError::Api {
            status: response.status,
            errors: body.errors,
        }),
        _ => Err(ApiError::HttpError {
            status: response.status,
            body: response.body.clone(),
        }),
    }
}
