//! Client core for a paginated inventory/e-commerce REST API.
//!
//! # Overview
//! Builds `HttpRequest` values and parses `HttpResponse` values without
//! touching the network (host-does-IO pattern). On top of that sit two
//! reusable primitives: `query::compose`, which flattens pagination, expand,
//! order, search and filter options into query parameters, and
//! `batch::batch_get`, which drains a whole collection page by page with
//! bounded concurrency.
//!
//! # Design
//! - `ApiClient` is stateless: it holds only its configuration.
//! - Each endpoint operation is split into `build_*` (produces request) and
//!   `parse_*` (consumes response), so the I/O boundary is explicit.
//! - `ApiClient::list_all` is the only async operation; it takes the
//!   transport as a closure, so any HTTP library or runtime can drive it.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod query;
pub mod types;

pub use batch::{batch_get, for_each_bounded, BatchConfig};
pub use client::ApiClient;
pub use config::{ClientConfig, Credentials};
pub use error::{ApiError, ApiResult};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use query::{
    compose, Direction, Expand, ExpandNode, Filter, FilterOp, FilterValue, Order, OrderTerm,
    Pagination, QueryOptions, QueryParams, Scalar,
};
pub use types::{
    ApiErrorItem, BatchResult, CreateProduct, ErrorBody, ListMeta, ListResponse, Meta, MetaRef,
    Product, UpdateProduct,
};
