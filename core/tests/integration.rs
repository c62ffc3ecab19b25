//! Entity lifecycle and full-collection drains against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then exercises the core client
//! over real HTTP using ureq. Blocking ureq calls are moved onto tokio's
//! blocking pool when `list_all` needs an async transport.

use std::net::SocketAddr;

use inventory_core::{
    ApiClient, ApiError, ApiResult, BatchConfig, BatchResult, ClientConfig, CreateProduct,
    Credentials, Expand, Filter, HttpMethod, HttpRequest, HttpResponse, OrderTerm, Product,
    QueryOptions, UpdateProduct,
};

/// Execute an `HttpRequest` using ureq and return an `HttpResponse`.
///
/// Disables ureq's automatic status-code-as-error behavior so 4xx/5xx
/// responses are returned as data rather than `Err`, letting the core
/// client handle status interpretation.
fn execute(req: HttpRequest) -> ApiResult<HttpResponse> {
    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();

    let auth = req.header("authorization").unwrap_or_default().to_string();
    let result = match (req.method, req.body) {
        (HttpMethod::Get, _) => agent.get(&req.path).header("authorization", &auth).call(),
        (HttpMethod::Delete, _) => agent.delete(&req.path).header("authorization", &auth).call(),
        (HttpMethod::Post, Some(body)) => agent
            .post(&req.path)
            .header("authorization", &auth)
            .content_type("application/json")
            .send(body.as_bytes()),
        (HttpMethod::Post, None) => agent
            .post(&req.path)
            .header("authorization", &auth)
            .send_empty(),
        (HttpMethod::Put, Some(body)) => agent
            .put(&req.path)
            .header("authorization", &auth)
            .content_type("application/json")
            .send(body.as_bytes()),
        (HttpMethod::Put, None) => agent
            .put(&req.path)
            .header("authorization", &auth)
            .send_empty(),
    };
    let mut response = result.map_err(|e| ApiError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string().unwrap_or_default();

    Ok(HttpResponse {
        status,
        headers: Vec::new(),
        body,
    })
}

async fn execute_async(req: HttpRequest) -> ApiResult<HttpResponse> {
    tokio::task::spawn_blocking(move || execute(req))
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?
}

fn start_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

fn client(addr: SocketAddr, batch: BatchConfig) -> ApiClient {
    let config = ClientConfig::new(format!("http://{addr}"), Credentials::Token("test".to_string()))
        .with_batch(batch);
    ApiClient::new(config)
}

fn seed(client: &ApiClient, count: usize) -> Vec<Product> {
    let items: Vec<CreateProduct> = (0..count)
        .map(|i| CreateProduct {
            name: format!("Product {i:05}"),
            code: Some(format!("P-{i}")),
            archived: i % 3 == 0,
        })
        .collect();
    let req = client.build_batch_create("product", &items).unwrap();
    client.parse_entities(execute(req).unwrap()).unwrap()
}

#[test]
fn entity_lifecycle() {
    let client = client(start_server(), BatchConfig::default());

    // list: empty
    let req = client.build_list("product", &QueryOptions::new()).unwrap();
    let page = client.parse_list::<Product, serde_json::Value>(execute(req).unwrap()).unwrap();
    assert!(page.rows.is_empty(), "expected empty list");
    assert_eq!(page.meta.size, 0);

    // create
    let input = CreateProduct {
        name: "Integration test".to_string(),
        code: None,
        archived: false,
    };
    let req = client.build_create("product", &input).unwrap();
    let created: Product = client.parse_entity(execute(req).unwrap()).unwrap();
    assert_eq!(created.name, "Integration test");
    assert!(!created.archived);
    assert_eq!(created.meta.as_ref().unwrap().entity_type, "product");
    let id = created.id;

    // get
    let req = client.build_get("product", id, &QueryOptions::new()).unwrap();
    let fetched: Product = client.parse_entity(execute(req).unwrap()).unwrap();
    assert_eq!(fetched, created);

    // update
    let update = UpdateProduct {
        archived: Some(true),
        ..Default::default()
    };
    let req = client.build_update("product", id, &update).unwrap();
    let updated: Product = client.parse_entity(execute(req).unwrap()).unwrap();
    assert_eq!(updated.name, "Integration test");
    assert!(updated.archived);

    // delete, then NotFound on get and delete
    let req = client.build_delete("product", id);
    client.parse_delete(execute(req).unwrap()).unwrap();

    let req = client.build_get("product", id, &QueryOptions::new()).unwrap();
    let err = client.parse_entity::<Product>(execute(req).unwrap()).unwrap_err();
    assert!(matches!(err, ApiError::NotFound));

    let req = client.build_delete("product", id);
    let err = client.parse_delete(execute(req).unwrap()).unwrap_err();
    assert!(matches!(err, ApiError::NotFound));
}

#[test]
fn batch_create_and_delete() {
    let client = client(start_server(), BatchConfig::default());
    let created = seed(&client, 4);
    assert_eq!(created.len(), 4);

    let ids: Vec<_> = created.iter().take(3).map(|p| p.id).collect();
    let req = client.build_batch_delete("product", &ids).unwrap();
    client.parse_batch_delete(execute(req).unwrap()).unwrap();

    let req = client.build_list("product", &QueryOptions::new()).unwrap();
    let page = client.parse_list::<Product, serde_json::Value>(execute(req).unwrap()).unwrap();
    assert_eq!(page.rows, vec![created[3].clone()]);
}

#[test]
fn oversized_limit_is_an_api_error() {
    let client = client(start_server(), BatchConfig::default());
    let req = client
        .build_list("product", &QueryOptions::new().limit(5000))
        .unwrap();
    let err = client
        .parse_list::<Product, serde_json::Value>(execute(req).unwrap())
        .unwrap_err();
    assert!(matches!(err, ApiError::Api { status: 400, .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn list_all_drains_every_page_in_order() {
    let addr = start_server();
    let client = client(
        addr,
        BatchConfig {
            limit: 150,
            ..BatchConfig::default()
        },
    );
    let seeded = tokio::task::spawn_blocking({
        let client = client.clone();
        move || seed(&client, 1234)
    })
    .await
    .unwrap();

    let result: BatchResult<Product> = client
        .list_all("product", &QueryOptions::new(), execute_async)
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 1234);
    assert_eq!(result.rows, seeded);
    assert_eq!(result.context["employee"]["meta"]["type"], "employee");
}

#[tokio::test(flavor = "multi_thread")]
async fn list_all_with_expand_stays_under_server_cap() {
    let addr = start_server();
    let client = client(addr, BatchConfig::default());
    tokio::task::spawn_blocking({
        let client = client.clone();
        move || seed(&client, 345)
    })
    .await
    .unwrap();

    let options = QueryOptions::new()
        .expand(Expand::new().field("supplier"))
        .filter(Filter::new().eq("archived", false))
        .order(OrderTerm::desc("name"));
    let result: BatchResult<Product> = client
        .list_all("product", &options, execute_async)
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 230);
    assert!(result.rows.iter().all(|p| !p.archived));
    assert!(result.rows.windows(2).all(|w| w[0].name > w[1].name));
}
