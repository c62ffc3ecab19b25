use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Largest page the list endpoint serves.
pub const MAX_LIMIT: u64 = 1000;
/// Largest page the list endpoint serves when `expand` is requested.
pub const MAX_EXPAND_LIMIT: u64 = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorItem {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub expand: Option<String>,
    pub search: Option<String>,
    pub filter: Option<String>,
    pub order: Option<String>,
}

/// Entities per entity type, in insertion order.
pub type Db = Arc<RwLock<HashMap<String, Vec<Value>>>>;

type ApiError = (StatusCode, Json<ErrorBody>);

fn error(status: StatusCode, code: i64, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            errors: vec![ErrorItem {
                error: message.into(),
                code: Some(code),
            }],
        }),
    )
}

fn not_found(entity: &str, id: Uuid) -> ApiError {
    error(
        StatusCode::NOT_FOUND,
        1021,
        format!("object '{entity}' with id '{id}' not found"),
    )
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/entity/{entity}", get(list_entities).post(create_entities))
        .route("/entity/{entity}/delete", post(batch_delete))
        .route(
            "/entity/{entity}/{id}",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn entity_meta(entity: &str, id: Uuid) -> Value {
    json!({
        "href": format!("/entity/{entity}/{id}"),
        "type": entity,
        "mediaType": "application/json",
    })
}

fn row_id(row: &Value) -> Option<Uuid> {
    row.get("id")?.as_str()?.parse().ok()
}

/// Pull the trailing id out of a `{"meta": {"href": ".../{id}"}}` reference.
fn href_id(reference: &Value) -> Option<Uuid> {
    meta_id(reference.get("meta")?)
}

fn meta_id(meta: &Value) -> Option<Uuid> {
    let href = meta.get("href")?.as_str()?;
    href.rsplit('/').next()?.parse().ok()
}

fn field_text(row: &Value, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Equality clauses grouped by field, in first-seen order.
type FieldClauses<'a> = Vec<(&'a str, Vec<&'a str>)>;

/// Split a `field=value` clause. Any other operator (`!=`, `>`, `<=`, `~`,
/// `~=`, `=~` and so on) yields `None`.
fn equality_clause(clause: &str) -> Option<(&str, &str)> {
    let at = clause.find(['!', '=', '<', '>', '~'])?;
    let (field, rest) = clause.split_at(at);
    let value = rest.strip_prefix('=')?;
    (!field.is_empty() && !value.starts_with('~')).then_some((field, value))
}

/// Only equality is supported (`field=value`, `;`-separated). Clauses on the
/// same field are OR-ed, different fields are AND-ed.
fn parse_filter(filter: &str) -> Result<FieldClauses<'_>, ApiError> {
    let mut by_field: FieldClauses<'_> = Vec::new();
    for clause in filter.split(';').filter(|c| !c.is_empty()) {
        let (field, value) = equality_clause(clause).ok_or_else(|| {
            error(
                StatusCode::BAD_REQUEST,
                1000,
                format!("unsupported filter clause '{clause}'"),
            )
        })?;
        match by_field.iter_mut().find(|(f, _)| *f == field) {
            Some((_, values)) => values.push(value),
            None => by_field.push((field, vec![value])),
        }
    }
    Ok(by_field)
}

fn matches_filter(row: &Value, clauses: &[(&str, Vec<&str>)]) -> bool {
    clauses.iter().all(|(field, values)| {
        let actual = field_text(row, field);
        values.iter().any(|value| match &actual {
            Some(actual) => actual.as_str() == *value,
            None => value.is_empty(),
        })
    })
}

/// `field` or `field,asc|desc` terms joined by `;`. Fields compare by their
/// text form; missing values sort first.
fn sort_rows(rows: &mut [&Value], order: &str) -> Result<(), ApiError> {
    let mut terms = Vec::new();
    for term in order.split(';').filter(|t| !t.is_empty()) {
        let (field, direction) = term.split_once(',').unwrap_or((term, "asc"));
        let descending = match direction {
            "asc" => false,
            "desc" => true,
            _ => {
                return Err(error(
                    StatusCode::BAD_REQUEST,
                    1000,
                    format!("unsupported order term '{term}'"),
                ))
            }
        };
        terms.push((field, descending));
    }
    rows.sort_by(|a, b| {
        terms
            .iter()
            .map(|(field, descending)| {
                let ord = field_text(a, field).cmp(&field_text(b, field));
                if *descending {
                    ord.reverse()
                } else {
                    ord
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(())
}

fn matches_search(row: &Value, search: &str) -> bool {
    let needle = search.to_lowercase();
    ["name", "code"].iter().any(|field| {
        field_text(row, field).is_some_and(|text| text.to_lowercase().contains(&needle))
    })
}

async fn list_entities(
    State(db): State<Db>,
    Path(entity): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let has_expand = params.expand.as_deref().is_some_and(|e| !e.is_empty());
    let max = if has_expand { MAX_EXPAND_LIMIT } else { MAX_LIMIT };
    let limit = params.limit.unwrap_or(max);
    if limit > max {
        return Err(error(
            StatusCode::BAD_REQUEST,
            1000,
            format!("parameter 'limit' must not exceed {max}"),
        ));
    }
    let offset = params.offset.unwrap_or(0);

    let clauses = parse_filter(params.filter.as_deref().unwrap_or_default())?;

    let store = db.read().await;
    let mut matching: Vec<&Value> = store
        .get(&entity)
        .into_iter()
        .flatten()
        .filter(|row| params.search.as_deref().is_none_or(|s| matches_search(row, s)))
        .filter(|row| matches_filter(row, &clauses))
        .collect();
    if let Some(order) = params.order.as_deref() {
        sort_rows(&mut matching, order)?;
    }
    let size = matching.len() as u64;
    let rows: Vec<Value> = matching
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect();
    tracing::debug!(%entity, limit, offset, size, returned = rows.len(), "list");

    Ok(Json(json!({
        "context": {
            "employee": {
                "meta": {"href": "/context/employee", "type": "employee"}
            }
        },
        "meta": {
            "href": format!("/entity/{entity}"),
            "type": entity,
            "size": size,
            "limit": limit,
            "offset": offset,
        },
        "rows": rows,
    })))
}

/// Assign identity to a new object, or merge into an existing one when the
/// payload carries a known `meta.href`.
fn upsert(rows: &mut Vec<Value>, entity: &str, input: Value) -> Result<Value, ApiError> {
    let Value::Object(mut fields) = input else {
        return Err(error(
            StatusCode::BAD_REQUEST,
            2016,
            "entity payload must be a JSON object",
        ));
    };

    if let Some(id) = fields.get("meta").and_then(meta_id) {
        let row = rows
            .iter_mut()
            .find(|row| row_id(row) == Some(id))
            .ok_or_else(|| not_found(entity, id))?;
        fields.remove("meta");
        merge(row, fields);
        return Ok(row.clone());
    }

    let id = Uuid::new_v4();
    fields.insert("id".to_string(), Value::String(id.to_string()));
    fields.insert("meta".to_string(), entity_meta(entity, id));
    fields.entry("archived").or_insert(Value::Bool(false));
    let row = Value::Object(fields);
    rows.push(row.clone());
    Ok(row)
}

fn merge(row: &mut Value, fields: Map<String, Value>) {
    if let Value::Object(existing) = row {
        for (key, value) in fields {
            if key != "id" {
                existing.insert(key, value);
            }
        }
    }
}

async fn create_entities(
    State(db): State<Db>,
    Path(entity): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let rows = store.entry(entity.clone()).or_default();
    match input {
        Value::Array(items) => {
            tracing::debug!(%entity, count = items.len(), "batch create");
            let created = items
                .into_iter()
                .map(|item| upsert(rows, &entity, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Json(Value::Array(created)))
        }
        single => Ok(Json(upsert(rows, &entity, single)?)),
    }
}

async fn get_entity(
    State(db): State<Db>,
    Path((entity, id)): Path<(String, Uuid)>,
) -> Result<Json<Value>, ApiError> {
    let store = db.read().await;
    store
        .get(&entity)
        .and_then(|rows| rows.iter().find(|row| row_id(row) == Some(id)))
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found(&entity, id))
}

async fn update_entity(
    State(db): State<Db>,
    Path((entity, id)): Path<(String, Uuid)>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let row = store
        .get_mut(&entity)
        .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
        .ok_or_else(|| not_found(&entity, id))?;
    merge(row, input);
    Ok(Json(row.clone()))
}

async fn delete_entity(
    State(db): State<Db>,
    Path((entity, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let mut store = db.write().await;
    let rows = store.get_mut(&entity).ok_or_else(|| not_found(&entity, id))?;
    let index = rows
        .iter()
        .position(|row| row_id(row) == Some(id))
        .ok_or_else(|| not_found(&entity, id))?;
    rows.remove(index);
    Ok(StatusCode::OK)
}

async fn batch_delete(
    State(db): State<Db>,
    Path(entity): Path<String>,
    Json(refs): Json<Vec<Value>>,
) -> Result<Json<Value>, ApiError> {
    let ids = refs
        .iter()
        .map(|reference| {
            href_id(reference).ok_or_else(|| {
                error(StatusCode::BAD_REQUEST, 2016, "reference is missing meta.href")
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut store = db.write().await;
    let rows = store.entry(entity.clone()).or_default();
    if let Some(missing) = ids.iter().find(|id| !rows.iter().any(|row| row_id(row) == Some(**id))) {
        return Err(not_found(&entity, *missing));
    }
    rows.retain(|row| row_id(row).is_none_or(|id| !ids.contains(&id)));
    tracing::debug!(%entity, count = ids.len(), "batch delete");

    let info: Vec<Value> = ids
        .iter()
        .map(|id| json!({"info": format!("Entity '{entity}' with UUID: {id} successfully deleted")}))
        .collect();
    Ok(Json(Value::Array(info)))
}
