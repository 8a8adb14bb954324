use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use chrono::{DateTime, Utc};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// One stored resource.
#[derive(Clone, Debug)]
pub struct Object {
    pub body: Bytes,
    pub modified: DateTime<Utc>,
    pub etag: Uuid,
}

pub type Db = Arc<RwLock<HashMap<String, Object>>>;

pub fn app() -> Router {
    app_with_db(Db::default())
}

/// Router over a caller-provided store, so tests can inspect it.
pub fn app_with_db(db: Db) -> Router {
    Router::new().fallback(dispatch).with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn dispatch(State(db): State<Db>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path().to_string();
    let response = match method.as_str() {
        "GET" | "HEAD" => get_object(&db, &path).await,
        "PUT" => put_object(&db, path.clone(), &headers, body).await,
        "DELETE" => delete_object(&db, &path).await,
        "MOVE" => move_object(&db, &path, &headers).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };
    tracing::info!(%method, path = %path, status = response.status().as_u16(), "handled");
    response
}

async fn get_object(db: &Db, path: &str) -> Response {
    let objects = db.read().await;
    let Some(object) = objects.get(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.body.len()));
    if let Ok(value) = HeaderValue::from_str(&http_date(object.modified)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", object.etag)) {
        headers.insert(header::ETAG, value);
    }
    (StatusCode::OK, headers, object.body.clone()).into_response()
}

async fn put_object(db: &Db, path: String, headers: &HeaderMap, body: Bytes) -> Response {
    let modified = headers
        .get(header::DATE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|time| time.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let object = Object {
        body,
        modified,
        etag: Uuid::new_v4(),
    };
    match db.write().await.insert(path, object) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::CREATED.into_response(),
    }
}

async fn delete_object(db: &Db, path: &str) -> Response {
    match db.write().await.remove(path) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn move_object(db: &Db, path: &str, headers: &HeaderMap) -> Response {
    let Some(destination) = headers
        .get("destination")
        .and_then(|value| value.to_str().ok())
        .and_then(destination_path)
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let mut objects = db.write().await;
    let Some(object) = objects.remove(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match objects.insert(destination, object) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::CREATED.into_response(),
    }
}

/// Accepts an absolute URL or a bare path.
fn destination_path(value: &str) -> Option<String> {
    let uri: Uri = value.parse().ok()?;
    let path = uri.path();
    path.starts_with('/').then(|| path.to_string())
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
