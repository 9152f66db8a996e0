//! HTTP handlers for object operations.
//! Object bodies are streamed from the blob backend on GET; PUT bodies are
//! collected first because the backend needs the length up front.

use crate::{
    errors::AppError,
    handlers::Caller,
    models::object::KeyRecord,
    services::gateway_service::GatewayService,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// PUT `/{bucket}/{*key}`: upload an object.
pub async fn upload_object(
    State(service): State<GatewayService>,
    Caller(account): Caller,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let record = service
        .put_object(&bucket, &key, &account, body, content_type)
        .await
        .map_err(|err| AppError::at(err, format!("/{bucket}/{key}")))?;

    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", record.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// GET `/{bucket}/{*key}`: stream the current object.
pub async fn get_object(
    State(service): State<GatewayService>,
    Caller(account): Caller,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let download = service
        .get_object(&bucket, &key, &account)
        .await
        .map_err(|err| AppError::at(err, format!("/{bucket}/{key}")))?;

    let mut response = Response::new(Body::from_stream(download.body));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &download.record);
    Ok(response)
}

/// HEAD `/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(service): State<GatewayService>,
    Caller(account): Caller,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let record = service
        .head_object(&bucket, &key, &account)
        .await
        .map_err(|err| AppError::at(err, format!("/{bucket}/{key}")))?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &record);
    Ok(response)
}

/// DELETE `/{bucket}/{*key}`: delete the key and every object bound to it.
pub async fn delete_object(
    State(service): State<GatewayService>,
    Caller(account): Caller,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    service
        .delete_object(&bucket, &key, &account)
        .await
        .map_err(|err| AppError::at(err, format!("/{bucket}/{key}")))?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_object_headers(headers: &mut HeaderMap, record: &KeyRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("text/plain")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", record.etag)) {
        headers.insert(header::ETAG, value);
    }

    let last_modified = record.last_modified.format(HTTP_DATE_FORMAT).to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
