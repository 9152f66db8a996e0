//! HTTP handlers for bucket operations.

use crate::{
    errors::AppError,
    handlers::{
        Caller,
        xml::{build_list_buckets_xml, build_list_objects_xml},
    },
    services::gateway_service::GatewayService,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// GET `/`: list the caller's buckets.
pub async fn list_buckets(
    State(service): State<GatewayService>,
    Caller(account): Caller,
) -> Result<Response, AppError> {
    let listing = service
        .list_buckets(&account)
        .await
        .map_err(|err| AppError::at(err, "/"))?;
    Ok(xml_response(build_list_buckets_xml(&listing)))
}

/// PUT `/{bucket}`: create bucket.
pub async fn create_bucket(
    State(service): State<GatewayService>,
    Caller(account): Caller,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let resource = format!("/{bucket}");
    service
        .create_bucket(&bucket, &account)
        .await
        .map_err(|err| AppError::at(err, resource.clone()))?;

    let location = HeaderValue::from_str(&resource)
        .map_err(|_| AppError::internal("bucket name is not a valid header value"))?;
    let mut response = Response::new(Body::empty());
    response.headers_mut().insert(header::LOCATION, location);
    Ok(response)
}

/// GET `/{bucket}`: list every key in the bucket.
pub async fn list_objects(
    State(service): State<GatewayService>,
    Caller(account): Caller,
    Path(bucket): Path<String>,
) -> Result<Response, AppError> {
    let contents = service
        .list_bucket_contents(&bucket, &account)
        .await
        .map_err(|err| AppError::at(err, format!("/{bucket}")))?;
    Ok(xml_response(build_list_objects_xml(&contents)))
}

/// DELETE `/{bucket}`: delete an empty bucket.
pub async fn delete_bucket(
    State(service): State<GatewayService>,
    Caller(account): Caller,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service
        .delete_bucket(&bucket, &account)
        .await
        .map_err(|err| AppError::at(err, format!("/{bucket}")))?;
    Ok(StatusCode::NO_CONTENT)
}

fn xml_response(xml: String) -> Response {
    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    *response.status_mut() = StatusCode::OK;
    response
}
