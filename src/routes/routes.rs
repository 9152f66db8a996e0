//! Defines routes for all S3-like bucket and object operations.
//!
//! ## Structure
//! - **Service endpoint**
//!   - `GET    /`: list the caller's buckets
//!
//! - **Bucket-level endpoints**
//!   - `GET    /{bucket}`: list objects
//!   - `PUT    /{bucket}`: create bucket
//!   - `DELETE /{bucket}`: delete bucket
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*key}`: upload object
//!   - `GET    /{bucket}/{*key}`: download object
//!   - `HEAD   /{bucket}/{*key}`: retrieve metadata only
//!   - `DELETE /{bucket}/{*key}`: delete object and its blobs
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        bucket_handlers::{create_bucket, delete_bucket, list_buckets, list_objects},
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, head_object, upload_object},
    },
    services::gateway_service::GatewayService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    routing::{get, put},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Build the router for all S3-compatible routes.
///
/// Request bodies larger than `max_object_size` are rejected with 413
/// before any handler runs. CORS is enabled for `cors_allow_origins`
/// (`*` for any origin) and left off when the list is empty.
pub fn routes(max_object_size: usize, cors_allow_origins: &[String]) -> Router<GatewayService> {
    let router = Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(list_buckets))
        // Object-level routes
        .route(
            "/{bucket}/{*key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        // Bucket-level routes
        .route(
            "/{bucket}",
            get(list_objects).put(create_bucket).delete(delete_bucket),
        )
        .layer(DefaultBodyLimit::max(max_object_size));

    if cors_allow_origins.is_empty() {
        router
    } else {
        router.layer(build_cors(cors_allow_origins))
    }
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|val| val == "*") {
        AllowOrigin::from(Any)
    } else {
        let list = origins
            .iter()
            .filter_map(|val| HeaderValue::from_str(val).ok())
            .collect::<Vec<_>>();
        AllowOrigin::list(list)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::ETAG, header::LAST_MODIFIED, header::LOCATION])
}
