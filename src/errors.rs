use crate::handlers::xml::{XML_DECLARATION, xml_escape};
use crate::services::gateway_service::{ErrorKind, GatewayError};
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;
use uuid::Uuid;

/// An S3 error document ready to be sent to the client.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub resource: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status, S3 code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            resource: None,
        }
    }

    /// Shortcut for a 500 InternalError
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
    }

    /// Attach the request path the error refers to.
    pub fn at(err: GatewayError, resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            ..Self::from(err)
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::TransportFailure => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::PartialFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut xml = String::from(XML_DECLARATION);
        xml.push_str("<Error>");
        xml.push_str(&format!("<Code>{}</Code>", self.code));
        xml.push_str(&format!("<Message>{}</Message>", xml_escape(&self.message)));
        if let Some(resource) = &self.resource {
            xml.push_str(&format!("<Resource>{}</Resource>", xml_escape(resource)));
        }
        xml.push_str(&format!("<RequestId>{}</RequestId>", Uuid::new_v4()));
        xml.push_str("</Error>");

        let mut response = Response::new(Body::from(xml));
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml"),
        );
        response
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let status = status_for(err.kind());
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError::new(status, err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::CatalogError;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn renders_s3_error_document() {
        let err = AppError::at(
            CatalogError::NoSuchBucket("ghost".into()).into(),
            "/ghost",
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/xml"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.starts_with(XML_DECLARATION));
        assert!(body.contains("<Code>NoSuchBucket</Code>"));
        assert!(body.contains("<Resource>/ghost</Resource>"));
        assert!(body.contains("<RequestId>"));
    }

    #[test]
    fn every_kind_has_a_status() {
        assert_eq!(status_for(ErrorKind::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::AccessDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::TransportFailure),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(ErrorKind::PartialFailure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn display_includes_code() {
        let err = AppError::internal("a < b & c");
        let rendered = err.to_string();
        assert_eq!(rendered, "InternalError: a < b & c");
    }
}
