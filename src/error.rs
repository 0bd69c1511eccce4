// HTTP API error types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

/// Uniform (status, detail) error pair raised anywhere in the request
/// pipeline and rendered into the standard error envelope at the outermost
/// dispatch boundary.
#[derive(Debug)]
pub enum ApiError {
    // 400
    BadRequest(String),
    // 401
    Unauthorized(String),
    // 403
    Forbidden(String),
    // 404
    NotFound(String),
    // 405
    MethodNotAllowed(String),
    // 500
    InternalError(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::MethodNotAllowed(_) => 405,
            ApiError::InternalError(_) => 500,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::MethodNotAllowed(msg)
            | ApiError::InternalError(msg) => msg,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "success": false,
            "status": self.status_code(),
            "detail": self.detail(),
        })
    }
}

// Static constructors
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        ApiError::MethodNotAllowed(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::InternalError(message.into())
    }
}

impl From<crate::schema::SchemaError> for ApiError {
    fn from(err: crate::schema::SchemaError) -> Self {
        // Referencing a field outside the declared schema is a config
        // inconsistency, not a client error
        ApiError::internal(err.to_string())
    }
}

impl From<crate::filter::FilterError> for ApiError {
    fn from(err: crate::filter::FilterError) -> Self {
        match err {
            crate::filter::FilterError::Schema(e) => ApiError::internal(e.to_string()),
            crate::filter::FilterError::Store(e) => {
                tracing::error!("store error while compiling filter: {}", e);
                ApiError::internal("An error occurred while processing your request")
            }
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

impl From<crate::tenant::TenantError> for ApiError {
    fn from(err: crate::tenant::TenantError) -> Self {
        match err {
            crate::tenant::TenantError::UnknownTenant(id) => {
                ApiError::not_found(format!("Unknown tenant: {}", id))
            }
            crate::tenant::TenantError::MissingConnectionParams(id) => {
                tracing::error!("tenant {} has no usable connection record", id);
                ApiError::internal("Tenant connection is not configured")
            }
            crate::tenant::TenantError::Store(e) => {
                tracing::error!("master store error resolving tenant: {}", e);
                ApiError::internal("Failed to resolve tenant")
            }
        }
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound(msg) => ApiError::not_found(msg),
            other => {
                tracing::error!("backend error: {}", other);
                ApiError::internal("An error occurred while processing your request")
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.detail())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_mirrors_status() {
        let err = ApiError::forbidden("Changes on field(s): secret is not allowed");
        let body = err.to_json();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["status"], json!(403));
        assert_eq!(
            body["detail"],
            json!("Changes on field(s): secret is not allowed")
        );
    }
}
