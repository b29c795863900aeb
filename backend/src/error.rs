use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    admission::{RejectReason, Rejection},
    fetch::FetchError,
    settings::SettingsError,
    video_id::VideoUrlError,
};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            retry_after_seconds: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn invalid_body(detail: impl std::fmt::Display) -> Self {
        Self {
            code: Some("INVALID_BODY"),
            ..Self::bad_request(format!("Invalid request body: {detail}"))
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            code: Some("UNAUTHORIZED"),
            ..Self::new(StatusCode::UNAUTHORIZED, message)
        }
    }

    pub fn maintenance() -> Self {
        Rejection {
            reason: RejectReason::MaintenanceMode,
            retry_after: None,
        }
        .into()
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        let message = match rejection.reason {
            RejectReason::MaintenanceMode => {
                "The service is under maintenance. Please try again later.".to_string()
            }
            RejectReason::Blocked => "This video is not available for download.".to_string(),
            RejectReason::RateLimited => match rejection.retry_after_seconds() {
                Some(seconds) => {
                    format!("Too many downloads. Try again in {seconds} second(s).")
                }
                None => "Too many downloads. Try again later.".to_string(),
            },
        };

        Self {
            status: rejection.reason.status_code(),
            message,
            code: Some(rejection.reason.code()),
            retry_after_seconds: rejection.retry_after_seconds(),
        }
    }
}

impl From<VideoUrlError> for ApiError {
    fn from(error: VideoUrlError) -> Self {
        Self {
            code: Some("INVALID_URL"),
            ..Self::bad_request(error.to_string())
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(error: SettingsError) -> Self {
        Self {
            code: Some("INVALID_SETTINGS"),
            ..Self::bad_request(error.to_string())
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::NotInstalled | FetchError::Io(_) => Self::internal(error.to_string()),
            FetchError::TimedOut | FetchError::Failed(_) | FetchError::InvalidMetadata(_) => Self {
                code: Some("FETCH_FAILED"),
                ..Self::bad_request(error.to_string())
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
            retry_after_seconds: self.retry_after_seconds,
        });

        let mut response = (self.status, body).into_response();
        if let Some(seconds) = self.retry_after_seconds
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        response
    }
}
