use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::media::{ProxyError, SelectionError};
use crate::wifi::WifiError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(rename = "rawData", skip_serializing_if = "Option::is_none")]
    raw_data: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
    pub raw_data: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
            raw_data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: None,
            raw_data: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{} {}: {:?}", self.status, self.message, self.details);
        } else {
            warn!("{} {}", self.status, self.message);
        }

        let body = Json(ErrorBody {
            success: false,
            error: self.message,
            details: self.details,
            raw_data: self.raw_data,
        });

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(format!("{:#}", err))
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::MissingField => ApiError::bad_request(err.to_string()),
            ProxyError::BinaryMissing(_) => {
                ApiError::internal("Internal Server Error: yt-dlp binary not found")
                    .with_details(err.to_string())
            }
            ProxyError::Spawn(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl From<SelectionError> for ApiError {
    fn from(err: SelectionError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<WifiError> for ApiError {
    fn from(err: WifiError) -> Self {
        match err {
            WifiError::Image(ref source) => {
                ApiError::internal(err.to_string()).with_details(source.to_string())
            }
            WifiError::NotWifi { raw } => ApiError {
                raw_data: Some(raw),
                ..ApiError::bad_request(
                    "The QR code does not contain valid WiFi information",
                )
            },
            other => ApiError::bad_request(other.to_string()),
        }
    }
}
