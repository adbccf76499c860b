//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

use crate::mbtiles::MbtilesError;

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Mbtiles(#[from] MbtilesError),

    /// The upstream could not be reached or its body could not be read.
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The route's backing service is not configured.
    #[error("{0} is not configured")]
    Disabled(&'static str),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Mbtiles(MbtilesError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Mbtiles(MbtilesError::DownloadFailure(_)) => StatusCode::BAD_GATEWAY,
            ServerError::Mbtiles(MbtilesError::ExtractionFailure(_))
            | ServerError::Mbtiles(MbtilesError::Unavailable(_))
            | ServerError::Mbtiles(MbtilesError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Disabled(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::Mbtiles(MbtilesError::NotFound("x".into())), 404),
            (ServerError::Mbtiles(MbtilesError::DownloadFailure("x".into())), 502),
            (ServerError::Mbtiles(MbtilesError::ExtractionFailure("x".into())), 500),
            (ServerError::Upstream("reset".into()), 502),
            (ServerError::BadRequest("lod".into()), 400),
            (ServerError::Disabled("proxy"), 404),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status().as_u16(), expected, "{}", err);
        }
    }
}
