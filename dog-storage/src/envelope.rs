//! Uniform response payload returned by every operation that terminates a
//! request.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StorageError;

/// Envelope id used by read and property operations
pub const REPORT_API_ID: &str = "api.report";

/// Envelope id used by the upload pipeline
pub const UPLOAD_API_ID: &str = "api.desktop.upload.crash.log";

/// Envelope schema version
pub const ENVELOPE_VERSION: &str = "1.0";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S:%3f%z";

/// Semantic response code carried in every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Ok,
    ClientError,
    Forbidden,
    ServerError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::ClientError => "CLIENT_ERROR",
            Self::Forbidden => "FORBIDDEN",
            Self::ServerError => "SERVER_ERROR",
        }
    }

    /// Default HTTP status for this code
    pub fn default_status(&self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::ClientError => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseParams {
    /// Correlation id, fresh for every envelope
    pub resmsgid: Uuid,
    pub msgid: Option<String>,
    pub status: ResponseStatus,
    pub err: Option<ResponseCode>,
    pub errmsg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub ver: String,
    pub ts: String,
    pub params: ResponseParams,
    #[serde(rename = "responseCode")]
    pub response_code: ResponseCode,
    pub result: serde_json::Value,
}

impl ResponseEnvelope {
    /// Successful envelope. `err` and `errmsg` are always null.
    pub fn success(id: &str, result: serde_json::Value) -> Self {
        Self::build(id, ResponseCode::Ok, None, result)
    }

    /// Failed envelope. The error code mirrors the response code and the
    /// result is null.
    pub fn failure<S: Into<String>>(id: &str, code: ResponseCode, message: S) -> Self {
        Self::build(id, code, Some(message.into()), serde_json::Value::Null)
    }

    /// Assemble an envelope, keeping status and error fields consistent with
    /// the response code.
    pub fn build(
        id: &str,
        code: ResponseCode,
        message: Option<String>,
        result: serde_json::Value,
    ) -> Self {
        let (status, err, errmsg) = match code {
            ResponseCode::Ok => (ResponseStatus::Success, None, None),
            other => (ResponseStatus::Failed, Some(other), message),
        };

        Self {
            id: id.to_string(),
            ver: ENVELOPE_VERSION.to_string(),
            ts: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            params: ResponseParams {
                resmsgid: Uuid::new_v4(),
                msgid: None,
                status,
                err,
                errmsg,
            },
            response_code: code,
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.params.status == ResponseStatus::Success
    }
}

/// Status code plus envelope: what the route layer sends back
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub envelope: ResponseEnvelope,
}

impl Reply {
    pub fn ok(id: &str, result: serde_json::Value) -> Self {
        Self {
            status: StatusCode::OK,
            envelope: ResponseEnvelope::success(id, result),
        }
    }

    pub fn failure<S: Into<String>>(id: &str, code: ResponseCode, message: S) -> Self {
        Self {
            status: code.default_status(),
            envelope: ResponseEnvelope::failure(id, code, message),
        }
    }

    /// Reply for a canonical error. The public message is supplied by the
    /// caller; backend detail never reaches the envelope.
    pub fn from_error<S: Into<String>>(id: &str, error: &StorageError, message: S) -> Self {
        Self {
            status: error.status_code(),
            envelope: ResponseEnvelope::failure(id, error.response_code(), message),
        }
    }

    pub fn response_code(&self) -> ResponseCode {
        self.envelope.response_code
    }

    /// Answer with a different HTTP status, keeping the envelope
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.envelope.result = result;
        self
    }
}
