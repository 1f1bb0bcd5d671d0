use serde::Serialize;
use serde_json::Value;

use crate::models::forms::FieldErrors;

/// The JSON envelope every identity route speaks:
/// `{status, message?, error_code?, errors?, data?}`.
#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl FlowResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: Some(message.into()),
            error_code: None,
            errors: None,
            data: None,
        }
    }

    #[must_use]
    pub fn success_with_data(data: Value) -> Self {
        Self {
            status: "success",
            message: None,
            error_code: None,
            errors: None,
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>, error_code: Option<i32>) -> Self {
        Self {
            status: "failure",
            message: Some(message.into()),
            error_code,
            errors: None,
            data: None,
        }
    }

    pub fn failure_with_errors(
        message: impl Into<String>,
        error_code: i32,
        errors: FieldErrors,
    ) -> Self {
        Self {
            status: "failure",
            message: Some(message.into()),
            error_code: Some(error_code),
            errors: Some(errors),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
