//! # Service Response Envelope
//!
//! Every command handled over the bus answers with a [`ServiceResponse`].
//! Failures travel as `success: false` plus a message, never as a raw error.

use serde::{Deserialize, Serialize};

/// Structured result of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ServiceResponse<T> {
    /// Successful response carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    /// Failed response carrying an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Convert into a `Result`, using the error text (or a generic one) on failure.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.error.unwrap_or_else(|| "Unknown service error".to_string()))
        }
    }
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_response_shape() {
        let resp = ServiceResponse::ok(json!({"id": "vm-1"}));
        let value = serde_json::to_value(&resp).unwrap();

        assert_eq!(value, json!({"success": true, "data": {"id": "vm-1"}}));
    }

    #[test]
    fn test_failure_into_result() {
        let resp: ServiceResponse<()> = ServiceResponse::failure("VM not found");
        assert_eq!(resp.into_result(), Err("VM not found".to_string()));
    }

    #[test]
    fn test_decode_without_optional_fields() {
        let resp: ServiceResponse<u32> = serde_json::from_value(json!({"success": false})).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.into_result(), Err("Unknown service error".to_string()));
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Snapshot {
        vm_id: String,
    }

    fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> ServiceResponse<T> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_payload_without_default() {
        let resp: ServiceResponse<Snapshot> =
            decode(json!({"success": true, "data": {"vm_id": "vm-1"}}));
        assert_eq!(resp.data, Some(Snapshot { vm_id: "vm-1".into() }));

        let empty: ServiceResponse<Snapshot> = decode(json!({"success": true}));
        assert_eq!(empty.data, None);
    }
}
