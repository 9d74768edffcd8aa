//! JSON response shapes exchanged between the daemon and its clients.

use crate::types::{HistoryEntry, IdentityId, PunchType};
use serde::{Deserialize, Serialize};

/// Local wall-clock format used for timestamps shown to people.
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<IdentityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_score: Option<f32>,
}

impl RegisterResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            identity_id: None,
            liveness_score: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub punch_type: Option<PunchType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_score: Option<f32>,
    /// Local time of the punch, formatted with [`DISPLAY_TIME_FORMAT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthenticateResponse {
    pub fn failure(message: impl Into<String>, liveness_score: Option<f32>) -> Self {
        Self {
            success: false,
            liveness_score,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub name: String,
    pub punch_type: PunchType,
    pub timestamp: String,
    pub confidence: f32,
}

impl From<&HistoryEntry> for HistoryItem {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            name: entry.name.clone(),
            punch_type: entry.punch_type,
            timestamp: entry
                .timestamp
                .with_timezone(&chrono::Local)
                .format(DISPLAY_TIME_FORMAT)
                .to_string(),
            confidence: entry.confidence,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserItem {
    pub id: IdentityId,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsersResponse {
    pub success: bool,
    #[serde(default)]
    pub users: Vec<UserItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_register_failure_omits_optional_fields() {
        let json = serde_json::to_value(RegisterResponse::failure("User already exists")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": false, "message": "User already exists"})
        );
    }

    #[test]
    fn test_authenticate_success_shape() {
        let resp = AuthenticateResponse {
            success: true,
            name: Some("alice".into()),
            punch_type: Some(PunchType::Entry),
            confidence: Some(0.5),
            liveness_score: Some(0.25),
            timestamp: Some("2026-03-02 09:00:00".into()),
            message: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["punch_type"], "ENTRY");
        assert!(json.get("message").is_none());

        let back: AuthenticateResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn test_authenticate_failure_keeps_liveness_score() {
        let resp = AuthenticateResponse::failure("Spoof detected", Some(0.004));
        assert!(!resp.success);
        assert_eq!(resp.liveness_score, Some(0.004));
        assert!(resp.name.is_none());
    }

    #[test]
    fn test_history_item_formats_local_time() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();
        let item = HistoryItem::from(&HistoryEntry {
            name: "bob".into(),
            punch_type: PunchType::Exit,
            timestamp: ts,
            confidence: 0.8,
        });
        let expected = ts.with_timezone(&chrono::Local).format(DISPLAY_TIME_FORMAT).to_string();
        assert_eq!(item.timestamp, expected);
        assert_eq!(item.punch_type, PunchType::Exit);
    }
}
