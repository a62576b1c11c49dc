//! Check-in wire format shared by the server and clients.
//!
//! Field names on the wire are fixed by clients already in the field, so the
//! Rust names are mapped onto them with `serde(rename)`.

use serde::{Deserialize, Serialize};

/// Date format used for `Ablaufdatum` (no time of day).
pub const EXPIRY_DATE_FORMAT: &str = "%d.%m.%Y";

/// Body of `POST /api/verify`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckInRequest {
    #[serde(rename = "ClientID", default)]
    pub client_id: Option<String>,
    #[serde(rename = "Lizenz", default)]
    pub license_key: Option<String>,
    #[serde(rename = "Version", default)]
    pub client_version: Option<String>,
    #[serde(rename = "ClientMAC", default)]
    pub hardware_id: Option<String>,
    /// Self-reported public address; wins over proxy headers.
    #[serde(rename = "ClientIP", default)]
    pub client_ip: Option<String>,
}

impl CheckInRequest {
    pub fn client_id(&self) -> &str {
        non_empty(&self.client_id).unwrap_or_default()
    }

    pub fn license_key(&self) -> &str {
        non_empty(&self.license_key).unwrap_or_default()
    }

    pub fn client_version(&self) -> Option<&str> {
        non_empty(&self.client_version)
    }

    pub fn hardware_id(&self) -> Option<&str> {
        non_empty(&self.hardware_id)
    }

    pub fn client_ip(&self) -> Option<&str> {
        non_empty(&self.client_ip)
    }
}

/// Update availability, only sent on a fully accepted check-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateNotice {
    #[serde(rename = "UpdateAvailable")]
    pub available: bool,
    #[serde(rename = "LatestVersion")]
    pub latest_version: Option<String>,
    #[serde(rename = "UpdateURL")]
    pub download_url: Option<String>,
}

impl UpdateNotice {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn available(latest_version: String, download_url: String) -> Self {
        UpdateNotice {
            available: true,
            latest_version: Some(latest_version),
            download_url: Some(download_url),
        }
    }
}

/// Check-in result. `update` is flattened into the top level object and omitted
/// entirely unless the check-in was accepted without warning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckInResponse {
    #[serde(rename = "Lizenzstatus")]
    pub valid: bool,
    #[serde(rename = "Ablaufdatum")]
    pub expiry_date: Option<String>,
    #[serde(rename = "Nachricht")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub update: Option<UpdateNotice>,
}

/// Body returned with HTTP 503 when the store could not be reached in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnavailableResponse {
    pub error: String,
    pub retry: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_client_field_names() {
        let req: CheckInRequest = serde_json::from_value(json!({
            "ClientID": "abc",
            "Lizenz": "key",
            "Version": "1.2",
            "ClientMAC": "",
        }))
        .unwrap();
        assert_eq!(req.client_id(), "abc");
        assert_eq!(req.license_key(), "key");
        assert_eq!(req.client_version(), Some("1.2"));
        assert_eq!(req.hardware_id(), None);
        assert_eq!(req.client_ip(), None);
    }

    #[test]
    fn missing_credentials_read_as_empty() {
        let req: CheckInRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(req.client_id(), "");
        assert_eq!(req.license_key(), "");
    }

    #[test]
    fn update_fields_only_when_present() {
        let rejected = CheckInResponse {
            valid: false,
            expiry_date: None,
            message: Some("License expired".into()),
            update: None,
        };
        let value = serde_json::to_value(&rejected).unwrap();
        assert_eq!(
            value,
            json!({"Lizenzstatus": false, "Ablaufdatum": null, "Nachricht": "License expired"})
        );

        let accepted = CheckInResponse {
            valid: true,
            expiry_date: Some("31.12.2030".into()),
            message: None,
            update: Some(UpdateNotice::available("2.0".into(), "https://dl/x".into())),
        };
        let value = serde_json::to_value(&accepted).unwrap();
        assert_eq!(value["UpdateAvailable"], json!(true));
        assert_eq!(value["LatestVersion"], json!("2.0"));
        assert_eq!(value["UpdateURL"], json!("https://dl/x"));
    }
}
