// Database models for the license store
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use super::schema::*;

/// One issued license. Timestamps are UTC unix seconds.
#[derive(Queryable, Selectable, Identifiable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = licenses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct License {
    pub id: i32,
    pub owner: Option<String>,
    pub client_id: String,                 // Opaque installation id, unique
    pub license_key: String,               // Secret, unique
    pub acquired_at: i64,
    pub contact: Option<String>,
    pub last_login_at: Option<i64>,
    pub last_login_ip: Option<String>,
    pub last_login_mac: Option<String>,    // Hardware identifier of the last accepted login
    pub anomaly_counter: i32,              // Only ever reset by an operator acknowledge
    pub tool: Option<String>,
    pub expires_at: Option<i64>,           // None means no expiry
    pub client_version: Option<String>,    // Last reported client build
}

impl License {
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Strictly past expiry; a license expiring exactly now is still valid.
    /// `now` keeps its sub-second part, so `X.9` is past an expiry of `X`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|ts| match DateTime::from_timestamp(ts, 0) {
            Some(at) => at < now,
            None => ts < now.timestamp(),
        })
    }
}

#[derive(Insertable, Clone, Debug)]
#[diesel(table_name = licenses)]
pub struct NewLicense {
    pub owner: Option<String>,
    pub client_id: String,
    pub license_key: String,
    pub acquired_at: i64,
    pub contact: Option<String>,
    pub anomaly_counter: i32,
    pub tool: Option<String>,
    pub expires_at: Option<i64>,
}

/// Operator-editable fields of a license; `None` clears the column.
#[derive(AsChangeset, Clone, Debug, PartialEq)]
#[diesel(table_name = licenses)]
#[diesel(treat_none_as_null = true)]
pub struct LicenseChanges {
    pub owner: Option<String>,
    pub contact: Option<String>,
    pub tool: Option<String>,
    pub expires_at: Option<i64>,
}

/// Append-only audit record of a suspicious check-in.
#[derive(Queryable, Selectable, Identifiable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = anomaly_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AnomalyLogEntry {
    pub id: i32,
    pub license_id: Option<i32>,           // None when the client id matched nothing
    pub created_at: i64,
    pub message: String,
}

#[derive(Insertable, Clone, Debug)]
#[diesel(table_name = anomaly_logs)]
pub struct NewAnomalyLogEntry<'a> {
    pub license_id: Option<i32>,
    pub created_at: i64,
    pub message: &'a str,
}

/// One published build of a tool. The newest row per tool (highest id) is the
/// one offered to clients.
#[derive(Queryable, Selectable, Identifiable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = tool_updates)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ToolUpdate {
    pub id: i32,
    pub tool: String,
    pub version: String,
    pub download_count: i32,
    pub last_download_at: Option<i64>,
    pub update_url: String,
}

#[derive(Insertable, Clone, Debug)]
#[diesel(table_name = tool_updates)]
pub struct NewToolUpdate {
    pub tool: String,
    pub version: String,
    pub download_count: i32,
    pub update_url: String,
}
