//! Operator actions on the license store.
//!
//! These go through the same [`Repository`] primitives as the verification
//! engine; there is no separate write path.

use std::collections::BTreeMap;

use actix_web::HttpRequest;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use keyward::protocol::EXPIRY_DATE_FORMAT;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::db::{AnomalyLogEntry, License, LicenseChanges, NewLicense, NewToolUpdate, ToolUpdate};
use crate::error::StoreError;
use crate::store::{AnomalyLog, LicenseStore, LoginState, Repository, UpdateCatalog};

/// Validity of a license issued without an explicit expiry date.
pub const GENERATED_VALIDITY_DAYS: i64 = 365;

/// Bearer token guard for the operator API.
#[derive(Debug, Clone, Default)]
pub struct AdminToken(Option<String>);

impl AdminToken {
    pub fn new(token: Option<String>) -> Self {
        AdminToken(token)
    }

    /// With no token configured every request is refused.
    pub fn authorize(&self, req: &HttpRequest) -> bool {
        let Some(expected) = self.0.as_deref() else {
            return false;
        };
        req.headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| presented.as_bytes().ct_eq(expected.as_bytes()).into())
    }
}

/// Fields an operator supplies for a new license.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicenseParams {
    pub owner: Option<String>,
    pub contact: Option<String>,
    pub tool: Option<String>,
    /// `DD.MM.YYYY`; anything unparseable means no expiry.
    pub expiry_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckReport {
    pub license_id: i32,
    pub cleared_entries: usize,
}

/// Parse an operator supplied expiry date as midnight UTC.
pub fn parse_expiry_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(value.trim(), EXPIRY_DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn random_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl LicenseParams {
    fn expires_at(&self) -> Option<i64> {
        self.expiry_date
            .as_deref()
            .and_then(parse_expiry_date)
            .map(|at| at.timestamp())
    }
}

pub fn issue_license<R: Repository>(repo: &R, params: &LicenseParams, now: DateTime<Utc>) -> Result<License, StoreError> {
    let expires_at = params.expires_at();

    let new = NewLicense {
        owner: params.owner.clone(),
        client_id: random_id(),
        license_key: random_id(),
        acquired_at: now.timestamp(),
        contact: params.contact.clone(),
        anomaly_counter: 0,
        tool: params.tool.clone(),
        expires_at,
    };
    let license = repo.transaction(|conn| conn.insert_license(&new))?;
    tracing::info!("Issued license {} for client {}", license.id, license.client_id);
    Ok(license)
}

/// Random credentials, valid for [`GENERATED_VALIDITY_DAYS`].
pub fn generate_license<R: Repository>(repo: &R, now: DateTime<Utc>) -> Result<License, StoreError> {
    let new = NewLicense {
        owner: None,
        client_id: random_id(),
        license_key: random_id(),
        acquired_at: now.timestamp(),
        contact: None,
        anomaly_counter: 0,
        tool: None,
        expires_at: Some((now + TimeDelta::days(GENERATED_VALIDITY_DAYS)).timestamp()),
    };
    let license = repo.transaction(|conn| conn.insert_license(&new))?;
    tracing::info!("Generated license {} for client {}", license.id, license.client_id);
    Ok(license)
}

pub fn list_licenses<R: Repository>(repo: &R) -> Result<Vec<License>, StoreError> {
    repo.transaction(|conn| conn.list_licenses())
}

/// Replace owner, contact, tool and expiry of a license. Omitted fields are
/// cleared, as is an expiry that does not parse. `None` if the license is
/// unknown.
pub fn edit_license<R: Repository>(repo: &R, license_id: i32, params: &LicenseParams) -> Result<Option<License>, StoreError> {
    let changes = LicenseChanges {
        owner: params.owner.clone(),
        contact: params.contact.clone(),
        tool: params.tool.clone(),
        expires_at: params.expires_at(),
    };
    repo.transaction(|conn| {
        if !conn.update_details(license_id, &changes)? {
            return Ok(None);
        }
        tracing::info!("Edited license {}", license_id);
        conn.find_by_id(license_id)
    })
}

/// Delete a license together with its anomaly log. `false` if it did not exist.
pub fn remove_license<R: Repository>(repo: &R, license_id: i32) -> Result<bool, StoreError> {
    let removed = repo.transaction(|conn| {
        let cleared = conn.delete_anomalies_for(license_id)?;
        let removed = conn.delete_license(license_id)?;
        if removed {
            tracing::info!("Removed license {} and {} anomaly entries", license_id, cleared);
        }
        Ok(removed)
    })?;
    Ok(removed)
}

/// Anomaly entries of a license, newest first. `None` if the license is unknown.
pub fn anomaly_log<R: Repository>(repo: &R, license_id: i32) -> Result<Option<Vec<AnomalyLogEntry>>, StoreError> {
    repo.transaction(|conn| match conn.find_by_id(license_id)? {
        Some(_) => conn.anomalies_for(license_id).map(Some),
        None => Ok(None),
    })
}

/// Operator acknowledge: reset the anomaly counter, forget the recorded login
/// address and drop the license's anomaly log, so the next address change
/// starts the grace sequence from scratch.
pub fn acknowledge_anomalies<R: Repository>(repo: &R, license_id: i32) -> Result<Option<AckReport>, StoreError> {
    repo.transaction(|conn| {
        let Some(license) = conn.find_by_id(license_id)? else {
            return Ok(None);
        };

        let mut state = LoginState::of(&license);
        state.anomaly_counter = 0;
        state.last_login_ip = None;
        conn.update_login_state(license.id, &state)?;
        let cleared_entries = conn.delete_anomalies_for(license.id)?;

        tracing::info!(
            "Acknowledged anomalies on license {} ({} entries cleared)",
            license.id,
            cleared_entries
        );
        Ok(Some(AckReport {
            license_id: license.id,
            cleared_entries,
        }))
    })
}

pub fn publish_update<R: Repository>(repo: &R, tool: &str, version: &str, update_url: &str) -> Result<ToolUpdate, StoreError> {
    let new = NewToolUpdate {
        tool: tool.to_string(),
        version: version.to_string(),
        download_count: 0,
        update_url: update_url.to_string(),
    };
    let update = repo.transaction(|conn| conn.insert_update(&new))?;
    tracing::info!("Published {} {} as update {}", update.tool, update.version, update.id);
    Ok(update)
}

/// Catalog entries grouped by tool, newest first within each tool.
pub fn list_updates<R: Repository>(repo: &R) -> Result<BTreeMap<String, Vec<ToolUpdate>>, StoreError> {
    let updates = repo.transaction(|conn| conn.list_updates())?;
    let mut grouped: BTreeMap<String, Vec<ToolUpdate>> = BTreeMap::new();
    for update in updates {
        grouped.entry(update.tool.clone()).or_default().push(update);
    }
    Ok(grouped)
}

/// Withdraw a catalog entry. The previous entry for the tool, if any, becomes
/// the one offered to clients again.
pub fn delete_update<R: Repository>(repo: &R, update_id: i32) -> Result<bool, StoreError> {
    let deleted = repo.transaction(|conn| conn.delete_update(update_id))?;
    if deleted {
        tracing::info!("Deleted update {}", update_id);
    }
    Ok(deleted)
}

/// Count a download and return where to send the client. `None` for unknown ids.
pub fn record_download<R: Repository>(repo: &R, update_id: i32, now: DateTime<Utc>) -> Result<Option<String>, StoreError> {
    repo.transaction(|conn| {
        let Some(update) = conn.find_update(update_id)? else {
            return Ok(None);
        };
        conn.record_download(update.id, now.timestamp())?;
        Ok(Some(update.update_url))
    })
}
