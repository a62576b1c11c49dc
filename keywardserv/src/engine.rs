//! License check-in decision engine.
//!
//! One check-in is evaluated in a single store transaction, in this order
//! (first match wins):
//!
//! 1. unknown binding: no license matches (client id, key)
//! 2. expired: expiry set and strictly in the past
//! 3. identity mismatch: the login moved between two public addresses and the
//!    hardware identifier does not vouch for it
//! 4. accepted: login state is recorded and update availability resolved
//!
//! A confirmed mismatch below the threshold is still granted, but with a
//! warning and without recording the new address, so the original identity
//! stays the anchor for later comparisons.

use std::fmt;

use chrono::{DateTime, Utc};
use keyward::ip;
use keyward::protocol::{CheckInResponse, EXPIRY_DATE_FORMAT, UpdateNotice};
use keyward::version::is_newer;

use crate::config::EngineConfig;
use crate::db::License;
use crate::error::StoreError;
use crate::store::{AnomalyLog, LicenseStore, LoginState, Repository, UpdateCatalog};

/// Transactions are retried this many times after a lock conflict.
const CONFLICT_RETRIES: u32 = 1;

/// One check-in after the caller's address has been resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckIn {
    pub client_id: String,
    pub license_key: String,
    pub client_version: Option<String>,
    pub hardware_id: Option<String>,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidCredentials,
    Expired,
    DoubleLogin,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InvalidCredentials => write!(f, "Invalid license credentials"),
            Rejection::Expired => write!(f, "License expired"),
            Rejection::DoubleLogin => write!(f, "Double login blocked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInOutcome {
    Rejected {
        reason: Rejection,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Granted inside the grace window; the new identity was not recorded.
    Warned {
        expires_at: Option<DateTime<Utc>>,
        remaining: i32,
    },
    Accepted {
        expires_at: Option<DateTime<Utc>>,
        update: UpdateNotice,
    },
}

impl CheckInOutcome {
    pub fn is_valid(&self) -> bool {
        !matches!(self, CheckInOutcome::Rejected { .. })
    }

    pub fn message(&self) -> Option<String> {
        match self {
            CheckInOutcome::Rejected { reason, .. } => Some(reason.to_string()),
            CheckInOutcome::Warned { remaining, .. } => Some(format!(
                "Warning: network identity changed, {} more before block.",
                remaining
            )),
            CheckInOutcome::Accepted { .. } => None,
        }
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CheckInOutcome::Rejected { expires_at, .. }
            | CheckInOutcome::Warned { expires_at, .. }
            | CheckInOutcome::Accepted { expires_at, .. } => *expires_at,
        }
    }
}

impl From<&CheckInOutcome> for CheckInResponse {
    fn from(outcome: &CheckInOutcome) -> Self {
        CheckInResponse {
            valid: outcome.is_valid(),
            expiry_date: outcome
                .expires_at()
                .map(|at| at.format(EXPIRY_DATE_FORMAT).to_string()),
            message: outcome.message(),
            update: match outcome {
                CheckInOutcome::Accepted { update, .. } => Some(update.clone()),
                _ => None,
            },
        }
    }
}

pub struct VerificationEngine<R> {
    repo: R,
    config: EngineConfig,
}

impl<R: Repository> VerificationEngine<R> {
    pub fn new(repo: R, config: EngineConfig) -> Self {
        VerificationEngine { repo, config }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn check_in(&self, request: &CheckIn) -> Result<CheckInOutcome, StoreError> {
        self.check_in_at(request, Utc::now())
    }

    /// Evaluate a check-in as of `now`. A lock conflict re-runs the whole
    /// transaction, re-reading the license, before giving up.
    pub fn check_in_at(&self, request: &CheckIn, now: DateTime<Utc>) -> Result<CheckInOutcome, StoreError> {
        let mut attempt = 0;
        loop {
            let result = self
                .repo
                .transaction(|conn| decide(conn, &self.config, request, now));
            match result {
                Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        "Check-in for client {} hit a lock conflict, retrying ({})",
                        request.client_id,
                        e
                    );
                }
                Err(e) => {
                    e.log_store_event();
                    return Err(e);
                }
                Ok(outcome) => return Ok(outcome),
            }
        }
    }
}

fn decide<C>(
    conn: &mut C,
    config: &EngineConfig,
    request: &CheckIn,
    now: DateTime<Utc>,
) -> Result<CheckInOutcome, StoreError>
where
    C: LicenseStore + AnomalyLog + UpdateCatalog,
{
    let ts = now.timestamp();

    let Some(license) = conn.find_by_binding(&request.client_id, &request.license_key)? else {
        let attributed = conn.find_by_client_id(&request.client_id)?.map(|l| l.id);
        conn.append_anomaly(
            attributed,
            &format!(
                "Invalid credentials: client {} / key {}",
                request.client_id,
                mask_key(&request.license_key)
            ),
            ts,
        )?;
        tracing::warn!(
            "Rejected check-in with invalid credentials for client {} (attributed to license {:?})",
            request.client_id,
            attributed
        );
        return Ok(CheckInOutcome::Rejected {
            reason: Rejection::InvalidCredentials,
            expires_at: None,
        });
    };

    let mut state = LoginState::of(&license);
    if let Some(version) = request.client_version.as_deref() {
        state.client_version = Some(version);
    }
    let expires_at = license.expiry();

    if license.is_expired_at(now) {
        state.anomaly_counter += 1;
        conn.update_login_state(license.id, &state)?;
        conn.append_anomaly(Some(license.id), "License expired", ts)?;
        tracing::warn!(
            "Rejected expired license {} (client {}), anomaly counter now {}",
            license.id,
            license.client_id,
            state.anomaly_counter
        );
        return Ok(CheckInOutcome::Rejected {
            reason: Rejection::Expired,
            expires_at,
        });
    }

    if let Some(previous_ip) = identity_mismatch(&license, request) {
        state.anomaly_counter += 1;
        conn.update_login_state(license.id, &state)?;
        conn.append_anomaly(
            Some(license.id),
            &format!(
                "Identity mismatch: {} -> {} (hardware {} -> {})",
                previous_ip,
                request.client_ip.as_deref().unwrap_or("-"),
                license.last_login_mac.as_deref().unwrap_or("-"),
                request.hardware_id.as_deref().unwrap_or("-"),
            ),
            ts,
        )?;

        if state.anomaly_counter >= config.mismatch_threshold {
            tracing::warn!(
                "Blocked license {} (client {}) after {} identity mismatches",
                license.id,
                license.client_id,
                state.anomaly_counter
            );
            return Ok(CheckInOutcome::Rejected {
                reason: Rejection::DoubleLogin,
                expires_at,
            });
        }

        let remaining = config.mismatch_threshold - state.anomaly_counter;
        tracing::warn!(
            "Identity mismatch on license {} (client {}), {} left before block",
            license.id,
            license.client_id,
            remaining
        );
        return Ok(CheckInOutcome::Warned { expires_at, remaining });
    }

    state.last_login_at = Some(ts);
    state.last_login_ip = request.client_ip.as_deref();
    if let Some(hardware_id) = request.hardware_id.as_deref() {
        state.last_login_mac = Some(hardware_id);
    }
    conn.update_login_state(license.id, &state)?;

    let update = resolve_update(conn, license.tool.as_deref(), state.client_version)?;
    tracing::info!(
        "Accepted check-in for license {} (client {}) from {}",
        license.id,
        license.client_id,
        request.client_ip.as_deref().unwrap_or("unknown address")
    );

    Ok(CheckInOutcome::Accepted { expires_at, update })
}

/// Returns the previously recorded address when this login moved between two
/// different public addresses without a matching hardware identifier on both
/// sides. Private and loopback churn never counts.
fn identity_mismatch<'a>(license: &'a License, request: &CheckIn) -> Option<&'a str> {
    let previous_ip = license.last_login_ip.as_deref()?;
    let current_ip = request.client_ip.as_deref().unwrap_or_default();

    if previous_ip == current_ip || !ip::is_public(previous_ip) || !ip::is_public(current_ip) {
        return None;
    }

    match (request.hardware_id.as_deref(), license.last_login_mac.as_deref()) {
        (Some(current), Some(previous)) if current == previous => None,
        _ => Some(previous_ip),
    }
}

/// Update lookup for an accepted check-in. Needs both a tool and a known client
/// version; the newest catalog row wins even if its version is lower.
fn resolve_update<C: UpdateCatalog>(
    conn: &mut C,
    tool: Option<&str>,
    client_version: Option<&str>,
) -> Result<UpdateNotice, StoreError> {
    let (Some(tool), Some(client_version)) = (tool, client_version) else {
        return Ok(UpdateNotice::none());
    };

    match conn.latest_for_tool(tool)? {
        Some(latest) if is_newer(client_version, &latest.version) => {
            tracing::debug!("Update {} available for {} (client on {})", latest.version, tool, client_version);
            Ok(UpdateNotice::available(latest.version, latest.update_url))
        }
        _ => Ok(UpdateNotice::none()),
    }
}

fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::db::init::init_memory_db;
    use crate::db::{DbPool, NewLicense, NewToolUpdate};

    fn engine() -> VerificationEngine<DbPool> {
        let pool = init_memory_db(Duration::from_secs(1)).unwrap();
        VerificationEngine::new(pool, EngineConfig::default())
    }

    fn seed(engine: &VerificationEngine<DbPool>, tool: Option<&str>, expires_at: Option<i64>) -> License {
        engine
            .repository()
            .transaction(|conn| {
                conn.insert_license(&NewLicense {
                    owner: Some("ACME".into()),
                    client_id: "client-1".into(),
                    license_key: "key-1".into(),
                    acquired_at: 0,
                    contact: None,
                    anomaly_counter: 0,
                    tool: tool.map(str::to_string),
                    expires_at,
                })
            })
            .unwrap()
    }

    fn publish(engine: &VerificationEngine<DbPool>, tool: &str, version: &str) {
        engine
            .repository()
            .transaction(|conn| {
                conn.insert_update(&NewToolUpdate {
                    tool: tool.into(),
                    version: version.into(),
                    download_count: 0,
                    update_url: format!("https://updates.example.com/{tool}-{version}.zip"),
                })
            })
            .unwrap();
    }

    fn reload(engine: &VerificationEngine<DbPool>, id: i32) -> License {
        engine
            .repository()
            .transaction(|conn| conn.find_by_id(id))
            .unwrap()
            .unwrap()
    }

    fn anomalies(engine: &VerificationEngine<DbPool>, id: i32) -> usize {
        engine
            .repository()
            .transaction(|conn| conn.anomalies_for(id))
            .unwrap()
            .len()
    }

    fn check_in(ip: &str) -> CheckIn {
        CheckIn {
            client_id: "client-1".into(),
            license_key: "key-1".into(),
            client_ip: Some(ip.into()),
            ..CheckIn::default()
        }
    }

    #[test]
    fn first_check_in_records_login() {
        let engine = engine();
        let license = seed(&engine, None, None);
        let now = Utc::now();

        let outcome = engine.check_in_at(&check_in("8.8.8.8"), now).unwrap();
        assert_eq!(
            outcome,
            CheckInOutcome::Accepted {
                expires_at: None,
                update: UpdateNotice::none()
            }
        );

        let stored = reload(&engine, license.id);
        assert_eq!(stored.last_login_ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(stored.last_login_at, Some(now.timestamp()));
        assert_eq!(stored.anomaly_counter, 0);
    }

    #[test]
    fn expired_license_counts_every_attempt() {
        let engine = engine();
        let now = Utc::now();
        let license = seed(&engine, None, Some((now - TimeDelta::seconds(1)).timestamp()));

        for attempt in 1..=3 {
            let outcome = engine.check_in_at(&check_in("8.8.8.8"), now).unwrap();
            assert!(matches!(
                outcome,
                CheckInOutcome::Rejected { reason: Rejection::Expired, expires_at: Some(_) }
            ));
            assert_eq!(reload(&engine, license.id).anomaly_counter, attempt);
        }
        assert_eq!(anomalies(&engine, license.id), 3);
        assert_eq!(reload(&engine, license.id).last_login_ip, None);
    }

    #[test]
    fn expiring_exactly_now_is_still_valid() {
        let engine = engine();
        let now = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();
        seed(&engine, None, Some(now.timestamp()));

        let outcome = engine.check_in_at(&check_in("8.8.8.8"), now).unwrap();
        assert!(matches!(outcome, CheckInOutcome::Accepted { .. }));
    }

    #[test]
    fn expiry_is_checked_below_whole_seconds() {
        let engine = engine();
        let expiry = Utc::now().timestamp();
        seed(&engine, None, Some(expiry));
        let just_after = DateTime::from_timestamp(expiry, 900_000_000).unwrap();

        let outcome = engine.check_in_at(&check_in("8.8.8.8"), just_after).unwrap();
        assert!(matches!(
            outcome,
            CheckInOutcome::Rejected { reason: Rejection::Expired, .. }
        ));
    }

    #[test]
    fn public_address_change_warns_then_blocks() {
        let engine = engine();
        let license = seed(&engine, None, None);

        engine.check_in(&check_in("8.8.8.8")).unwrap();

        let second = engine.check_in(&check_in("1.1.1.1")).unwrap();
        assert_eq!(second, CheckInOutcome::Warned { expires_at: None, remaining: 1 });
        assert!(second.is_valid());
        let stored = reload(&engine, license.id);
        assert_eq!(stored.anomaly_counter, 1);
        assert_eq!(stored.last_login_ip.as_deref(), Some("8.8.8.8"));

        let third = engine.check_in(&check_in("9.9.9.9")).unwrap();
        assert_eq!(
            third,
            CheckInOutcome::Rejected { reason: Rejection::DoubleLogin, expires_at: None }
        );
        let stored = reload(&engine, license.id);
        assert_eq!(stored.anomaly_counter, 2);
        assert_eq!(stored.last_login_ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(anomalies(&engine, license.id), 2);
    }

    #[test]
    fn returning_to_the_recorded_address_is_accepted() {
        let engine = engine();
        let license = seed(&engine, None, None);

        engine.check_in(&check_in("8.8.8.8")).unwrap();
        engine.check_in(&check_in("1.1.1.1")).unwrap();
        let back = engine.check_in(&check_in("8.8.8.8")).unwrap();

        assert!(matches!(back, CheckInOutcome::Accepted { .. }));
        assert_eq!(reload(&engine, license.id).anomaly_counter, 1);
    }

    #[test]
    fn private_previous_address_is_never_penalized() {
        let engine = engine();
        let license = seed(&engine, None, None);

        engine.check_in(&check_in("192.168.1.5")).unwrap();
        let outcome = engine.check_in(&check_in("8.8.8.8")).unwrap();

        assert!(matches!(outcome, CheckInOutcome::Accepted { .. }));
        let stored = reload(&engine, license.id);
        assert_eq!(stored.anomaly_counter, 0);
        assert_eq!(stored.last_login_ip.as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn matching_hardware_id_vouches_for_address_change() {
        let engine = engine();
        let license = seed(&engine, None, None);

        let mut request = check_in("8.8.8.8");
        request.hardware_id = Some("AA:BB:CC:DD:EE:FF".into());
        engine.check_in(&request).unwrap();

        request.client_ip = Some("1.1.1.1".into());
        let outcome = engine.check_in(&request).unwrap();

        assert!(matches!(outcome, CheckInOutcome::Accepted { .. }));
        let stored = reload(&engine, license.id);
        assert_eq!(stored.anomaly_counter, 0);
        assert_eq!(stored.last_login_ip.as_deref(), Some("1.1.1.1"));
    }

    #[test]
    fn different_hardware_id_confirms_mismatch() {
        let engine = engine();
        let license = seed(&engine, None, None);

        let mut request = check_in("8.8.8.8");
        request.hardware_id = Some("AA:BB:CC:DD:EE:FF".into());
        engine.check_in(&request).unwrap();

        request.client_ip = Some("1.1.1.1".into());
        request.hardware_id = Some("11:22:33:44:55:66".into());
        let outcome = engine.check_in(&request).unwrap();

        assert!(matches!(outcome, CheckInOutcome::Warned { remaining: 1, .. }));
        let stored = reload(&engine, license.id);
        assert_eq!(stored.last_login_mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn unknown_key_is_attributed_to_the_client() {
        let engine = engine();
        let license = seed(&engine, None, None);

        let mut request = check_in("8.8.8.8");
        request.license_key = "guess".into();
        let outcome = engine.check_in(&request).unwrap();

        assert_eq!(
            outcome,
            CheckInOutcome::Rejected { reason: Rejection::InvalidCredentials, expires_at: None }
        );
        assert_eq!(anomalies(&engine, license.id), 1);
        assert_eq!(reload(&engine, license.id).anomaly_counter, 0);
    }

    #[test]
    fn unknown_client_is_logged_unattributed() {
        let engine = engine();
        seed(&engine, None, None);

        let mut request = check_in("8.8.8.8");
        request.client_id = "nobody".into();
        engine.check_in(&request).unwrap();

        let unattributed = engine
            .repository()
            .transaction(|conn| {
                use crate::db::schema::anomaly_logs;
                use diesel::prelude::*;
                anomaly_logs::table
                    .filter(anomaly_logs::license_id.is_null())
                    .count()
                    .get_result::<i64>(conn)
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(unattributed, 1);
    }

    #[test]
    fn reports_newest_catalog_entry() {
        let engine = engine();
        seed(&engine, Some("scanner"), None);
        publish(&engine, "scanner", "1.1");
        publish(&engine, "scanner", "1.4");

        let mut request = check_in("8.8.8.8");
        request.client_version = Some("1.2".into());
        let outcome = engine.check_in(&request).unwrap();

        assert_eq!(
            outcome,
            CheckInOutcome::Accepted {
                expires_at: None,
                update: UpdateNotice::available(
                    "1.4".into(),
                    "https://updates.example.com/scanner-1.4.zip".into()
                ),
            }
        );
    }

    #[test]
    fn newest_entry_wins_even_when_older_version() {
        let engine = engine();
        seed(&engine, Some("scanner"), None);
        publish(&engine, "scanner", "3.0");
        publish(&engine, "scanner", "1.0");

        let mut request = check_in("8.8.8.8");
        request.client_version = Some("2.0".into());
        let outcome = engine.check_in(&request).unwrap();

        assert_eq!(
            outcome,
            CheckInOutcome::Accepted { expires_at: None, update: UpdateNotice::none() }
        );
    }

    #[test]
    fn stored_version_is_used_when_not_reported() {
        let engine = engine();
        let license = seed(&engine, Some("scanner"), None);
        publish(&engine, "scanner", "2.0");

        let mut request = check_in("8.8.8.8");
        request.client_version = Some("1.0".into());
        engine.check_in(&request).unwrap();
        assert_eq!(reload(&engine, license.id).client_version.as_deref(), Some("1.0"));

        request.client_version = None;
        let outcome = engine.check_in(&request).unwrap();
        assert!(matches!(outcome, CheckInOutcome::Accepted { ref update, .. } if update.available));
    }

    #[test]
    fn unparseable_version_reports_no_update() {
        let engine = engine();
        seed(&engine, Some("scanner"), None);
        publish(&engine, "scanner", "2.0");

        let mut request = check_in("8.8.8.8");
        request.client_version = Some("nightly".into());
        let outcome = engine.check_in(&request).unwrap();

        assert_eq!(
            outcome,
            CheckInOutcome::Accepted { expires_at: None, update: UpdateNotice::none() }
        );
    }

    #[test]
    fn response_formats_expiry_without_time() {
        let expires_at = DateTime::from_timestamp(1_924_948_800, 0); // 2030-12-31 12:00 UTC
        let response = CheckInResponse::from(&CheckInOutcome::Warned { expires_at, remaining: 1 });

        assert!(response.valid);
        assert_eq!(response.expiry_date.as_deref(), Some("31.12.2030"));
        assert_eq!(
            response.message.as_deref(),
            Some("Warning: network identity changed, 1 more before block.")
        );
        assert_eq!(response.update, None);
    }

    #[test]
    fn masks_license_key_in_log_text() {
        assert_eq!(mask_key("0123456789abcdef"), "0123…");
        assert_eq!(mask_key("ab"), "ab…");
    }
}
