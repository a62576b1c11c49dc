//! Repository seams used by the verification engine and the operator actions.
//!
//! The engine never touches a connection directly: it is handed something that
//! implements all three store traits inside a [`Repository::transaction`], so
//! every check-in reads and writes through one serialized transaction.

use crate::db::{AnomalyLogEntry, License, LicenseChanges, NewLicense, NewToolUpdate, ToolUpdate};
use crate::error::StoreError;

/// Login state written back after a check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginState<'a> {
    pub client_version: Option<&'a str>,
    pub last_login_at: Option<i64>,
    pub last_login_ip: Option<&'a str>,
    pub last_login_mac: Option<&'a str>,
    pub anomaly_counter: i32,
}

impl<'a> LoginState<'a> {
    /// Current stored state of `license`, to be modified before writing back.
    pub fn of(license: &'a License) -> Self {
        LoginState {
            client_version: license.client_version.as_deref(),
            last_login_at: license.last_login_at,
            last_login_ip: license.last_login_ip.as_deref(),
            last_login_mac: license.last_login_mac.as_deref(),
            anomaly_counter: license.anomaly_counter,
        }
    }
}

pub trait LicenseStore {
    fn find_by_binding(&mut self, client_id: &str, license_key: &str) -> Result<Option<License>, StoreError>;
    fn find_by_client_id(&mut self, client_id: &str) -> Result<Option<License>, StoreError>;
    fn find_by_id(&mut self, id: i32) -> Result<Option<License>, StoreError>;
    fn list_licenses(&mut self) -> Result<Vec<License>, StoreError>;
    fn insert_license(&mut self, license: &NewLicense) -> Result<License, StoreError>;
    fn update_login_state(&mut self, id: i32, state: &LoginState<'_>) -> Result<(), StoreError>;
    /// Overwrite the operator fields. `false` if no such license.
    fn update_details(&mut self, id: i32, changes: &LicenseChanges) -> Result<bool, StoreError>;
    fn delete_license(&mut self, id: i32) -> Result<bool, StoreError>;
}

pub trait AnomalyLog {
    fn append_anomaly(&mut self, license_id: Option<i32>, message: &str, at: i64) -> Result<(), StoreError>;
    /// Newest first.
    fn anomalies_for(&mut self, license_id: i32) -> Result<Vec<AnomalyLogEntry>, StoreError>;
    fn delete_anomalies_for(&mut self, license_id: i32) -> Result<usize, StoreError>;
}

pub trait UpdateCatalog {
    /// Most recently inserted entry for `tool`, regardless of its version number.
    fn latest_for_tool(&mut self, tool: &str) -> Result<Option<ToolUpdate>, StoreError>;
    fn find_update(&mut self, id: i32) -> Result<Option<ToolUpdate>, StoreError>;
    /// All entries ordered by tool, newest first within a tool.
    fn list_updates(&mut self) -> Result<Vec<ToolUpdate>, StoreError>;
    fn insert_update(&mut self, update: &NewToolUpdate) -> Result<ToolUpdate, StoreError>;
    fn record_download(&mut self, id: i32, at: i64) -> Result<(), StoreError>;
    fn delete_update(&mut self, id: i32) -> Result<bool, StoreError>;
}

/// Access to a transactional store. Implementations must run `f` under an
/// exclusive write transaction and commit only if it returns `Ok`.
pub trait Repository: Send + Sync + 'static {
    type Conn: LicenseStore + AnomalyLog + UpdateCatalog;

    fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Self::Conn) -> Result<T, StoreError>;
}
