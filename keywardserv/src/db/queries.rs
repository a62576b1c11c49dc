// Store trait implementations over a diesel SQLite connection
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::{
    AnomalyLogEntry, DbPool, License, LicenseChanges, NewAnomalyLogEntry, NewLicense, NewToolUpdate,
    ToolUpdate, schema::*,
};
use crate::error::StoreError;
use crate::store::{AnomalyLog, LicenseStore, LoginState, Repository, UpdateCatalog};

// ==================== TRANSACTIONS ====================

impl Repository for DbPool {
    type Conn = SqliteConnection;

    /// `BEGIN IMMEDIATE` takes the database write lock before the first read,
    /// so concurrent check-ins for the same license are serialized and never
    /// decide on a stale anomaly counter.
    fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError>,
    {
        let mut conn = self.get()?;
        conn.immediate_transaction(f)
    }
}

// ==================== LICENSE QUERIES ====================

impl LicenseStore for SqliteConnection {
    fn find_by_binding(&mut self, client_id: &str, license_key: &str) -> Result<Option<License>, StoreError> {
        let result = licenses::table
            .filter(licenses::client_id.eq(client_id))
            .filter(licenses::license_key.eq(license_key))
            .select(License::as_select())
            .first(self)
            .optional()?;

        Ok(result)
    }

    fn find_by_client_id(&mut self, client_id: &str) -> Result<Option<License>, StoreError> {
        let result = licenses::table
            .filter(licenses::client_id.eq(client_id))
            .select(License::as_select())
            .first(self)
            .optional()?;

        Ok(result)
    }

    fn find_by_id(&mut self, id: i32) -> Result<Option<License>, StoreError> {
        let result = licenses::table
            .find(id)
            .select(License::as_select())
            .first(self)
            .optional()?;

        Ok(result)
    }

    fn list_licenses(&mut self) -> Result<Vec<License>, StoreError> {
        let results = licenses::table
            .order_by(licenses::id.asc())
            .select(License::as_select())
            .load(self)?;

        Ok(results)
    }

    fn insert_license(&mut self, license: &NewLicense) -> Result<License, StoreError> {
        diesel::insert_into(licenses::table)
            .values(license)
            .execute(self)?;

        self.find_by_client_id(&license.client_id)?
            .ok_or_else(|| StoreError::Query("inserted license not found".into()))
    }

    fn update_login_state(&mut self, id: i32, state: &LoginState<'_>) -> Result<(), StoreError> {
        diesel::update(licenses::table.find(id))
            .set((
                licenses::client_version.eq(state.client_version),
                licenses::last_login_at.eq(state.last_login_at),
                licenses::last_login_ip.eq(state.last_login_ip),
                licenses::last_login_mac.eq(state.last_login_mac),
                licenses::anomaly_counter.eq(state.anomaly_counter),
            ))
            .execute(self)?;

        Ok(())
    }

    fn update_details(&mut self, id: i32, changes: &LicenseChanges) -> Result<bool, StoreError> {
        let updated = diesel::update(licenses::table.find(id))
            .set(changes)
            .execute(self)?;

        Ok(updated > 0)
    }

    fn delete_license(&mut self, id: i32) -> Result<bool, StoreError> {
        let deleted = diesel::delete(licenses::table.find(id)).execute(self)?;
        Ok(deleted > 0)
    }
}

// ==================== ANOMALY LOG QUERIES ====================

impl AnomalyLog for SqliteConnection {
    fn append_anomaly(&mut self, license_id: Option<i32>, message: &str, at: i64) -> Result<(), StoreError> {
        diesel::insert_into(anomaly_logs::table)
            .values(&NewAnomalyLogEntry {
                license_id,
                created_at: at,
                message,
            })
            .execute(self)?;

        Ok(())
    }

    fn anomalies_for(&mut self, license_id: i32) -> Result<Vec<AnomalyLogEntry>, StoreError> {
        let results = anomaly_logs::table
            .filter(anomaly_logs::license_id.eq(license_id))
            .order_by((anomaly_logs::created_at.desc(), anomaly_logs::id.desc()))
            .select(AnomalyLogEntry::as_select())
            .load(self)?;

        Ok(results)
    }

    fn delete_anomalies_for(&mut self, license_id: i32) -> Result<usize, StoreError> {
        let deleted = diesel::delete(anomaly_logs::table.filter(anomaly_logs::license_id.eq(license_id)))
            .execute(self)?;

        Ok(deleted)
    }
}

// ==================== UPDATE CATALOG QUERIES ====================

impl UpdateCatalog for SqliteConnection {
    fn latest_for_tool(&mut self, tool: &str) -> Result<Option<ToolUpdate>, StoreError> {
        let result = tool_updates::table
            .filter(tool_updates::tool.eq(tool))
            .order_by(tool_updates::id.desc())
            .select(ToolUpdate::as_select())
            .first(self)
            .optional()?;

        Ok(result)
    }

    fn find_update(&mut self, id: i32) -> Result<Option<ToolUpdate>, StoreError> {
        let result = tool_updates::table
            .find(id)
            .select(ToolUpdate::as_select())
            .first(self)
            .optional()?;

        Ok(result)
    }

    fn list_updates(&mut self) -> Result<Vec<ToolUpdate>, StoreError> {
        let results = tool_updates::table
            .order_by((tool_updates::tool.asc(), tool_updates::id.desc()))
            .select(ToolUpdate::as_select())
            .load(self)?;

        Ok(results)
    }

    fn insert_update(&mut self, update: &NewToolUpdate) -> Result<ToolUpdate, StoreError> {
        diesel::insert_into(tool_updates::table)
            .values(update)
            .execute(self)?;

        self.latest_for_tool(&update.tool)?
            .ok_or_else(|| StoreError::Query("inserted update not found".into()))
    }

    fn record_download(&mut self, id: i32, at: i64) -> Result<(), StoreError> {
        diesel::update(tool_updates::table.find(id))
            .set((
                tool_updates::download_count.eq(tool_updates::download_count + 1),
                tool_updates::last_download_at.eq(Some(at)),
            ))
            .execute(self)?;

        Ok(())
    }

    fn delete_update(&mut self, id: i32) -> Result<bool, StoreError> {
        let deleted = diesel::delete(tool_updates::table.find(id)).execute(self)?;
        Ok(deleted > 0)
    }
}
