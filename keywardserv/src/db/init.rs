// Database initialization and connection management
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::sqlite::SqliteConnection;
use diesel::{RunQueryDsl, sql_query};

use crate::config::ServerConfig;
use crate::error::StoreError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas: bounded lock waits, enforced foreign keys.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout: Duration,
    wal: bool,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        let mut pragmas = format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        );
        if self.wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL;");
        }
        conn.batch_execute(&pragmas)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Open the SQLite connection pool described by `config`.
/// The database file is created if it doesn't exist.
pub fn init_db(config: &ServerConfig) -> Result<DbPool, StoreError> {
    build_pool(&config.database_url, config.pool_size, config.store_timeout)
}

/// Single-connection in-memory pool; every test gets its own database.
pub fn init_memory_db(store_timeout: Duration) -> Result<DbPool, StoreError> {
    let pool = build_pool(":memory:", 1, store_timeout)?;
    run_migrations(&pool)?;
    Ok(pool)
}

fn build_pool(database_url: &str, size: u32, store_timeout: Duration) -> Result<DbPool, StoreError> {
    let in_memory = database_url == ":memory:";
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(size)
        .connection_timeout(store_timeout)
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout: store_timeout,
            wal: !in_memory,
        }))
        .build(manager)?;
    Ok(pool)
}

/// Create tables and indexes. Idempotent.
pub fn run_migrations(db: &DbPool) -> Result<(), StoreError> {
    let mut conn = db.get()?;

    let tables = [
        "CREATE TABLE IF NOT EXISTS licenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            owner TEXT,
            client_id TEXT NOT NULL UNIQUE,
            license_key TEXT NOT NULL UNIQUE,
            acquired_at BIGINT NOT NULL,
            contact TEXT,
            last_login_at BIGINT,
            last_login_ip TEXT,
            last_login_mac TEXT,
            anomaly_counter INTEGER NOT NULL DEFAULT 0 CHECK (anomaly_counter >= 0),
            tool TEXT,
            expires_at BIGINT,
            client_version TEXT,
            UNIQUE (client_id, license_key)
        )",

        "CREATE TABLE IF NOT EXISTS anomaly_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            license_id INTEGER REFERENCES licenses(id) ON DELETE CASCADE,
            created_at BIGINT NOT NULL,
            message TEXT NOT NULL
        )",

        "CREATE TABLE IF NOT EXISTS tool_updates (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            tool TEXT NOT NULL,
            version TEXT NOT NULL,
            download_count INTEGER NOT NULL DEFAULT 0,
            last_download_at BIGINT,
            update_url TEXT NOT NULL
        )",
    ];

    for table_sql in tables {
        sql_query(table_sql).execute(&mut *conn)?;
        tracing::debug!("✅ Table created/verified");
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_anomaly_logs_license_id ON anomaly_logs(license_id)",
        "CREATE INDEX IF NOT EXISTS idx_tool_updates_tool ON tool_updates(tool, id)",
    ];

    for index_sql in indexes {
        match sql_query(index_sql).execute(&mut *conn) {
            Ok(_) => tracing::debug!("✅ Index created/verified"),
            Err(e) => tracing::warn!("⚠️ Index creation warning: {:?}", e),
        }
    }

    Ok(())
}
