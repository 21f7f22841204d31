use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::errors::{AppError, AppResult};

pub type SharedConnection = Arc<Mutex<Connection>>;

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

impl DatabaseContext {
    pub fn into_shared(self) -> SharedConnection {
        Arc::new(Mutex::new(self.connection))
    }
}

pub fn bootstrap<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<DatabaseContext> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(database_file);
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(&db_path, flags)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    run_migrations(&connection)?;
    info!(
        target: "database_bootstrap",
        path = %db_path.display(),
        "ranking cache ready"
    );
    Ok(DatabaseContext {
        connection,
        path: db_path,
    })
}

pub fn open_in_memory() -> AppResult<SharedConnection> {
    let connection = Connection::open_in_memory()?;
    run_migrations(&connection)?;
    Ok(Arc::new(Mutex::new(connection)))
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            owner_id TEXT NOT NULL,
            campaign_slot TEXT NOT NULL,
            project_id TEXT NOT NULL,
            tracking_id TEXT NOT NULL,
            domain TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (DATETIME('now')),
            PRIMARY KEY (owner_id, campaign_slot)
        );

        CREATE TABLE IF NOT EXISTS keyword_cache (
            owner_id TEXT NOT NULL,
            campaign_slot TEXT NOT NULL,
            keywords_json TEXT NOT NULL,
            fetched_at TEXT NOT NULL,
            project_id TEXT,
            tracking_id TEXT,
            PRIMARY KEY (owner_id, campaign_slot)
        );
        "#,
    )?;

    ensure_column(connection, "keyword_cache", "source TEXT NOT NULL DEFAULT 'primary'")?;
    ensure_column(connection, "keyword_cache", "domain TEXT")?;
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_keyword_cache_owner ON keyword_cache(owner_id)",
        [],
    )?;
    Ok(())
}

fn ensure_column(connection: &Connection, table: &str, definition: &str) -> AppResult<()> {
    let column_name = definition
        .split_whitespace()
        .next()
        .ok_or_else(|| AppError::Config(format!("invalid column definition: {definition}")))?;
    if column_exists(connection, table, column_name)? {
        return Ok(());
    }
    let sql = format!("ALTER TABLE {table} ADD COLUMN {definition}");
    connection.execute(&sql, [])?;
    Ok(())
}

fn column_exists(connection: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({table})");
    let mut stmt = connection.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
