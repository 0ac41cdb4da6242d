//! SQLite connection pool + schema bootstrap. Ported from the teacher's
//! `infrastructure::persistence::database::Database`, trimmed to the one
//! table this crate's core actually writes (spec §6's `order_states`).

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent).await.context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_states (
                id TEXT PRIMARY KEY,
                bot_id TEXT NOT NULL,
                signal_id TEXT NOT NULL,
                order_id TEXT,
                stop_order_id TEXT,
                take_profit_order_id TEXT,
                status TEXT NOT NULL,
                side TEXT NOT NULL,
                symbol TEXT NOT NULL,
                trigger_price TEXT NOT NULL,
                stop_price TEXT NOT NULL,
                quantity TEXT,
                filled_quantity TEXT,
                avg_fill_price TEXT,
                last_fill_at INTEGER,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(bot_id, signal_id)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create order_states table")?;

        info!("database schema initialized");
        Ok(())
    }
}
