use super::models::{AdjustOutcome, TransactionRecord};
use super::schema::LEDGER_VERSIONED_SCHEMAS;
use super::{LedgerStore, StateStore};
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

/// Another process sharing the file may hold the write lock briefly.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteLedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedgerStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open ledger database")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let latest = LEDGER_VERSIONED_SCHEMAS
            .last()
            .context("No ledger schema defined")?;

        if is_new_db {
            info!("Creating new ledger database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;
            if db_version < 1 {
                bail!(
                    "Ledger database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let schema = LEDGER_VERSIONED_SCHEMAS
                .iter()
                .find(|s| s.version as i64 == db_version)
                .with_context(|| format!("Unknown ledger database version {}", db_version))?;
            schema.validate(&conn).with_context(|| {
                format!(
                    "Ledger database schema validation failed for version {}",
                    db_version
                )
            })?;

            if (db_version as usize) < latest.version {
                info!(
                    "Migrating ledger database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut reached = from_version;
        for schema in LEDGER_VERSIONED_SCHEMAS
            .iter()
            .filter(|s| s.version > from_version)
        {
            if let Some(migration_fn) = schema.migration {
                migration_fn(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            reached = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + reached),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Ledger connection lock poisoned"))
    }

    fn read_quantity(conn: &Connection, user_id: &str, item_code: &str) -> Result<i64> {
        let qty = conn
            .query_row(
                "SELECT quantity FROM items WHERE user_id = ?1 AND item_code = ?2",
                params![user_id, item_code],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(qty.unwrap_or(0))
    }

    fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<TransactionRecord> {
        Ok(TransactionRecord {
            user_id: row.get("user_id")?,
            item_code: row.get("item_code")?,
            delta: row.get("delta")?,
            reason: row.get("reason")?,
            occurred_at: row.get("occurred_at")?,
        })
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn get_quantity(&self, user_id: &str, item_code: &str) -> Result<i64> {
        let conn = self.lock()?;
        Self::read_quantity(&conn, user_id, item_code)
    }

    fn atomic_adjust(
        &self,
        user_id: &str,
        item_code: &str,
        delta: i64,
        floor_at_zero: bool,
    ) -> Result<AdjustOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous = Self::read_quantity(&tx, user_id, item_code)?;
        let target = previous
            .checked_add(delta)
            .with_context(|| format!("Quantity overflow for {} {}", user_id, item_code))?;

        let new_quantity = if target >= 0 {
            target
        } else if floor_at_zero {
            0
        } else {
            return Ok(AdjustOutcome {
                ok: false,
                previous_quantity: previous,
                new_quantity: previous,
            });
        };

        tx.execute(
            "INSERT INTO items (user_id, item_code, quantity) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, item_code) DO UPDATE SET quantity = excluded.quantity",
            params![user_id, item_code, new_quantity],
        )?;
        tx.commit()?;

        Ok(AdjustOutcome {
            ok: true,
            previous_quantity: previous,
            new_quantity,
        })
    }

    fn conditional_decrement(&self, user_id: &str, item_code: &str, amount: i64) -> Result<bool> {
        if amount <= 0 {
            bail!("Conditional decrement amount must be positive, got {}", amount);
        }
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE items SET quantity = quantity - ?3
             WHERE user_id = ?1 AND item_code = ?2 AND quantity >= ?3",
            params![user_id, item_code, amount],
        )?;
        Ok(changed == 1)
    }

    fn conditional_decrement_many(&self, user_id: &str, wants: &[(String, i64)]) -> Result<bool> {
        if let Some((code, amount)) = wants.iter().find(|(_, amount)| *amount <= 0) {
            bail!(
                "Conditional decrement amount must be positive, got {} for {}",
                amount,
                code
            );
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (item_code, amount) in wants {
            let changed = tx.execute(
                "UPDATE items SET quantity = quantity - ?3
                 WHERE user_id = ?1 AND item_code = ?2 AND quantity >= ?3",
                params![user_id, item_code, amount],
            )?;
            if changed != 1 {
                // Dropping the transaction rolls back the rows already touched.
                return Ok(false);
            }
        }
        tx.commit()?;
        Ok(true)
    }

    fn record_transaction(&self, record: &TransactionRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO item_transactions (user_id, item_code, delta, reason, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.user_id,
                record.item_code,
                record.delta,
                record.reason,
                record.occurred_at
            ],
        )?;
        Ok(())
    }

    fn transactions_since(&self, since_timestamp: i64) -> Result<Vec<TransactionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, item_code, delta, reason, occurred_at FROM item_transactions
             WHERE occurred_at >= ?1 ORDER BY occurred_at ASC, id ASC",
        )?;
        let records = stmt
            .query_map(params![since_timestamp], Self::row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl StateStore for SqliteLedgerStore {
    fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM coop_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO coop_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn swap_state(&self, key: &str, value: &str) -> Result<Option<String>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous: Option<String> = tx
            .query_row(
                "SELECT value FROM coop_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute(
            "INSERT INTO coop_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, chrono::Utc::now().timestamp()],
        )?;
        tx.commit()?;
        Ok(previous)
    }
}
