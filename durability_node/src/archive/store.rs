// Deal ledger
//
// Deals are persisted in SQLite so a restart neither forgets pending deals
// nor resubmits active ones. Each call opens its own connection on the
// blocking pool.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::debug;

use super::{DealStatus, FilecoinDeal};
use crate::error::{DurabilityError, Result};

/// SQLite-backed deal ledger
#[derive(Debug, Clone)]
pub struct DealStore {
    path: PathBuf,
}

impl DealStore {
    /// Open the ledger, creating the file and schema if needed
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let store = Self { path };
        let path = store.path.clone();
        task::spawn_blocking(move || init_schema(&path)).await??;
        debug!("Deal ledger ready at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the deal for its CID
    pub async fn upsert(&self, deal: &FilecoinDeal) -> Result<()> {
        let path = self.path.clone();
        let deal = deal.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&path)?;
            conn.execute(
                "INSERT OR REPLACE INTO deals (
                    cid, content_id, deal_ref, deal_id, status, miner_address, created_at,
                    expires_at, data_size_bytes, price, last_checked_at, error_message
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    deal.cid,
                    deal.content_id,
                    deal.deal_ref,
                    deal.deal_id,
                    deal.status.as_str(),
                    deal.miner_address,
                    deal.created_at as i64,
                    deal.expires_at as i64,
                    deal.data_size_bytes as i64,
                    deal.price,
                    deal.last_checked_at.map(|t| t as i64),
                    deal.error_message,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Every deal in the ledger
    pub async fn load_all(&self) -> Result<Vec<FilecoinDeal>> {
        let path = self.path.clone();
        task::spawn_blocking(move || -> Result<Vec<FilecoinDeal>> {
            let conn = Connection::open(&path)?;
            let mut stmt = conn.prepare(
                "SELECT cid, content_id, deal_ref, deal_id, status, miner_address, created_at,
                        expires_at, data_size_bytes, price, last_checked_at, error_message
                 FROM deals ORDER BY created_at",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    FilecoinDeal {
                        cid: row.get(0)?,
                        content_id: row.get(1)?,
                        deal_ref: row.get(2)?,
                        deal_id: row.get(3)?,
                        status: DealStatus::Scheduled,
                        miner_address: row.get(5)?,
                        created_at: row.get::<_, i64>(6)? as u64,
                        expires_at: row.get::<_, i64>(7)? as u64,
                        data_size_bytes: row.get::<_, i64>(8)? as u64,
                        price: row.get(9)?,
                        last_checked_at: row.get::<_, Option<i64>>(10)?.map(|t| t as u64),
                        error_message: row.get(11)?,
                    },
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut deals = Vec::new();
            for row in rows {
                let (mut deal, status) = row?;
                deal.status = status.parse().map_err(|_| {
                    DurabilityError::Storage(format!("Unknown deal status {} for {}", status, deal.cid))
                })?;
                deals.push(deal);
            }
            Ok(deals)
        })
        .await?
    }
}

fn init_schema(path: &Path) -> Result<()> {
    let conn = Connection::open(path)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS deals (
            cid TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            deal_ref TEXT,
            deal_id TEXT,
            status TEXT NOT NULL,
            miner_address TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            data_size_bytes INTEGER NOT NULL,
            price TEXT NOT NULL,
            last_checked_at INTEGER,
            error_message TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_deals_status ON deals(status)",
        [],
    )?;
    Ok(())
}
