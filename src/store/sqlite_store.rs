//! Embedded SQLite store implementation for the request registry.
use anyhow::Context;
use async_trait::async_trait;
use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};
use rusqlite::{params, Connection, Row};
use std::{path::PathBuf, str::FromStr};
use tokio::task;

use crate::error::Error;
use crate::request::{Request, RequestId, RequestStatus, SatisfiedBy, Target};
use crate::store::{MarkOutcome, RequestStore};

/// One row per request:
///   requests(id TEXT PRIMARY KEY, address, value, kind, pays_script,
///            spends_hash, spends_index, status, satisfied_txid,
///            satisfied_height)
///
/// `kind` is 'pays' or 'spends' and decides which of the target columns is
/// populated. Listings order by rowid so snapshots are registration-ordered
/// and deterministic.
pub struct SqliteStore {
    path: PathBuf,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS requests (
        id               TEXT PRIMARY KEY,
        address          TEXT NOT NULL,
        value            INTEGER NOT NULL,
        kind             TEXT NOT NULL,
        pays_script      TEXT,
        spends_hash      TEXT,
        spends_index     INTEGER,
        status           TEXT NOT NULL,
        satisfied_txid   TEXT,
        satisfied_height INTEGER
    );
"#;

impl SqliteStore {
    /// Creates/initializes the SQLite file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let conn = Connection::open(&path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;\n{SCHEMA}"
        ))?;
        Ok(Self { path })
    }

    fn row_to_request(row: &Row<'_>) -> anyhow::Result<Request> {
        let id: String = row.get("id")?;
        let address: String = row.get("address")?;
        let value: i64 = row.get("value")?;
        let kind: String = row.get("kind")?;
        let status: String = row.get("status")?;

        let target = match kind.as_str() {
            "pays" => {
                let script_hex: String = row.get("pays_script")?;
                let raw = hex::decode(&script_hex).context("decode pays_script")?;
                Target::Pays {
                    script: ScriptBuf::from_bytes(raw),
                }
            }
            "spends" => {
                let hash: String = row.get("spends_hash")?;
                let index: u32 = row.get("spends_index")?;
                let txid = Txid::from_str(&hash).context("parse spends_hash")?;
                Target::Spends {
                    outpoint: OutPoint::new(txid, index),
                }
            }
            other => anyhow::bail!("unknown target kind {other:?}"),
        };

        let satisfied_by = match status.as_str() {
            "pending" => None,
            "satisfied" => {
                let txid: String = row.get("satisfied_txid")?;
                let height: Option<u32> = row.get("satisfied_height")?;
                Some(SatisfiedBy {
                    txid: Txid::from_str(&txid).context("parse satisfied_txid")?,
                    height,
                })
            }
            other => anyhow::bail!("unknown status {other:?}"),
        };

        Ok(Request {
            id: RequestId::from_str(&id).map_err(|e| anyhow::anyhow!("parse id: {e}"))?,
            address,
            value: Amount::from_sat(value as u64),
            target,
            status: if satisfied_by.is_some() {
                RequestStatus::Satisfied
            } else {
                RequestStatus::Pending
            },
            satisfied_by,
        })
    }

    fn select(conn: &Connection, where_clause: &str, args: &[i64]) -> anyhow::Result<Vec<Request>> {
        let sql =
            format!("SELECT * FROM requests WHERE {where_clause} ORDER BY rowid ASC");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::row_to_request(row)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl RequestStore for SqliteStore {
    async fn put(&self, request: Request) -> Result<(), Error> {
        let path = self.path.clone();
        task::spawn_blocking(move || -> Result<(), Error> {
            let conn = Connection::open(path).map_err(Error::from)?;
            let (kind, pays_script, spends_hash, spends_index) = match &request.target {
                Target::Pays { script } => {
                    ("pays", Some(hex::encode(script.as_bytes())), None, None)
                }
                Target::Spends { outpoint } => (
                    "spends",
                    None,
                    Some(outpoint.txid.to_string()),
                    Some(outpoint.vout),
                ),
            };
            let res = conn.execute(
                "INSERT INTO requests
                     (id, address, value, kind, pays_script, spends_hash, spends_index, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending')",
                params![
                    request.id.to_string(),
                    request.address,
                    request.value.to_sat() as i64,
                    kind,
                    pays_script,
                    spends_hash,
                    spends_index,
                ],
            );
            match res {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(Error::DuplicateId(request.id))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    async fn get(&self, id: &RequestId) -> Result<Request, Error> {
        let path = self.path.clone();
        let id = id.to_string();
        task::spawn_blocking(move || -> Result<Request, Error> {
            let conn = Connection::open(path).map_err(Error::from)?;
            let mut stmt = conn.prepare("SELECT * FROM requests WHERE id = ?1")?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Self::row_to_request(row)?),
                None => Err(Error::NotFound),
            }
        })
        .await?
    }

    async fn list_pending(&self) -> Result<Vec<Request>, Error> {
        let path = self.path.clone();
        task::spawn_blocking(move || -> Result<Vec<Request>, Error> {
            let conn = Connection::open(path).map_err(Error::from)?;
            Ok(Self::select(&conn, "status = 'pending'", &[])?)
        })
        .await?
    }

    async fn list_rescan(&self, from_height: u32) -> Result<Vec<Request>, Error> {
        let path = self.path.clone();
        task::spawn_blocking(move || -> Result<Vec<Request>, Error> {
            let conn = Connection::open(path).map_err(Error::from)?;
            Ok(Self::select(
                &conn,
                "status = 'pending' OR satisfied_height IS NULL OR satisfied_height >= ?1",
                &[i64::from(from_height)],
            )?)
        })
        .await?
    }

    async fn mark_satisfied(
        &self,
        id: &RequestId,
        txid: Txid,
        height: Option<u32>,
    ) -> Result<MarkOutcome, Error> {
        let path = self.path.clone();
        let id = id.to_string();
        task::spawn_blocking(move || -> Result<MarkOutcome, Error> {
            let conn = Connection::open(path).map_err(Error::from)?;
            // Single UPDATE with a status guard is the atomic compare-and-set.
            let changed = conn.execute(
                "UPDATE requests
                    SET status = 'satisfied', satisfied_txid = ?2, satisfied_height = ?3
                  WHERE id = ?1 AND status = 'pending'",
                params![id, txid.to_string(), height],
            )?;
            if changed == 1 {
                return Ok(MarkOutcome::Satisfied);
            }
            let exists: Option<String> = conn
                .query_row(
                    "SELECT status FROM requests WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            match exists {
                Some(_) => Ok(MarkOutcome::AlreadySatisfied),
                None => Err(Error::NotFound),
            }
        })
        .await?
    }
}
