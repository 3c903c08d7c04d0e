//! Repository for the `parse_jobs` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

pub const STATUS_PENDING: &str = "pending_review";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

/// A raw `parse_jobs` row. `dataset` and `logs` hold JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseJobRow {
    pub id: String,
    pub url: String,
    pub canonical_name: String,
    pub dataset: String,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub logs: String,
    pub skipped_images: i64,
    pub created_at: String,
    pub reviewed_at: Option<String>,
    pub edited: bool,
}

impl ParseJobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            url: row.get("url")?,
            canonical_name: row.get("canonical_name")?,
            dataset: row.get("dataset")?,
            status: row.get("status")?,
            rejection_reason: row.get("rejection_reason")?,
            logs: row.get("logs")?,
            skipped_images: row.get("skipped_images")?,
            created_at: row.get("created_at")?,
            reviewed_at: row.get("reviewed_at")?,
            edited: row.get("edited")?,
        })
    }
}

/// Result of [`insert_pending`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with this id already exists; nothing was written.
    SameId(ParseJobRow),
    /// Another pending row exists for the URL; nothing was written.
    PendingForUrl(ParseJobRow),
}

/// Review decision written by [`update_review`].
#[derive(Debug, Clone)]
pub struct ReviewUpdate<'a> {
    pub status: &'a str,
    pub rejection_reason: Option<&'a str>,
    /// Replacement dataset JSON, when the reviewer edited it.
    pub dataset: Option<&'a str>,
    pub reviewed_at: &'a str,
}

fn insert_row(conn: &Connection, job: &ParseJobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO parse_jobs (id, url, canonical_name, dataset, status, rejection_reason,
         logs, skipped_images, created_at, reviewed_at, edited)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            job.id,
            job.url,
            job.canonical_name,
            job.dataset,
            job.status,
            job.rejection_reason,
            job.logs,
            job.skipped_images,
            job.created_at,
            job.reviewed_at,
            job.edited,
        ],
    )?;
    Ok(())
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<ParseJobRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM parse_jobs WHERE id = ?1",
            params![id],
            ParseJobRow::from_row,
        )
        .optional()?)
}

fn select_pending_by_url(
    conn: &Connection,
    url: &str,
) -> Result<Option<ParseJobRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM parse_jobs WHERE url = ?1 AND status = ?2
             ORDER BY created_at ASC LIMIT 1",
            params![url, STATUS_PENDING],
            ParseJobRow::from_row,
        )
        .optional()?)
}

pub fn insert(db: &Database, job: &ParseJobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_row(conn, job))
}

/// Inserts a pending row unless one with the same id exists or, when
/// `allow_duplicate_url` is false, another pending row has the same URL.
/// The checks and the insert run in one transaction.
pub fn insert_pending(
    db: &Database,
    job: &ParseJobRow,
    allow_duplicate_url: bool,
) -> Result<InsertOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        if let Some(existing) = select_by_id(&tx, &job.id)? {
            return Ok(InsertOutcome::SameId(existing));
        }
        if !allow_duplicate_url {
            if let Some(existing) = select_pending_by_url(&tx, &job.url)? {
                return Ok(InsertOutcome::PendingForUrl(existing));
            }
        }

        insert_row(&tx, job)?;
        tx.commit()?;
        Ok(InsertOutcome::Inserted)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ParseJobRow>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Oldest first.
pub fn list_by_status(db: &Database, status: &str) -> Result<Vec<ParseJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM parse_jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC")?;
        let rows = stmt
            .query_map(params![status], ParseJobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn find_pending_by_url(db: &Database, url: &str) -> Result<Option<ParseJobRow>, DatabaseError> {
    db.with_conn(|conn| select_pending_by_url(conn, url))
}

/// Applies a review decision to a row that is still pending. Returns false
/// when no pending row with that id exists.
pub fn update_review(
    db: &Database,
    id: &str,
    update: &ReviewUpdate<'_>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE parse_jobs
             SET status = ?2,
                 rejection_reason = ?3,
                 dataset = COALESCE(?4, dataset),
                 edited = CASE WHEN ?4 IS NULL THEN edited ELSE 1 END,
                 reviewed_at = ?5
             WHERE id = ?1 AND status = ?6",
            params![
                id,
                update.status,
                update.rejection_reason,
                update.dataset,
                update.reviewed_at,
                STATUS_PENDING,
            ],
        )?;
        Ok(changed == 1)
    })
}

pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM parse_jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
