//! Cache entry storage: request key to response snapshot.
//!
//! Writes overwrite any earlier entry for the same key. Entries are never
//! removed one by one; they go away with their generation.

use super::connection::CacheDb;
use super::generations::generation_id;
use super::hash::compute_cache_key;
use crate::Error;
use crate::http::{Headers, Request, Response};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

/// A row ready to be written, detached from borrowed request data.
#[derive(Debug, Clone)]
struct EntryRow {
    key_hash: String,
    method: String,
    url: String,
    status: u16,
    headers_json: String,
    body: Vec<u8>,
    final_url: Option<String>,
}

impl EntryRow {
    fn build(request: &Request, response: &Response) -> Result<Self, Error> {
        check_cacheable(request, response)?;
        Ok(Self {
            key_hash: compute_cache_key(request.method(), request.url().as_str()),
            method: request.method().to_string(),
            url: request.url().to_string(),
            status: response.status,
            headers_json: serde_json::to_string(&response.headers)?,
            body: response.body.to_vec(),
            final_url: response.url.clone(),
        })
    }
}

/// Only GET requests with complete responses may be stored.
pub fn check_cacheable(request: &Request, response: &Response) -> Result<(), Error> {
    if !request.is_get() {
        return Err(Error::InvalidInput(format!(
            "only GET requests can be cached, got {}",
            request.method()
        )));
    }
    if response.status == 206 {
        return Err(Error::InvalidInput("partial (206) responses cannot be cached".into()));
    }
    Ok(())
}

fn upsert(conn: &rusqlite::Connection, generation: i64, row: &EntryRow, stored_at: &str) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO entries (
            generation_id, key_hash, method, url, status, headers_json, body, final_url, stored_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(generation_id, key_hash) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            status = excluded.status,
            headers_json = excluded.headers_json,
            body = excluded.body,
            final_url = excluded.final_url,
            stored_at = excluded.stored_at",
        params![
            generation,
            &row.key_hash,
            &row.method,
            &row.url,
            row.status,
            &row.headers_json,
            &row.body,
            &row.final_url,
            stored_at,
        ],
    )?;
    Ok(())
}

fn decode(status: u16, headers_json: &str, body: Vec<u8>, final_url: Option<String>) -> Result<Response, Error> {
    let headers: Headers = serde_json::from_str(headers_json)?;
    Ok(Response { status, headers, body: body.into(), url: final_url })
}

type RawEntry = (u16, String, Vec<u8>, Option<String>);

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

impl CacheDb {
    /// Store one entry in an existing generation.
    pub async fn put_entry(&self, generation: &str, request: &Request, response: &Response) -> Result<(), Error> {
        let row = EntryRow::build(request, response)?;
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let id = generation_id(conn, &generation)?.ok_or(Error::CacheMiss(generation))?;
                upsert(conn, id, &row, &chrono::Utc::now().to_rfc3339())
            })
            .await
            .map_err(Error::from)
    }

    /// Store many entries in one transaction: either all land or none do.
    pub async fn put_entries(&self, generation: &str, entries: &[(Request, Response)]) -> Result<(), Error> {
        let rows = entries
            .iter()
            .map(|(request, response)| EntryRow::build(request, response))
            .collect::<Result<Vec<_>, _>>()?;
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                let id = generation_id(&tx, &generation)?.ok_or(Error::CacheMiss(generation))?;
                let stored_at = chrono::Utc::now().to_rfc3339();
                for row in &rows {
                    upsert(&tx, id, row, &stored_at)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a request in one generation. Non-GET requests never match.
    pub async fn match_entry(&self, generation: &str, request: &Request) -> Result<Option<Response>, Error> {
        if !request.is_get() {
            return Ok(None);
        }
        let key_hash = compute_cache_key(request.method(), request.url().as_str());
        let generation = generation.to_string();
        let raw = self
            .conn
            .call(move |conn| -> Result<Option<RawEntry>, Error> {
                conn.query_row(
                    "SELECT e.status, e.headers_json, e.body, e.final_url
                     FROM entries e JOIN generations g ON g.id = e.generation_id
                     WHERE g.name = ?1 AND e.key_hash = ?2",
                    params![generation, key_hash],
                    read_raw,
                )
                .optional()
                .map_err(Error::from)
            })
            .await
            .map_err(Error::from)?;

        raw.map(|(status, headers, body, url)| decode(status, &headers, body, url))
            .transpose()
    }

    /// Look up a request across every generation, oldest generation first.
    pub async fn match_any_entry(&self, request: &Request) -> Result<Option<Response>, Error> {
        if !request.is_get() {
            return Ok(None);
        }
        let key_hash = compute_cache_key(request.method(), request.url().as_str());
        let raw = self
            .conn
            .call(move |conn| -> Result<Option<RawEntry>, Error> {
                conn.query_row(
                    "SELECT e.status, e.headers_json, e.body, e.final_url
                     FROM entries e JOIN generations g ON g.id = e.generation_id
                     WHERE e.key_hash = ?1
                     ORDER BY g.id ASC
                     LIMIT 1",
                    params![key_hash],
                    read_raw,
                )
                .optional()
                .map_err(Error::from)
            })
            .await
            .map_err(Error::from)?;

        raw.map(|(status, headers, body, url)| decode(status, &headers, body, url))
            .transpose()
    }

    /// URLs stored in a generation, sorted.
    pub async fn entry_urls(&self, generation: &str) -> Result<Vec<String>, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT e.url FROM entries e JOIN generations g ON g.id = e.generation_id
                     WHERE g.name = ?1 ORDER BY e.url ASC",
                )?;
                let urls = stmt
                    .query_map(params![generation], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(urls)
            })
            .await
            .map_err(Error::from)
    }

    /// Total number of entries across all generations.
    pub async fn entry_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
