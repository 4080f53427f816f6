use super::models::*;
use super::sqlite::Database;
use crate::backend::TagSet;
use rusqlite::{params, OptionalExtension, Result};
use tracing::debug;

impl Database {
    // ── Known files ──────────────────────────────────────────────

    /// Known files whose URL starts with `prefix`.
    pub fn known_files_under(&self, prefix: &str) -> Result<Vec<KnownFile>> {
        let mut stmt = self.connection().prepare(
            "SELECT element_id, url, hash, verified FROM files \
             WHERE substr(url, 1, length(?1)) = ?1",
        )?;
        let files = stmt
            .query_map(params![prefix], |row| {
                Ok(KnownFile {
                    element_id: row.get(0)?,
                    url: row.get(1)?,
                    hash: row.get(2)?,
                    verified: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn known_file(&self, element_id: i64) -> Result<Option<KnownFile>> {
        self.connection()
            .query_row(
                "SELECT element_id, url, hash, verified FROM files WHERE element_id = ?1",
                params![element_id],
                |row| {
                    Ok(KnownFile {
                        element_id: row.get(0)?,
                        url: row.get(1)?,
                        hash: row.get(2)?,
                        verified: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    /// Commit a file as a library element; a candidate row for the same URL
    /// is dropped in the same transaction.
    pub fn insert_known_file(&self, url: &str, hash: Option<&str>, verified: i64) -> Result<i64> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO files (url, hash, verified) VALUES (?1, ?2, ?3)",
            params![url, hash, verified],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute("DELETE FROM new_files WHERE url = ?1", params![url])?;
        tx.commit()?;
        Ok(id)
    }

    pub fn delete_element(&self, element_id: i64) -> Result<()> {
        self.connection().execute(
            "DELETE FROM tags WHERE element_id = ?1",
            params![element_id],
        )?;
        self.connection().execute(
            "DELETE FROM files WHERE element_id = ?1",
            params![element_id],
        )?;
        Ok(())
    }

    pub fn update_file_url(&self, element_id: i64, url: &str) -> Result<()> {
        self.connection().execute(
            "UPDATE files SET url = ?1 WHERE element_id = ?2",
            params![url, element_id],
        )?;
        Ok(())
    }

    pub fn update_file_length(&self, element_id: i64, length: f64) -> Result<()> {
        self.connection().execute(
            "UPDATE files SET length = ?1 WHERE element_id = ?2",
            params![length, element_id],
        )?;
        Ok(())
    }

    pub fn file_length(&self, element_id: i64) -> Result<Option<f64>> {
        self.connection()
            .query_row(
                "SELECT length FROM files WHERE element_id = ?1",
                params![element_id],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()
            .map(Option::flatten)
    }

    pub fn update_known_hashes(&self, updates: &[KnownHashUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE files SET hash = ?1, verified = ?2 WHERE element_id = ?3",
            )?;
            for update in updates {
                count += stmt.execute(params![update.hash, update.verified, update.element_id])?;
            }
        }
        tx.commit()?;
        debug!("Updated hashes of {} known files", count);
        Ok(count)
    }

    // ── Candidate files ──────────────────────────────────────────

    pub fn candidates_under(&self, prefix: &str) -> Result<Vec<CandidateFile>> {
        let mut stmt = self.connection().prepare(
            "SELECT url, hash, verified FROM new_files \
             WHERE substr(url, 1, length(?1)) = ?1",
        )?;
        let files = stmt
            .query_map(params![prefix], |row| {
                Ok(CandidateFile {
                    url: row.get(0)?,
                    hash: row.get(1)?,
                    verified: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn insert_candidates(&self, files: &[CandidateFile]) -> Result<usize> {
        if files.is_empty() {
            return Ok(0);
        }
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO new_files (url, hash, verified) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(url) DO UPDATE SET \
                     hash = excluded.hash, \
                     verified = excluded.verified",
            )?;
            for file in files {
                count += stmt.execute(params![file.url, file.hash, file.verified])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} candidate files", count);
        Ok(count)
    }

    pub fn delete_candidates(&self, urls: &[String]) -> Result<usize> {
        if urls.is_empty() {
            return Ok(0);
        }
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM new_files WHERE url = ?1")?;
            for url in urls {
                count += stmt.execute(params![url])?;
            }
        }
        tx.commit()?;
        debug!("Deleted {} candidate files", count);
        Ok(count)
    }

    pub fn move_candidate(&self, old_url: &str, new_url: &str) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute("DELETE FROM new_files WHERE url = ?1", params![new_url])?;
        tx.execute(
            "UPDATE new_files SET url = ?1 WHERE url = ?2",
            params![new_url, old_url],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_candidate_hashes(&self, updates: &[CandidateHashUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE new_files SET hash = ?1, verified = ?2 WHERE url = ?3",
            )?;
            for update in updates {
                count += stmt.execute(params![update.hash, update.verified, update.url])?;
            }
        }
        tx.commit()?;
        debug!("Updated hashes of {} candidate files", count);
        Ok(count)
    }

    /// Drop candidate rows under `prefix` whose URL already belongs to a
    /// known file.
    pub fn delete_shadowed_candidates(&self, prefix: &str) -> Result<usize> {
        let count = self.connection().execute(
            "DELETE FROM new_files \
             WHERE substr(url, 1, length(?1)) = ?1 \
               AND url IN (SELECT url FROM files)",
            params![prefix],
        )?;
        if count > 0 {
            debug!("Removed {} candidate rows shadowed by known files", count);
        }
        Ok(count)
    }

    // ── Tags ─────────────────────────────────────────────────────

    pub fn get_tags(&self, element_id: i64) -> Result<TagSet> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT tag, value FROM tags WHERE element_id = ?1 ORDER BY tag, position",
        )?;
        let rows = stmt
            .query_map(params![element_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows.into_iter().collect())
    }

    pub fn set_tags(&self, element_id: i64, tags: &TagSet) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute("DELETE FROM tags WHERE element_id = ?1", params![element_id])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO tags (element_id, tag, value, position) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (tag, values) in tags.iter() {
                for (position, value) in values.iter().enumerate() {
                    stmt.execute(params![element_id, tag, value, position as i64])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
