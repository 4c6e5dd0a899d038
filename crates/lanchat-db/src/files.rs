use rusqlite::{OptionalExtension, params};

use crate::Database;
use crate::error::ChatResult;
use crate::models::FileRow;

impl Database {
    pub fn insert_file(
        &self,
        filename: &str,
        original_name: &str,
        uploader: &str,
        mimetype: &str,
    ) -> ChatResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (filename, original_name, uploader, mimetype)
                 VALUES (?1, ?2, ?3, ?4)",
                params![filename, original_name, uploader, mimetype],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_file(&self, id: i64) -> ChatResult<Option<FileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, filename, original_name, uploader, mimetype, created_at
                 FROM files WHERE id = ?1",
            )?;
            Ok(stmt.query_row([id], map_file).optional()?)
        })
    }

    pub fn list_files(&self) -> ChatResult<Vec<FileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, filename, original_name, uploader, mimetype, created_at
                 FROM files ORDER BY id DESC",
            )?;
            let rows = stmt
                .query_map([], map_file)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Files visible to a non-admin user: their own uploads plus files
    /// carried by messages they sent or received.
    pub fn list_files_for(&self, username: &str) -> ChatResult<Vec<FileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT f.id, f.filename, f.original_name, f.uploader, f.mimetype, f.created_at
                 FROM files f
                 LEFT JOIN messages m ON m.file_id = f.id
                 WHERE f.uploader = ?1
                    OR m.sender = ?1
                    OR (',' || m.recipients || ',') LIKE ('%,' || ?1 || ',%')
                 ORDER BY f.id DESC",
            )?;
            let rows = stmt
                .query_map([username], map_file)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_file_row(&self, id: i64) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}

pub(crate) fn map_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_name: row.get(2)?,
        uploader: row.get(3)?,
        mimetype: row.get(4)?,
        created_at: row.get(5)?,
    })
}
