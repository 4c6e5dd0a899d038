use rusqlite::{Connection, OptionalExtension, params};

use crate::Database;
use crate::error::{ChatError, ChatResult};
use crate::models::{MessageRow, NewMessage};

/// Matches a username inside a comma-joined recipient list without matching
/// substrings of other names.
const CONTAINS_USER: &str = "(',' || m.recipients || ',') LIKE ('%,' || ?1 || ',%')";

impl Database {
    /// Persist a new message. The id is monotonic (SQLite rowid) and the
    /// timestamp is assigned by the store.
    pub fn append_message(&self, msg: &NewMessage) -> ChatResult<i64> {
        self.with_conn(|conn| {
            if let Some(gid) = msg.group_id {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?1)",
                    [gid],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(ChatError::validation(format!(
                        "group {gid} does not exist"
                    )));
                }
            }
            conn.execute(
                "INSERT INTO messages (sender, recipients, content, file_id, reply_to, group_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.sender,
                    msg.recipients,
                    msg.content,
                    msg.file_id,
                    msg.reply_to,
                    msg.group_id
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: i64) -> ChatResult<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Group-room history for `viewer`, newest first, hidden rows excluded.
    pub fn history_group(&self, viewer: &str, group_id: i64, limit: u32) -> ChatResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE}
                 WHERE m.group_id = ?2
                   AND {NOT_HIDDEN}
                 ORDER BY m.id DESC LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(params![viewer, group_id, limit], map_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// All private messages involving `viewer`, newest first.
    pub fn history_self(&self, viewer: &str, limit: u32) -> ChatResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE}
                 WHERE m.group_id IS NULL
                   AND (m.sender = ?1 OR {CONTAINS_USER})
                   AND {NOT_HIDDEN}
                 ORDER BY m.id DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![viewer, limit], map_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Private history between `viewer` and `other`, newest first.
    pub fn history_pair(&self, viewer: &str, other: &str, limit: u32) -> ChatResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE}
                 WHERE m.group_id IS NULL
                   AND ((m.sender = ?1 AND (',' || m.recipients || ',') LIKE ('%,' || ?2 || ',%'))
                     OR (m.sender = ?2 AND {CONTAINS_USER}))
                   AND {NOT_HIDDEN}
                 ORDER BY m.id DESC LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(params![viewer, other, limit], map_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Hide a message for one viewer. Inserting a duplicate tombstone is a
    /// no-op, not an error.
    pub fn hide_message(&self, msg_id: i64, viewer: &str) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO hidden_messages (msg_id, username) VALUES (?1, ?2)",
                params![msg_id, viewer],
            )?;
            Ok(())
        })
    }

    /// Soft-clear a pair chat: tombstone every message of the conversation
    /// for `viewer` only. Returns the ids newly hidden.
    pub fn hide_pair_chat(&self, viewer: &str, other: &str) -> ChatResult<Vec<i64>> {
        let ids = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT m.id FROM messages m
                 WHERE m.group_id IS NULL
                   AND ((m.sender = ?1 AND (',' || m.recipients || ',') LIKE ('%,' || ?2 || ',%'))
                     OR (m.sender = ?2 AND {CONTAINS_USER}))"
            ))?;
            let ids = stmt
                .query_map(params![viewer, other], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })?;
        self.hide_all(&ids, viewer)?;
        Ok(ids)
    }

    /// Soft-clear a group room for `viewer`. Returns the ids hidden.
    pub fn hide_group_chat(&self, viewer: &str, group_id: i64) -> ChatResult<Vec<i64>> {
        let ids = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM messages WHERE group_id = ?1")?;
            let ids = stmt
                .query_map([group_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })?;
        self.hide_all(&ids, viewer)?;
        Ok(ids)
    }

    fn hide_all(&self, ids: &[i64], viewer: &str) -> ChatResult<()> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO hidden_messages (msg_id, username) VALUES (?1, ?2)",
            )?;
            for id in ids {
                stmt.execute(params![id, viewer])?;
            }
            Ok(())
        })
    }

    /// Hard-delete a message for everyone, superseding any tombstones and
    /// pins that point at it.
    pub fn delete_message_cascade(&self, id: i64) -> ChatResult<()> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM hidden_messages WHERE msg_id = ?1", [id])?;
            tx.execute("DELETE FROM pinned_messages WHERE message_id = ?1", [id])?;
            tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn set_reactions(&self, id: i64, reactions_json: Option<&str>) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET reactions = ?2 WHERE id = ?1",
                params![id, reactions_json],
            )?;
            Ok(())
        })
    }

    /// Transition sent -> read. Never marks the sender's own message and
    /// never re-marks an already read one. Returns whether anything changed.
    pub fn mark_read(&self, id: i64, reader: &str) -> ChatResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'read'
                 WHERE id = ?1 AND status != 'read' AND sender != ?2",
                params![id, reader],
            )?;
            Ok(changed > 0)
        })
    }

    /// Mark every message `other` sent to `reader` in their pair chat as read.
    pub fn mark_read_pair(&self, reader: &str, other: &str) -> ChatResult<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'read'
                 WHERE group_id IS NULL
                   AND status != 'read'
                   AND sender = ?2
                   AND (',' || recipients || ',') LIKE ('%,' || ?1 || ',%')",
                params![reader, other],
            )?;
            Ok(changed)
        })
    }

    /// Mark every group message not sent by `reader` as read.
    pub fn mark_read_group(&self, reader: &str, group_id: i64) -> ChatResult<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'read'
                 WHERE group_id = ?2 AND status != 'read' AND sender != ?1",
                params![reader, group_id],
            )?;
            Ok(changed)
        })
    }

    /// Unread private messages addressed to `viewer`, hidden rows excluded.
    pub fn unread_private(&self, viewer: &str) -> ChatResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE}
                 WHERE m.group_id IS NULL
                   AND m.status != 'read'
                   AND m.sender != ?1
                   AND {CONTAINS_USER}
                   AND {NOT_HIDDEN}
                 ORDER BY m.id"
            ))?;
            let rows = stmt
                .query_map([viewer], map_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Per-group unread counts for the groups `viewer` belongs to.
    pub fn unread_group_counts(&self, viewer: &str, group_ids: &[i64]) -> ChatResult<Vec<(i64, usize)>> {
        if group_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (0..group_ids.len()).map(|i| format!("?{}", i + 2)).collect();
            let sql = format!(
                "SELECT m.group_id, COUNT(*) FROM messages m
                 WHERE m.group_id IN ({})
                   AND m.status != 'read'
                   AND m.sender != ?1
                   AND {NOT_HIDDEN}
                 GROUP BY m.group_id",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut sql_params: Vec<&dyn rusqlite::types::ToSql> = vec![&viewer];
            for id in group_ids {
                sql_params.push(id);
            }
            let rows = stmt
                .query_map(sql_params.as_slice(), |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn messages_with_file(&self, file_id: i64) -> ChatResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender, m.recipients, m.content, m.file_id, m.status,
                        m.reply_to, m.reactions, m.group_id, m.created_at
                 FROM messages m WHERE m.file_id = ?1 ORDER BY m.id",
            )?;
            let rows = stmt
                .query_map([file_id], map_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Remove every message referencing a file, with their tombstones and
    /// pins, in one transaction.
    pub fn delete_messages_with_file(&self, file_id: i64) -> ChatResult<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM hidden_messages WHERE msg_id IN
                     (SELECT id FROM messages WHERE file_id = ?1)",
                [file_id],
            )?;
            tx.execute(
                "DELETE FROM pinned_messages WHERE message_id IN
                     (SELECT id FROM messages WHERE file_id = ?1)",
                [file_id],
            )?;
            tx.execute("DELETE FROM messages WHERE file_id = ?1", [file_id])?;
            Ok(())
        })
    }
}

const SELECT_MESSAGE: &str = "SELECT m.id, m.sender, m.recipients, m.content, m.file_id, m.status,
        m.reply_to, m.reactions, m.group_id, m.created_at
 FROM messages m";

const NOT_HIDDEN: &str =
    "m.id NOT IN (SELECT msg_id FROM hidden_messages WHERE username = ?1)";

pub(crate) fn query_message(conn: &Connection, id: i64) -> ChatResult<Option<MessageRow>> {
    let mut stmt = conn.prepare(&format!("{SELECT_MESSAGE} WHERE m.id = ?1"))?;
    Ok(stmt.query_row([id], map_message).optional()?)
}

pub(crate) fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        recipients: row.get(2)?,
        content: row.get(3)?,
        file_id: row.get(4)?,
        status: row.get(5)?,
        reply_to: row.get(6)?,
        reactions: row.get(7)?,
        group_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::error::ChatError;
    use crate::models::NewMessage;

    fn direct(sender: &str, recipients: &str) -> NewMessage {
        NewMessage {
            sender: sender.into(),
            recipients: recipients.into(),
            content: Some("token".into()),
            file_id: None,
            reply_to: None,
            group_id: None,
        }
    }

    #[test]
    fn append_assigns_monotonic_ids() {
        let db = Database::open_in_memory().unwrap();
        let a = db.append_message(&direct("Alice", "Bob")).unwrap();
        let b = db.append_message(&direct("Bob", "Alice")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn append_rejects_nonexistent_group() {
        let db = Database::open_in_memory().unwrap();
        let msg = NewMessage {
            sender: "Alice".into(),
            recipients: "group-99".into(),
            content: None,
            file_id: None,
            reply_to: None,
            group_id: Some(99),
        };
        assert!(matches!(
            db.append_message(&msg),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn hidden_messages_are_excluded_only_for_the_hider() {
        let db = Database::open_in_memory().unwrap();
        let id = db.append_message(&direct("Alice", "Bob")).unwrap();

        db.hide_message(id, "Bob").unwrap();

        let bob: Vec<i64> = db
            .history_pair("Bob", "Alice", 50)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert!(bob.is_empty());

        let alice: Vec<i64> = db
            .history_pair("Alice", "Bob", 50)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(alice, vec![id]);
    }

    #[test]
    fn hiding_twice_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        let id = db.append_message(&direct("Alice", "Bob")).unwrap();
        db.hide_message(id, "Bob").unwrap();
        db.hide_message(id, "Bob").unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM hidden_messages WHERE msg_id = ?1",
                    [id],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn hard_delete_supersedes_tombstones() {
        let db = Database::open_in_memory().unwrap();
        let id = db.append_message(&direct("Alice", "Bob")).unwrap();
        db.hide_message(id, "Bob").unwrap();

        db.delete_message_cascade(id).unwrap();

        assert!(db.get_message(id).unwrap().is_none());
        let tombstones: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM hidden_messages WHERE msg_id = ?1",
                    [id],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tombstones, 0);
    }

    #[test]
    fn mark_read_never_applies_to_the_sender() {
        let db = Database::open_in_memory().unwrap();
        let id = db.append_message(&direct("Alice", "Bob")).unwrap();

        assert!(!db.mark_read(id, "Alice").unwrap());
        assert!(db.mark_read(id, "Bob").unwrap());
        // already read: no-op
        assert!(!db.mark_read(id, "Bob").unwrap());
    }

    #[test]
    fn history_is_newest_first_and_capped() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..5 {
            db.append_message(&direct("Alice", "Bob")).unwrap();
        }
        let rows = db.history_pair("Alice", "Bob", 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].id > rows[1].id && rows[1].id > rows[2].id);
    }

    #[test]
    fn pair_history_does_not_leak_other_conversations() {
        let db = Database::open_in_memory().unwrap();
        db.append_message(&direct("Alice", "Bob")).unwrap();
        db.append_message(&direct("Alice", "Bobby")).unwrap();
        db.append_message(&direct("Carol", "Dan")).unwrap();

        let rows = db.history_pair("Alice", "Bob", 50).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipients, "Bob");
    }

    #[test]
    fn clearing_a_pair_chat_hides_both_directions_for_one_user() {
        let db = Database::open_in_memory().unwrap();
        db.append_message(&direct("Alice", "Bob")).unwrap();
        db.append_message(&direct("Bob", "Alice")).unwrap();

        let hidden = db.hide_pair_chat("Alice", "Bob").unwrap();
        assert_eq!(hidden.len(), 2);

        assert!(db.history_pair("Alice", "Bob", 50).unwrap().is_empty());
        assert_eq!(db.history_pair("Bob", "Alice", 50).unwrap().len(), 2);
    }

    #[test]
    fn unread_counts_skip_hidden_and_read() {
        let db = Database::open_in_memory().unwrap();
        let a = db.append_message(&direct("Alice", "Bob")).unwrap();
        let b = db.append_message(&direct("Alice", "Bob")).unwrap();
        let c = db.append_message(&direct("Carol", "Bob")).unwrap();

        db.mark_read(a, "Bob").unwrap();
        db.hide_message(b, "Bob").unwrap();

        let unread = db.unread_private("Bob").unwrap();
        let ids: Vec<i64> = unread.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![c]);
    }

    #[test]
    fn file_cascade_removes_every_referencing_message() {
        let db = Database::open_in_memory().unwrap();
        let file_id = db
            .insert_file("report.pdf", "report.pdf", "Alice", "application/pdf")
            .unwrap();
        let msg = NewMessage {
            file_id: Some(file_id),
            ..direct("Alice", "Bob")
        };
        let id = db.append_message(&msg).unwrap();
        db.hide_message(id, "Bob").unwrap();

        db.delete_messages_with_file(file_id).unwrap();
        db.delete_file_row(file_id).unwrap();

        assert!(db.get_message(id).unwrap().is_none());
        assert!(db.get_file(file_id).unwrap().is_none());
    }
}
