use rusqlite::{Connection, OptionalExtension, params};

use crate::Database;
use crate::error::{ChatError, ChatResult};
use crate::files::map_file;
use crate::models::{ActivityRow, GroupFileRow, GroupMemberRow, GroupRow, PinnedRow};

impl Database {
    pub fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
        icon: Option<&str>,
        created_by: &str,
    ) -> ChatResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO groups (name, description, icon, created_by) VALUES (?1, ?2, ?3, ?4)",
                params![name, description, icon, created_by],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_group(&self, id: i64) -> ChatResult<Option<GroupRow>> {
        self.with_conn(|conn| query_group(conn, id))
    }

    pub fn set_group_name(&self, id: i64, name: &str) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE groups SET name = ?2 WHERE id = ?1", params![id, name])?;
            Ok(())
        })
    }

    pub fn set_group_description(&self, id: i64, description: Option<&str>) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE groups SET description = ?2 WHERE id = ?1",
                params![id, description],
            )?;
            Ok(())
        })
    }

    pub fn set_group_icon(&self, id: i64, icon: Option<&str>) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE groups SET icon = ?2 WHERE id = ?1", params![id, icon])?;
            Ok(())
        })
    }

    pub fn set_group_admin_only(&self, id: i64, admin_only: bool) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE groups SET admin_only = ?2 WHERE id = ?1",
                params![id, admin_only],
            )?;
            Ok(())
        })
    }

    /// Delete a group and everything scoped to its room — members, mutes,
    /// pins, messages and their tombstones — atomically. Audit rows survive.
    pub fn delete_group_cascade(&self, id: i64) -> ChatResult<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM hidden_messages WHERE msg_id IN
                     (SELECT id FROM messages WHERE group_id = ?1)",
                [id],
            )?;
            tx.execute("DELETE FROM pinned_messages WHERE group_id = ?1", [id])?;
            tx.execute("DELETE FROM messages WHERE group_id = ?1", [id])?;
            tx.execute("DELETE FROM group_mutes WHERE group_id = ?1", [id])?;
            tx.execute("DELETE FROM group_members WHERE group_id = ?1", [id])?;
            tx.execute("DELETE FROM groups WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Membership --

    pub fn add_member(
        &self,
        group_id: i64,
        username: &str,
        is_admin: bool,
        role: &str,
    ) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_members (group_id, username, is_admin, role)
                 VALUES (?1, ?2, ?3, ?4)",
                params![group_id, username, is_admin, role],
            )?;
            Ok(())
        })
    }

    pub fn get_member(&self, group_id: i64, username: &str) -> ChatResult<Option<GroupMemberRow>> {
        self.with_conn(|conn| query_member(conn, group_id, username))
    }

    pub fn list_members(&self, group_id: i64) -> ChatResult<Vec<GroupMemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MEMBER} WHERE group_id = ?1 ORDER BY username"
            ))?;
            let rows = stmt
                .query_map([group_id], map_member)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn remove_member(&self, group_id: i64, username: &str) -> ChatResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND username = ?2",
                params![group_id, username],
            )?;
            Ok(changed > 0)
        })
    }

    /// Set a member's admin flag and role together; the two must never
    /// disagree.
    pub fn set_member_flags(
        &self,
        group_id: i64,
        username: &str,
        is_admin: bool,
        role: &str,
    ) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE group_members SET is_admin = ?3, role = ?4
                 WHERE group_id = ?1 AND username = ?2",
                params![group_id, username, is_admin, role],
            )?;
            Ok(())
        })
    }

    pub fn set_member_preference(
        &self,
        group_id: i64,
        username: &str,
        preference: &str,
    ) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE group_members SET notification_preference = ?3
                 WHERE group_id = ?1 AND username = ?2",
                params![group_id, username, preference],
            )?;
            Ok(())
        })
    }

    pub fn admin_count(&self, group_id: i64) -> ChatResult<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND is_admin = 1",
                [group_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn member_group_ids(&self, username: &str) -> ChatResult<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT group_id FROM group_members WHERE username = ?1")?;
            let rows = stmt
                .query_map([username], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn groups_for(&self, username: &str) -> ChatResult<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.description, g.icon, g.created_by, g.admin_only, g.created_at
                 FROM groups g
                 JOIN group_members gm ON gm.group_id = g.id
                 WHERE gm.username = ?1
                 ORDER BY g.name",
            )?;
            let rows = stmt
                .query_map([username], map_group)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Mutes --

    pub fn mute_group(&self, group_id: i64, username: &str) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_mutes (group_id, username) VALUES (?1, ?2)",
                params![group_id, username],
            )?;
            Ok(())
        })
    }

    pub fn unmute_group(&self, group_id: i64, username: &str) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM group_mutes WHERE group_id = ?1 AND username = ?2",
                params![group_id, username],
            )?;
            Ok(())
        })
    }

    pub fn is_muted(&self, group_id: i64, username: &str) -> ChatResult<bool> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM group_mutes WHERE group_id = ?1 AND username = ?2)",
                params![group_id, username],
                |row| row.get(0),
            )?)
        })
    }

    // -- Pins --

    /// Pin a message in a group. Rejects duplicates via the
    /// (group, message) uniqueness constraint.
    pub fn pin_message(&self, group_id: i64, message_id: i64, pinned_by: &str) -> ChatResult<PinnedRow> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO pinned_messages (group_id, message_id, pinned_by)
                 VALUES (?1, ?2, ?3)",
                params![group_id, message_id, pinned_by],
            )?;
            if changed == 0 {
                return Err(ChatError::validation("message already pinned"));
            }
            let mut stmt = conn.prepare(&format!(
                "{SELECT_PIN} WHERE group_id = ?1 AND message_id = ?2"
            ))?;
            Ok(stmt.query_row(params![group_id, message_id], map_pin)?)
        })
    }

    pub fn unpin_message(&self, group_id: i64, message_id: i64) -> ChatResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM pinned_messages WHERE group_id = ?1 AND message_id = ?2",
                params![group_id, message_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn list_pins(&self, group_id: i64) -> ChatResult<Vec<PinnedRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_PIN} WHERE group_id = ?1 ORDER BY id DESC"
            ))?;
            let rows = stmt
                .query_map([group_id], map_pin)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Activity audit --

    pub fn insert_activity(
        &self,
        group_id: i64,
        action_type: &str,
        actor: &str,
        target: Option<&str>,
        details: Option<&str>,
    ) -> ChatResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_activity (group_id, action_type, actor, target, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![group_id, action_type, actor, target, details],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_activity(&self, group_id: i64, limit: u32) -> ChatResult<Vec<ActivityRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, group_id, action_type, actor, target, details, created_at
                 FROM group_activity WHERE group_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![group_id, limit], |row| {
                    Ok(ActivityRow {
                        id: row.get(0)?,
                        group_id: row.get(1)?,
                        action_type: row.get(2)?,
                        actor: row.get(3)?,
                        target: row.get(4)?,
                        details: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Files shared in a group's room, joined with the carrying message.
    pub fn group_files(&self, group_id: i64) -> ChatResult<Vec<GroupFileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.id, f.filename, f.original_name, f.uploader, f.mimetype, f.created_at,
                        m.id, m.created_at
                 FROM messages m
                 JOIN files f ON f.id = m.file_id
                 WHERE m.group_id = ?1
                 ORDER BY m.id DESC",
            )?;
            let rows = stmt
                .query_map([group_id], |row| {
                    Ok(GroupFileRow {
                        file: map_file(row)?,
                        message_id: row.get(6)?,
                        message_created_at: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

const SELECT_MEMBER: &str =
    "SELECT id, group_id, username, is_admin, role, notification_preference, joined_at
 FROM group_members";

const SELECT_PIN: &str =
    "SELECT id, group_id, message_id, pinned_by, pinned_at FROM pinned_messages";

fn query_group(conn: &Connection, id: i64) -> ChatResult<Option<GroupRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, icon, created_by, admin_only, created_at
         FROM groups WHERE id = ?1",
    )?;
    Ok(stmt.query_row([id], map_group).optional()?)
}

fn query_member(conn: &Connection, group_id: i64, username: &str) -> ChatResult<Option<GroupMemberRow>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_MEMBER} WHERE group_id = ?1 AND username = ?2"
    ))?;
    Ok(stmt
        .query_row(params![group_id, username], map_member)
        .optional()?)
}

fn map_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        icon: row.get(3)?,
        created_by: row.get(4)?,
        admin_only: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMemberRow> {
    Ok(GroupMemberRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        username: row.get(2)?,
        is_admin: row.get(3)?,
        role: row.get(4)?,
        notification_preference: row.get(5)?,
        joined_at: row.get(6)?,
    })
}

fn map_pin(row: &rusqlite::Row<'_>) -> rusqlite::Result<PinnedRow> {
    Ok(PinnedRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        message_id: row.get(2)?,
        pinned_by: row.get(3)?,
        pinned_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::error::ChatError;
    use crate::models::NewMessage;

    fn seed_group(db: &Database) -> i64 {
        let gid = db.create_group("ops", None, None, "Alice").unwrap();
        db.add_member(gid, "Alice", true, "admin").unwrap();
        db.add_member(gid, "Bob", false, "member").unwrap();
        gid
    }

    #[test]
    fn membership_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let gid = seed_group(&db);

        let members = db.list_members(gid).unwrap();
        assert_eq!(members.len(), 2);
        assert!(db.get_member(gid, "Alice").unwrap().unwrap().is_admin);
        assert_eq!(db.admin_count(gid).unwrap(), 1);

        assert!(db.remove_member(gid, "Bob").unwrap());
        assert!(!db.remove_member(gid, "Bob").unwrap());
    }

    #[test]
    fn pin_uniqueness_is_enforced() {
        let db = Database::open_in_memory().unwrap();
        let gid = seed_group(&db);
        let msg = db
            .append_message(&NewMessage {
                sender: "Alice".into(),
                recipients: format!("group-{gid}"),
                content: Some("token".into()),
                file_id: None,
                reply_to: None,
                group_id: Some(gid),
            })
            .unwrap();

        db.pin_message(gid, msg, "Alice").unwrap();
        assert!(matches!(
            db.pin_message(gid, msg, "Alice"),
            Err(ChatError::Validation(_))
        ));

        assert!(db.unpin_message(gid, msg).unwrap());
        assert!(!db.unpin_message(gid, msg).unwrap());
    }

    #[test]
    fn group_delete_cascades_room_state() {
        let db = Database::open_in_memory().unwrap();
        let gid = seed_group(&db);
        let msg = db
            .append_message(&NewMessage {
                sender: "Bob".into(),
                recipients: format!("group-{gid}"),
                content: Some("token".into()),
                file_id: None,
                reply_to: None,
                group_id: Some(gid),
            })
            .unwrap();
        db.hide_message(msg, "Alice").unwrap();
        db.pin_message(gid, msg, "Alice").unwrap();
        db.mute_group(gid, "Bob").unwrap();
        db.insert_activity(gid, "group_created", "Alice", None, None)
            .unwrap();

        db.delete_group_cascade(gid).unwrap();

        assert!(db.get_group(gid).unwrap().is_none());
        assert!(db.get_message(msg).unwrap().is_none());
        assert!(db.list_members(gid).unwrap().is_empty());
        assert!(db.list_pins(gid).unwrap().is_empty());
        assert!(!db.is_muted(gid, "Bob").unwrap());
        // audit survives group deletion
        assert_eq!(db.list_activity(gid, 10).unwrap().len(), 1);
    }

    #[test]
    fn mute_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let gid = seed_group(&db);
        db.mute_group(gid, "Bob").unwrap();
        db.mute_group(gid, "Bob").unwrap();
        assert!(db.is_muted(gid, "Bob").unwrap());
        db.unmute_group(gid, "Bob").unwrap();
        assert!(!db.is_muted(gid, "Bob").unwrap());
    }
}
