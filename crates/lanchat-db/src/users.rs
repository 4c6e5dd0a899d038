use rusqlite::{Connection, OptionalExtension, params};

use crate::Database;
use crate::error::{ChatError, ChatResult};
use crate::models::UserRow;

impl Database {
    pub fn create_user(&self, username: &str, password_hash: &str, is_admin: bool) -> ChatResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, is_admin) VALUES (?1, ?2, ?3)",
                params![username, password_hash, is_admin],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user(&self, username: &str) -> ChatResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, username))
    }

    pub fn user_count(&self) -> ChatResult<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
        })
    }

    pub fn set_online(&self, username: &str, online: bool) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET online = ?2 WHERE username = ?1",
                params![username, online],
            )?;
            Ok(())
        })
    }

    pub fn list_users(&self) -> ChatResult<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, online, is_admin, created_at
                 FROM users ORDER BY username",
            )?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn online_usernames(&self) -> ChatResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT username FROM users WHERE online = 1 ORDER BY username")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Promote or demote a server admin. Demoting the last remaining admin is
    /// rejected so the server always keeps at least one.
    pub fn set_user_admin(&self, username: &str, is_admin: bool) -> ChatResult<()> {
        self.with_tx(|tx| {
            let user = query_user(tx, username)?.ok_or(ChatError::NotFound("user"))?;
            if !is_admin && user.is_admin {
                let admins: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM users WHERE is_admin = 1",
                    [],
                    |row| row.get(0),
                )?;
                if admins <= 1 {
                    return Err(ChatError::policy(
                        "at least one admin must remain in the system",
                    ));
                }
            }
            tx.execute(
                "UPDATE users SET is_admin = ?2 WHERE username = ?1",
                params![username, is_admin],
            )?;
            Ok(())
        })
    }

    /// Remove a user account. Admin accounts can never be deleted; messages
    /// reference senders by name so the log is unaffected either way.
    pub fn delete_user(&self, username: &str) -> ChatResult<()> {
        self.with_tx(|tx| {
            let user = query_user(tx, username)?.ok_or(ChatError::NotFound("user"))?;
            if user.is_admin {
                return Err(ChatError::policy("admin users cannot be deleted"));
            }
            tx.execute(
                "DELETE FROM hidden_messages WHERE username = ?1",
                params![username],
            )?;
            tx.execute(
                "DELETE FROM group_mutes WHERE username = ?1",
                params![username],
            )?;
            tx.execute(
                "DELETE FROM group_members WHERE username = ?1",
                params![username],
            )?;
            tx.execute("DELETE FROM users WHERE id = ?1", params![user.id])?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, username: &str) -> ChatResult<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, password, online, is_admin, created_at
         FROM users WHERE username = ?1",
    )?;
    Ok(stmt.query_row([username], map_user).optional()?)
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        online: row.get(3)?,
        is_admin: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::error::ChatError;

    #[test]
    fn admin_users_cannot_be_deleted() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("Vicky", "hash", true).unwrap();
        db.create_user("Bob", "hash", false).unwrap();

        assert!(matches!(
            db.delete_user("Vicky"),
            Err(ChatError::Policy(_))
        ));
        db.delete_user("Bob").unwrap();
        assert!(db.get_user("Bob").unwrap().is_none());
    }

    #[test]
    fn last_admin_cannot_be_demoted() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("Vicky", "hash", true).unwrap();
        db.create_user("Bob", "hash", false).unwrap();

        assert!(matches!(
            db.set_user_admin("Vicky", false),
            Err(ChatError::Policy(_))
        ));

        db.set_user_admin("Bob", true).unwrap();
        db.set_user_admin("Vicky", false).unwrap();
        assert!(!db.get_user("Vicky").unwrap().unwrap().is_admin);
    }

    #[test]
    fn online_flag_round_trips() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("Alice", "hash", false).unwrap();
        db.set_online("Alice", true).unwrap();
        assert_eq!(db.online_usernames().unwrap(), vec!["Alice".to_string()]);
        db.set_online("Alice", false).unwrap();
        assert!(db.online_usernames().unwrap().is_empty());
    }
}
