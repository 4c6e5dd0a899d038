use rusqlite::Connection;
use tracing::info;

use crate::error::ChatResult;

pub fn run(conn: &Connection) -> ChatResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            online      INTEGER NOT NULL DEFAULT 0,
            is_admin    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS files (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            filename      TEXT NOT NULL,
            original_name TEXT NOT NULL,
            uploader      TEXT NOT NULL,
            mimetype      TEXT NOT NULL,
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS groups (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            description TEXT,
            icon        TEXT,
            created_by  TEXT NOT NULL,
            admin_only  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender      TEXT NOT NULL,
            recipients  TEXT NOT NULL,
            content     TEXT,
            file_id     INTEGER REFERENCES files(id),
            status      TEXT NOT NULL DEFAULT 'sent',
            reply_to    INTEGER,
            reactions   TEXT,
            group_id    INTEGER REFERENCES groups(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, id);
        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender, id);

        CREATE TABLE IF NOT EXISTS hidden_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            msg_id      INTEGER NOT NULL REFERENCES messages(id),
            username    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(msg_id, username)
        );

        CREATE INDEX IF NOT EXISTS idx_hidden_user
            ON hidden_messages(username);

        CREATE TABLE IF NOT EXISTS group_members (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id                INTEGER NOT NULL REFERENCES groups(id),
            username                TEXT NOT NULL,
            is_admin                INTEGER NOT NULL DEFAULT 0,
            role                    TEXT NOT NULL DEFAULT 'member',
            notification_preference TEXT NOT NULL DEFAULT 'all',
            joined_at               TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(group_id, username)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user
            ON group_members(username);

        CREATE TABLE IF NOT EXISTS group_mutes (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id  INTEGER NOT NULL REFERENCES groups(id),
            username  TEXT NOT NULL,
            UNIQUE(group_id, username)
        );

        CREATE TABLE IF NOT EXISTS pinned_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id    INTEGER NOT NULL REFERENCES groups(id),
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            pinned_by   TEXT NOT NULL,
            pinned_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(group_id, message_id)
        );

        -- Audit rows deliberately carry no FK so the trail outlives its group.
        CREATE TABLE IF NOT EXISTS group_activity (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id    INTEGER NOT NULL,
            action_type TEXT NOT NULL,
            actor       TEXT NOT NULL,
            target      TEXT,
            details     TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_activity_group
            ON group_activity(group_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
