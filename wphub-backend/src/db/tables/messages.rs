//! Message and notification database operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::{parse_enum, parse_json, parse_ts};
use crate::models::{Message, MessageCategory, NewMessage, Notification, NotificationType};
use super::super::Database;

const MESSAGE_COLUMNS: &str = "id, subject, message, sender_id, sender_email, sender_name, recipient_id,
    recipient_email, is_read, priority, status, category, context, created_at";

impl Database {
    pub fn create_message(&self, new: &NewMessage) -> SqliteResult<Message> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages (id, subject, message, sender_id, sender_email, sender_name, recipient_id,
                    recipient_email, is_read, priority, status, category, context, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, 'open', ?10, ?11, ?12)",
                rusqlite::params![
                    &id,
                    &new.subject,
                    &new.message,
                    new.sender_id.as_deref(),
                    new.sender_email.as_deref(),
                    new.sender_name.as_deref(),
                    &new.recipient_id,
                    &new.recipient_email,
                    new.priority.as_ref(),
                    new.category.as_ref(),
                    new.context.as_ref().map(|c| c.to_string()),
                    &now,
                ],
            )?;
        }
        self.get_message(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_message(&self, id: &str) -> SqliteResult<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
        conn.query_row(&sql, [id], |row| Self::row_to_message(row)).optional()
    }

    pub fn list_inbox(&self, user_id: &str) -> SqliteResult<Vec<Message>> {
        self.query_messages("recipient_id = ?1", user_id)
    }

    pub fn list_sent_messages(&self, user_id: &str) -> SqliteResult<Vec<Message>> {
        self.query_messages("sender_id = ?1", user_id)
    }

    fn query_messages(&self, filter: &str, user_id: &str) -> SqliteResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM messages WHERE {} ORDER BY created_at DESC",
            MESSAGE_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map([user_id], |row| Self::row_to_message(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(messages)
    }

    /// Open transfer request for a site, whoever asked for it
    pub fn find_open_transfer_request(&self, site_id: &str) -> SqliteResult<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM messages
             WHERE category = ?1 AND status = 'open' AND json_extract(context, '$.site_id') = ?2
             ORDER BY created_at DESC LIMIT 1",
            MESSAGE_COLUMNS
        );
        conn.query_row(
            &sql,
            [MessageCategory::SiteTransferRequest.as_ref(), site_id],
            |row| Self::row_to_message(row),
        )
        .optional()
    }

    /// Only the recipient can mark a message read
    pub fn mark_message_read(&self, id: &str, recipient_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE messages SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
            [id, recipient_id],
        )?;
        Ok(rows > 0)
    }

    pub fn resolve_message(&self, id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE messages SET status = 'resolved', is_read = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let priority: String = row.get(9)?;
        let status: String = row.get(10)?;
        let category: String = row.get(11)?;
        let created_at: String = row.get(13)?;
        Ok(Message {
            id: row.get(0)?,
            subject: row.get(1)?,
            message: row.get(2)?,
            sender_id: row.get(3)?,
            sender_email: row.get(4)?,
            sender_name: row.get(5)?,
            recipient_id: row.get(6)?,
            recipient_email: row.get(7)?,
            is_read: row.get(8)?,
            priority: parse_enum(9, &priority)?,
            status: parse_enum(10, &status)?,
            category: parse_enum(11, &category)?,
            context: parse_json(12, row.get(12)?)?,
            created_at: parse_ts(13, &created_at)?,
        })
    }

    // -- notifications --

    pub fn create_notification(
        &self,
        recipient_id: &str,
        recipient_email: &str,
        title: &str,
        message: &str,
        notification_type: NotificationType,
    ) -> SqliteResult<String> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO notifications (id, recipient_id, recipient_email, title, message, type, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            rusqlite::params![&id, recipient_id, recipient_email, title, message, notification_type.as_ref(), &now],
        )?;
        Ok(id)
    }

    pub fn list_notifications(&self, recipient_id: &str) -> SqliteResult<Vec<Notification>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, recipient_id, recipient_email, title, message, type, is_read, created_at
             FROM notifications WHERE recipient_id = ?1 ORDER BY created_at DESC",
        )?;
        let notifications = stmt
            .query_map([recipient_id], |row| {
                let notification_type: String = row.get(5)?;
                let created_at: String = row.get(7)?;
                Ok(Notification {
                    id: row.get(0)?,
                    recipient_id: row.get(1)?,
                    recipient_email: row.get(2)?,
                    title: row.get(3)?,
                    message: row.get(4)?,
                    notification_type: parse_enum(5, &notification_type)?,
                    is_read: row.get(6)?,
                    created_at: parse_ts(7, &created_at)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(notifications)
    }

    pub fn mark_notification_read(&self, id: &str, recipient_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
            [id, recipient_id],
        )?;
        Ok(rows > 0)
    }
}
