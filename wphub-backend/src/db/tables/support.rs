//! Support ticket database operations

use chrono::Utc;
use rusqlite::Result as SqliteResult;
use uuid::Uuid;

use crate::db::{parse_enum, parse_ts};
use crate::models::{SupportTicket, TicketStatus};
use super::super::Database;

impl Database {
    pub fn create_ticket(&self, user_id: &str, subject: &str, description: &str, priority: &str) -> SqliteResult<SupportTicket> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO support_tickets (id, user_id, subject, description, status, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6, ?6)",
            rusqlite::params![&id, user_id, subject, description, priority, now.to_rfc3339()],
        )?;
        Ok(SupportTicket {
            id,
            user_id: user_id.to_string(),
            subject: subject.to_string(),
            description: description.to_string(),
            status: TicketStatus::Open,
            priority: priority.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Tickets of one user, or all tickets when `user_id` is None
    pub fn list_tickets(&self, user_id: Option<&str>) -> SqliteResult<Vec<SupportTicket>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, subject, description, status, priority, created_at, updated_at FROM support_tickets
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY created_at DESC",
        )?;
        let tickets = stmt
            .query_map([user_id], |row| {
                let status: String = row.get(4)?;
                let created_at: String = row.get(6)?;
                let updated_at: String = row.get(7)?;
                Ok(SupportTicket {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    subject: row.get(2)?,
                    description: row.get(3)?,
                    status: parse_enum(4, &status)?,
                    priority: row.get(5)?,
                    created_at: parse_ts(6, &created_at)?,
                    updated_at: parse_ts(7, &updated_at)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(tickets)
    }

    pub fn update_ticket_status(&self, id: &str, status: TicketStatus) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE support_tickets SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status.as_ref(), &now, id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::{TicketStatus, UserRole};

    #[test]
    fn test_ticket_status_flow() {
        let db = Database::in_memory();
        let user = db.create_user("t@example.com", "h", None, UserRole::User).unwrap();
        let ticket = db.create_ticket(&user.id, "Broken", "Site down", "high").unwrap();

        assert!(db.update_ticket_status(&ticket.id, TicketStatus::InProgress).unwrap());
        assert!(!db.update_ticket_status("missing", TicketStatus::Closed).unwrap());

        let mine = db.list_tickets(Some(&user.id)).unwrap();
        assert_eq!(mine[0].status, TicketStatus::InProgress);
        assert!(db.list_tickets(Some("someone-else")).unwrap().is_empty());
        assert_eq!(db.list_tickets(None).unwrap().len(), 1);
    }
}
