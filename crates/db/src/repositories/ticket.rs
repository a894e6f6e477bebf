use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use mockops_core::domain::message::{MessageTs, ThreadRef};
use mockops_core::domain::ticket::{Comment, StatusChange, Ticket, TicketKey, TicketStatus};
use mockops_core::tracker::store::{StoreError, TicketStore};

use super::RepositoryError;
use crate::DbPool;

const TICKET_COLUMNS: &str = "
    t.ticket_key,
    t.channel_id,
    t.thread_ts,
    t.title,
    t.status,
    t.created_by,
    t.created_at,
    t.reviewed_by,
    t.reviewed_at,
    t.review_summary,
    t.closed_by,
    t.closed_at,
    t.close_summary,
    t.last_comment_ts,
    t.revision";

pub struct SqlTicketStore {
    pool: DbPool,
}

impl SqlTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_by_thread(&self, thread: &ThreadRef) -> Result<Option<Ticket>, RepositoryError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS}
             FROM thread_bindings b
             JOIN tickets t ON t.ticket_key = b.ticket_key
             WHERE b.channel_id = ? AND b.thread_ts = ?"
        );
        let row = sqlx::query(&sql)
            .bind(&thread.channel_id)
            .bind(thread.thread_ts.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.with_comments(ticket_from_row(row)?).await?)),
            None => Ok(None),
        }
    }

    async fn load_by_key(&self, key: &TicketKey) -> Result<Option<Ticket>, RepositoryError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets t WHERE t.ticket_key = ?");
        let row = sqlx::query(&sql).bind(&key.0).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => Ok(Some(self.with_comments(ticket_from_row(row)?).await?)),
            None => Ok(None),
        }
    }

    async fn load_list(
        &self,
        status: Option<TicketStatus>,
        limit: usize,
    ) -> Result<Vec<Ticket>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = if let Some(status) = status {
            let sql = format!(
                "SELECT {TICKET_COLUMNS}
                 FROM tickets t
                 WHERE t.status = ?
                 ORDER BY t.created_at DESC, t.ticket_key DESC
                 LIMIT ?"
            );
            sqlx::query(&sql).bind(status.as_str()).bind(limit).fetch_all(&self.pool).await?
        } else {
            let sql = format!(
                "SELECT {TICKET_COLUMNS}
                 FROM tickets t
                 ORDER BY t.created_at DESC, t.ticket_key DESC
                 LIMIT ?"
            );
            sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?
        };

        let mut tickets = Vec::with_capacity(rows.len());
        for row in rows {
            tickets.push(self.with_comments(ticket_from_row(row)?).await?);
        }
        Ok(tickets)
    }

    async fn with_comments(&self, mut ticket: Ticket) -> Result<Ticket, RepositoryError> {
        let rows = sqlx::query(
            "SELECT source_ts, author_id, author_name, body, posted_at
             FROM ticket_comments
             WHERE ticket_key = ?
             ORDER BY id ASC",
        )
        .bind(&ticket.key.0)
        .fetch_all(&self.pool)
        .await?;

        ticket.comments = rows.into_iter().map(comment_from_row).collect::<Result<_, _>>()?;
        Ok(ticket)
    }

    async fn update_row(&self, ticket: &Ticket) -> Result<bool, RepositoryError> {
        let Some(previous) = ticket.revision.checked_sub(1) else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        let (reviewed_by, reviewed_at, review_summary) = change_columns(ticket.review.as_ref());
        let (closed_by, closed_at, close_summary) = change_columns(ticket.closure.as_ref());
        let result = sqlx::query(
            "UPDATE tickets SET
                title = ?,
                status = ?,
                reviewed_by = ?,
                reviewed_at = ?,
                review_summary = ?,
                closed_by = ?,
                closed_at = ?,
                close_summary = ?,
                last_comment_ts = ?,
                revision = ?,
                updated_at = ?
             WHERE ticket_key = ? AND revision = ?",
        )
        .bind(&ticket.title)
        .bind(ticket.status.as_str())
        .bind(reviewed_by)
        .bind(reviewed_at)
        .bind(review_summary)
        .bind(closed_by)
        .bind(closed_at)
        .bind(close_summary)
        .bind(ticket.last_comment_ts.as_ref().map(MessageTs::as_str))
        .bind(i64::from(ticket.revision))
        .bind(format_timestamp(Utc::now()))
        .bind(&ticket.key.0)
        .bind(i64::from(previous))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_comments(&mut tx, ticket).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait::async_trait]
impl TicketStore for SqlTicketStore {
    async fn find_by_thread(&self, thread: &ThreadRef) -> Result<Option<Ticket>, StoreError> {
        Ok(self.load_by_thread(thread).await?)
    }

    async fn find_by_key(&self, key: &TicketKey) -> Result<Option<Ticket>, StoreError> {
        Ok(self.load_by_key(key).await?)
    }

    async fn list(
        &self,
        status: Option<TicketStatus>,
        limit: usize,
    ) -> Result<Vec<Ticket>, StoreError> {
        Ok(self.load_list(status, limit).await?)
    }

    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let now = format_timestamp(Utc::now());
        let (reviewed_by, reviewed_at, review_summary) = change_columns(ticket.review.as_ref());
        let (closed_by, closed_at, close_summary) = change_columns(ticket.closure.as_ref());

        let inserted = sqlx::query(
            "INSERT INTO tickets (
                ticket_key,
                channel_id,
                thread_ts,
                title,
                status,
                created_by,
                created_at,
                reviewed_by,
                reviewed_at,
                review_summary,
                closed_by,
                closed_at,
                close_summary,
                last_comment_ts,
                revision,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.key.0)
        .bind(&ticket.thread.channel_id)
        .bind(ticket.thread.thread_ts.as_str())
        .bind(&ticket.title)
        .bind(ticket.status.as_str())
        .bind(&ticket.created_by)
        .bind(format_timestamp(ticket.created_at))
        .bind(reviewed_by)
        .bind(reviewed_at)
        .bind(review_summary)
        .bind(closed_by)
        .bind(closed_at)
        .bind(close_summary)
        .bind(ticket.last_comment_ts.as_ref().map(MessageTs::as_str))
        .bind(i64::from(ticket.revision))
        .bind(&now)
        .execute(&mut *tx)
        .await;
        if let Err(error) = inserted {
            return Err(if is_unique_violation(&error) {
                StoreError::DuplicateKey(ticket.key.clone())
            } else {
                RepositoryError::from(error).into()
            });
        }

        let binding = ticket.binding();
        let bound = sqlx::query(
            "INSERT INTO thread_bindings (channel_id, thread_ts, ticket_key, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&binding.thread.channel_id)
        .bind(binding.thread.thread_ts.as_str())
        .bind(&binding.ticket_key.0)
        .bind(&now)
        .execute(&mut *tx)
        .await;
        if let Err(error) = bound {
            return Err(if is_unique_violation(&error) {
                StoreError::ThreadAlreadyBound {
                    channel_id: binding.thread.channel_id,
                    thread_ts: binding.thread.thread_ts.to_string(),
                }
            } else {
                RepositoryError::from(error).into()
            });
        }

        insert_comments(&mut tx, ticket).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn update(&self, ticket: &Ticket) -> Result<bool, StoreError> {
        Ok(self.update_row(ticket).await?)
    }
}

async fn insert_comments(
    tx: &mut Transaction<'_, Sqlite>,
    ticket: &Ticket,
) -> Result<(), RepositoryError> {
    for comment in &ticket.comments {
        sqlx::query(
            "INSERT OR IGNORE INTO ticket_comments (
                ticket_key,
                source_ts,
                author_id,
                author_name,
                body,
                posted_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.key.0)
        .bind(comment.source_ts.as_str())
        .bind(&comment.author_id)
        .bind(&comment.author_name)
        .bind(&comment.text)
        .bind(comment.posted_at.map(format_timestamp))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(database) if database.is_unique_violation())
}

fn change_columns(
    change: Option<&StatusChange>,
) -> (Option<String>, Option<String>, Option<String>) {
    match change {
        Some(change) => {
            (Some(change.actor.clone()), Some(format_timestamp(change.at)), change.summary.clone())
        }
        None => (None, None, None),
    }
}

fn change_from_columns(
    column: &str,
    actor: Option<String>,
    at: Option<String>,
    summary: Option<String>,
) -> Result<Option<StatusChange>, RepositoryError> {
    match (actor, at) {
        (Some(actor), Some(at)) => {
            Ok(Some(StatusChange { actor, at: parse_timestamp(column, at)?, summary }))
        }
        (None, None) => Ok(None),
        _ => Err(RepositoryError::Decode(format!(
            "`{column}` must be set together with its actor column"
        ))),
    }
}

fn ticket_from_row(row: SqliteRow) -> Result<Ticket, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = status_raw
        .parse::<TicketStatus>()
        .map_err(|_| RepositoryError::Decode(format!("unknown ticket status `{status_raw}`")))?;

    Ok(Ticket {
        key: TicketKey(row.try_get("ticket_key")?),
        thread: ThreadRef::new(
            row.try_get::<String, _>("channel_id")?,
            row.try_get::<String, _>("thread_ts")?,
        ),
        title: row.try_get("title")?,
        status,
        created_by: row.try_get("created_by")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        review: change_from_columns(
            "reviewed_at",
            row.try_get("reviewed_by")?,
            row.try_get("reviewed_at")?,
            row.try_get("review_summary")?,
        )?,
        closure: change_from_columns(
            "closed_at",
            row.try_get("closed_by")?,
            row.try_get("closed_at")?,
            row.try_get("close_summary")?,
        )?,
        comments: Vec::new(),
        last_comment_ts: row.try_get::<Option<String>, _>("last_comment_ts")?.map(MessageTs),
        revision: parse_u32("revision", row.try_get("revision")?)?,
    })
}

fn comment_from_row(row: SqliteRow) -> Result<Comment, RepositoryError> {
    Ok(Comment {
        author_id: row.try_get("author_id")?,
        author_name: row.try_get("author_name")?,
        text: row.try_get("body")?,
        source_ts: MessageTs(row.try_get("source_ts")?),
        posted_at: row
            .try_get::<Option<String>, _>("posted_at")?
            .map(|value| parse_timestamp("posted_at", value))
            .transpose()?,
    })
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use mockops_core::domain::message::{MessageTs, ThreadRef};
    use mockops_core::domain::ticket::{Comment, StatusChange, Ticket, TicketKey, TicketStatus};
    use mockops_core::tracker::store::{StoreError, TicketStore};

    use super::SqlTicketStore;
    use crate::migrations;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn sample_ticket(key: &str, thread_ts: &str) -> Ticket {
        Ticket::open(
            TicketKey(key.to_string()),
            ThreadRef::new("C-OPS", thread_ts),
            "Disk full on db-1",
            "U-REPORTER",
            parse_ts("2026-02-23T12:00:00Z"),
        )
    }

    #[tokio::test]
    async fn sql_ticket_store_round_trip_with_binding() {
        let pool = setup_pool().await;
        let store = SqlTicketStore::new(pool.clone());
        let ticket = sample_ticket("MOCK-OPS-100001", "1700000000.000100");

        store.insert(&ticket).await.expect("insert ticket");

        let by_thread = store.find_by_thread(&ticket.thread).await.expect("find by thread");
        assert_eq!(by_thread, Some(ticket.clone()));
        let by_key = store.find_by_key(&ticket.key).await.expect("find by key");
        assert_eq!(by_key, Some(ticket.clone()));
        let other_channel = ThreadRef::new("C-OTHER", "1700000000.000100");
        assert_eq!(store.find_by_thread(&other_channel).await.expect("other channel"), None);

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_ticket_store_rejects_duplicate_key_and_thread() {
        let pool = setup_pool().await;
        let store = SqlTicketStore::new(pool.clone());
        let ticket = sample_ticket("MOCK-OPS-100002", "1700000000.000200");
        store.insert(&ticket).await.expect("insert ticket");

        let same_key = sample_ticket("MOCK-OPS-100002", "1700000000.000999");
        assert_eq!(
            store.insert(&same_key).await,
            Err(StoreError::DuplicateKey(TicketKey("MOCK-OPS-100002".to_string())))
        );

        let same_thread = sample_ticket("MOCK-OPS-100003", "1700000000.000200");
        assert!(matches!(
            store.insert(&same_thread).await,
            Err(StoreError::ThreadAlreadyBound { .. })
        ));
        assert_eq!(
            store.find_by_key(&same_thread.key).await.expect("rolled back ticket"),
            None,
            "a failed binding must not leave the ticket row behind",
        );

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_ticket_store_update_is_compare_and_set() {
        let pool = setup_pool().await;
        let store = SqlTicketStore::new(pool.clone());
        let ticket = sample_ticket("MOCK-OPS-100004", "1700000000.000300");
        store.insert(&ticket).await.expect("insert ticket");

        let mut reviewed = ticket.clone();
        reviewed
            .mark_in_review(StatusChange::new(
                "U-REVIEWER",
                parse_ts("2026-02-23T12:05:00Z"),
                Some("looks good".to_string()),
            ))
            .expect("review");
        reviewed.revision = 1;
        assert!(store.update(&reviewed).await.expect("first update"));

        let mut stale = ticket.clone();
        stale.close(StatusChange::new("U-LATE", parse_ts("2026-02-23T12:06:00Z"), None)).expect("close");
        stale.revision = 1;
        assert!(!store.update(&stale).await.expect("stale update"));

        let stored = store.find_by_key(&ticket.key).await.expect("find").expect("ticket");
        assert_eq!(stored.status, TicketStatus::InReview);
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.review.and_then(|change| change.summary), Some("looks good".to_string()));

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_ticket_store_persists_comments_in_order() {
        let pool = setup_pool().await;
        let store = SqlTicketStore::new(pool.clone());
        let ticket = sample_ticket("MOCK-OPS-100005", "1700000000.000400");
        store.insert(&ticket).await.expect("insert ticket");

        let mut updated = ticket.clone();
        updated.append_comments(
            vec![
                Comment {
                    author_id: "U-2".to_string(),
                    author_name: "Bob".to_string(),
                    text: "second".to_string(),
                    source_ts: MessageTs::from("1700000002.000000"),
                    posted_at: Some(parse_ts("2023-11-14T22:13:22Z")),
                },
                Comment {
                    author_id: "U-1".to_string(),
                    author_name: "Ann".to_string(),
                    text: "first".to_string(),
                    source_ts: MessageTs::from("1700000001.000000"),
                    posted_at: None,
                },
            ],
            MessageTs::from("1700000002.000000"),
        );
        updated.revision = 1;
        assert!(store.update(&updated).await.expect("update"));

        let stored = store.find_by_thread(&ticket.thread).await.expect("find").expect("ticket");
        assert_eq!(stored, updated);
        let texts: Vec<&str> = stored.comments.iter().map(|comment| comment.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_ticket_store_lists_newest_first_with_filter() {
        let pool = setup_pool().await;
        let store = SqlTicketStore::new(pool.clone());

        let mut older = sample_ticket("MOCK-OPS-200001", "1.0");
        older.created_at = parse_ts("2026-02-20T09:00:00Z");
        let newer = sample_ticket("MOCK-OPS-200002", "2.0");
        store.insert(&older).await.expect("insert older");
        store.insert(&newer).await.expect("insert newer");

        let mut closed = newer.clone();
        closed.close(StatusChange::new("U-1", parse_ts("2026-02-23T13:00:00Z"), None)).expect("close");
        closed.revision = 1;
        assert!(store.update(&closed).await.expect("close update"));

        let all = store.list(None, 10).await.expect("list all");
        let keys: Vec<&str> = all.iter().map(|ticket| ticket.key.0.as_str()).collect();
        assert_eq!(keys, vec!["MOCK-OPS-200002", "MOCK-OPS-200001"]);

        let open = store.list(Some(TicketStatus::Open), 10).await.expect("list open");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].key.0, "MOCK-OPS-200001");

        assert_eq!(store.list(None, 1).await.expect("limited").len(), 1);

        pool.close().await;
    }
}
