use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::broadcast;

use super::MessageStoreClient;
use super::error::{
    CreateSqliteDirectorySnafu, EmptyMessageTextSnafu, InvalidPageSizeSnafu,
    SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu,
    SqliteQuerySnafu, StorageResult,
};
use super::ids::{ConversationId, MessageId, UserId};
use super::live::{BoxFuture, LiveTailHandle, LiveTailWorker, live_tail_channel, run_live_tail_worker};
use super::types::{MessageRecord, NewMessage, PageCursor, Timestamp};

const CHANGE_FEED_CAPACITY: usize = 256;

/// SQLite-backed conversation store.
///
/// Writes made through this handle (or its clones) notify every live tail opened on it.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
    changes: broadcast::Sender<ConversationId>,
    last_timestamp: Arc<Mutex<i64>>,
}

impl SqliteMessageStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        // Server clock must stay monotonic across restarts.
        let last_timestamp =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(created_at), 0) FROM messages")
                .fetch_one(&pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "sqlite-open-load-clock",
                })?;

        tracing::info!(database_url = %database_url, "opened sqlite message store");

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            pool,
            changes,
            last_timestamp: Arc::new(Mutex::new(last_timestamp)),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn next_timestamp(&self) -> Timestamp {
        let mut last = self
            .last_timestamp
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let next = Timestamp::now().as_micros().max(*last + 1);
        *last = next;
        Timestamp::from_micros(next)
    }
}

impl MessageStoreClient for SqliteMessageStore {
    fn subscribe_live_tail(
        &self,
        conversation_id: ConversationId,
        page_size: usize,
    ) -> StorageResult<LiveTailHandle> {
        ensure!(
            page_size > 0,
            InvalidPageSizeSnafu {
                stage: "sqlite-subscribe-live-tail",
            }
        );

        let changes = self.changes.subscribe();
        let (event_tx, stream, cancel_rx) = live_tail_channel(conversation_id);
        let pool = self.pool.clone();
        let load_window = move || -> BoxFuture<'static, StorageResult<Vec<MessageRecord>>> {
            let pool = pool.clone();
            Box::pin(async move { load_latest_window(&pool, conversation_id, page_size).await })
        };

        let worker: LiveTailWorker = Box::pin(run_live_tail_worker(
            conversation_id,
            changes,
            event_tx,
            cancel_rx,
            load_window,
        ));

        Ok(LiveTailHandle { stream, worker })
    }

    fn fetch_older_page<'a>(
        &'a self,
        conversation_id: ConversationId,
        before: PageCursor,
        page_size: usize,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            ensure!(
                page_size > 0,
                InvalidPageSizeSnafu {
                    stage: "sqlite-fetch-older-page",
                }
            );

            let before_id = before.id.to_string();
            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, sender_id, text, created_at FROM messages WHERE conversation_id = ? AND (created_at < ? OR (created_at = ? AND id < ?)) ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(conversation_id.to_string())
            .bind(before.created_at.as_micros())
            .bind(before.created_at.as_micros())
            .bind(before_id)
            .bind(page_limit(page_size))
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-older-page-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }

    fn send_message<'a>(
        &'a self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageId>> {
        Box::pin(async move {
            ensure!(
                !input.text.trim().is_empty(),
                EmptyMessageTextSnafu {
                    stage: "sqlite-send-message",
                }
            );

            let message_id = MessageId::new_v7();
            let created_at = self.next_timestamp();

            sqlx::query(
                "INSERT INTO messages (id, conversation_id, sender_id, text, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(conversation_id.to_string())
            .bind(input.sender_id.as_str().to_string())
            .bind(input.text)
            .bind(created_at.as_micros())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-send-insert",
            })?;

            let _ = self.changes.send(conversation_id);
            Ok(message_id)
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    sender_id: String,
    text: String,
    created_at: i64,
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        conversation_id: ConversationId::parse(&row.conversation_id)?,
        sender_id: UserId::new(row.sender_id),
        text: row.text,
        created_at: Some(Timestamp::from_micros(row.created_at)),
    })
}

async fn load_latest_window(
    pool: &SqlitePool,
    conversation_id: ConversationId,
    page_size: usize,
) -> StorageResult<Vec<MessageRecord>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT id, conversation_id, sender_id, text, created_at FROM messages WHERE conversation_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(conversation_id.to_string())
    .bind(page_limit(page_size))
    .fetch_all(pool)
    .await
    .context(SqliteQuerySnafu {
        stage: "message-live-window-query",
    })?;

    rows.into_iter().map(message_row_to_record).collect()
}

fn page_limit(page_size: usize) -> i64 {
    i64::try_from(page_size).unwrap_or(i64::MAX)
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
                stage: "sqlite-open-create-directory",
                path: parent.display().to_string(),
            })?;
        }
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
