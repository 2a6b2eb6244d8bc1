use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::models::{
    CompletionUpdate, ConversationModel, ConversationStatus, ErrorLogModel, MessageModel,
    NewConversation, NewErrorLog, NewMessage, ParticipantModel, TotalsDelta,
};
use crate::shared::AppError;

/// Persistence collaborator for the ingest pipeline.
///
/// All operations are keyed by externally supplied string identifiers.
/// `increment_totals` must be atomic: concurrent increments to the same
/// conversation may interleave in any order but are never lost.
#[async_trait]
pub trait ConversationRepository {
    async fn create_conversation(&self, conversation: &NewConversation) -> Result<(), AppError>;
    async fn create_message(&self, message: &NewMessage) -> Result<(), AppError>;
    async fn increment_totals(
        &self,
        conversation_id: &str,
        delta: &TotalsDelta,
    ) -> Result<(), AppError>;
    async fn complete_conversation(
        &self,
        conversation_id: &str,
        update: &CompletionUpdate,
    ) -> Result<(), AppError>;
    async fn mark_errored(
        &self,
        conversation_id: &str,
        error_message: &str,
    ) -> Result<(), AppError>;
    async fn append_error_log(&self, entry: &NewErrorLog) -> Result<(), AppError>;
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationModel>, AppError>;
}

struct InMemoryState {
    conversations: HashMap<String, ConversationModel>,
    messages: HashMap<String, MessageModel>,
    error_logs: Vec<ErrorLogModel>,
}

/// In-memory implementation of ConversationRepository for development and
/// testing
///
/// Provides a realistic implementation usable without a database
/// connection. Data is stored in memory and lost on restart. The single
/// mutex makes every operation, including totals increments, atomic.
pub struct InMemoryConversationRepository {
    state: Mutex<InMemoryState>,
}

impl Default for InMemoryConversationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                conversations: HashMap::new(),
                messages: HashMap::new(),
                error_logs: Vec::new(),
            }),
        }
    }

    /// Returns the current number of message records (useful in tests)
    pub fn message_count(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    /// Returns the recorded error-log entries, oldest first
    pub fn error_logs(&self) -> Vec<ErrorLogModel> {
        self.state.lock().unwrap().error_logs.clone()
    }

    /// Checks if a conversation exists by ID (useful for debugging)
    pub fn has_conversation(&self, conversation_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .conversations
            .contains_key(conversation_id)
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    #[instrument(skip(self, conversation))]
    async fn create_conversation(&self, conversation: &NewConversation) -> Result<(), AppError> {
        debug!(conversation_id = %conversation.id, "Creating conversation in memory");

        let mut state = self.state.lock().unwrap();
        if state.conversations.contains_key(&conversation.id) {
            warn!(conversation_id = %conversation.id, "Conversation already exists in memory");
            return Err(AppError::Conflict(format!(
                "Conversation {} already exists",
                conversation.id
            )));
        }

        state.conversations.insert(
            conversation.id.clone(),
            ConversationModel {
                id: conversation.id.clone(),
                title: conversation.title.clone(),
                status: ConversationStatus::Active,
                participants: conversation.participants.clone(),
                message_count: 0,
                total_tokens: 0,
                total_cost: 0.0,
                total_duration_ms: 0,
                started_at: conversation.started_at,
                completed_at: None,
                error_message: None,
            },
        );

        debug!(conversation_id = %conversation.id, "Conversation created successfully in memory");
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn create_message(&self, message: &NewMessage) -> Result<(), AppError> {
        debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "Creating message in memory"
        );

        let mut state = self.state.lock().unwrap();
        if !state.conversations.contains_key(&message.conversation_id) {
            warn!(conversation_id = %message.conversation_id, "Unknown conversation for message");
            return Err(AppError::Conflict(format!(
                "Unknown conversation {}",
                message.conversation_id
            )));
        }
        if state.messages.contains_key(&message.id) {
            warn!(message_id = %message.id, "Message already exists in memory");
            return Err(AppError::Conflict(format!(
                "Message {} already exists",
                message.id
            )));
        }

        state.messages.insert(
            message.id.clone(),
            MessageModel {
                id: message.id.clone(),
                conversation_id: message.conversation_id.clone(),
                sender: message.sender.clone(),
                content: message.content.clone(),
                tokens_used: message.tokens_used,
                cost: message.cost,
                duration_ms: message.duration_ms,
                created_at: message.created_at,
            },
        );

        debug!(message_id = %message.id, "Message created successfully in memory");
        Ok(())
    }

    #[instrument(skip(self, delta))]
    async fn increment_totals(
        &self,
        conversation_id: &str,
        delta: &TotalsDelta,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let conversation = state.conversations.get_mut(conversation_id).ok_or_else(|| {
            warn!(conversation_id = %conversation_id, "Unknown conversation for totals update");
            AppError::Conflict(format!("Unknown conversation {}", conversation_id))
        })?;

        conversation.message_count += delta.messages;
        conversation.total_tokens += delta.tokens;
        conversation.total_cost += delta.cost;
        conversation.total_duration_ms += delta.duration_ms;

        debug!(
            conversation_id = %conversation_id,
            message_count = conversation.message_count,
            "Conversation totals incremented"
        );
        Ok(())
    }

    #[instrument(skip(self, update))]
    async fn complete_conversation(
        &self,
        conversation_id: &str,
        update: &CompletionUpdate,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let conversation = state.conversations.get_mut(conversation_id).ok_or_else(|| {
            warn!(conversation_id = %conversation_id, "Unknown conversation for completion");
            AppError::Conflict(format!("Unknown conversation {}", conversation_id))
        })?;

        conversation.status = update.status;
        conversation.completed_at = Some(update.completed_at);
        if let Some(count) = update.message_count {
            conversation.message_count = count;
        }
        if let Some(tokens) = update.total_tokens {
            conversation.total_tokens = tokens;
        }
        if let Some(cost) = update.total_cost {
            conversation.total_cost = cost;
        }
        if let Some(duration) = update.total_duration_ms {
            conversation.total_duration_ms = duration;
        }

        debug!(
            conversation_id = %conversation_id,
            status = conversation.status.as_str(),
            "Conversation completed"
        );
        Ok(())
    }

    #[instrument(skip(self, error_message))]
    async fn mark_errored(
        &self,
        conversation_id: &str,
        error_message: &str,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let conversation = state.conversations.get_mut(conversation_id).ok_or_else(|| {
            warn!(conversation_id = %conversation_id, "Unknown conversation for error status");
            AppError::Conflict(format!("Unknown conversation {}", conversation_id))
        })?;

        conversation.status = ConversationStatus::Errored;
        conversation.error_message = Some(error_message.to_string());

        debug!(conversation_id = %conversation_id, "Conversation marked as errored");
        Ok(())
    }

    #[instrument(skip(self, entry))]
    async fn append_error_log(&self, entry: &NewErrorLog) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.error_logs.push(ErrorLogModel {
            id: Uuid::new_v4().to_string(),
            conversation_id: entry.conversation_id.clone(),
            error: entry.error.clone(),
            created_at: Utc::now(),
        });

        debug!(conversation_id = %entry.conversation_id, "Error log entry appended");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationModel>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.conversations.get(conversation_id).cloned())
    }
}

/// PostgreSQL implementation of ConversationRepository for production
pub struct PostgresConversationRepository {
    pool: PgPool,
}

impl PostgresConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_sqlx_error(context: &str, e: sqlx::Error) -> AppError {
        // Unique and foreign-key violations are persistence conflicts, not
        // store outages.
        if let Some(db_err) = e.as_database_error() {
            if matches!(db_err.code().as_deref(), Some("23505") | Some("23503")) {
                return AppError::Conflict(format!("{}: {}", context, db_err.message()));
            }
        }
        AppError::DatabaseError(e.to_string())
    }
}

#[async_trait]
impl ConversationRepository for PostgresConversationRepository {
    #[instrument(skip(self, conversation))]
    async fn create_conversation(&self, conversation: &NewConversation) -> Result<(), AppError> {
        debug!(conversation_id = %conversation.id, "Creating conversation in database");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            "INSERT INTO conversations (id, title, status, started_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&conversation.id)
        .bind(&conversation.title)
        .bind(ConversationStatus::Active.as_str())
        .bind(conversation.started_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            warn!(error = %e, conversation_id = %conversation.id, "Failed to insert conversation");
            Self::map_sqlx_error("insert conversation", e)
        })?;

        for participant in &conversation.participants {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, name, role) \
                 VALUES ($1, $2, $3)",
            )
            .bind(&conversation.id)
            .bind(&participant.name)
            .bind(&participant.role)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                warn!(error = %e, conversation_id = %conversation.id, "Failed to insert participant");
                Self::map_sqlx_error("insert participant", e)
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        debug!(conversation_id = %conversation.id, "Conversation created successfully in database");
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn create_message(&self, message: &NewMessage) -> Result<(), AppError> {
        debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "Creating message in database"
        );

        sqlx::query(
            "INSERT INTO messages \
             (id, conversation_id, sender, content, tokens_used, cost, duration_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender)
        .bind(&message.content)
        .bind(message.tokens_used)
        .bind(message.cost)
        .bind(message.duration_ms)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, message_id = %message.id, "Failed to insert message");
            Self::map_sqlx_error("insert message", e)
        })?;

        Ok(())
    }

    #[instrument(skip(self, delta))]
    async fn increment_totals(
        &self,
        conversation_id: &str,
        delta: &TotalsDelta,
    ) -> Result<(), AppError> {
        // Single UPDATE so concurrent increments compose atomically.
        let result = sqlx::query(
            "UPDATE conversations SET \
             message_count = message_count + $2, \
             total_tokens = total_tokens + $3, \
             total_cost = total_cost + $4, \
             total_duration_ms = total_duration_ms + $5 \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(delta.messages)
        .bind(delta.tokens)
        .bind(delta.cost)
        .bind(delta.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, conversation_id = %conversation_id, "Failed to increment totals");
            AppError::DatabaseError(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            warn!(conversation_id = %conversation_id, "Unknown conversation for totals update");
            return Err(AppError::Conflict(format!(
                "Unknown conversation {}",
                conversation_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, update))]
    async fn complete_conversation(
        &self,
        conversation_id: &str,
        update: &CompletionUpdate,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE conversations SET \
             status = $2, \
             completed_at = $3, \
             message_count = COALESCE($4, message_count), \
             total_tokens = COALESCE($5, total_tokens), \
             total_cost = COALESCE($6, total_cost), \
             total_duration_ms = COALESCE($7, total_duration_ms) \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(update.status.as_str())
        .bind(update.completed_at)
        .bind(update.message_count)
        .bind(update.total_tokens)
        .bind(update.total_cost)
        .bind(update.total_duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, conversation_id = %conversation_id, "Failed to complete conversation");
            AppError::DatabaseError(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Unknown conversation {}",
                conversation_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, error_message))]
    async fn mark_errored(
        &self,
        conversation_id: &str,
        error_message: &str,
    ) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE conversations SET status = $2, error_message = $3 WHERE id = $1")
                .bind(conversation_id)
                .bind(ConversationStatus::Errored.as_str())
                .bind(error_message)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    warn!(error = %e, conversation_id = %conversation_id, "Failed to mark conversation errored");
                    AppError::DatabaseError(e.to_string())
                })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Unknown conversation {}",
                conversation_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, entry))]
    async fn append_error_log(&self, entry: &NewErrorLog) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO error_logs (id, conversation_id, error, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry.conversation_id)
        .bind(&entry.error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, conversation_id = %entry.conversation_id, "Failed to append error log");
            AppError::DatabaseError(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationModel>, AppError> {
        let row = sqlx::query(
            "SELECT id, title, status, message_count, total_tokens, total_cost, \
             total_duration_ms, started_at, completed_at, error_message \
             FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, conversation_id = %conversation_id, "Failed to fetch conversation");
            AppError::DatabaseError(e.to_string())
        })?;

        let Some(row) = row else {
            debug!(conversation_id = %conversation_id, "Conversation not found in database");
            return Ok(None);
        };

        let participant_rows = sqlx::query(
            "SELECT name, role FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let status: String = row.get("status");
        Ok(Some(ConversationModel {
            id: row.get("id"),
            title: row.get("title"),
            status: ConversationStatus::from_str(&status).unwrap_or(ConversationStatus::Active),
            participants: participant_rows
                .iter()
                .map(|p| ParticipantModel {
                    name: p.get("name"),
                    role: p.get("role"),
                })
                .collect(),
            message_count: row.get("message_count"),
            total_tokens: row.get("total_tokens"),
            total_cost: row.get("total_cost"),
            total_duration_ms: row.get("total_duration_ms"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error_message: row.get("error_message"),
        }))
    }
}
