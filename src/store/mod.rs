//! Persistence interface used by the lifecycle service and the payer.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::derive::Display;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::models::{
    MasterId, NewQuestStatus, PendingSubmission, PlayerWallet, Quest, QuestFields, QuestId,
    QuestMaster, QuestPlayerStatus, QuestState, Role, StatusId, User, UserId,
};

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Display, PartialEq, Eq)]
pub enum StoreError {
    #[display("Record not found")]
    NotFound,

    // A unique constraint was hit, or the row changed under an optimistic write.
    #[display("Conflicting write")]
    Conflict,

    #[display("Backend failure: {_0}")]
    Backend(String),
}

impl From<DieselError> for StoreError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => StoreError::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                StoreError::Conflict
            }
            e => StoreError::Backend(e.to_string()),
        }
    }
}

impl From<diesel_async::pooled_connection::bb8::RunError> for StoreError {
    fn from(e: diesel_async::pooled_connection::bb8::RunError) -> Self {
        StoreError::Backend(format!("connection pool: {e}"))
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `Conflict` when the login is taken.
    async fn insert_user(&self, login: &str, password: &str, salt: &str)
        -> Result<User, StoreError>;
    async fn user_by_login(&self, login: &str) -> Result<User, StoreError>;
    async fn user_by_id(&self, user_id: UserId) -> Result<User, StoreError>;
    async fn user_roles(&self, user_id: UserId) -> Result<Vec<Role>, StoreError>;

    /// Grants the master role and stores the master record atomically.
    async fn create_master(&self, user_id: UserId, code: &str) -> Result<QuestMaster, StoreError>;
    async fn master_by_user(&self, user_id: UserId) -> Result<QuestMaster, StoreError>;
    async fn master_by_code(&self, code: &str) -> Result<QuestMaster, StoreError>;

    /// Linking an already linked player is a no-op.
    async fn link_player(&self, master_id: MasterId, player_id: UserId) -> Result<(), StoreError>;
    async fn players_of(&self, master_id: MasterId) -> Result<Vec<User>, StoreError>;
    async fn masters_of(&self, player_id: UserId) -> Result<Vec<QuestMaster>, StoreError>;

    async fn insert_quest(&self, author_id: UserId, fields: &QuestFields)
        -> Result<Quest, StoreError>;
    /// `NotFound` unless `author_id` wrote the quest. Replaces the roster.
    async fn update_quest(
        &self,
        quest_id: QuestId,
        author_id: UserId,
        fields: &QuestFields,
    ) -> Result<Quest, StoreError>;
    async fn quest_by_id(&self, quest_id: QuestId) -> Result<Quest, StoreError>;
    /// Most recently updated first.
    async fn quests_by_author(&self, author_id: UserId) -> Result<Vec<Quest>, StoreError>;

    /// Quests the player may act on right now, most recently updated first.
    async fn eligible_quests(
        &self,
        player_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quest>, StoreError>;
    async fn eligible_quest(
        &self,
        quest_id: QuestId,
        player_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Quest, StoreError>;

    async fn status_of(
        &self,
        quest_id: QuestId,
        player_id: UserId,
    ) -> Result<Option<QuestPlayerStatus>, StoreError>;
    async fn statuses_of_player(
        &self,
        player_id: UserId,
    ) -> Result<Vec<QuestPlayerStatus>, StoreError>;
    async fn status_by_id(&self, status_id: StatusId) -> Result<QuestPlayerStatus, StoreError>;
    /// Fails with `Conflict` when a status already exists for the pair.
    async fn insert_status(&self, status: &NewQuestStatus)
        -> Result<QuestPlayerStatus, StoreError>;
    /// Writes `status` only if the stored row is still in `expected`,
    /// `Conflict` otherwise.
    async fn update_status(
        &self,
        status: &QuestPlayerStatus,
        expected: QuestState,
    ) -> Result<(), StoreError>;

    /// Submitted statuses on quests by `author_id`, oldest request first.
    async fn pending_submissions(
        &self,
        author_id: UserId,
    ) -> Result<Vec<PendingSubmission>, StoreError>;

    /// Confirmed statuses that were never accrued.
    async fn unpaid_statuses(&self, limit: i64) -> Result<Vec<QuestPlayerStatus>, StoreError>;
    /// Credits the quest price to the (master, player) wallet and marks the
    /// status paid, in one transaction. `Conflict` if the status is no longer
    /// payable, `NotFound` if the author has no master record.
    async fn pay_status(
        &self,
        status_id: StatusId,
        now: DateTime<Utc>,
    ) -> Result<PlayerWallet, StoreError>;
    async fn wallets_of(&self, player_id: UserId) -> Result<Vec<PlayerWallet>, StoreError>;
}
