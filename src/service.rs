use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use derive_more::derive::Display;
use log::{debug, info, warn};

use crate::models::{
    Capabilities, MasterRef, NewQuestStatus, PendingSubmission, Quest, QuestFields, QuestId,
    QuestMaster, QuestPlayerStatus, SessionUser, StatusId, Transition, User, UserId,
};
use crate::store::{Store, StoreError};
use crate::util::cipher_util;
use crate::util::form::parse_form_datetime;
use crate::views::{
    MasterView, PlayerOption, PlayerQuestView, QuestDraft, QuestForm, WalletView, Wallets,
};
use crate::MAX_QUEST_PRICE;

#[derive(Debug, Display, PartialEq, Eq)]
pub enum ServiceError {
    #[display("Not found")]
    NotFound,

    #[display("Quest already submitted")]
    DuplicateSubmission,

    #[display("Invalid input: {_0}")]
    Validation(&'static str),

    #[display("Persistence failure: {_0}")]
    Persistence(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServiceError::NotFound,
            e => ServiceError::Persistence(e),
        }
    }
}

/// Maps a lost optimistic write to `on_conflict`, everything else as usual.
fn conflict_as(on_conflict: ServiceError) -> impl FnOnce(StoreError) -> ServiceError {
    move |e| match e {
        StoreError::Conflict => on_conflict,
        e => e.into(),
    }
}

fn draft_date(input: &str, offset_minutes: i32, field: &str) -> Option<DateTime<Utc>> {
    parse_form_datetime(input, offset_minutes).unwrap_or_else(|e| {
        warn!("Dropping unparseable {field} date {input:?}: {e}");
        None
    })
}

/// Business rules of the quest lifecycle. Callers pass already
/// authenticated user ids.
#[derive(Clone)]
pub struct QuestService {
    store: Arc<dyn Store>,
    pepper: String,
}

impl QuestService {
    pub fn new(store: Arc<dyn Store>, pepper: impl Into<String>) -> Self {
        Self {
            store,
            pepper: pepper.into(),
        }
    }

    pub async fn register(&self, login: &str, password: &str) -> Result<User, ServiceError> {
        let login = login.trim();
        if login.is_empty() || password.is_empty() {
            return Err(ServiceError::Validation("login and password are required"));
        }
        let (salt, hash) = cipher_util::gen_salted_password(password, &self.pepper);
        let user = self
            .store
            .insert_user(login, &hash, &salt)
            .await
            .map_err(ServiceError::Persistence)?;
        info!("Registered user {} as {}", user.login, user.id);
        Ok(user)
    }

    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User, ServiceError> {
        let user = self.store.user_by_login(login.trim()).await?;
        cipher_util::check_salted_password(&user, password, &self.pepper)
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    pub async fn user_by_id(&self, user_id: UserId) -> Result<User, ServiceError> {
        Ok(self.store.user_by_id(user_id).await?)
    }

    /// Builds the projection kept in the session cookie.
    pub async fn session_user(&self, user_id: UserId) -> Result<SessionUser, ServiceError> {
        let user = self.store.user_by_id(user_id).await?;
        let roles = self.store.user_roles(user_id).await?;
        let master = match self.store.master_by_user(user_id).await {
            Ok(master) => Some(MasterRef {
                id: master.id,
                code: master.code,
            }),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        let master_ids = self
            .store
            .masters_of(user_id)
            .await?
            .into_iter()
            .map(|master| master.id)
            .collect();

        Ok(SessionUser {
            id: user.id,
            login: user.login,
            capabilities: Capabilities::from_roles(&roles),
            master,
            master_ids,
        })
    }

    /// Not idempotent: a second call trips the one-master-per-user constraint.
    pub async fn become_master(&self, user_id: UserId) -> Result<QuestMaster, ServiceError> {
        let code = cipher_util::gen_invite_code();
        let master = self
            .store
            .create_master(user_id, &code)
            .await
            .map_err(ServiceError::Persistence)?;
        info!("User {user_id} became quest master {}", master.id);
        Ok(master)
    }

    pub async fn link_player_to_master(
        &self,
        code: &str,
        player_id: UserId,
    ) -> Result<QuestMaster, ServiceError> {
        let master = self.store.master_by_code(code.trim()).await?;
        self.store.link_player(master.id, player_id).await?;
        debug!("Player {player_id} linked to master {}", master.id);
        Ok(master)
    }

    async fn master_of(&self, author_id: UserId) -> Result<QuestMaster, ServiceError> {
        Ok(self.store.master_by_user(author_id).await?)
    }

    async fn fields_from_draft(
        &self,
        master: &QuestMaster,
        draft: QuestDraft,
    ) -> Result<QuestFields, ServiceError> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(ServiceError::Validation("quest title is required"));
        }
        if draft.price < 0 {
            return Err(ServiceError::Validation("quest price must not be negative"));
        }
        if draft.price > MAX_QUEST_PRICE {
            return Err(ServiceError::Validation("quest price is too large"));
        }

        let players = if draft.is_all_players {
            Vec::new()
        } else {
            let roster = self.store.players_of(master.id).await?;
            let mut players: Vec<UserId> = draft
                .players
                .iter()
                .copied()
                .filter(|id| roster.iter().any(|player| player.id == *id))
                .collect();
            players.sort_unstable();
            players.dedup();
            players
        };

        Ok(QuestFields {
            title: title.to_owned(),
            description: draft.description.trim().to_owned(),
            quest_type: draft.quest_type,
            price: draft.price,
            is_active: draft.is_active,
            start_time: draft_date(&draft.date_start, draft.time_zone_offset, "start"),
            end_time: draft_date(&draft.date_end, draft.time_zone_offset, "end"),
            players,
        })
    }

    pub async fn create_quest(
        &self,
        draft: QuestDraft,
        author_id: UserId,
    ) -> Result<Quest, ServiceError> {
        let master = self.master_of(author_id).await?;
        let fields = self.fields_from_draft(&master, draft).await?;
        let quest = self.store.insert_quest(author_id, &fields).await?;
        info!("Master {} created quest {}", master.id, quest.id);
        Ok(quest)
    }

    pub async fn edit_quest(
        &self,
        quest_id: QuestId,
        draft: QuestDraft,
        author_id: UserId,
    ) -> Result<Quest, ServiceError> {
        let master = self.master_of(author_id).await?;
        let fields = self.fields_from_draft(&master, draft).await?;
        let quest = self.store.update_quest(quest_id, author_id, &fields).await?;
        info!("Master {} edited quest {}", master.id, quest.id);
        Ok(quest)
    }

    pub async fn list_quests_for_master(
        &self,
        author_id: UserId,
    ) -> Result<Vec<QuestForm>, ServiceError> {
        let master = self.master_of(author_id).await?;
        let roster = self.store.players_of(master.id).await?;
        let quests = self.store.quests_by_author(author_id).await?;
        Ok(quests
            .iter()
            .map(|quest| QuestForm::new(quest, &roster))
            .collect())
    }

    pub async fn get_quest_for_master(
        &self,
        quest_id: QuestId,
        author_id: UserId,
    ) -> Result<QuestForm, ServiceError> {
        let master = self.master_of(author_id).await?;
        let quest = self.store.quest_by_id(quest_id).await?;
        if quest.author_id != author_id {
            return Err(ServiceError::NotFound);
        }
        let roster = self.store.players_of(master.id).await?;
        Ok(QuestForm::new(&quest, &roster))
    }

    pub async fn list_players(&self, author_id: UserId) -> Result<Vec<PlayerOption>, ServiceError> {
        let master = self.master_of(author_id).await?;
        let roster = self.store.players_of(master.id).await?;
        Ok(PlayerOption::list(&roster, &[]))
    }

    pub async fn list_eligible_quests_for_player(
        &self,
        player_id: UserId,
    ) -> Result<Vec<PlayerQuestView>, ServiceError> {
        let quests = self.store.eligible_quests(player_id, Utc::now()).await?;
        let statuses: HashMap<QuestId, QuestPlayerStatus> = self
            .store
            .statuses_of_player(player_id)
            .await?
            .into_iter()
            .map(|status| (status.quest_id, status))
            .collect();
        Ok(quests
            .iter()
            .map(|quest| PlayerQuestView::new(quest, statuses.get(&quest.id)))
            .collect())
    }

    pub async fn get_eligible_quest(
        &self,
        quest_id: QuestId,
        player_id: UserId,
    ) -> Result<PlayerQuestView, ServiceError> {
        let quest = self
            .store
            .eligible_quest(quest_id, player_id, Utc::now())
            .await?;
        let status = self.store.status_of(quest_id, player_id).await?;
        Ok(PlayerQuestView::new(&quest, status.as_ref()))
    }

    pub async fn submit_quest_completion(
        &self,
        quest_id: QuestId,
        player_id: UserId,
    ) -> Result<QuestPlayerStatus, ServiceError> {
        let now = Utc::now();
        self.store.eligible_quest(quest_id, player_id, now).await?;

        let status = match self.store.status_of(quest_id, player_id).await? {
            None => self
                .store
                .insert_status(&NewQuestStatus::first_submission(quest_id, player_id, now))
                .await
                .map_err(conflict_as(ServiceError::DuplicateSubmission))?,
            Some(mut status) => {
                let previous = status
                    .advance(Transition::Submit, now)
                    .map_err(|_| ServiceError::DuplicateSubmission)?;
                self.store
                    .update_status(&status, previous)
                    .await
                    .map_err(conflict_as(ServiceError::DuplicateSubmission))?;
                status
            }
        };
        debug!("Player {player_id} submitted quest {quest_id}");
        Ok(status)
    }

    pub async fn review_submission(
        &self,
        status_id: StatusId,
        reviewer_id: UserId,
        accept: bool,
    ) -> Result<QuestPlayerStatus, ServiceError> {
        let mut status = self.store.status_by_id(status_id).await?;
        let quest = self.store.quest_by_id(status.quest_id).await?;
        if quest.author_id != reviewer_id {
            return Err(ServiceError::NotFound);
        }

        let action = if accept {
            Transition::Confirm
        } else {
            Transition::Reject
        };
        let previous = status
            .advance(action, Utc::now())
            .map_err(|_| ServiceError::NotFound)?;
        self.store
            .update_status(&status, previous)
            .await
            .map_err(conflict_as(ServiceError::NotFound))?;
        info!("Reviewer {reviewer_id} moved status {status_id} to {}", status.state);
        Ok(status)
    }

    pub async fn list_pending_submissions(
        &self,
        author_id: UserId,
    ) -> Result<Vec<PendingSubmission>, ServiceError> {
        self.master_of(author_id).await?;
        Ok(self.store.pending_submissions(author_id).await?)
    }

    pub async fn list_player_masters(
        &self,
        player_id: UserId,
    ) -> Result<Vec<MasterView>, ServiceError> {
        Ok(self
            .store
            .masters_of(player_id)
            .await?
            .into_iter()
            .map(|master| MasterView {
                id: master.id,
                user_id: master.user_id,
            })
            .collect())
    }

    pub async fn list_wallets(&self, player_id: UserId) -> Result<Wallets, ServiceError> {
        let wallets: Vec<WalletView> = self
            .store
            .wallets_of(player_id)
            .await?
            .into_iter()
            .map(|wallet| WalletView {
                master_id: wallet.master_id,
                score: wallet.score,
            })
            .collect();
        let total = wallets
            .iter()
            .fold(0i64, |total, wallet| total.saturating_add(wallet.score));
        Ok(Wallets { wallets, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuestState, QuestType};
    use crate::store::MemoryStore;

    fn service() -> QuestService {
        QuestService::new(Arc::new(MemoryStore::new()), "pepper")
    }

    #[tokio::test]
    async fn test_register_requires_credentials() {
        let service = service();
        assert!(matches!(
            service.register("  ", "pw").await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            service.register("ann", "").await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_login_is_a_persistence_failure() {
        let service = service();
        service.register("ann", "pw").await.unwrap();
        assert_eq!(
            service.register("ann", "other").await.unwrap_err(),
            ServiceError::Persistence(StoreError::Conflict)
        );
    }

    #[tokio::test]
    async fn test_draft_rules() {
        let service = service();
        let master = service.register("m", "pw").await.unwrap();
        let kid = service.register("kid", "pw").await.unwrap();
        let stranger = service.register("stranger", "pw").await.unwrap();
        let record = service.become_master(master.id).await.unwrap();
        service
            .link_player_to_master(&record.code, kid.id)
            .await
            .unwrap();

        let quest = service
            .create_quest(
                QuestDraft {
                    title: "  Dishes ".into(),
                    price: 3,
                    is_active: true,
                    players: vec![kid.id, stranger.id, kid.id],
                    date_start: "not a date".into(),
                    date_end: "2030-01-01T12:00".into(),
                    ..QuestDraft::default()
                },
                master.id,
            )
            .await
            .unwrap();
        assert_eq!(quest.title, "Dishes");
        assert_eq!(quest.players, vec![kid.id]);
        assert_eq!(quest.start_time, None);
        assert!(quest.end_time.is_some());

        let negative = QuestDraft {
            title: "Bad".into(),
            price: -1,
            ..QuestDraft::default()
        };
        assert!(matches!(
            service.create_quest(negative, master.id).await,
            Err(ServiceError::Validation(_))
        ));

        let priceless = QuestDraft {
            title: "Too much".into(),
            price: MAX_QUEST_PRICE + 1,
            ..QuestDraft::default()
        };
        assert!(matches!(
            service.create_quest(priceless, master.id).await,
            Err(ServiceError::Validation(_))
        ));
        let capped = QuestDraft {
            title: "Just enough".into(),
            price: MAX_QUEST_PRICE,
            ..QuestDraft::default()
        };
        assert_eq!(
            service.create_quest(capped, master.id).await.unwrap().price,
            MAX_QUEST_PRICE
        );
    }

    #[tokio::test]
    async fn test_wallet_total_saturates() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let service = QuestService::new(store.clone(), "pepper");
        let kid = service.register("kid", "pw").await.unwrap();
        let now = Utc::now();

        for (login, code) in [("mum", "AAAAAAAAAA"), ("dad", "BBBBBBBBBB")] {
            let author = service.register(login, "pw").await.unwrap();
            store.create_master(author.id, code).await.unwrap();
            let fields = QuestFields {
                title: "Huge".into(),
                description: String::new(),
                quest_type: QuestType::OneTime,
                price: i64::MAX,
                is_active: true,
                start_time: None,
                end_time: None,
                players: vec![],
            };
            let quest = store.insert_quest(author.id, &fields).await.unwrap();
            let mut status = store
                .insert_status(&NewQuestStatus::first_submission(quest.id, kid.id, now))
                .await
                .unwrap();
            status.advance(Transition::Confirm, now).unwrap();
            store
                .update_status(&status, QuestState::Submitted)
                .await
                .unwrap();
            store.pay_status(status.id, now).await.unwrap();
        }

        let wallets = service.list_wallets(kid.id).await.unwrap();
        assert_eq!(wallets.wallets.len(), 2);
        assert_eq!(wallets.total, i64::MAX);
    }

    #[tokio::test]
    async fn test_only_masters_author_quests() {
        let service = service();
        let user = service.register("plain", "pw").await.unwrap();
        let draft = QuestDraft {
            title: "Nope".into(),
            ..QuestDraft::default()
        };
        assert_eq!(
            service.create_quest(draft, user.id).await.unwrap_err(),
            ServiceError::NotFound
        );
        assert_eq!(
            service.list_quests_for_master(user.id).await.unwrap_err(),
            ServiceError::NotFound
        );
    }

    #[tokio::test]
    async fn test_session_user_projection() {
        let service = service();
        let master = service.register("m", "pw").await.unwrap();
        let kid = service.register("kid", "pw").await.unwrap();
        let record = service.become_master(master.id).await.unwrap();
        service
            .link_player_to_master(&record.code, kid.id)
            .await
            .unwrap();

        let session = service.session_user(master.id).await.unwrap();
        assert!(session.capabilities.can_create_quest);
        assert_eq!(session.master.map(|m| m.code), Some(record.code));

        let session = service.session_user(kid.id).await.unwrap();
        assert!(!session.capabilities.can_create_quest);
        assert_eq!(session.master, None);
        assert_eq!(session.master_ids, vec![record.id]);
    }
}
