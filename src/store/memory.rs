use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Store, StoreError};
use crate::models::{
    MasterId, NewQuestStatus, PendingSubmission, PlayerWallet, Quest, QuestFields, QuestId,
    QuestMaster, QuestPlayerStatus, QuestState, Role, StatusId, Transition, User, UserId,
};

#[derive(Default)]
struct Tables {
    next_id: i32,
    users: BTreeMap<UserId, User>,
    roles: BTreeSet<(UserId, Role)>,
    masters: BTreeMap<MasterId, QuestMaster>,
    links: BTreeSet<(MasterId, UserId)>,
    quests: BTreeMap<QuestId, Quest>,
    statuses: BTreeMap<StatusId, QuestPlayerStatus>,
    wallets: BTreeMap<(MasterId, UserId), PlayerWallet>,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn is_linked(&self, author_id: UserId, player_id: UserId) -> bool {
        self.masters
            .values()
            .filter(|master| master.user_id == author_id)
            .any(|master| self.links.contains(&(master.id, player_id)))
    }

    fn is_accrued(&self, quest_id: QuestId, player_id: UserId) -> bool {
        self.statuses.values().any(|status| {
            status.quest_id == quest_id
                && status.player_id == player_id
                && status.accrued_at.is_some()
        })
    }

    fn eligible(&self, player_id: UserId, now: DateTime<Utc>) -> Vec<Quest> {
        let mut quests: Vec<Quest> = self
            .quests
            .values()
            .filter(|quest| quest.open_for(player_id, now))
            .filter(|quest| self.is_linked(quest.author_id, player_id))
            .filter(|quest| !self.is_accrued(quest.id, player_id))
            .cloned()
            .collect();
        quests.sort_by(|a, b| (b.updated_at, b.id).cmp(&(a.updated_at, a.id)));
        quests
    }
}

/// In-process store with the same constraints as the PostgreSQL schema.
#[derive(Default, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(
        &self,
        login: &str,
        password: &str,
        salt: &str,
    ) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|user| user.login == login) {
            return Err(StoreError::Conflict);
        }
        let user = User {
            id: tables.next_id(),
            login: login.to_owned(),
            password: password.to_owned(),
            salt: salt.to_owned(),
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_login(&self, login: &str) -> Result<User, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .users
            .values()
            .find(|user| user.login == login)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn user_by_id(&self, user_id: UserId) -> Result<User, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .users
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn user_roles(&self, user_id: UserId) -> Result<Vec<Role>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .roles
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, role)| *role)
            .collect())
    }

    async fn create_master(&self, user_id: UserId, code: &str) -> Result<QuestMaster, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        if tables
            .masters
            .values()
            .any(|master| master.user_id == user_id || master.code == code)
        {
            return Err(StoreError::Conflict);
        }
        let master = QuestMaster {
            id: tables.next_id(),
            user_id,
            code: code.to_owned(),
            created_at: Utc::now(),
        };
        tables.roles.insert((user_id, Role::QuestMaster));
        tables.masters.insert(master.id, master.clone());
        Ok(master)
    }

    async fn master_by_user(&self, user_id: UserId) -> Result<QuestMaster, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .masters
            .values()
            .find(|master| master.user_id == user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn master_by_code(&self, code: &str) -> Result<QuestMaster, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .masters
            .values()
            .find(|master| master.code == code)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn link_player(&self, master_id: MasterId, player_id: UserId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.masters.contains_key(&master_id) || !tables.users.contains_key(&player_id) {
            return Err(StoreError::NotFound);
        }
        tables.links.insert((master_id, player_id));
        Ok(())
    }

    async fn players_of(&self, master_id: MasterId) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.lock().await;
        let mut players: Vec<User> = tables
            .links
            .iter()
            .filter(|(master, _)| *master == master_id)
            .filter_map(|(_, player)| tables.users.get(player).cloned())
            .collect();
        players.sort_by(|a, b| a.login.cmp(&b.login));
        Ok(players)
    }

    async fn masters_of(&self, player_id: UserId) -> Result<Vec<QuestMaster>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .links
            .iter()
            .filter(|(_, player)| *player == player_id)
            .filter_map(|(master, _)| tables.masters.get(master).cloned())
            .collect())
    }

    async fn insert_quest(
        &self,
        author_id: UserId,
        fields: &QuestFields,
    ) -> Result<Quest, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut players = fields.players.clone();
        players.sort_unstable();
        players.dedup();
        let quest = Quest {
            id: tables.next_id(),
            author_id,
            title: fields.title.clone(),
            description: fields.description.clone(),
            quest_type: fields.quest_type,
            price: fields.price,
            is_active: fields.is_active,
            start_time: fields.start_time,
            end_time: fields.end_time,
            players,
            created_at: now,
            updated_at: now,
        };
        tables.quests.insert(quest.id, quest.clone());
        Ok(quest)
    }

    async fn update_quest(
        &self,
        quest_id: QuestId,
        author_id: UserId,
        fields: &QuestFields,
    ) -> Result<Quest, StoreError> {
        let mut tables = self.tables.lock().await;
        let quest = tables
            .quests
            .get_mut(&quest_id)
            .filter(|quest| quest.author_id == author_id)
            .ok_or(StoreError::NotFound)?;
        let mut players = fields.players.clone();
        players.sort_unstable();
        players.dedup();

        quest.title = fields.title.clone();
        quest.description = fields.description.clone();
        quest.quest_type = fields.quest_type;
        quest.price = fields.price;
        quest.is_active = fields.is_active;
        quest.start_time = fields.start_time;
        quest.end_time = fields.end_time;
        quest.players = players;
        quest.updated_at = Utc::now();
        Ok(quest.clone())
    }

    async fn quest_by_id(&self, quest_id: QuestId) -> Result<Quest, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .quests
            .get(&quest_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn quests_by_author(&self, author_id: UserId) -> Result<Vec<Quest>, StoreError> {
        let tables = self.tables.lock().await;
        let mut quests: Vec<Quest> = tables
            .quests
            .values()
            .filter(|quest| quest.author_id == author_id)
            .cloned()
            .collect();
        quests.sort_by(|a, b| (b.updated_at, b.id).cmp(&(a.updated_at, a.id)));
        Ok(quests)
    }

    async fn eligible_quests(
        &self,
        player_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quest>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.eligible(player_id, now))
    }

    async fn eligible_quest(
        &self,
        quest_id: QuestId,
        player_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Quest, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .eligible(player_id, now)
            .into_iter()
            .find(|quest| quest.id == quest_id)
            .ok_or(StoreError::NotFound)
    }

    async fn status_of(
        &self,
        quest_id: QuestId,
        player_id: UserId,
    ) -> Result<Option<QuestPlayerStatus>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .statuses
            .values()
            .find(|status| status.quest_id == quest_id && status.player_id == player_id)
            .cloned())
    }

    async fn statuses_of_player(
        &self,
        player_id: UserId,
    ) -> Result<Vec<QuestPlayerStatus>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .statuses
            .values()
            .filter(|status| status.player_id == player_id)
            .cloned()
            .collect())
    }

    async fn status_by_id(&self, status_id: StatusId) -> Result<QuestPlayerStatus, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .statuses
            .get(&status_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_status(
        &self,
        status: &NewQuestStatus,
    ) -> Result<QuestPlayerStatus, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.statuses.values().any(|existing| {
            existing.quest_id == status.quest_id && existing.player_id == status.player_id
        }) {
            return Err(StoreError::Conflict);
        }
        let state = QuestState::parse(status.state)
            .ok_or_else(|| StoreError::Backend(format!("unknown state `{}`", status.state)))?;
        let inserted = QuestPlayerStatus {
            id: tables.next_id(),
            quest_id: status.quest_id,
            player_id: status.player_id,
            state,
            requested_at: status.requested_at,
            rejected_at: None,
            confirmed_at: None,
            accrued_at: None,
            updated_at: status.updated_at,
        };
        tables.statuses.insert(inserted.id, inserted.clone());
        Ok(inserted)
    }

    async fn update_status(
        &self,
        status: &QuestPlayerStatus,
        expected: QuestState,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.statuses.get_mut(&status.id) {
            Some(stored) if stored.state == expected => {
                *stored = status.clone();
                Ok(())
            }
            _ => Err(StoreError::Conflict),
        }
    }

    async fn pending_submissions(
        &self,
        author_id: UserId,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let tables = self.tables.lock().await;
        let mut pending: Vec<PendingSubmission> = tables
            .statuses
            .values()
            .filter(|status| status.is_submitted())
            .filter_map(|status| {
                let quest = tables.quests.get(&status.quest_id)?;
                let player = tables.users.get(&status.player_id)?;
                (quest.author_id == author_id).then(|| PendingSubmission {
                    status_id: status.id,
                    quest_id: quest.id,
                    title: quest.title.clone(),
                    description: quest.description.clone(),
                    price: quest.price,
                    player_id: player.id,
                    player_login: player.login.clone(),
                    requested_at: status.requested_at,
                })
            })
            .collect();
        pending.sort_by(|a, b| (a.requested_at, a.status_id).cmp(&(b.requested_at, b.status_id)));
        Ok(pending)
    }

    async fn unpaid_statuses(&self, limit: i64) -> Result<Vec<QuestPlayerStatus>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .statuses
            .values()
            .filter(|status| status.state == QuestState::Confirmed && status.accrued_at.is_none())
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn pay_status(
        &self,
        status_id: StatusId,
        now: DateTime<Utc>,
    ) -> Result<PlayerWallet, StoreError> {
        // The lock is held for the whole payment, which makes it atomic.
        let mut tables = self.tables.lock().await;
        let mut status = tables
            .statuses
            .get(&status_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        if status.accrued_at.is_some() {
            return Err(StoreError::Conflict);
        }
        status
            .advance(Transition::Accrue, now)
            .map_err(|_| StoreError::Conflict)?;

        let quest = tables
            .quests
            .get(&status.quest_id)
            .ok_or(StoreError::NotFound)?;
        let price = quest.price;
        let author_id = quest.author_id;
        let master_id = tables
            .masters
            .values()
            .find(|master| master.user_id == author_id)
            .map(|master| master.id)
            .ok_or(StoreError::NotFound)?;

        let key = (master_id, status.player_id);
        let wallet = match tables.wallets.get_mut(&key) {
            Some(wallet) => {
                wallet.score = wallet
                    .score
                    .checked_add(price)
                    .ok_or_else(|| StoreError::Backend("wallet score out of range".to_owned()))?;
                wallet.updated_at = now;
                wallet.clone()
            }
            None => {
                let wallet = PlayerWallet {
                    id: tables.next_id(),
                    master_id,
                    player_id: status.player_id,
                    score: price,
                    updated_at: now,
                };
                tables.wallets.insert(key, wallet.clone());
                wallet
            }
        };
        tables.statuses.insert(status.id, status);
        Ok(wallet)
    }

    async fn wallets_of(&self, player_id: UserId) -> Result<Vec<PlayerWallet>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .wallets
            .values()
            .filter(|wallet| wallet.player_id == player_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestType;

    fn fields(price: i64) -> QuestFields {
        QuestFields {
            title: "Tidy up".into(),
            description: "The whole room".into(),
            quest_type: QuestType::OneTime,
            price,
            is_active: true,
            start_time: None,
            end_time: None,
            players: vec![],
        }
    }

    #[tokio::test]
    async fn test_login_is_unique() {
        let store = MemoryStore::new();
        store.insert_user("ann", "h", "s").await.unwrap();
        assert_eq!(
            store.insert_user("ann", "h2", "s2").await.unwrap_err(),
            StoreError::Conflict
        );
    }

    #[tokio::test]
    async fn test_master_is_unique_per_user() {
        let store = MemoryStore::new();
        let user = store.insert_user("ann", "h", "s").await.unwrap();
        store.create_master(user.id, "AAAAAAAAAA").await.unwrap();
        assert_eq!(
            store
                .create_master(user.id, "BBBBBBBBBB")
                .await
                .unwrap_err(),
            StoreError::Conflict
        );
        assert_eq!(
            store.user_roles(user.id).await.unwrap(),
            vec![Role::QuestMaster]
        );
    }

    #[tokio::test]
    async fn test_update_status_checks_expected_state() {
        let store = MemoryStore::new();
        let master = store.insert_user("m", "h", "s").await.unwrap();
        let player = store.insert_user("p", "h", "s").await.unwrap();
        let quest = store.insert_quest(master.id, &fields(5)).await.unwrap();

        let now = Utc::now();
        let status = store
            .insert_status(&NewQuestStatus::first_submission(quest.id, player.id, now))
            .await
            .unwrap();
        assert_eq!(
            store
                .insert_status(&NewQuestStatus::first_submission(quest.id, player.id, now))
                .await
                .unwrap_err(),
            StoreError::Conflict
        );

        let mut confirmed = status.clone();
        confirmed.advance(Transition::Confirm, now).unwrap();
        store
            .update_status(&confirmed, QuestState::Submitted)
            .await
            .unwrap();

        let mut rejected = status.clone();
        rejected.advance(Transition::Reject, now).unwrap();
        assert_eq!(
            store
                .update_status(&rejected, QuestState::Submitted)
                .await
                .unwrap_err(),
            StoreError::Conflict
        );
        assert_eq!(
            store.status_by_id(status.id).await.unwrap().state,
            QuestState::Confirmed
        );
    }

    #[tokio::test]
    async fn test_pay_requires_author_master_record() {
        let store = MemoryStore::new();
        let author = store.insert_user("m", "h", "s").await.unwrap();
        let player = store.insert_user("p", "h", "s").await.unwrap();
        let quest = store.insert_quest(author.id, &fields(7)).await.unwrap();

        let now = Utc::now();
        let mut status = store
            .insert_status(&NewQuestStatus::first_submission(quest.id, player.id, now))
            .await
            .unwrap();
        status.advance(Transition::Confirm, now).unwrap();
        store
            .update_status(&status, QuestState::Submitted)
            .await
            .unwrap();

        assert_eq!(
            store.pay_status(status.id, now).await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(store.unpaid_statuses(10).await.unwrap().len(), 1);

        store.create_master(author.id, "CCCCCCCCCC").await.unwrap();
        let wallet = store.pay_status(status.id, now).await.unwrap();
        assert_eq!(wallet.score, 7);
        assert_eq!(
            store.pay_status(status.id, now).await.unwrap_err(),
            StoreError::Conflict
        );
        assert!(store.unpaid_statuses(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pay_overflow_leaves_status_unpaid() {
        let store = MemoryStore::new();
        let author = store.insert_user("m", "h", "s").await.unwrap();
        let player = store.insert_user("p", "h", "s").await.unwrap();
        store.create_master(author.id, "DDDDDDDDDD").await.unwrap();

        let now = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let quest = store
                .insert_quest(author.id, &fields(i64::MAX))
                .await
                .unwrap();
            let mut status = store
                .insert_status(&NewQuestStatus::first_submission(quest.id, player.id, now))
                .await
                .unwrap();
            status.advance(Transition::Confirm, now).unwrap();
            store
                .update_status(&status, QuestState::Submitted)
                .await
                .unwrap();
            ids.push(status.id);
        }

        assert_eq!(store.pay_status(ids[0], now).await.unwrap().score, i64::MAX);
        assert!(matches!(
            store.pay_status(ids[1], now).await,
            Err(StoreError::Backend(_))
        ));
        let stuck = store.status_by_id(ids[1]).await.unwrap();
        assert_eq!(stuck.state, QuestState::Confirmed);
        assert_eq!(stuck.accrued_at, None);
        assert_eq!(store.wallets_of(player.id).await.unwrap()[0].score, i64::MAX);
    }
}
