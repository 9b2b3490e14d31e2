use chrono::{DateTime, Utc};
use derive_more::derive::Display;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

pub type UserId = i32;
pub type MasterId = i32;
pub type QuestId = i32;
pub type StatusId = i32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[display("admin")]
    Admin,
    #[display("quest_master")]
    QuestMaster,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::QuestMaster => "quest_master",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "quest_master" => Some(Role::QuestMaster),
            _ => None,
        }
    }
}

/// What a logged in user may do, computed once when the session is saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub is_admin: bool,
    pub is_quest_master: bool,
    pub can_create_quest: bool,
}

impl Capabilities {
    pub fn from_roles(roles: &[Role]) -> Self {
        roles.iter().fold(Self::default(), |mut caps, role| {
            match role {
                Role::Admin => caps.is_admin = true,
                Role::QuestMaster => {
                    caps.is_quest_master = true;
                    caps.can_create_quest = true;
                }
            }
            caps
        })
    }
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub password: String,
    pub salt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = crate::schema::quest_masters)]
pub struct QuestMaster {
    pub id: MasterId,
    pub user_id: UserId,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestType {
    #[default]
    OneTime,
    Daily,
}

impl QuestType {
    pub const ALL: [QuestType; 2] = [QuestType::OneTime, QuestType::Daily];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestType::OneTime => "one_time",
            QuestType::Daily => "daily",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            QuestType::OneTime => "One-time",
            QuestType::Daily => "Daily",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "one_time" => Some(QuestType::OneTime),
            "daily" => Some(QuestType::Daily),
            _ => None,
        }
    }
}

/// Everything a master controls on a quest. Shared by create and edit.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestFields {
    pub title: String,
    pub description: String,
    pub quest_type: QuestType,
    pub price: i64,
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    // Empty means every player of the master.
    pub players: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quest {
    pub id: QuestId,
    pub author_id: UserId,
    pub title: String,
    pub description: String,
    pub quest_type: QuestType,
    pub price: i64,
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub players: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quest {
    pub fn is_open_to_all(&self) -> bool {
        self.players.is_empty()
    }

    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.start_time.map_or(true, |start| start <= now)
            && self.end_time.map_or(true, |end| end >= now)
    }

    /// Roster, activity and window checks. Master linkage and accrual are
    /// checked by the store.
    pub fn open_for(&self, player_id: UserId, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.in_window(now)
            && (self.is_open_to_all() || self.players.contains(&player_id))
    }
}

#[derive(Queryable, Selectable, QueryableByName, Clone, Debug)]
#[diesel(table_name = crate::schema::quests)]
pub struct QuestRow {
    pub id: QuestId,
    pub author_id: UserId,
    pub title: String,
    pub description: String,
    pub quest_type: String,
    pub price: i64,
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuestRow {
    pub fn into_quest(self, players: Vec<UserId>) -> Quest {
        Quest {
            id: self.id,
            author_id: self.author_id,
            title: self.title,
            description: self.description,
            quest_type: QuestType::parse(&self.quest_type).unwrap_or_default(),
            price: self.price,
            is_active: self.is_active,
            start_time: self.start_time,
            end_time: self.end_time,
            players,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::quests)]
#[diesel(treat_none_as_null = true)]
pub struct QuestRecord<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub quest_type: &'static str,
    pub price: i64,
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl<'a> From<&'a QuestFields> for QuestRecord<'a> {
    fn from(fields: &'a QuestFields) -> Self {
        Self {
            title: &fields.title,
            description: &fields.description,
            quest_type: fields.quest_type.as_str(),
            price: fields.price,
            is_active: fields.is_active,
            start_time: fields.start_time,
            end_time: fields.end_time,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::quests)]
pub struct NewQuest<'a> {
    pub author_id: UserId,
    #[diesel(embed)]
    pub record: QuestRecord<'a>,
}

/// Lifecycle of one player's attempt at one quest. "Unsubmitted" is the
/// absence of a status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum QuestState {
    #[display("submitted")]
    Submitted,
    #[display("rejected")]
    Rejected,
    #[display("confirmed")]
    Confirmed,
    #[display("paid")]
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Transition {
    #[display("submit")]
    Submit,
    #[display("confirm")]
    Confirm,
    #[display("reject")]
    Reject,
    #[display("accrue")]
    Accrue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("cannot {action} a quest that is {from}")]
pub struct TransitionError {
    pub from: QuestState,
    pub action: Transition,
}

impl QuestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestState::Submitted => "submitted",
            QuestState::Rejected => "rejected",
            QuestState::Confirmed => "confirmed",
            QuestState::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "submitted" => Some(QuestState::Submitted),
            "rejected" => Some(QuestState::Rejected),
            "confirmed" => Some(QuestState::Confirmed),
            "paid" => Some(QuestState::Paid),
            _ => None,
        }
    }

    pub fn apply(self, action: Transition) -> Result<QuestState, TransitionError> {
        match (self, action) {
            (QuestState::Rejected, Transition::Submit) => Ok(QuestState::Submitted),
            (QuestState::Submitted, Transition::Confirm) => Ok(QuestState::Confirmed),
            (QuestState::Submitted, Transition::Reject) => Ok(QuestState::Rejected),
            (QuestState::Confirmed, Transition::Accrue) => Ok(QuestState::Paid),
            (from, action) => Err(TransitionError { from, action }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestPlayerStatus {
    pub id: StatusId,
    pub quest_id: QuestId,
    pub player_id: UserId,
    pub state: QuestState,
    pub requested_at: DateTime<Utc>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub accrued_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl QuestPlayerStatus {
    /// Moves to the next state and stamps the matching audit field. Returns
    /// the state the status was in, for optimistic writes.
    pub fn advance(
        &mut self,
        action: Transition,
        now: DateTime<Utc>,
    ) -> Result<QuestState, TransitionError> {
        let previous = self.state;
        self.state = previous.apply(action)?;
        match action {
            Transition::Submit => self.requested_at = now,
            Transition::Confirm => self.confirmed_at = Some(now),
            Transition::Reject => self.rejected_at = Some(now),
            Transition::Accrue => self.accrued_at = Some(now),
        }
        self.updated_at = now;
        Ok(previous)
    }

    pub fn is_submitted(&self) -> bool {
        self.state == QuestState::Submitted
    }

    pub fn is_rejected(&self) -> bool {
        self.state == QuestState::Rejected
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.state, QuestState::Confirmed | QuestState::Paid)
    }
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = crate::schema::quest_player_statuses)]
pub struct StatusRow {
    pub id: StatusId,
    pub quest_id: QuestId,
    pub player_id: UserId,
    pub state: String,
    pub requested_at: DateTime<Utc>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub accrued_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<StatusRow> for QuestPlayerStatus {
    type Error = String;

    fn try_from(row: StatusRow) -> Result<Self, Self::Error> {
        let state = QuestState::parse(&row.state)
            .ok_or_else(|| format!("status {} has unknown state `{}`", row.id, row.state))?;
        Ok(Self {
            id: row.id,
            quest_id: row.quest_id,
            player_id: row.player_id,
            state,
            requested_at: row.requested_at,
            rejected_at: row.rejected_at,
            confirmed_at: row.confirmed_at,
            accrued_at: row.accrued_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::quest_player_statuses)]
pub struct NewQuestStatus {
    pub quest_id: QuestId,
    pub player_id: UserId,
    pub state: &'static str,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewQuestStatus {
    pub fn first_submission(quest_id: QuestId, player_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            quest_id,
            player_id,
            state: QuestState::Submitted.as_str(),
            requested_at: now,
            updated_at: now,
        }
    }
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = crate::schema::player_wallets)]
pub struct PlayerWallet {
    pub id: i32,
    pub master_id: MasterId,
    pub player_id: UserId,
    pub score: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Clone, Debug, Serialize, PartialEq)]
pub struct PendingSubmission {
    pub status_id: StatusId,
    pub quest_id: QuestId,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub player_id: UserId,
    pub player_login: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterRef {
    pub id: MasterId,
    pub code: String,
}

/// The lightweight user projection kept in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub login: String,
    pub capabilities: Capabilities,
    pub master: Option<MasterRef>,
    pub master_ids: Vec<MasterId>,
}
