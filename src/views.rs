//! Shapes the lifecycle service hands to the presentation layer.

use serde::{Deserialize, Serialize};

use crate::models::{
    MasterId, Quest, QuestId, QuestPlayerStatus, QuestState, QuestType, User, UserId,
};
use crate::util::form::format_form_datetime;

/// What a master submits when creating or editing a quest.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QuestDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quest_type: QuestType,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_all_players: bool,
    #[serde(default)]
    pub players: Vec<UserId>,
    #[serde(default)]
    pub date_start: String,
    #[serde(default)]
    pub date_end: String,
    // Minutes added to the form dates to reach UTC.
    #[serde(default)]
    pub time_zone_offset: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuestTypeOption {
    pub value: QuestType,
    pub title: &'static str,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayerOption {
    pub id: UserId,
    pub login: String,
    pub selected: bool,
}

impl PlayerOption {
    pub fn list(roster: &[User], selected: &[UserId]) -> Vec<Self> {
        roster
            .iter()
            .map(|player| PlayerOption {
                id: player.id,
                login: player.login.clone(),
                selected: selected.contains(&player.id),
            })
            .collect()
    }
}

/// A quest as its master sees it in the edit form.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuestForm {
    pub id: QuestId,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub is_active: bool,
    pub is_all_players: bool,
    pub date_start: String,
    pub date_end: String,
    pub types: Vec<QuestTypeOption>,
    pub players: Vec<PlayerOption>,
}

impl QuestForm {
    pub fn new(quest: &Quest, roster: &[User]) -> Self {
        Self {
            id: quest.id,
            title: quest.title.clone(),
            description: quest.description.clone(),
            price: quest.price,
            is_active: quest.is_active,
            is_all_players: quest.is_open_to_all(),
            date_start: format_form_datetime(quest.start_time, 0),
            date_end: format_form_datetime(quest.end_time, 0),
            types: QuestType::ALL
                .iter()
                .map(|kind| QuestTypeOption {
                    value: *kind,
                    title: kind.title(),
                    selected: *kind == quest.quest_type,
                })
                .collect(),
            players: PlayerOption::list(roster, &quest.players),
        }
    }
}

/// A quest as a player sees it, with where they stand on it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayerQuestView {
    pub id: QuestId,
    pub title: String,
    pub description: String,
    pub quest_type: QuestType,
    pub price: i64,
    pub state: Option<QuestState>,
    pub is_sent: bool,
    pub is_rejected: bool,
    pub is_confirmed: bool,
}

impl PlayerQuestView {
    pub fn new(quest: &Quest, status: Option<&QuestPlayerStatus>) -> Self {
        Self {
            id: quest.id,
            title: quest.title.clone(),
            description: quest.description.clone(),
            quest_type: quest.quest_type,
            price: quest.price,
            state: status.map(|status| status.state),
            is_sent: status.is_some_and(QuestPlayerStatus::is_submitted),
            is_rejected: status.is_some_and(QuestPlayerStatus::is_rejected),
            is_confirmed: status.is_some_and(QuestPlayerStatus::is_confirmed),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WalletView {
    pub master_id: MasterId,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Wallets {
    pub wallets: Vec<WalletView>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MasterView {
    pub id: MasterId,
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_quest_form_flags() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let quest = Quest {
            id: 3,
            author_id: 1,
            title: "Homework".into(),
            description: "Math".into(),
            quest_type: QuestType::Daily,
            price: 20,
            is_active: true,
            start_time: Some(now),
            end_time: None,
            players: vec![12],
            created_at: now,
            updated_at: now,
        };
        let roster = [11, 12].map(|id| User {
            id,
            login: format!("kid{id}"),
            password: String::new(),
            salt: String::new(),
            created_at: now,
        });

        let form = QuestForm::new(&quest, &roster);
        assert!(!form.is_all_players);
        assert_eq!(form.date_start, "2024-05-01T09:00");
        assert_eq!(form.date_end, "");
        let selected: Vec<_> = form.types.iter().filter(|t| t.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].value, QuestType::Daily);
        assert_eq!(
            form.players
                .iter()
                .map(|p| (p.id, p.selected))
                .collect::<Vec<_>>(),
            vec![(11, false), (12, true)]
        );
    }
}
