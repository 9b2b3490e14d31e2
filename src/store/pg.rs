use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Integer, Nullable, Timestamptz};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use super::{Store, StoreError};
use crate::models::{
    MasterId, NewQuest, NewQuestStatus, PendingSubmission, PlayerWallet, Quest, QuestFields,
    QuestId, QuestMaster, QuestPlayerStatus, QuestRecord, QuestRow, QuestState, Role, StatusId,
    StatusRow, Transition, User, UserId,
};
use crate::schema::{
    master_players, player_wallets, quest_masters, quest_player_statuses, quest_players, quests,
    user_roles, users,
};
use crate::DbPool;

// Bind order: $1 player id, $2 now, $3 optional quest id.
const ELIGIBLE_QUESTS: &str = r#"
    SELECT q.id, q.author_id, q.title, q.description, q.quest_type, q.price,
           q.is_active, q.start_time, q.end_time, q.created_at, q.updated_at
    FROM quests AS q
    JOIN quest_masters AS m ON m.user_id = q.author_id
    JOIN master_players AS mp ON mp.master_id = m.id AND mp.player_id = $1
    WHERE q.is_active
      AND (q.start_time IS NULL OR q.start_time <= $2)
      AND (q.end_time IS NULL OR q.end_time >= $2)
      AND (
        NOT EXISTS (SELECT 1 FROM quest_players AS qp WHERE qp.quest_id = q.id)
        OR EXISTS (
          SELECT 1 FROM quest_players AS qp
          WHERE qp.quest_id = q.id AND qp.player_id = $1
        )
      )
      AND NOT EXISTS (
        SELECT 1 FROM quest_player_statuses AS s
        WHERE s.quest_id = q.id AND s.player_id = $1 AND s.accrued_at IS NOT NULL
      )
      AND ($3::INT4 IS NULL OR q.id = $3)
    ORDER BY q.updated_at DESC, q.id DESC
"#;

/// PostgreSQL persistence over a bb8 pool of async diesel connections.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn into_status(row: StatusRow) -> Result<QuestPlayerStatus, StoreError> {
    QuestPlayerStatus::try_from(row).map_err(StoreError::Backend)
}

async fn load_rosters(
    quest_ids: &[QuestId],
    conn: &mut AsyncPgConnection,
) -> Result<HashMap<QuestId, Vec<UserId>>, StoreError> {
    let pairs: Vec<(QuestId, UserId)> = quest_players::table
        .filter(quest_players::quest_id.eq_any(quest_ids))
        .select((quest_players::quest_id, quest_players::player_id))
        .order((quest_players::quest_id, quest_players::player_id))
        .load(conn)
        .await?;

    let mut rosters: HashMap<QuestId, Vec<UserId>> = HashMap::new();
    for (quest_id, player_id) in pairs {
        rosters.entry(quest_id).or_default().push(player_id);
    }
    Ok(rosters)
}

async fn with_rosters(
    rows: Vec<QuestRow>,
    conn: &mut AsyncPgConnection,
) -> Result<Vec<Quest>, StoreError> {
    let ids: Vec<QuestId> = rows.iter().map(|row| row.id).collect();
    let mut rosters = load_rosters(&ids, conn).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let roster = rosters.remove(&row.id).unwrap_or_default();
            row.into_quest(roster)
        })
        .collect())
}

async fn replace_roster(
    quest_id: QuestId,
    players: &[UserId],
    conn: &mut AsyncPgConnection,
) -> Result<(), StoreError> {
    diesel::delete(quest_players::table.filter(quest_players::quest_id.eq(quest_id)))
        .execute(conn)
        .await?;

    if !players.is_empty() {
        let rows: Vec<_> = players
            .iter()
            .map(|player| {
                (
                    quest_players::quest_id.eq(quest_id),
                    quest_players::player_id.eq(*player),
                )
            })
            .collect();
        diesel::insert_into(quest_players::table)
            .values(rows)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }
    Ok(())
}

async fn write_status(
    status: &QuestPlayerStatus,
    expected: QuestState,
    conn: &mut AsyncPgConnection,
) -> Result<(), StoreError> {
    use crate::schema::quest_player_statuses::dsl::*;

    let updated = diesel::update(
        quest_player_statuses
            .filter(id.eq(status.id))
            .filter(state.eq(expected.as_str())),
    )
    .set((
        state.eq(status.state.as_str()),
        requested_at.eq(status.requested_at),
        rejected_at.eq(status.rejected_at),
        confirmed_at.eq(status.confirmed_at),
        accrued_at.eq(status.accrued_at),
        updated_at.eq(status.updated_at),
    ))
    .execute(conn)
    .await?;

    if updated == 0 {
        Err(StoreError::Conflict)
    } else {
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(
        &self,
        login: &str,
        password: &str,
        salt: &str,
    ) -> Result<User, StoreError> {
        let mut conn = self.pool.get().await?;
        let user = diesel::insert_into(users::table)
            .values((
                users::login.eq(login),
                users::password.eq(password),
                users::salt.eq(salt),
            ))
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(user)
    }

    async fn user_by_login(&self, login: &str) -> Result<User, StoreError> {
        let mut conn = self.pool.get().await?;
        let user = users::table
            .filter(users::login.eq(login))
            .select(User::as_select())
            .first(&mut conn)
            .await?;
        Ok(user)
    }

    async fn user_by_id(&self, user_id: UserId) -> Result<User, StoreError> {
        let mut conn = self.pool.get().await?;
        let user = users::table
            .find(user_id)
            .select(User::as_select())
            .first(&mut conn)
            .await?;
        Ok(user)
    }

    async fn user_roles(&self, user_id: UserId) -> Result<Vec<Role>, StoreError> {
        let mut conn = self.pool.get().await?;
        let names: Vec<String> = user_roles::table
            .filter(user_roles::user_id.eq(user_id))
            .select(user_roles::role)
            .load(&mut conn)
            .await?;
        Ok(names.iter().filter_map(|name| Role::parse(name)).collect())
    }

    async fn create_master(&self, user_id: UserId, code: &str) -> Result<QuestMaster, StoreError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(user_roles::table)
                    .values((
                        user_roles::user_id.eq(user_id),
                        user_roles::role.eq(Role::QuestMaster.as_str()),
                    ))
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;

                let master = diesel::insert_into(quest_masters::table)
                    .values((
                        quest_masters::user_id.eq(user_id),
                        quest_masters::code.eq(code),
                    ))
                    .returning(QuestMaster::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(master)
            })
        })
        .await
    }

    async fn master_by_user(&self, user_id: UserId) -> Result<QuestMaster, StoreError> {
        let mut conn = self.pool.get().await?;
        let master = quest_masters::table
            .filter(quest_masters::user_id.eq(user_id))
            .select(QuestMaster::as_select())
            .first(&mut conn)
            .await?;
        Ok(master)
    }

    async fn master_by_code(&self, code: &str) -> Result<QuestMaster, StoreError> {
        let mut conn = self.pool.get().await?;
        let master = quest_masters::table
            .filter(quest_masters::code.eq(code))
            .select(QuestMaster::as_select())
            .first(&mut conn)
            .await?;
        Ok(master)
    }

    async fn link_player(&self, master_id: MasterId, player_id: UserId) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(master_players::table)
            .values((
                master_players::master_id.eq(master_id),
                master_players::player_id.eq(player_id),
            ))
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn players_of(&self, master_id: MasterId) -> Result<Vec<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        let players = master_players::table
            .inner_join(users::table)
            .filter(master_players::master_id.eq(master_id))
            .order(users::login.asc())
            .select(User::as_select())
            .load(&mut conn)
            .await?;
        Ok(players)
    }

    async fn masters_of(&self, player_id: UserId) -> Result<Vec<QuestMaster>, StoreError> {
        let mut conn = self.pool.get().await?;
        let masters = master_players::table
            .inner_join(quest_masters::table)
            .filter(master_players::player_id.eq(player_id))
            .order(quest_masters::id.asc())
            .select(QuestMaster::as_select())
            .load(&mut conn)
            .await?;
        Ok(masters)
    }

    async fn insert_quest(
        &self,
        author_id: UserId,
        fields: &QuestFields,
    ) -> Result<Quest, StoreError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let row = diesel::insert_into(quests::table)
                    .values(NewQuest {
                        author_id,
                        record: QuestRecord::from(fields),
                    })
                    .returning(QuestRow::as_returning())
                    .get_result(conn)
                    .await?;
                replace_roster(row.id, &fields.players, conn).await?;
                Ok(row.into_quest(fields.players.clone()))
            })
        })
        .await
    }

    async fn update_quest(
        &self,
        quest_id: QuestId,
        author_id: UserId,
        fields: &QuestFields,
    ) -> Result<Quest, StoreError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let row = diesel::update(
                    quests::table
                        .filter(quests::id.eq(quest_id))
                        .filter(quests::author_id.eq(author_id)),
                )
                .set((&QuestRecord::from(fields), quests::updated_at.eq(Utc::now())))
                .returning(QuestRow::as_returning())
                .get_result(conn)
                .await?;
                replace_roster(row.id, &fields.players, conn).await?;
                Ok(row.into_quest(fields.players.clone()))
            })
        })
        .await
    }

    async fn quest_by_id(&self, quest_id: QuestId) -> Result<Quest, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = quests::table
            .find(quest_id)
            .select(QuestRow::as_select())
            .first(&mut conn)
            .await?;
        let mut found = with_rosters(vec![row], &mut conn).await?;
        found.pop().ok_or(StoreError::NotFound)
    }

    async fn quests_by_author(&self, author_id: UserId) -> Result<Vec<Quest>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = quests::table
            .filter(quests::author_id.eq(author_id))
            .order((quests::updated_at.desc(), quests::id.desc()))
            .select(QuestRow::as_select())
            .load(&mut conn)
            .await?;
        with_rosters(rows, &mut conn).await
    }

    async fn eligible_quests(
        &self,
        player_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quest>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<QuestRow> = diesel::sql_query(ELIGIBLE_QUESTS)
            .bind::<Integer, _>(player_id)
            .bind::<Timestamptz, _>(now)
            .bind::<Nullable<Integer>, _>(None::<QuestId>)
            .load(&mut conn)
            .await?;
        with_rosters(rows, &mut conn).await
    }

    async fn eligible_quest(
        &self,
        quest_id: QuestId,
        player_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Quest, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<QuestRow> = diesel::sql_query(ELIGIBLE_QUESTS)
            .bind::<Integer, _>(player_id)
            .bind::<Timestamptz, _>(now)
            .bind::<Nullable<Integer>, _>(Some(quest_id))
            .load(&mut conn)
            .await?;
        let mut found = with_rosters(rows, &mut conn).await?;
        found.pop().ok_or(StoreError::NotFound)
    }

    async fn status_of(
        &self,
        quest_id: QuestId,
        player_id: UserId,
    ) -> Result<Option<QuestPlayerStatus>, StoreError> {
        let mut conn = self.pool.get().await?;
        quest_player_statuses::table
            .filter(quest_player_statuses::quest_id.eq(quest_id))
            .filter(quest_player_statuses::player_id.eq(player_id))
            .select(StatusRow::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(into_status)
            .transpose()
    }

    async fn statuses_of_player(
        &self,
        player_id: UserId,
    ) -> Result<Vec<QuestPlayerStatus>, StoreError> {
        let mut conn = self.pool.get().await?;
        quest_player_statuses::table
            .filter(quest_player_statuses::player_id.eq(player_id))
            .select(StatusRow::as_select())
            .load(&mut conn)
            .await?
            .into_iter()
            .map(into_status)
            .collect()
    }

    async fn status_by_id(&self, status_id: StatusId) -> Result<QuestPlayerStatus, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = quest_player_statuses::table
            .find(status_id)
            .select(StatusRow::as_select())
            .first(&mut conn)
            .await?;
        into_status(row)
    }

    async fn insert_status(
        &self,
        status: &NewQuestStatus,
    ) -> Result<QuestPlayerStatus, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::insert_into(quest_player_statuses::table)
            .values(status)
            .returning(StatusRow::as_returning())
            .get_result(&mut conn)
            .await?;
        into_status(row)
    }

    async fn update_status(
        &self,
        status: &QuestPlayerStatus,
        expected: QuestState,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        write_status(status, expected, &mut conn).await
    }

    async fn pending_submissions(
        &self,
        author_id: UserId,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let mut conn = self.pool.get().await?;
        let pending = quest_player_statuses::table
            .inner_join(quests::table)
            .inner_join(users::table)
            .filter(quests::author_id.eq(author_id))
            .filter(quest_player_statuses::state.eq(QuestState::Submitted.as_str()))
            .order((
                quest_player_statuses::requested_at.asc(),
                quest_player_statuses::id.asc(),
            ))
            .select((
                quest_player_statuses::id,
                quests::id,
                quests::title,
                quests::description,
                quests::price,
                users::id,
                users::login,
                quest_player_statuses::requested_at,
            ))
            .load::<PendingSubmission>(&mut conn)
            .await?;
        Ok(pending)
    }

    async fn unpaid_statuses(&self, limit: i64) -> Result<Vec<QuestPlayerStatus>, StoreError> {
        let mut conn = self.pool.get().await?;
        quest_player_statuses::table
            .filter(quest_player_statuses::state.eq(QuestState::Confirmed.as_str()))
            .filter(quest_player_statuses::accrued_at.is_null())
            .order(quest_player_statuses::id.asc())
            .limit(limit)
            .select(StatusRow::as_select())
            .load(&mut conn)
            .await?
            .into_iter()
            .map(into_status)
            .collect()
    }

    async fn pay_status(
        &self,
        status_id: StatusId,
        now: DateTime<Utc>,
    ) -> Result<PlayerWallet, StoreError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                // Row lock so a concurrent review or a second payer waits here.
                let row = quest_player_statuses::table
                    .find(status_id)
                    .select(StatusRow::as_select())
                    .for_update()
                    .get_result(conn)
                    .await?;
                let mut status = into_status(row)?;
                if status.accrued_at.is_some() {
                    return Err(StoreError::Conflict);
                }
                let previous = status
                    .advance(Transition::Accrue, now)
                    .map_err(|_| StoreError::Conflict)?;

                let (author_id, price): (UserId, i64) = quests::table
                    .find(status.quest_id)
                    .select((quests::author_id, quests::price))
                    .first(conn)
                    .await?;
                let master_id: MasterId = quest_masters::table
                    .filter(quest_masters::user_id.eq(author_id))
                    .select(quest_masters::id)
                    .first(conn)
                    .await?;

                let wallet = diesel::insert_into(player_wallets::table)
                    .values((
                        player_wallets::master_id.eq(master_id),
                        player_wallets::player_id.eq(status.player_id),
                        player_wallets::score.eq(price),
                        player_wallets::updated_at.eq(now),
                    ))
                    .on_conflict((player_wallets::master_id, player_wallets::player_id))
                    .do_update()
                    .set((
                        player_wallets::score.eq(player_wallets::score + price),
                        player_wallets::updated_at.eq(now),
                    ))
                    .returning(PlayerWallet::as_returning())
                    .get_result(conn)
                    .await?;

                write_status(&status, previous, conn).await?;
                Ok(wallet)
            })
        })
        .await
    }

    async fn wallets_of(&self, player_id: UserId) -> Result<Vec<PlayerWallet>, StoreError> {
        let mut conn = self.pool.get().await?;
        let wallets = player_wallets::table
            .filter(player_wallets::player_id.eq(player_id))
            .order(player_wallets::master_id.asc())
            .select(PlayerWallet::as_select())
            .load(&mut conn)
            .await?;
        Ok(wallets)
    }
}
