//! Runs against a migrated PostgreSQL database:
//! `DATABASE_URL=postgres://... cargo test --test pg_store_test -- --ignored`

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use questboard::models::{QuestFields, QuestPlayerStatus, QuestState, QuestType, User};
use questboard::service::{QuestService, ServiceError};
use questboard::store::{PgStore, Store, StoreError};
use questboard::util::form::format_form_datetime;
use questboard::views::{PlayerQuestView, QuestDraft};

struct World {
    store: Arc<dyn Store>,
    service: QuestService,
    master: User,
    code: String,
    player: User,
}

// Helper: a fresh master and player with unique logins, None without a database
async fn setup_world() -> Option<World> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
    let pool = Pool::builder().build(manager).await.unwrap();
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let service = QuestService::new(store.clone(), "test-pepper");

    let tag = uuid::Uuid::new_v4().simple().to_string();
    let master = service
        .register(&format!("parent-{tag}"), "secret")
        .await
        .unwrap();
    let player = service
        .register(&format!("kid-{tag}"), "secret")
        .await
        .unwrap();
    let record = service.become_master(master.id).await.unwrap();
    service
        .link_player_to_master(&record.code, player.id)
        .await
        .unwrap();

    Some(World {
        store,
        service,
        master,
        code: record.code,
        player,
    })
}

fn open_draft(title: &str, price: i64) -> QuestDraft {
    QuestDraft {
        title: title.to_owned(),
        price,
        is_active: true,
        is_all_players: true,
        ..QuestDraft::default()
    }
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_pg_submit_review_and_pay_once() {
    let Some(world) = setup_world().await else {
        return;
    };
    let quest = world
        .service
        .create_quest(open_draft("Mow the lawn", 50), world.master.id)
        .await
        .unwrap();

    let status = world
        .service
        .submit_quest_completion(quest.id, world.player.id)
        .await
        .unwrap();
    assert_eq!(
        world
            .service
            .submit_quest_completion(quest.id, world.player.id)
            .await
            .unwrap_err(),
        ServiceError::DuplicateSubmission
    );

    world
        .service
        .review_submission(status.id, world.master.id, false)
        .await
        .unwrap();
    world
        .service
        .submit_quest_completion(quest.id, world.player.id)
        .await
        .unwrap();
    let pending = world
        .service
        .list_pending_submissions(world.master.id)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    world
        .service
        .review_submission(status.id, world.master.id, true)
        .await
        .unwrap();

    let wallet = world.store.pay_status(status.id, Utc::now()).await.unwrap();
    assert_eq!(wallet.score, 50);
    assert_eq!(
        world
            .store
            .pay_status(status.id, Utc::now())
            .await
            .unwrap_err(),
        StoreError::Conflict
    );

    let paid = world.store.status_by_id(status.id).await.unwrap();
    assert_eq!(paid.state, QuestState::Paid);
    assert!(paid.accrued_at.is_some());
    assert_eq!(
        world
            .service
            .list_wallets(world.player.id)
            .await
            .unwrap()
            .total,
        50
    );
    assert_eq!(
        world
            .service
            .get_eligible_quest(quest.id, world.player.id)
            .await
            .unwrap_err(),
        ServiceError::NotFound
    );
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_pg_wallet_upsert_accumulates() {
    let Some(world) = setup_world().await else {
        return;
    };
    for (title, price) in [("Dishes", 5), ("Laundry", 7)] {
        let quest = world
            .service
            .create_quest(open_draft(title, price), world.master.id)
            .await
            .unwrap();
        let status = world
            .service
            .submit_quest_completion(quest.id, world.player.id)
            .await
            .unwrap();
        world
            .service
            .review_submission(status.id, world.master.id, true)
            .await
            .unwrap();
        world.store.pay_status(status.id, Utc::now()).await.unwrap();
    }

    let wallets = world.service.list_wallets(world.player.id).await.unwrap();
    assert_eq!(wallets.wallets.len(), 1);
    assert_eq!(wallets.wallets[0].score, 12);
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_pg_eligibility_query() {
    let Some(world) = setup_world().await else {
        return;
    };
    let now = Utc::now();
    let tag = uuid::Uuid::new_v4().simple().to_string();
    let sibling = world
        .service
        .register(&format!("sibling-{tag}"), "pw")
        .await
        .unwrap();
    let outsider = world
        .service
        .register(&format!("outsider-{tag}"), "pw")
        .await
        .unwrap();
    world
        .service
        .link_player_to_master(&world.code, sibling.id)
        .await
        .unwrap();

    let always = world
        .service
        .create_quest(open_draft("Always", 1), world.master.id)
        .await
        .unwrap();
    world
        .service
        .create_quest(
            QuestDraft {
                date_start: format_form_datetime(Some(now + TimeDelta::hours(1)), 0),
                ..open_draft("Later", 1)
            },
            world.master.id,
        )
        .await
        .unwrap();
    world
        .service
        .create_quest(
            QuestDraft {
                date_end: format_form_datetime(Some(now - TimeDelta::hours(1)), 0),
                ..open_draft("Gone", 1)
            },
            world.master.id,
        )
        .await
        .unwrap();
    world
        .service
        .create_quest(
            QuestDraft {
                is_active: false,
                ..open_draft("Paused", 1)
            },
            world.master.id,
        )
        .await
        .unwrap();
    let only_sibling = world
        .service
        .create_quest(
            QuestDraft {
                is_all_players: false,
                players: vec![sibling.id],
                ..open_draft("Sibling only", 1)
            },
            world.master.id,
        )
        .await
        .unwrap();

    let ids = |quests: Vec<PlayerQuestView>| -> Vec<i32> {
        quests.into_iter().map(|quest| quest.id).collect()
    };
    assert_eq!(
        ids(world
            .service
            .list_eligible_quests_for_player(world.player.id)
            .await
            .unwrap()),
        vec![always.id]
    );
    assert_eq!(
        ids(world
            .service
            .list_eligible_quests_for_player(sibling.id)
            .await
            .unwrap()),
        vec![only_sibling.id, always.id]
    );
    assert!(world
        .service
        .list_eligible_quests_for_player(outsider.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        world
            .service
            .get_eligible_quest(only_sibling.id, world.player.id)
            .await
            .unwrap_err(),
        ServiceError::NotFound
    );
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_pg_wallet_overflow_rolls_back() {
    let Some(world) = setup_world().await else {
        return;
    };
    let huge = QuestFields {
        title: "Jackpot".to_owned(),
        description: String::new(),
        quest_type: QuestType::OneTime,
        price: i64::MAX,
        is_active: true,
        start_time: None,
        end_time: None,
        players: vec![],
    };
    let mut ids = Vec::new();
    for _ in 0..2 {
        let quest = world
            .store
            .insert_quest(world.master.id, &huge)
            .await
            .unwrap();
        let status = world
            .service
            .submit_quest_completion(quest.id, world.player.id)
            .await
            .unwrap();
        world
            .service
            .review_submission(status.id, world.master.id, true)
            .await
            .unwrap();
        ids.push(status.id);
    }

    world.store.pay_status(ids[0], Utc::now()).await.unwrap();
    assert!(matches!(
        world.store.pay_status(ids[1], Utc::now()).await,
        Err(StoreError::Backend(_))
    ));
    let stuck = world.store.status_by_id(ids[1]).await.unwrap();
    assert_eq!(stuck.state, QuestState::Confirmed);
    assert_eq!(stuck.accrued_at, None);

    // Leave nothing behind for other runs' payers to trip over.
    world
        .store
        .update_status(
            &QuestPlayerStatus {
                state: QuestState::Rejected,
                rejected_at: Some(Utc::now()),
                ..stuck
            },
            QuestState::Confirmed,
        )
        .await
        .unwrap();
}
