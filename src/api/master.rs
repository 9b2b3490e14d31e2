use actix_session::Session;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::models::{QuestId, StatusId};
use crate::service::QuestService;
use crate::util::api_util::*;
use crate::views::QuestDraft;

impl APIRequest for QuestDraft {
    fn ok(&self) -> bool {
        self.title.len() <= 255 && self.description.len() <= 10_000
    }
}

#[derive(Debug, Deserialize)]
pub struct QuestQuery {
    quest_id: QuestId,
}

#[derive(Debug, Deserialize)]
pub struct EditQuestRequest {
    quest_id: QuestId,
    #[serde(flatten)]
    draft: QuestDraft,
}

#[derive(Debug, Serialize)]
struct QuestSaved {
    id: QuestId,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Accept,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    status_id: StatusId,
    action: ReviewAction,
}

#[get("/master/players")]
pub async fn list_players(
    service: web::Data<QuestService>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "master_players";
    let master = require_master(&session)?;
    let players = service
        .list_players(master.id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(players))
}

#[get("/master/quests")]
pub async fn list_quests(
    service: web::Data<QuestService>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "master_quests";
    let master = require_master(&session)?;
    let quests = service
        .list_quests_for_master(master.id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(quests))
}

#[get("/master/quest")]
pub async fn get_quest(
    service: web::Data<QuestService>,
    query: web::Query<QuestQuery>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "master_quest";
    let master = require_master(&session)?;
    let quest = service
        .get_quest_for_master(query.quest_id, master.id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(quest))
}

// [[API]]
// desp: Create a quest. Dates use `YYYY-MM-DDTHH:MM` plus `time_zone_offset`
//       minutes; unparseable dates are stored as open bounds.
// Method: Post
// URL: /master/create_quest
// Request Body: `QuestDraft`
// Response Body: `{ "id": quest id }`
//
#[post("/master/create_quest")]
pub async fn create_quest(
    service: web::Data<QuestService>,
    form: web::Json<QuestDraft>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "create_quest";
    form.sanity()?;
    let master = require_master(&session)?;

    let quest = service
        .create_quest(form.into_inner(), master.id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(QuestSaved { id: quest.id }))
}

// [[API]]
// desp: Replace every field of a quest the caller wrote, roster included.
// Method: Post
// URL: /master/edit_quest
// Request Body: `EditQuestRequest`, a `QuestDraft` with `quest_id`
// Response Body: `{ "id": quest id }`
//
#[post("/master/edit_quest")]
pub async fn edit_quest(
    service: web::Data<QuestService>,
    form: web::Json<EditQuestRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "edit_quest";
    form.draft.sanity()?;
    let master = require_master(&session)?;

    let EditQuestRequest { quest_id, draft } = form.into_inner();
    let quest = service
        .edit_quest(quest_id, draft, master.id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(QuestSaved { id: quest.id }))
}

#[get("/master/pending")]
pub async fn list_pending(
    service: web::Data<QuestService>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "master_pending";
    let master = require_master(&session)?;
    let pending = service
        .list_pending_submissions(master.id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(pending))
}

// [[API]]
// desp: Accept or reject a pending submission on one of the caller's quests.
// Method: Post
// URL: /master/review
// Request Body: `ReviewRequest`, `action` is `accept` or `reject`
// Response Body: the updated status
//
#[post("/master/review")]
pub async fn review(
    service: web::Data<QuestService>,
    form: web::Json<ReviewRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "review";
    let master = require_master(&session)?;

    let status = service
        .review_submission(
            form.status_id,
            master.id,
            form.action == ReviewAction::Accept,
        )
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(status.state))
}
