use actix_session::Session;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;

use crate::models::QuestId;
use crate::service::QuestService;
use crate::util::api_util::*;

#[derive(Debug, Deserialize)]
pub struct LinkMasterRequest {
    code: String,
}

impl APIRequest for LinkMasterRequest {
    fn ok(&self) -> bool {
        let code = self.code.trim();
        !code.is_empty() && code.len() <= 16
    }
}

#[derive(Debug, Deserialize)]
pub struct QuestQuery {
    quest_id: QuestId,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    quest_id: QuestId,
}

// [[API]]
// desp: Join a quest master's roster with their invite code.
// Method: Post
// URL: /player/link_master
// Request Body: `LinkMasterRequest`
// Response Body: the refreshed `SessionUser`
//
#[post("/player/link_master")]
pub async fn link_master(
    service: web::Data<QuestService>,
    form: web::Json<LinkMasterRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "link_master";
    form.sanity()?;
    let user_id = session_user_id(&session)?;

    service
        .link_player_to_master(&form.code, user_id)
        .await
        .map_err(located(location))?;

    let user = service
        .session_user(user_id)
        .await
        .map_err(located(location))?;
    set_loggedin_session(&session, &user, location)?;
    Ok(HttpResponse::Ok().json(user))
}

#[get("/player/masters")]
pub async fn list_masters(
    service: web::Data<QuestService>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "player_masters";
    let user_id = session_user_id(&session)?;
    let masters = service
        .list_player_masters(user_id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(masters))
}

#[get("/player/quests")]
pub async fn list_quests(
    service: web::Data<QuestService>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "player_quests";
    let user_id = session_user_id(&session)?;
    let quests = service
        .list_eligible_quests_for_player(user_id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(quests))
}

#[get("/player/quest")]
pub async fn get_quest(
    service: web::Data<QuestService>,
    query: web::Query<QuestQuery>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "player_quest";
    let user_id = session_user_id(&session)?;
    let quest = service
        .get_eligible_quest(query.quest_id, user_id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(quest))
}

// [[API]]
// desp: Report a quest as done. Answers 409 while a submission is pending
//       or after it was confirmed.
// Method: Post
// URL: /player/submit
// Request Body: `SubmitRequest`
// Response Body: the status state
//
#[post("/player/submit")]
pub async fn submit(
    service: web::Data<QuestService>,
    form: web::Json<SubmitRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "submit";
    let user_id = session_user_id(&session)?;
    let status = service
        .submit_quest_completion(form.quest_id, user_id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(status.state))
}

#[get("/player/wallets")]
pub async fn list_wallets(
    service: web::Data<QuestService>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "wallets";
    let user_id = session_user_id(&session)?;
    let wallets = service
        .list_wallets(user_id)
        .await
        .map_err(located(location))?;
    Ok(HttpResponse::Ok().json(wallets))
}
