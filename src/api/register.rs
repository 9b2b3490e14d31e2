use actix_session::Session;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;

use crate::models::UserId;
use crate::service::QuestService;
use crate::util::api_util::*;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    // Max 255.
    login: String,
    password: String,
}

impl APIRequest for CredentialsRequest {
    fn ok(&self) -> bool {
        self.login.len() <= 255 && self.password.len() <= 1024
    }
}

async fn start_session(
    service: &QuestService,
    session: &Session,
    user_id: UserId,
    location: &'static str,
) -> Result<HttpResponse, APIError> {
    let user = service
        .session_user(user_id)
        .await
        .map_err(located(location))?;
    set_loggedin_session(session, &user, location)?;
    Ok(HttpResponse::Ok().json(user))
}

// [[API]]
// desp: Create an account and log in with it.
// Method: Post
// URL: /register
// Request Body: `CredentialsRequest`
// Response Body: `SessionUser`
//
#[post("/register")]
pub async fn register_user(
    service: web::Data<QuestService>,
    form: web::Json<CredentialsRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "register";
    form.sanity()?;

    let user = service
        .register(&form.login, &form.password)
        .await
        .map_err(located(location))?;
    start_session(&service, &session, user.id, location).await
}

// [[API]]
// desp: Login with password. Unknown login and wrong password both answer 404.
// Method: Post
// URL: /login
// Request Body: `CredentialsRequest`
// Response Body: `SessionUser`
//
#[post("/login")]
pub async fn login_user(
    service: web::Data<QuestService>,
    form: web::Json<CredentialsRequest>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "login";
    form.sanity()?;

    let user = service
        .authenticate(&form.login, &form.password)
        .await
        .map_err(located(location))?;
    start_session(&service, &session, user.id, location).await
}

#[post("/logout")]
pub async fn logout_user(session: Session) -> impl Responder {
    session.purge();
    HttpResponse::Ok().finish()
}

#[get("/user")]
pub async fn get_user(session: Session) -> Result<impl Responder, APIError> {
    let user = session_user(&session)?;
    Ok(HttpResponse::Ok().json(user))
}

// [[API]]
// desp: Turn the logged in user into a quest master with a fresh invite code.
// Method: Post
// URL: /become_master
// Response Body: `SessionUser`, now carrying the master record
//
#[post("/become_master")]
pub async fn become_master(
    service: web::Data<QuestService>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "become_master";
    let user_id = session_user_id(&session)?;

    service
        .become_master(user_id)
        .await
        .map_err(located(location))?;
    start_session(&service, &session, user_id, location).await
}
