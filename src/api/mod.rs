pub mod master;
pub mod player;
pub mod register;

use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::cookie::{Key, SameSite};
use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register::register_user)
        .service(register::login_user)
        .service(register::logout_user)
        .service(register::get_user)
        .service(register::become_master)
        .service(master::list_players)
        .service(master::list_quests)
        .service(master::get_quest)
        .service(master::create_quest)
        .service(master::edit_quest)
        .service(master::list_pending)
        .service(master::review)
        .service(player::link_master)
        .service(player::list_masters)
        .service(player::list_quests)
        .service(player::get_quest)
        .service(player::submit)
        .service(player::list_wallets);
}

pub fn session_middleware(key: Key, is_production: bool) -> SessionMiddleware<CookieSessionStore> {
    SessionMiddleware::builder(CookieSessionStore::default(), key)
        .cookie_secure(is_production)
        // Cross-site cookies need `Secure`, so relax SameSite outside production.
        .cookie_same_site(if is_production {
            SameSite::None
        } else {
            SameSite::Lax
        })
        .build()
}
