use std::sync::Arc;

use actix_cors::Cors;
use actix_web::http::header::HeaderValue;
use actix_web::{web, App, HttpServer};

use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;

use log::{info, warn};
use questboard::api;
use questboard::config::{Config, Mode};
use questboard::service::QuestService;
use questboard::store::{MemoryStore, PgStore, Store};
use questboard::util::{cipher_util, payer::QuestPayer};
use questboard::DbPool;

fn cors_check(allowed: &[String], head: &HeaderValue) -> bool {
    head.to_str()
        .is_ok_and(|origin| allowed.iter().any(|allowed| allowed == origin))
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env().map_err(|e| std::io::Error::other(e.to_string()))?;

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) if config.mode != Mode::Memory => {
            let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
            let pool: DbPool = Pool::builder()
                .build(manager)
                .await
                .expect("Failed to link to db");
            Arc::new(PgStore::new(pool))
        }
        _ => {
            warn!("Using the in-memory store, nothing survives a restart.");
            Arc::new(MemoryStore::new())
        }
    };

    if config.mode == Mode::Dev {
        warn!("Under development mode.");
    }
    let is_production = config.mode.is_production();

    let payer = QuestPayer::new(
        store.clone(),
        config.payer_interval,
        config.payer_batch_size,
    )
    .spawn();

    let service = web::Data::new(QuestService::new(store, config.login_token.clone()));
    let secret_key = cipher_util::gen_cookie_key(&config.cookie_token);
    let allowed_origins = Arc::new(config.allowed_origins.clone());

    let server = HttpServer::new(move || {
        let origins = allowed_origins.clone();
        App::new()
            .app_data(service.clone())
            .wrap(
                Cors::default()
                    .allowed_origin_fn(move |origin, _| cors_check(&origins, origin))
                    .allow_any_header()
                    .allow_any_method()
                    .supports_credentials(),
            )
            .wrap(api::session_middleware(secret_key.clone(), is_production))
            .configure(api::configure)
    })
    .bind(&config.bind_address)?
    .run();

    info!("Listening on {}", config.bind_address);
    let result = server.await;
    payer.shutdown().await;
    result
}
