pub mod api;
pub mod config;
pub mod models;
pub mod schema;
pub mod service;
pub mod store;
pub mod util;
pub mod views;

use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::AsyncPgConnection;

pub type DbPool = Pool<AsyncPgConnection>;

pub const INVITE_CODE_LENGTH: usize = 10;

// Keeps a wallet far from the Int8 limit even after many payments.
pub const MAX_QUEST_PRICE: i64 = 1_000_000_000;

pub trait Ext<R>: Sized {
    fn tap(self, f: impl FnOnce(&Self) -> R) -> Self {
        f(&self);
        self
    }
}

impl<T, R> Ext<R> for T {}
