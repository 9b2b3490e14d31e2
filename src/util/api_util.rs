use actix_session::Session;
use actix_web::{
    error,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use derive_more::derive::Display;
use log::error;

use crate::models::{SessionUser, UserId};
use crate::service::ServiceError;
use crate::Ext;

pub trait APIRequest: Sized {
    fn ok(&self) -> bool;
    fn sanity(&self) -> Result<(), APIError> {
        if self.ok() {
            Ok(())
        } else {
            Err(APIError::InvalidFormData)
        }
    }
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum APIError {
    #[display("Invalid form data")]
    InvalidFormData,

    #[display("Invalid form data: {_0}")]
    Validation(&'static str),

    #[display("Invalid session")]
    InvalidSession,

    #[display("Not logged in")]
    NotLogin,

    #[display("Unauthorized access")]
    Unauthorized,

    #[display("Not found")]
    NotFound,

    #[display("Quest already submitted")]
    DuplicateSubmission,

    #[display("Server error at {location}, ref[{refnum}]: {msg}")]
    ServerError {
        location: &'static str,
        msg: &'static str,
        refnum: uuid::Uuid,
    },
}

impl APIError {
    pub fn set_location(self, location: &'static str) -> Self {
        match self {
            APIError::ServerError {
                location: _,
                msg,
                refnum,
            } => APIError::ServerError {
                location,
                msg,
                refnum,
            },
            _ => self,
        }
    }

    pub fn log(&self) {
        if let APIError::ServerError {
            location,
            msg,
            refnum,
        } = self
        {
            error!("Server error at {location}, ref[{refnum}]: {msg}");
        }
    }
}

impl From<ServiceError> for APIError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound => APIError::NotFound,
            ServiceError::DuplicateSubmission => APIError::DuplicateSubmission,
            ServiceError::Validation(reason) => APIError::Validation(reason),
            ServiceError::Persistence(e) => new_unlocated_server_error(e, ERROR_DB_UNKNOWN),
        }
    }
}

impl error::ResponseError for APIError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::plaintext())
            .body(self.to_string())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            APIError::InvalidFormData | APIError::Validation(_) => StatusCode::NOT_ACCEPTABLE,
            APIError::InvalidSession | APIError::NotLogin => StatusCode::UNAUTHORIZED,
            APIError::Unauthorized => StatusCode::FORBIDDEN,
            APIError::NotFound => StatusCode::NOT_FOUND,
            APIError::DuplicateSubmission => StatusCode::CONFLICT,
            APIError::ServerError {
                location: _,
                msg: _,
                refnum: _,
            } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Attaches the handler name to a service failure and logs server errors.
pub fn located(location: &'static str) -> impl Fn(ServiceError) -> APIError {
    move |e| APIError::from(e).set_location(location).tap(APIError::log)
}

pub fn log_server_error<E>(error: E, location: &'static str, msg: &'static str) -> APIError
where
    E: derive_more::Display,
{
    new_unlocated_server_error(error, msg)
        .set_location(location)
        .tap(APIError::log)
}

pub fn new_unlocated_server_error<E>(error: E, msg: &'static str) -> APIError
where
    E: derive_more::Display,
{
    let refnum = uuid::Uuid::new_v4();
    error!("Error [{refnum}]: {error}");
    APIError::ServerError {
        location: LOCATION_UNKNOWN,
        msg,
        refnum,
    }
}

pub fn set_loggedin_session(
    session: &Session,
    user: &SessionUser,
    location: &'static str,
) -> Result<(), APIError> {
    session.renew();
    session
        .insert(SESSION_USER, user)
        .map_err(|e| log_server_error(e, location, ERROR_SESSION_INSERT))
}

pub fn session_user(session: &Session) -> Result<SessionUser, APIError> {
    match session.get::<SessionUser>(SESSION_USER) {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(APIError::NotLogin),
        Err(_) => {
            session.purge();
            Err(APIError::InvalidSession)
        }
    }
}

pub fn session_user_id(session: &Session) -> Result<UserId, APIError> {
    session_user(session).map(|user| user.id)
}

/// Logged in users holding the create-quest capability.
pub fn require_master(session: &Session) -> Result<SessionUser, APIError> {
    let user = session_user(session)?;
    if user.capabilities.can_create_quest {
        Ok(user)
    } else {
        Err(APIError::Unauthorized)
    }
}

pub static SESSION_USER: &str = "user";

pub static ERROR_SESSION_INSERT: &str = "session_setting_failed";
pub static ERROR_DB_UNKNOWN: &str = "database_unknown";

pub static LOCATION_UNKNOWN: &str = "[unknown]";
