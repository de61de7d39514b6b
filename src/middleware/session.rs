use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};

use crate::errors::AuthError;

/// Name of the cookie carrying the coordinator session id.
pub const SESSION_COOKIE: &str = "sid";

/// Extractor pulling the session id out of the request cookie. Handlers that
/// can answer without a session take `Option<SessionToken>` instead.
pub struct SessionToken(pub String);

impl FromRequest for SessionToken {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.cookie(SESSION_COOKIE)
                .map(|cookie| SessionToken(cookie.value().to_string()))
                .ok_or(AuthError::SessionInvalid),
        )
    }
}

/// Client address as reported by the connection, falling back to "unknown"
/// so a missing peer address never aborts a login.
pub fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

pub fn user_agent(req: &HttpRequest) -> String {
    req.headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string()
}
