use actix_web::http::header;
use actix_web::{web, HttpResponse};

use crate::middleware::session::SessionToken;
use crate::models::AuthSession;
use crate::routes::auth::step_up_location;
use crate::services::auth::AuthCoordinator;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(dashboard)
        .service(profile)
        .service(feature_details);
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}

/// Resolve a fully verified session, bouncing unfinished ones back into the
/// step-up flow and everyone else to the login page.
async fn verified_session(
    coordinator: &AuthCoordinator,
    token: Option<SessionToken>,
) -> Result<AuthSession, HttpResponse> {
    let session_id = match token {
        Some(SessionToken(session_id)) => session_id,
        None => return Err(redirect("/login")),
    };
    let session = match coordinator.touch_session(&session_id).await {
        Ok(session) => session,
        Err(_) => return Err(redirect("/login")),
    };
    if session.needs_verification {
        return Err(redirect(step_up_location(&session)));
    }
    Ok(session)
}

#[actix_web::get("/dashboard")]
async fn dashboard(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    let session = match verified_session(&coordinator, token).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    match coordinator.dashboard(&session.session_id).await {
        Ok(data) => HttpResponse::Ok().json(data),
        Err(e) => {
            log::error!("Dashboard error: {}", e);
            redirect("/login")
        }
    }
}

#[actix_web::get("/profile")]
async fn profile(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    let session = match verified_session(&coordinator, token).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    match coordinator.profile(&session.session_id).await {
        Ok(data) => HttpResponse::Ok().json(data),
        Err(e) => {
            log::error!("Profile error: {}", e);
            redirect("/login")
        }
    }
}

#[actix_web::get("/feature-details")]
async fn feature_details(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    let session = match verified_session(&coordinator, token).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    match coordinator.feature_details(&session.session_id).await {
        Ok(Some(assessment)) => HttpResponse::Ok().json(assessment),
        Ok(None) => redirect("/dashboard"),
        Err(e) => {
            log::error!("Feature details error: {}", e);
            redirect("/login")
        }
    }
}
