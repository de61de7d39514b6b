use actix_web::cookie::Cookie;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::errors::AuthError;
use crate::middleware::session::{client_ip, user_agent, SessionToken, SESSION_COOKIE};
use crate::models::{
    AuthSession, KbaAnswerForm, LoginForm, OtpVerification, RegisterForm, VerificationType,
    VerifyCodeForm,
};
use crate::services::auth::{AuthCoordinator, LoginOutcome, StepUpProgress};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(register_page)
        .service(register)
        .service(login_page)
        .service(login)
        .service(verify_page)
        .service(verify)
        .service(verify_otp_page)
        .service(verify_otp)
        .service(verify_kba_page)
        .service(verify_kba)
        .service(resend_otp)
        .service(otp_status)
        .service(logout);
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}

fn session_cookie(session_id: &str) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, session_id.to_string())
        .path("/")
        .http_only(true)
        .finish()
}

/// Where an unfinished session should be sent next.
pub(crate) fn step_up_location(session: &AuthSession) -> &'static str {
    match session.verification_type {
        VerificationType::Otp => "/verify",
        VerificationType::OtpKba if session.otp_verified => "/verify-kba",
        VerificationType::OtpKba => "/verify-otp",
        VerificationType::None => "/dashboard",
    }
}

fn rejection_message(rejection: &OtpVerification) -> String {
    match rejection {
        OtpVerification::Invalid { remaining } => {
            format!("Incorrect code, {} attempts remaining", remaining)
        }
        OtpVerification::Expired => "The code has expired, request a new one".to_string(),
        OtpVerification::Exhausted => {
            "Too many incorrect attempts, request a new code".to_string()
        }
        OtpVerification::NotFound => "No active code found, request a new one".to_string(),
        OtpVerification::Valid => unreachable!("valid codes are not rejections"),
    }
}

#[actix_web::get("/")]
async fn index() -> HttpResponse {
    HttpResponse::Ok().body("Risk-based authentication service")
}

#[actix_web::get("/register")]
async fn register_page() -> HttpResponse {
    HttpResponse::Ok().body("Registration form")
}

#[actix_web::post("/register")]
async fn register(
    coordinator: web::Data<AuthCoordinator>,
    form: web::Form<RegisterForm>,
) -> HttpResponse {
    match coordinator.register(form.into_inner()).await {
        Ok(_) => redirect("/login"),
        Err(AuthError::UsernameExists) => {
            HttpResponse::Ok().body("Registration failed: username already exists")
        }
        Err(AuthError::ValidationError(message)) => {
            HttpResponse::Ok().body(format!("Registration failed: {}", message))
        }
        Err(e) => {
            log::error!("Registration error: {}", e);
            HttpResponse::Ok().body("Registration failed, try again later")
        }
    }
}

#[actix_web::get("/login")]
async fn login_page(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    if let Some(SessionToken(session_id)) = token {
        if let Ok(session) = coordinator.touch_session(&session_id).await {
            if session.is_verified() {
                return redirect("/dashboard");
            }
        }
    }
    HttpResponse::Ok().body("Login form")
}

#[actix_web::post("/login")]
async fn login(
    coordinator: web::Data<AuthCoordinator>,
    form: web::Form<LoginForm>,
    req: HttpRequest,
) -> HttpResponse {
    let ip = client_ip(&req);
    let agent = user_agent(&req);

    match coordinator.login(form.into_inner(), &ip, &agent).await {
        Ok(outcome) => {
            let cookie = session_cookie(outcome.session_id());
            let location = match outcome {
                LoginOutcome::Verified { .. } => "/dashboard",
                LoginOutcome::StepUpOtp { .. } => "/verify",
                LoginOutcome::StepUpOtpKba { .. } => "/verify-otp",
            };
            HttpResponse::Found()
                .cookie(cookie)
                .insert_header((header::LOCATION, location))
                .finish()
        }
        Err(AuthError::InvalidCredentials) => redirect("/login"),
        Err(e) => {
            log::error!("Login error: {}", e);
            redirect("/login")
        }
    }
}

/// Resolve the session for a step-up page, enforcing the verification type
/// the page belongs to.
async fn step_up_session(
    coordinator: &AuthCoordinator,
    token: Option<SessionToken>,
    expected: VerificationType,
) -> Option<AuthSession> {
    let SessionToken(session_id) = token?;
    let session = coordinator.touch_session(&session_id).await.ok()?;
    (session.needs_verification && session.verification_type == expected).then_some(session)
}

#[actix_web::get("/verify")]
async fn verify_page(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    match step_up_session(&coordinator, token, VerificationType::Otp).await {
        Some(_) => HttpResponse::Ok().body("Enter the verification code sent to your email"),
        None => redirect("/login"),
    }
}

#[actix_web::post("/verify")]
async fn verify(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
    form: web::Form<VerifyCodeForm>,
) -> HttpResponse {
    let session = match step_up_session(&coordinator, token, VerificationType::Otp).await {
        Some(session) => session,
        None => return redirect("/login"),
    };

    match coordinator
        .verify_otp(&session.session_id, &form.verification_code)
        .await
    {
        Ok(StepUpProgress::Complete) => redirect("/dashboard"),
        Ok(StepUpProgress::OtpAccepted) => redirect("/verify-kba"),
        Ok(StepUpProgress::Rejected(rejection)) => {
            HttpResponse::Ok().body(rejection_message(&rejection))
        }
        Err(e) => {
            log::error!("Verification error: {}", e);
            redirect("/login")
        }
    }
}

#[actix_web::get("/verify-otp")]
async fn verify_otp_page(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    match step_up_session(&coordinator, token, VerificationType::OtpKba).await {
        Some(_) => HttpResponse::Ok().body("Enter the verification code sent to your email"),
        None => redirect("/login"),
    }
}

#[actix_web::post("/verify-otp")]
async fn verify_otp(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
    form: web::Form<VerifyCodeForm>,
) -> HttpResponse {
    let session = match step_up_session(&coordinator, token, VerificationType::OtpKba).await {
        Some(session) => session,
        None => return redirect("/login"),
    };

    match coordinator
        .verify_otp(&session.session_id, &form.verification_code)
        .await
    {
        Ok(StepUpProgress::OtpAccepted) => redirect("/verify-kba"),
        Ok(StepUpProgress::Complete) => redirect("/dashboard"),
        Ok(StepUpProgress::Rejected(rejection)) => {
            HttpResponse::Ok().body(rejection_message(&rejection))
        }
        Err(e) => {
            log::error!("Verification error: {}", e);
            redirect("/login")
        }
    }
}

#[actix_web::get("/verify-kba")]
async fn verify_kba_page(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    let session = match step_up_session(&coordinator, token, VerificationType::OtpKba).await {
        Some(session) if session.otp_verified => session,
        _ => return redirect("/login"),
    };

    match coordinator.security_question(&session.session_id).await {
        Ok(question) => HttpResponse::Ok().body(question),
        Err(e) => {
            log::error!("Could not load security question: {}", e);
            redirect("/login")
        }
    }
}

#[actix_web::post("/verify-kba")]
async fn verify_kba(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
    form: web::Form<KbaAnswerForm>,
) -> HttpResponse {
    let session = match step_up_session(&coordinator, token, VerificationType::OtpKba).await {
        Some(session) if session.otp_verified => session,
        _ => return redirect("/login"),
    };

    match coordinator.verify_kba(&session.session_id, &form.kba_answer).await {
        Ok(true) => redirect("/dashboard"),
        Ok(false) => HttpResponse::Ok().body("Incorrect security answer"),
        Err(e) => {
            log::error!("Verification error: {}", e);
            redirect("/login")
        }
    }
}

#[actix_web::post("/resend-otp")]
async fn resend_otp(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
    req: HttpRequest,
) -> HttpResponse {
    let session_id = match token {
        Some(SessionToken(session_id)) => session_id,
        None => {
            return HttpResponse::Ok()
                .json(json!({ "success": false, "message": "Invalid session" }))
        }
    };

    match coordinator.resend_otp(&session_id, &client_ip(&req)).await {
        Ok(message) => HttpResponse::Ok().json(json!({ "success": true, "message": message })),
        Err(e @ AuthError::RateLimited { .. }) => {
            HttpResponse::Ok().json(json!({ "success": false, "message": e.to_string() }))
        }
        Err(AuthError::SessionInvalid) => {
            HttpResponse::Ok().json(json!({ "success": false, "message": "Invalid session" }))
        }
        Err(e) => {
            log::error!("Resend error: {}", e);
            HttpResponse::Ok().json(json!({ "success": false, "message": "System error" }))
        }
    }
}

#[actix_web::get("/otp-status")]
async fn otp_status(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    let session_id = match token {
        Some(SessionToken(session_id)) => session_id,
        None => {
            return HttpResponse::Ok()
                .json(json!({ "success": false, "message": "Invalid session" }))
        }
    };

    match coordinator.otp_status(&session_id).await {
        Ok(Some(status)) => HttpResponse::Ok().json(json!({ "success": true, "status": status })),
        Ok(None) => {
            HttpResponse::Ok().json(json!({ "success": false, "message": "No code found" }))
        }
        Err(AuthError::SessionInvalid) => {
            HttpResponse::Ok().json(json!({ "success": false, "message": "Invalid session" }))
        }
        Err(e) => {
            log::error!("Status error: {}", e);
            HttpResponse::Ok().json(json!({ "success": false, "message": "System error" }))
        }
    }
}

#[actix_web::get("/logout")]
async fn logout(
    coordinator: web::Data<AuthCoordinator>,
    token: Option<SessionToken>,
) -> HttpResponse {
    if let Some(SessionToken(session_id)) = token {
        if let Err(e) = coordinator.logout(&session_id).await {
            log::error!("Logout error: {}", e);
        }
    }

    let mut cookie = session_cookie("");
    cookie.make_removal();
    HttpResponse::Found()
        .cookie(cookie)
        .insert_header((header::LOCATION, "/"))
        .finish()
}
