use lettre::{
    message::{header, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};

use crate::config::SmtpConfig;
use crate::errors::AuthError;

/// Outbound delivery of one-time codes. The service only ever needs this one
/// operation; everything else about email stays behind the implementation.
pub trait Mailer: Send + Sync {
    fn send_code(
        &self,
        to: &str,
        username: &str,
        code: &str,
        expires_minutes: i64,
    ) -> Result<(), AuthError>;
}

pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        SmtpMailer { config }
    }
}

impl Mailer for SmtpMailer {
    fn send_code(
        &self,
        to: &str,
        username: &str,
        code: &str,
        expires_minutes: i64,
    ) -> Result<(), AuthError> {
        let subject = "Your verification code";

        let html_body = format!(
            r#"
            <html>
                <body>
                    <h1>Login verification</h1>
                    <p>Hello {},</p>
                    <p>Your one-time verification code is:</p>
                    <h2>{}</h2>
                    <p>The code expires in {} minutes. If you did not try to
                    log in, you can ignore this email.</p>
                </body>
            </html>
            "#,
            username, code, expires_minutes
        );

        let text_body = format!(
            "Hello {},\n\nYour one-time verification code is: {}\n\nThe code expires in {} minutes. If you did not try to log in, you can ignore this email.\n",
            username, code, expires_minutes
        );

        let email = Message::builder()
            .from(
                self.config
                    .sender
                    .parse()
                    .map_err(|e| AuthError::EmailError(format!("invalid sender address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| AuthError::EmailError(format!("invalid recipient address: {}", e)))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        let creds = Credentials::new(
            self.config.sender.clone(),
            self.config.password.clone(),
        );

        let mailer = SmtpTransport::relay(&self.config.host)
            .map_err(|e| AuthError::EmailError(e.to_string()))?
            .credentials(creds)
            .port(self.config.port)
            .build();

        match mailer.send(&email) {
            Ok(_) => Ok(()),
            Err(e) => Err(AuthError::EmailError(e.to_string())),
        }
    }
}

/// Stand-in used when SMTP is disabled; delivery events are only logged.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_code(
        &self,
        to: &str,
        _username: &str,
        _code: &str,
        expires_minutes: i64,
    ) -> Result<(), AuthError> {
        log::info!(
            "SMTP disabled, skipping code delivery to {} (expires in {} minutes)",
            to,
            expires_minutes
        );
        Ok(())
    }
}

pub fn mailer_from_config(config: &SmtpConfig) -> std::sync::Arc<dyn Mailer> {
    if config.enabled {
        std::sync::Arc::new(SmtpMailer::new(config.clone()))
    } else {
        std::sync::Arc::new(LogMailer)
    }
}
