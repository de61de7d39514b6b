use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use dotenv::dotenv;
use log::{error, info};

use rba_auth::config::Config;
use rba_auth::db::init_db;
use rba_auth::geo::{GeoResolver, StaticGeoResolver};
use rba_auth::risk::{IsolationScorer, RiskCombiner, TierThresholds};
use rba_auth::routes;
use rba_auth::services::auth::AuthCoordinator;
use rba_auth::services::cleanup::CleanupWorker;
use rba_auth::services::email::mailer_from_config;
use rba_auth::services::otp::OtpService;

/// Period of the expired-code sweep.
const CLEANUP_PERIOD: Duration = Duration::from_secs(5 * 60);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db = match init_db(&config) {
        Ok(db) => db,
        Err(e) => {
            error!("Database unreachable at startup: {}", e);
            std::process::exit(2);
        }
    };

    let scorer = Arc::new(IsolationScorer::from_config(&config.risk));
    let thresholds = scorer.thresholds().unwrap_or(TierThresholds {
        lower: config.risk.lower_threshold,
        upper: config.risk.upper_threshold,
    });
    let combiner = RiskCombiner::new(&config.risk, thresholds);

    let mailer = mailer_from_config(&config.smtp);
    let geo: Arc<dyn GeoResolver> = Arc::new(StaticGeoResolver::from_config(&config.pairwise));
    let otp = match OtpService::new(&config.otp, db.clone(), mailer) {
        Ok(otp) => Arc::new(otp),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let coordinator = web::Data::new(AuthCoordinator::new(
        db,
        scorer,
        combiner,
        otp.clone(),
        geo,
        config.pairwise.clone(),
        config.session.ttl_minutes,
    ));

    CleanupWorker::new(otp, CLEANUP_PERIOD).spawn();

    let bind_addr = (config.server.host.clone(), config.server.port);
    info!(
        "Starting risk-based auth server at {}:{}",
        bind_addr.0, bind_addr.1
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin("http://localhost:3000")
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(coordinator.clone())
            .wrap(actix_middleware::Logger::default())
            .wrap(cors)
            .configure(routes::configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}
