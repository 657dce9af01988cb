use dotenvy::dotenv;
use governor::Quota;
use governor::RateLimiter;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use crmserver::api_router::configure_api_routes;
use crmserver::automation::SweepService;
use crmserver::billing::provider::PaymentClient;
use crmserver::calendar::HttpCalendarClient;
use crmserver::config::AppConfig;
use crmserver::llm::OpenAiClient;
use crmserver::messaging::channels::{
    Channel, ChannelSenders, GatewaySender, SmtpEmailSender,
};
use crmserver::shared::state::AppState;
use crmserver::shared::utils::create_conn;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = AppConfig::from_env().expect("Failed to load config from env");

    let pool = match create_conn() {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to create database pool: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("Database pool creation failed: {}", e),
            ));
        }
    };

    let mut senders = ChannelSenders::new();
    match SmtpEmailSender::new(&config.messaging) {
        Ok(sender) => senders.register(Arc::new(sender)),
        Err(e) => warn!("email channel not configured: {}", e),
    }
    senders.register(Arc::new(GatewaySender::new(Channel::Sms, &config.messaging)));
    senders.register(Arc::new(GatewaySender::new(
        Channel::Whatsapp,
        &config.messaging,
    )));

    let quota_per_minute = NonZeroU32::new(config.intake_rate_limit_per_minute.max(1))
        .expect("intake rate limit is non-zero");
    let intake_limiter = Arc::new(RateLimiter::keyed(Quota::per_minute(quota_per_minute)));

    let state = Arc::new(AppState {
        conn: pool,
        senders,
        calendar: Arc::new(HttpCalendarClient::new(&config.calendar)),
        payments: Arc::new(PaymentClient::new(&config.payments)),
        llm: Arc::new(OpenAiClient::new(&config.inference)),
        intake_limiter,
        config: config.clone(),
    });

    SweepService::new(state.clone()).spawn();

    let app = configure_api_routes().with_state(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
