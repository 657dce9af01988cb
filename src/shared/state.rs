use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::RateLimiter;
use std::sync::Arc;

use crate::billing::provider::PaymentClient;
use crate::calendar::CalendarProvider;
use crate::config::AppConfig;
use crate::llm::InferenceProvider;
use crate::messaging::channels::ChannelSenders;
use crate::shared::utils::DbPool;

/// Keyed sliding-window limiter for the public intake surface. In-process
/// only; a multi-instance deployment needs the counter moved to a shared
/// store.
pub type IntakeLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub senders: ChannelSenders,
    pub calendar: Arc<dyn CalendarProvider>,
    pub payments: Arc<PaymentClient>,
    pub llm: Arc<dyn InferenceProvider>,
    pub intake_limiter: Arc<IntakeLimiter>,
}
