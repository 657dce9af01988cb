pub mod api_router;
pub mod automation;
pub mod billing;
pub mod calendar;
pub mod config;
pub mod intake;
pub mod llm;
pub mod meetings;
pub mod messaging;
pub mod pipeline;
pub mod shared;
