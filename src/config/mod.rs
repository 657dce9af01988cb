use anyhow::Context;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub secrets: SecretsConfig,
    pub messaging: MessagingConfig,
    pub calendar: CalendarConfig,
    pub payments: PaymentConfig,
    pub inference: InferenceConfig,
    pub sweeps: SweepConfig,
    pub intake_rate_limit_per_minute: u32,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct SecretsConfig {
    pub intake_secret: String,
    pub cron_secret: String,
    pub webhook_secret: String,
}

#[derive(Clone)]
pub struct MessagingConfig {
    pub smtp_host: String,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
    pub gateway_url: String,
    pub gateway_token: String,
}

#[derive(Clone)]
pub struct CalendarConfig {
    pub base_url: String,
    pub api_token: String,
    pub calendar_id: String,
}

#[derive(Clone)]
pub struct PaymentConfig {
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Fraction of the opportunity value requested as deposit.
    pub deposit_fraction: f64,
}

#[derive(Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    /// Suggestions at or above this confidence are applied without
    /// waiting for owner disposition.
    pub auto_apply_threshold: f64,
}

#[derive(Clone)]
pub struct SweepConfig {
    pub message_cron: String,
    pub meeting_cron: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let server = ServerConfig {
            host: env_or("SERVER_HOST", "127.0.0.1"),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        };

        let secrets = SecretsConfig {
            intake_secret: std::env::var("INTAKE_SECRET")
                .context("INTAKE_SECRET must be set")?,
            cron_secret: std::env::var("CRON_SECRET").context("CRON_SECRET must be set")?,
            webhook_secret: std::env::var("SWEEP_WEBHOOK_SECRET")
                .context("SWEEP_WEBHOOK_SECRET must be set")?,
        };

        let messaging = MessagingConfig {
            smtp_host: env_or("SMTP_HOST", "localhost"),
            smtp_username: env_or("SMTP_USERNAME", ""),
            smtp_password: env_or("SMTP_PASSWORD", ""),
            from_address: env_or("MAIL_FROM", "noreply@localhost"),
            gateway_url: env_or("MESSAGE_GATEWAY_URL", "http://localhost:9030"),
            gateway_token: env_or("MESSAGE_GATEWAY_TOKEN", ""),
        };

        let calendar = CalendarConfig {
            base_url: env_or("CALENDAR_URL", "http://localhost:9040"),
            api_token: env_or("CALENDAR_TOKEN", ""),
            calendar_id: env_or("CALENDAR_ID", "primary"),
        };

        let payments = PaymentConfig {
            base_url: env_or("PAYMENT_API_URL", "https://api.stripe.com/v1"),
            api_key: env_or("PAYMENT_API_KEY", ""),
            webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET")
                .context("PAYMENT_WEBHOOK_SECRET must be set")?,
            success_url: env_or("PAYMENT_SUCCESS_URL", "http://localhost:8080/pay/done"),
            cancel_url: env_or("PAYMENT_CANCEL_URL", "http://localhost:8080/pay/cancelled"),
            deposit_fraction: std::env::var("DEPOSIT_FRACTION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.25),
        };

        let inference = InferenceConfig {
            base_url: env_or("LLM_URL", "http://localhost:8081"),
            api_key: env_or("LLM_API_KEY", "empty"),
            model: env_or("LLM_MODEL", "gpt-4o-mini"),
            max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            auto_apply_threshold: std::env::var("AI_AUTO_APPLY_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.9),
        };

        let sweeps = SweepConfig {
            message_cron: env_or("MESSAGE_SWEEP_CRON", "0 * * * * *"),
            meeting_cron: env_or("MEETING_SWEEP_CRON", "0 */5 * * * *"),
        };

        Ok(AppConfig {
            server,
            database_url,
            secrets,
            messaging,
            calendar,
            payments,
            inference,
            sweeps,
            intake_rate_limit_per_minute: std::env::var("INTAKE_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        })
    }
}
