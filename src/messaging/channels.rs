use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::MessagingConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
            Self::Whatsapp => write!(f, "whatsapp"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "email" | "mail" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "whatsapp" | "wa" => Ok(Self::Whatsapp),
            other => Err(ChannelError::UnknownChannel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub external_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Channel not configured")]
    NotConfigured,
}

/// One outbound capability per channel: hand it a resolved recipient and a
/// rendered body, get back the provider's message id. Vendor specifics
/// stay behind this seam.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;
    async fn send(
        &self,
        to: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<SendOutcome, ChannelError>;
}

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(cfg: &MessagingConfig) -> Result<Self, ChannelError> {
        let from: Mailbox = cfg
            .from_address
            .parse()
            .map_err(|_| ChannelError::InvalidRecipient(cfg.from_address.clone()))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
            .map_err(|e| ChannelError::Transport(e.to_string()))?
            .credentials(Credentials::new(
                cfg.smtp_username.clone(),
                cfg.smtp_password.clone(),
            ))
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl ChannelSender for SmtpEmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        to: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<SendOutcome, ChannelError> {
        let to: Mailbox = to
            .parse()
            .map_err(|_| ChannelError::InvalidRecipient(to.to_string()))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject.unwrap_or("Update on your project"))
            .body(body.to_string())
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(SendOutcome { external_id: None })
    }
}

/// SMS and WhatsApp go out through an HTTP messaging gateway; the gateway
/// owns the vendor session and returns its message id.
pub struct GatewaySender {
    channel: Channel,
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GatewaySender {
    pub fn new(channel: Channel, cfg: &MessagingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            channel,
            client,
            base_url: cfg.gateway_url.clone(),
            token: cfg.gateway_token.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GatewayReply {
    message_id: Option<String>,
}

#[async_trait]
impl ChannelSender for GatewaySender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        to: &str,
        _subject: Option<&str>,
        body: &str,
    ) -> Result<SendOutcome, ChannelError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "channel": self.channel.to_string(),
                "to": to,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "gateway returned HTTP {}",
                response.status()
            )));
        }
        let reply: GatewayReply = response
            .json()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(SendOutcome {
            external_id: reply.message_id,
        })
    }
}

#[derive(Clone, Default)]
pub struct ChannelSenders {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelSenders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn get(&self, channel: Channel) -> Result<Arc<dyn ChannelSender>, ChannelError> {
        self.senders
            .get(&channel)
            .cloned()
            .ok_or(ChannelError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn channel_parse_aliases() {
        assert_eq!(Channel::from_str("email").unwrap(), Channel::Email);
        assert_eq!(Channel::from_str("WA").unwrap(), Channel::Whatsapp);
        assert_eq!(Channel::from_str("sms").unwrap(), Channel::Sms);
        assert!(Channel::from_str("fax").is_err());
    }

    #[test]
    fn display_roundtrip() {
        for channel in [Channel::Email, Channel::Sms, Channel::Whatsapp] {
            assert_eq!(Channel::from_str(&channel.to_string()).unwrap(), channel);
        }
    }

    #[test]
    fn missing_sender_is_not_configured() {
        let senders = ChannelSenders::new();
        assert!(matches!(
            senders.get(Channel::Email),
            Err(ChannelError::NotConfigured)
        ));
    }
}
