//! Discord implementation of the [`Bridge`] handle.
//!
//! Inbound events arrive through the serenity gateway client; outbound
//! sends, edits and deletes go through its HTTP client. Serenity resumes
//! dropped gateway sessions on its own, so the link is only reported closed
//! once the client stops for good.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::all::{
    ChannelId, Client, CreateMessage, EditMessage, GatewayIntents, Http, MessageId, ShardManager,
};
use serenity::http::HttpError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bridge::{link, Bridge, EventSink, LinkClosed};
use crate::common::{Account, BridgeError, BridgeResult, OutboundMessage};
use crate::router::formatter::clamp_message;

use super::handler::{ReadySignal, RelayHandler};

/// Discord rejects messages longer than this many characters.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// A live gateway session.
struct Session {
    http: Arc<Http>,
    shard_manager: Arc<ShardManager>,
    task: JoinHandle<()>,
}

pub struct DiscordBridge {
    account: Account,
    token: String,
    self_id: Arc<Mutex<Option<String>>>,
    session: Mutex<Option<Session>>,
}

impl DiscordBridge {
    pub fn new(account: Account, token: &str) -> Self {
        Self {
            account,
            token: token.to_string(),
            self_id: Arc::new(Mutex::new(None)),
            session: Mutex::new(None),
        }
    }

    fn http(&self) -> BridgeResult<Arc<Http>> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.http.clone())
            .ok_or_else(|| BridgeError::NotConnected {
                account: self.account.to_string(),
            })
    }

    fn connect_failed(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::ConnectFailed {
            account: self.account.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Bridge for DiscordBridge {
    fn account(&self) -> &Account {
        &self.account
    }

    fn self_id(&self) -> Option<String> {
        self.self_id.lock().clone()
    }

    async fn connect(&self, events: EventSink) -> BridgeResult<LinkClosed> {
        // A previous session may still be winding down
        self.disconnect().await?;

        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILDS;

        let (ready_tx, ready_rx) = oneshot::channel();
        let ready: ReadySignal = Arc::new(Mutex::new(Some(ready_tx)));
        let handler = RelayHandler {
            account: self.account.clone(),
            events,
            self_id: self.self_id.clone(),
            ready: ready.clone(),
        };

        let mut client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
            .map_err(|e| self.connect_failed(e.to_string()))?;

        let http = client.http.clone();
        let shard_manager = client.shard_manager.clone();
        let (closer, closed) = link();
        let account = self.account.clone();

        let task = tokio::spawn(async move {
            let reason = match client.start().await {
                Ok(()) => None,
                Err(e) => {
                    error!("{} Discord client stopped: {}", account, e);
                    Some(e.to_string())
                }
            };
            if let Some(tx) = ready.lock().take() {
                let _ = tx.send(Err(reason
                    .clone()
                    .unwrap_or_else(|| "client stopped before ready".to_string())));
            }
            closer.close(reason);
        });

        let outcome = tokio::time::timeout(READY_TIMEOUT, ready_rx).await;
        let failure = match outcome {
            Ok(Ok(Ok(_))) => None,
            Ok(Ok(Err(reason))) => Some(reason),
            Ok(Err(_)) => Some("client task ended".to_string()),
            Err(_) => Some(format!("not ready after {:?}", READY_TIMEOUT)),
        };
        if let Some(reason) = failure {
            shard_manager.shutdown_all().await;
            task.abort();
            return Err(self.connect_failed(reason));
        }

        *self.session.lock() = Some(Session {
            http,
            shard_manager,
            task,
        });
        Ok(closed)
    }

    async fn disconnect(&self) -> BridgeResult<()> {
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };

        info!("Shutting down Discord session for {}", self.account);
        session.shard_manager.shutdown_all().await;
        if tokio::time::timeout(Duration::from_secs(5), session.task)
            .await
            .is_err()
        {
            warn!("{} Discord client did not stop in time", self.account);
        }
        Ok(())
    }

    async fn send(&self, channel: &str, message: &OutboundMessage) -> BridgeResult<String> {
        let http = self.http()?;
        let channel_id = parse_channel(channel)?;
        let content = clamp_message(&message.rendered(), MAX_MESSAGE_LENGTH);

        let sent = channel_id
            .send_message(&*http, CreateMessage::new().content(content))
            .await
            .map_err(classify)?;
        Ok(sent.id.to_string())
    }

    async fn edit(
        &self,
        channel: &str,
        message_id: &str,
        message: &OutboundMessage,
    ) -> BridgeResult<()> {
        let http = self.http()?;
        let channel_id = parse_channel(channel)?;
        let message_id = parse_message(message_id)?;
        let content = clamp_message(&message.rendered(), MAX_MESSAGE_LENGTH);

        channel_id
            .edit_message(&*http, message_id, EditMessage::new().content(content))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete(&self, channel: &str, message_id: &str) -> BridgeResult<()> {
        let http = self.http()?;
        let channel_id = parse_channel(channel)?;
        let message_id = parse_message(message_id)?;

        channel_id
            .delete_message(&*http, message_id)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn parse_snowflake(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|id| *id != 0)
}

fn parse_channel(channel: &str) -> BridgeResult<ChannelId> {
    parse_snowflake(channel)
        .map(ChannelId::new)
        .ok_or_else(|| BridgeError::InvalidChannel {
            channel: channel.to_string(),
            message: "expected a numeric Discord channel ID".to_string(),
        })
}

fn parse_message(message_id: &str) -> BridgeResult<MessageId> {
    parse_snowflake(message_id)
        .map(MessageId::new)
        .ok_or_else(|| BridgeError::DeliveryFailed {
            message: format!("invalid Discord message ID '{}'", message_id),
        })
}

/// Separate rate limiting from the rest so the send path can retry it.
fn classify(error: serenity::Error) -> BridgeError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &error {
        if response.status_code.as_u16() == 429 {
            return BridgeError::RateLimited;
        }
    }
    BridgeError::from(error)
}
