//! Chat room over rabbitcast.
//!
//! Start a few copies against the same broker; every line typed into one is
//! printed by all of them.
//!
//! ```text
//! RABBITCAST_HOST=localhost cargo run --example chat_room -- alice
//! ```

use std::sync::Arc;

use anyhow::Result;
use rabbitcast::{ConnectionConfig, Credentials, Scope, Transport};
use rabbitcast_macros::remote_impl;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Serialize, Deserialize)]
pub struct Line {
    pub author: String,
    pub text: String,
}

pub struct Room {
    nick: String,
}

#[remote_impl]
impl Room {
    #[remote("chat.say")]
    pub async fn say(&self, line: Line) {
        if line.author != self.nick {
            println!("<{}> {}", line.author, line.text);
        }
    }

    #[remote("chat.presence")]
    pub fn joined(nick: String, online: bool) {
        let verb = if online { "joined" } else { "left" };
        println!("* {nick} {verb}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_room=info,rabbitcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let nick = std::env::args().nth(1).unwrap_or_else(|| "anonymous".to_string());
    let config = ConnectionConfig::new(Credentials::from_env()?);
    let transport = Transport::initialize(config, &Scope::Module(module_path!().to_string())).await?;

    transport.listen(Arc::new(Room { nick: nick.clone() })).await?;
    let room = RoomRemote::new(transport.clone());
    room.joined(nick.clone(), true).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(text) = lines.next_line().await? {
        let line = Line {
            author: nick.clone(),
            text,
        };
        if let Err(e) = room.say(line).await {
            tracing::warn!("Message not sent: {}", e);
        }
    }

    room.joined(nick, false).await?;
    transport.close().await;
    Ok(())
}
