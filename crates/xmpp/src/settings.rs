use std::time::Duration;

use board_core::config::{Config, RoomConfig};
use xmpp_parsers::{date::DateTime, muc::muc::History};

use crate::messaging::JoinOptions;

/// Values the session manager needs from [`Config`], resolved once.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Base64 server address used by `initialize_configured`.
    pub server_address: Option<String>,
    pub domain: String,
    pub muc_domain: String,
    pub resource: Option<String>,
    pub room_name: String,
    pub room_password: Option<String>,
    /// Fixed nickname; a random one is drawn per connect when unset.
    pub nickname: Option<String>,
    pub history: Option<History>,
    pub liveness_target: String,
    pub liveness_period: Duration,
    pub liveness_timeout: Duration,
    pub reconnect_step: Duration,
    pub reconnect_ceiling: Duration,
    pub query_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            server_address: config.server.address.clone(),
            domain: config.server.domain.clone(),
            muc_domain: config.server.muc_domain.clone(),
            resource: config.server.resource.clone(),
            room_name: config.room.name.clone(),
            room_password: config.room.password.clone().filter(|p| !p.is_empty()),
            nickname: config.room.nickname.clone(),
            history: history_filter(&config.room),
            liveness_target: config
                .liveness
                .target
                .clone()
                .unwrap_or_else(|| config.server.domain.clone()),
            liveness_period: config.liveness.period(),
            liveness_timeout: config.liveness.timeout(),
            reconnect_step: config.reconnect.step(),
            reconnect_ceiling: config.reconnect.ceiling(),
            query_timeout: config.server.query_timeout(),
        }
    }

    /// Bare room address, `name@muc_domain`.
    pub fn room_address(&self) -> String {
        format!("{}@{}", self.room_name, self.muc_domain)
    }

    pub fn join_options(&self) -> JoinOptions {
        JoinOptions {
            password: self.room_password.clone(),
            history: self.history.clone(),
        }
    }
}

/// `None` when no history attribute is configured, so the join carries no
/// `<history/>` element at all.
fn history_filter(room: &RoomConfig) -> Option<History> {
    let history = History {
        maxchars: room.history_max_chars,
        maxstanzas: room.history_max_stanzas,
        seconds: room.history_seconds,
        since: room.history_since.map(DateTime),
    };
    (history != History::default()).then_some(history)
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
