use std::fmt;

const GLOBAL: &str = "global";
const CLIENT_PREFIX: &str = "client";
const USER_PREFIX: &str = "user";

/// Broker channel an envelope is published to
///
/// The scope prefix keeps client and user ids in separate namespaces, so
/// `client:x` and `user:x` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelAddress {
    Global,
    Client(String),
    User(String),
}

impl ChannelAddress {
    pub fn global() -> Self {
        ChannelAddress::Global
    }

    pub fn for_client(client_id: impl Into<String>) -> Self {
        ChannelAddress::Client(client_id.into())
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        ChannelAddress::User(user_id.into())
    }

    /// Parses a broker channel name back into an address
    pub fn parse(channel: &str) -> Option<Self> {
        if channel == GLOBAL {
            return Some(ChannelAddress::Global);
        }

        match channel.split_once(':')? {
            (CLIENT_PREFIX, id) if !id.is_empty() => Some(ChannelAddress::Client(id.to_string())),
            (USER_PREFIX, id) if !id.is_empty() => Some(ChannelAddress::User(id.to_string())),
            _ => None,
        }
    }

    /// The broker channel name
    pub fn channel(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddress::Global => f.write_str(GLOBAL),
            ChannelAddress::Client(id) => write!(f, "{CLIENT_PREFIX}:{id}"),
            ChannelAddress::User(id) => write!(f, "{USER_PREFIX}:{id}"),
        }
    }
}
