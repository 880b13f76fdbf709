use serde::{Deserialize, Serialize};

use crate::constants::DISPATCHER_ID_PREFIX;

/// The class a connected client belongs to.
///
/// Messages only ever travel between the two roles; roster updates only
/// ever go to dispatchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// Control-plane client: receives rosters and host-originated messages.
    Dispatcher,
    /// Editor-side client: receives dispatcher-originated messages.
    Host,
}

impl ClientRole {
    /// Derives a role from an id using the reserved dispatcher prefix.
    pub fn from_id(id: &str) -> Self {
        if id.starts_with(DISPATCHER_ID_PREFIX) {
            Self::Dispatcher
        } else {
            Self::Host
        }
    }

    /// Resolves the role of an announcing client. An explicit role always
    /// wins; otherwise the id prefix decides.
    pub fn resolve(id: &str, explicit: Option<ClientRole>) -> Self {
        explicit.unwrap_or_else(|| Self::from_id(id))
    }

    pub fn is_dispatcher(self) -> bool {
        self == Self::Dispatcher
    }

    /// The role on the receiving end of messages sent by `self`.
    pub fn peer(self) -> Self {
        match self {
            Self::Dispatcher => Self::Host,
            Self::Host => Self::Dispatcher,
        }
    }
}

impl std::fmt::Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dispatcher => f.write_str("dispatcher"),
            Self::Host => f.write_str("host"),
        }
    }
}

/// One roster entry as carried by `client_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub is_dispatcher: bool,
}

impl ClientInfo {
    pub fn new(id: impl Into<String>, role: ClientRole) -> Self {
        Self {
            id: id.into(),
            is_dispatcher: role.is_dispatcher(),
        }
    }

    pub fn role(&self) -> ClientRole {
        if self.is_dispatcher {
            ClientRole::Dispatcher
        } else {
            ClientRole::Host
        }
    }
}
