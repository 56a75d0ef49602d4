// Session types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Role of the authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    ScrumMaster,
    ProductOwner,
    Member,
    Guest,
    /// Role name this client does not know about, kept verbatim
    Unknown(String),
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "ADMIN",
            Role::ScrumMaster => "SCRUM_MASTER",
            Role::ProductOwner => "PRODUCT_OWNER",
            Role::Member => "MEMBER",
            Role::Guest => "GUEST",
            Role::Unknown(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        match name.as_str() {
            "ADMIN" => Role::Admin,
            "SCRUM_MASTER" => Role::ScrumMaster,
            "PRODUCT_OWNER" => Role::ProductOwner,
            "MEMBER" => Role::Member,
            "GUEST" => Role::Guest,
            _ => Role::Unknown(name),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated principal as returned by the identity endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub role: Role,

    /// Every other field of the record, untouched
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Identity {
    pub fn has_role(&self, role: &Role) -> bool {
        &self.role == role
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Look up an attribute that is not part of the typed fields
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// What is known about the current identity
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No identity fetch has completed yet
    Unknown,
    /// The server reported no identity, or rejected the credentials
    Unauthenticated,
    Authenticated(Identity),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    /// False only while nothing has been resolved
    pub fn is_known(&self) -> bool {
        !matches!(self, SessionState::Unknown)
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}
