//! Principals, privileges and the per-connection authorization session.
//!
//! Authorization here is a total predicate: given a resource and an action,
//! the session either holds a matching privilege or it does not.

pub mod scram;

use crate::config::{AuthConfig, PrivilegeConfig};
use crate::error::{Error, Result};
use crate::namespace::NamespaceString;
use scram::ScramCredentials;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Find,
    ListIndexes,
    CreateCollection,
    CreateIndex,
    KillCursors,
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "find" => Ok(ActionType::Find),
            "listIndexes" => Ok(ActionType::ListIndexes),
            "createCollection" => Ok(ActionType::CreateCollection),
            "createIndex" => Ok(ActionType::CreateIndex),
            "killCursors" => Ok(ActionType::KillCursors),
            other => Err(Error::BadValue(format!("Unrecognized action privilege string: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourcePattern {
    ExactNamespace(NamespaceString),
    Database(String),
    AnyNormalResource,
}

impl ResourcePattern {
    pub fn for_exact_namespace(ns: &NamespaceString) -> Self {
        ResourcePattern::ExactNamespace(ns.clone())
    }

    /// Whether a privilege granted on `self` covers `target`. System
    /// collections are only reachable through an exact-namespace grant.
    pub fn covers(&self, target: &ResourcePattern) -> bool {
        match (self, target) {
            (ResourcePattern::ExactNamespace(a), ResourcePattern::ExactNamespace(b)) => a == b,
            (ResourcePattern::Database(db), ResourcePattern::ExactNamespace(ns)) => {
                db == ns.db() && !ns.is_system()
            }
            (ResourcePattern::Database(a), ResourcePattern::Database(b)) => a == b,
            (ResourcePattern::AnyNormalResource, ResourcePattern::ExactNamespace(ns)) => !ns.is_system(),
            (ResourcePattern::AnyNormalResource, ResourcePattern::Database(_)) => true,
            (ResourcePattern::AnyNormalResource, ResourcePattern::AnyNormalResource) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Privilege {
    pub resource: ResourcePattern,
    pub actions: HashSet<ActionType>,
}

impl Privilege {
    pub fn new(resource: ResourcePattern, actions: impl IntoIterator<Item = ActionType>) -> Self {
        Self {
            resource,
            actions: actions.into_iter().collect(),
        }
    }

    fn from_config(cfg: &PrivilegeConfig) -> Result<Self> {
        let resource = match (&cfg.db, &cfg.collection) {
            (Some(db), Some(coll)) => ResourcePattern::ExactNamespace(NamespaceString::new(db.clone(), coll.clone())),
            (Some(db), None) => ResourcePattern::Database(db.clone()),
            (None, None) => ResourcePattern::AnyNormalResource,
            (None, Some(coll)) => {
                return Err(Error::BadValue(format!("privilege on collection '{}' is missing a db", coll)));
            }
        };
        let actions = cfg
            .actions
            .iter()
            .map(|a| a.parse::<ActionType>())
            .collect::<Result<HashSet<_>>>()?;
        Ok(Self { resource, actions })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserName {
    pub user: String,
    pub db: String,
}

impl UserName {
    pub fn new(user: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            db: db.into(),
        }
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.db)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub name: UserName,
    pub privileges: Vec<Privilege>,
    pub credentials: ScramCredentials,
}

/// Configured users, keyed by (user, authentication db).
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: HashMap<UserName, User>,
}

impl UserRegistry {
    pub fn from_config(cfg: &AuthConfig) -> Result<Self> {
        let mut users = HashMap::with_capacity(cfg.users.len());
        for u in &cfg.users {
            let name = UserName::new(u.user.clone(), u.db.clone());
            let privileges = u
                .privileges
                .iter()
                .map(Privilege::from_config)
                .collect::<Result<Vec<_>>>()?;
            let credentials = ScramCredentials::derive(&u.password, cfg.scram_iterations)?;
            users.insert(name.clone(), User { name, privileges, credentials });
        }
        Ok(Self { users })
    }

    pub fn insert(&mut self, user: User) {
        self.users.insert(user.name.clone(), user);
    }

    pub fn get(&self, name: &UserName) -> Option<&User> {
        self.users.get(name)
    }
}

#[derive(Debug, Clone)]
enum AuthMode {
    /// Access control is off; every check passes.
    Disabled,
    Enforced,
}

/// Per-client view of who is logged in and what they may do.
#[derive(Debug, Clone)]
pub struct AuthorizationSession {
    mode: AuthMode,
    users: Vec<(UserName, Vec<Privilege>)>,
}

impl AuthorizationSession {
    pub fn unrestricted() -> Self {
        Self {
            mode: AuthMode::Disabled,
            users: Vec::new(),
        }
    }

    pub fn enforced() -> Self {
        Self {
            mode: AuthMode::Enforced,
            users: Vec::new(),
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self.mode, AuthMode::Enforced)
    }

    /// Log `user` in, replacing any earlier login for the same name.
    pub fn add_authenticated_user(&mut self, name: UserName, privileges: Vec<Privilege>) {
        self.users.retain(|(n, _)| n != &name);
        self.users.push((name, privileges));
    }

    pub fn is_authenticated(&self) -> bool {
        !self.users.is_empty()
    }

    pub fn authenticated_user_names(&self) -> Vec<UserName> {
        self.users.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn is_authorized_for_actions_on_resource(&self, resource: &ResourcePattern, action: ActionType) -> bool {
        match self.mode {
            AuthMode::Disabled => true,
            AuthMode::Enforced => self.users.iter().flat_map(|(_, p)| p).any(|p| {
                p.actions.contains(&action) && p.resource.covers(resource)
            }),
        }
    }

    /// True when this session may touch state created by `owners`: either no
    /// one was logged in on either side, or at least one user is shared.
    pub fn is_coauthorized_with(&self, owners: &[UserName]) -> bool {
        if !self.is_enforced() {
            return true;
        }
        let mine = self.authenticated_user_names();
        if mine.is_empty() && owners.is_empty() {
            return true;
        }
        mine.iter().any(|n| owners.contains(n))
    }
}
