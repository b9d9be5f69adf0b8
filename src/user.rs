// Copyright 2025 Cowboy AI, LLC.

//! Caller identity threaded through every storage call

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Application-wide role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AppRole {
    /// Regular user, permissions come from graph roles
    User,
    /// Administrator of the application
    Admin,
    /// Unrestricted system account
    Superuser,
}

/// Role held by a user within a single graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphRole {
    /// Graph the role applies to
    pub graph_id: Uuid,
    /// Role name, e.g. `reader` or `editor`
    pub role: String,
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Login name
    pub username: String,
    /// Application role
    pub app_role: AppRole,
    /// Per-graph roles
    pub graph_roles: Vec<GraphRole>,
}

impl User {
    /// Create a user without graph roles
    pub fn new(username: impl Into<String>, app_role: AppRole) -> Self {
        Self {
            username: username.into(),
            app_role,
            graph_roles: Vec::new(),
        }
    }

    /// System account used by internal maintenance tasks
    pub fn superuser(username: impl Into<String>) -> Self {
        Self::new(username, AppRole::Superuser)
    }

    /// Add a graph role
    pub fn with_graph_role(mut self, graph_id: Uuid, role: impl Into<String>) -> Self {
        self.graph_roles.push(GraphRole {
            graph_id,
            role: role.into(),
        });
        self
    }

    /// Admin or superuser
    pub fn is_app_admin(&self) -> bool {
        matches!(self.app_role, AppRole::Admin | AppRole::Superuser)
    }

    /// Names of the roles this user holds in a graph
    pub fn roles_in(&self, graph_id: &Uuid) -> impl Iterator<Item = &str> + '_ {
        let graph_id = *graph_id;
        self.graph_roles
            .iter()
            .filter(move |r| r.graph_id == graph_id)
            .map(|r| r.role.as_str())
    }
}
