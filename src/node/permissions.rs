// Copyright 2025 Cowboy AI, LLC.

//! Graph-scoped permission rules for nodes

use uuid::Uuid;

use super::model::{Node, NodeAttributeValueId, NodeId};
use crate::storage::{GrantTable, Permission, PermissionEvaluator};
use crate::user::User;

// Grants are keyed by graph id; admins bypass them.
impl PermissionEvaluator<NodeId> for GrantTable<Uuid> {
    fn has_permission(&self, user: &User, node: &NodeId, permission: Permission) -> bool {
        user.is_app_admin()
            || self.any_granted(user.roles_in(&node.graph_id), &node.graph_id, permission)
    }
}

impl PermissionEvaluator<Node> for GrantTable<Uuid> {
    fn has_permission(&self, user: &User, node: &Node, permission: Permission) -> bool {
        PermissionEvaluator::<NodeId>::has_permission(self, user, &node.id, permission)
    }
}

impl PermissionEvaluator<NodeAttributeValueId> for GrantTable<Uuid> {
    fn has_permission(
        &self,
        user: &User,
        row: &NodeAttributeValueId,
        permission: Permission,
    ) -> bool {
        PermissionEvaluator::<NodeId>::has_permission(self, user, &row.node_id, permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::AppRole;

    #[test]
    fn test_roles_are_scoped_to_graph() {
        let graph = Uuid::new_v4();
        let other = Uuid::new_v4();
        let grants = GrantTable::new();
        grants.grant("reader", graph, Permission::Read).unwrap();

        let reader = User::new("bob", AppRole::User)
            .with_graph_role(graph, "reader")
            .with_graph_role(other, "editor");
        let in_graph = NodeId::random(graph, "Concept");
        let elsewhere = NodeId::random(other, "Concept");

        assert!(grants.has_permission(&reader, &in_graph, Permission::Read));
        assert!(!grants.has_permission(&reader, &in_graph, Permission::Update));
        assert!(!grants.has_permission(&reader, &elsewhere, Permission::Read));

        let row = NodeAttributeValueId::new(in_graph, "label", 0);
        assert!(grants.has_permission(&reader, &row, Permission::Read));

        let admin = User::new("root", AppRole::Admin);
        assert!(grants.has_permission(&admin, &elsewhere, Permission::Delete));
    }
}
