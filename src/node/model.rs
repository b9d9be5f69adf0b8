// Copyright 2025 Cowboy AI, LLC.

//! Node aggregate and its attribute-value rows

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::storage::{SortValue, Sortable};

/// Identity of a node within a graph and type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Owning graph
    pub graph_id: Uuid,
    /// Node type within the graph
    pub type_id: String,
    /// Node identifier
    pub id: Uuid,
}

impl NodeId {
    /// Create a node id
    pub fn new(graph_id: Uuid, type_id: impl Into<String>, id: Uuid) -> Self {
        Self {
            graph_id,
            type_id: type_id.into(),
            id,
        }
    }

    /// Node id with a fresh random identifier
    pub fn random(graph_id: Uuid, type_id: impl Into<String>) -> Self {
        Self::new(graph_id, type_id, Uuid::new_v4())
    }

    /// Name of the numbering sequence for nodes of this graph and type
    pub fn sequence_name(&self) -> String {
        format!("{}.{}", self.graph_id, self.type_id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.graph_id, self.type_id, self.id)
    }
}

impl Sortable for NodeId {
    fn sort_value(&self, field: &str) -> Option<SortValue> {
        match field {
            "id" => Some(SortValue::Text(self.id.to_string())),
            "graph.id" => Some(SortValue::Text(self.graph_id.to_string())),
            "type.id" => Some(SortValue::Text(self.type_id.clone())),
            _ => None,
        }
    }
}

/// Text value tagged with a language
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LangValue {
    /// Language tag, empty when unspecified
    pub lang: String,
    /// Text
    pub value: String,
}

impl LangValue {
    /// Create a value
    pub fn new(lang: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            value: value.into(),
        }
    }
}

impl Sortable for LangValue {
    fn sort_value(&self, field: &str) -> Option<SortValue> {
        match field {
            "lang" => Some(SortValue::Text(self.lang.clone())),
            "value" => Some(SortValue::Text(self.value.clone())),
            _ => None,
        }
    }
}

/// Key of one attribute-value row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAttributeValueId {
    /// Owning node
    pub node_id: NodeId,
    /// Attribute name
    pub attribute_id: String,
    /// Position within the attribute's values
    pub index: usize,
}

impl NodeAttributeValueId {
    /// Create a row key
    pub fn new(node_id: NodeId, attribute_id: impl Into<String>, index: usize) -> Self {
        Self {
            node_id,
            attribute_id: attribute_id.into(),
            index,
        }
    }
}

/// Node aggregate
///
/// Stored as a row without `properties` and `references`; those live in the
/// attribute-value ports and are joined back in by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Identity
    pub id: NodeId,
    /// Human readable code
    pub code: Option<String>,
    /// External URI
    pub uri: Option<String>,
    /// Sequence number within graph and type
    pub number: Option<i64>,
    /// Creator
    pub created_by: Option<String>,
    /// Creation time
    pub created_date: Option<DateTime<Utc>>,
    /// Last modifier
    pub last_modified_by: Option<String>,
    /// Last modification time
    pub last_modified_date: Option<DateTime<Utc>>,
    /// Text attributes
    pub properties: IndexMap<String, Vec<LangValue>>,
    /// Reference attributes
    pub references: IndexMap<String, Vec<NodeId>>,
}

impl Node {
    /// Empty node
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            code: None,
            uri: None,
            number: None,
            created_by: None,
            created_date: None,
            last_modified_by: None,
            last_modified_date: None,
            properties: IndexMap::new(),
            references: IndexMap::new(),
        }
    }

    /// Set the code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the URI
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the number
    pub fn with_number(mut self, number: i64) -> Self {
        self.number = Some(number);
        self
    }

    /// Append a text value
    pub fn with_property(
        mut self,
        attribute: impl Into<String>,
        lang: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties
            .entry(attribute.into())
            .or_default()
            .push(LangValue::new(lang, value));
        self
    }

    /// Append a reference
    pub fn with_reference(mut self, attribute: impl Into<String>, target: NodeId) -> Self {
        self.references
            .entry(attribute.into())
            .or_default()
            .push(target);
        self
    }

    /// Values of a text attribute
    pub fn property(&self, attribute: &str) -> &[LangValue] {
        self.properties.get(attribute).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Targets of a reference attribute
    pub fn reference(&self, attribute: &str) -> &[NodeId] {
        self.references.get(attribute).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn row(&self) -> Node {
        Node {
            properties: IndexMap::new(),
            references: IndexMap::new(),
            ..self.clone()
        }
    }

    /// Same row content ignoring audit fields
    pub(crate) fn same_row_content(&self, other: &Node) -> bool {
        self.id == other.id
            && self.code == other.code
            && self.uri == other.uri
            && self.number == other.number
    }
}

impl Sortable for Node {
    fn sort_value(&self, field: &str) -> Option<SortValue> {
        match field {
            "code" => self.code.clone().map(SortValue::Text),
            "uri" => self.uri.clone().map(SortValue::Text),
            "number" => self.number.map(SortValue::Integer),
            "createdDate" => self.created_date.map(SortValue::Timestamp),
            "lastModifiedDate" => self.last_modified_date.map(SortValue::Timestamp),
            "id" | "graph.id" | "type.id" => self.id.sort_value(field),
            _ => {
                let attribute = field.strip_prefix("properties.")?;
                self.property(attribute)
                    .first()
                    .map(|v| SortValue::Text(v.value.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_strips_attributes() {
        let target = NodeId::random(Uuid::new_v4(), "Concept");
        let node = Node::new(NodeId::random(Uuid::new_v4(), "Concept"))
            .with_code("cat")
            .with_property("label", "en", "Cat")
            .with_reference("broader", target.clone());

        let row = node.row();
        assert!(row.properties.is_empty());
        assert!(row.references.is_empty());
        assert!(row.same_row_content(&node));
        assert_eq!(node.reference("broader"), &[target]);
        assert!(node.property("missing").is_empty());
    }

    #[test]
    fn test_sort_values() {
        let node = Node::new(NodeId::random(Uuid::new_v4(), "Concept"))
            .with_number(4)
            .with_property("label", "en", "Dog");

        assert_eq!(node.sort_value("number"), Some(SortValue::Integer(4)));
        assert_eq!(
            node.sort_value("properties.label"),
            Some(SortValue::Text("Dog".into()))
        );
        assert_eq!(
            node.sort_value("type.id"),
            Some(SortValue::Text("Concept".into()))
        );
        assert_eq!(node.sort_value("code"), None);
    }

    #[test]
    fn test_sequence_name() {
        let graph = Uuid::nil();
        let id = NodeId::random(graph, "Concept");
        assert_eq!(
            id.sequence_name(),
            "00000000-0000-0000-0000-000000000000.Concept"
        );
    }
}
