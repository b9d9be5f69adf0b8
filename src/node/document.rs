// Copyright 2025 Cowboy AI, LLC.

//! Search document projection of a node

use chrono::{DateTime, Utc};

use super::model::Node;
use crate::specification::SearchDocument;

/// Fixed-width timestamp layout; lexical order equals chronological order
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

/// Render a timestamp the way it is indexed
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Index a populated node
///
/// Text values are indexed under `properties.A` and under
/// `properties.A.LANG`; references under `references.A.id`.
pub fn node_document(node: &Node) -> SearchDocument {
    let mut doc = SearchDocument::new();
    doc.add("id", node.id.id.to_string())
        .add("graph.id", node.id.graph_id.to_string())
        .add("type.id", node.id.type_id.as_str());

    if let Some(code) = &node.code {
        doc.add("code", code.as_str());
    }
    if let Some(uri) = &node.uri {
        doc.add("uri", uri.as_str());
    }
    if let Some(number) = node.number {
        doc.add("number", number.to_string());
    }
    if let Some(created) = &node.created_date {
        doc.add("createdDate", format_timestamp(created));
    }
    if let Some(modified) = &node.last_modified_date {
        doc.add("lastModifiedDate", format_timestamp(modified));
    }

    for (attribute, values) in &node.properties {
        for value in values {
            doc.add(format!("properties.{attribute}"), value.value.as_str());
            doc.add(
                format!("properties.{attribute}.{}", value.lang),
                value.value.as_str(),
            );
        }
    }
    for (attribute, targets) in &node.references {
        for target in targets {
            doc.add(format!("references.{attribute}.id"), target.id.to_string());
        }
    }
    doc
}
