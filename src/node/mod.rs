// Copyright 2025 Cowboy AI, LLC.

//! # Nodes
//!
//! Graph nodes carrying language-tagged text properties and references to
//! other nodes. A node is stored as one row plus one row per attribute value,
//! each in its own storage port.
//!
//! ## Field paths
//!
//! | Path | Criterion |
//! |------|-----------|
//! | `id`, `urn:uuid:ID` | [`NodeCriterion::ById`] |
//! | `graph.id`, `graphId` | [`NodeCriterion::ByGraphId`] |
//! | `type.id`, `typeId` | [`NodeCriterion::ByTypeId`] |
//! | `code`, `code:x*` | [`NodeCriterion::ByCode`], [`NodeCriterion::ByCodePrefix`] |
//! | `uri` | [`NodeCriterion::ByUri`] |
//! | `number`, `n` | [`NodeCriterion::ByNumber`] |
//! | `createdDate`, `lastModifiedDate` | [`NodeCriterion::ByDate`] |
//! | `properties.A[.LANG]`, `props.`, `p.` | [`NodeCriterion::ByProperty`] |
//! | `references.A[.id]`, `refs.`, `r.` | [`NodeCriterion::ByReference`] |
//! | `references.A.id:null` | [`NodeCriterion::ByReferenceAbsent`] |
//!
//! Any other path becomes [`NodeCriterion::Unknown`].

mod criterion;
mod document;
mod model;
mod permissions;
mod repository;

pub use criterion::{DateField, NodeCriterion, ReferenceValueCriterion, TextValueCriterion};
pub use document::{format_timestamp, node_document, TIMESTAMP_FORMAT};
pub use model::{LangValue, Node, NodeAttributeValueId, NodeId};
pub use repository::NodeRepository;
