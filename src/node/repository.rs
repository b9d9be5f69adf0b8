// Copyright 2025 Cowboy AI, LLC.

//! Node repository over a row port and two attribute-value ports

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

use super::criterion::{NodeCriterion, ReferenceValueCriterion, TextValueCriterion};
use super::model::{LangValue, Node, NodeAttributeValueId, NodeId};
use crate::errors::{PersistenceError, PersistenceResult};
use crate::repository::{Repository, SaveMode};
use crate::sequence::SequenceAllocator;
use crate::specification::{leaf, or, QueryBackend, Specification};
use crate::storage::{finish_query, Query, StoragePort};
use crate::user::User;

/// Repository composing node rows with their text and reference values
///
/// Saves diff attribute rows against what is stored, so saving an unchanged
/// node performs no writes. Deletes remove owned and inbound rows before the
/// node row.
pub struct NodeRepository<N, T, R> {
    nodes: N,
    text_values: T,
    reference_values: R,
    sequences: Option<Arc<dyn SequenceAllocator>>,
}

impl<N, T, R> NodeRepository<N, T, R>
where
    N: StoragePort<Key = NodeId, Value = Node, Criterion = NodeCriterion>,
    T: StoragePort<Key = NodeAttributeValueId, Value = LangValue, Criterion = TextValueCriterion>,
    R: StoragePort<Key = NodeAttributeValueId, Value = NodeId, Criterion = ReferenceValueCriterion>,
{
    /// Compose a repository from its ports
    pub fn new(nodes: N, text_values: T, reference_values: R) -> Self {
        Self {
            nodes,
            text_values,
            reference_values,
            sequences: None,
        }
    }

    /// Number new nodes lacking a number from `"{graph_id}.{type_id}"` sequences
    pub fn with_sequences(mut self, sequences: Arc<dyn SequenceAllocator>) -> Self {
        self.sequences = Some(sequences);
        self
    }

    /// Node row port
    pub fn nodes(&self) -> &N {
        &self.nodes
    }

    /// Text value port
    pub fn text_values(&self) -> &T {
        &self.text_values
    }

    /// Reference value port
    pub fn reference_values(&self) -> &R {
        &self.reference_values
    }

    async fn save_node(
        &self,
        node: Node,
        mode: SaveMode,
        user: &User,
        now: DateTime<Utc>,
    ) -> PersistenceResult<NodeId> {
        let stored = self.nodes.get(&node.id, user).await?;
        match (stored, mode) {
            (Some(_), SaveMode::Insert) => Err(PersistenceError::integrity(format!(
                "node {} already exists",
                node.id
            ))),
            (None, SaveMode::Update) => Err(PersistenceError::integrity(format!(
                "node {} does not exist",
                node.id
            ))),
            (None, _) => self.insert_node(node, user, now).await,
            (Some(stored), _) => self.update_node(node, stored, user, now).await,
        }
    }

    async fn insert_node(
        &self,
        node: Node,
        user: &User,
        now: DateTime<Utc>,
    ) -> PersistenceResult<NodeId> {
        let mut row = node.row();
        row.created_by = Some(user.username.clone());
        row.created_date = Some(now);
        row.last_modified_by = row.created_by.clone();
        row.last_modified_date = row.created_date;
        if row.number.is_none() {
            if let Some(sequences) = &self.sequences {
                row.number = Some(sequences.get_and_advance(&row.id.sequence_name()).await?);
            }
        }

        let id = row.id.clone();
        self.nodes.insert_one(id.clone(), row, user).await?;

        let texts = text_rows(&node);
        if !texts.is_empty() {
            self.text_values.insert_many(texts, user).await?;
        }
        let references = reference_rows(&node);
        if !references.is_empty() {
            self.reference_values.insert_many(references, user).await?;
        }
        debug!("Inserted node {id}");
        Ok(id)
    }

    async fn update_node(
        &self,
        node: Node,
        stored: Node,
        user: &User,
        now: DateTime<Utc>,
    ) -> PersistenceResult<NodeId> {
        let id = node.id.clone();
        let texts_changed = sync_rows(
            &self.text_values,
            TextValueCriterion::ByNode(id.clone()),
            text_rows(&node),
            user,
        )
        .await?;
        let references_changed = sync_rows(
            &self.reference_values,
            ReferenceValueCriterion::ByNode(id.clone()),
            reference_rows(&node),
            user,
        )
        .await?;

        let mut row = node.row();
        row.created_by = stored.created_by.clone();
        row.created_date = stored.created_date;
        if row.number.is_none() {
            row.number = stored.number;
        }
        if row.same_row_content(&stored) && !texts_changed && !references_changed {
            return Ok(id);
        }

        row.last_modified_by = Some(user.username.clone());
        row.last_modified_date = Some(now);
        self.nodes.update_one(id.clone(), row, user).await?;
        debug!("Updated node {id}");
        Ok(id)
    }

    async fn delete_node(&self, id: NodeId, user: &User) -> PersistenceResult<()> {
        let outgoing = row_keys(
            &self.reference_values,
            leaf(ReferenceValueCriterion::ByNode(id.clone())),
            user,
        )
        .await?;
        if !outgoing.is_empty() {
            self.reference_values.delete_many(outgoing, user).await?;
        }

        let inbound = row_keys(
            &self.reference_values,
            leaf(ReferenceValueCriterion::ByTarget(id.clone())),
            user,
        )
        .await?;
        if !inbound.is_empty() {
            debug!("Removing {} references to node {id}", inbound.len());
            self.reference_values.delete_many(inbound, user).await?;
        }

        let texts = row_keys(
            &self.text_values,
            leaf(TextValueCriterion::ByNode(id.clone())),
            user,
        )
        .await?;
        if !texts.is_empty() {
            self.text_values.delete_many(texts, user).await?;
        }

        self.nodes.delete_one(id, user).await
    }

    /// Join node rows with their attribute-value rows
    async fn populate(
        &self,
        rows: Vec<(NodeId, Node)>,
        user: &User,
    ) -> PersistenceResult<Vec<(NodeId, Node)>> {
        if rows.is_empty() {
            return Ok(rows);
        }
        let owners: Vec<NodeId> = rows.iter().map(|(id, _)| id.clone()).collect();

        let (texts, references) = futures::try_join!(
            relational_rows(
                &self.text_values,
                or(owners.iter().cloned().map(|id| leaf(TextValueCriterion::ByNode(id)))),
                user,
            ),
            relational_rows(
                &self.reference_values,
                or(owners
                    .iter()
                    .cloned()
                    .map(|id| leaf(ReferenceValueCriterion::ByNode(id)))),
                user,
            ),
        )?;

        let mut properties = group_by_owner(texts);
        let mut links = group_by_owner(references);
        Ok(rows
            .into_iter()
            .map(|(id, mut node)| {
                node.properties = properties.remove(&id).unwrap_or_default();
                node.references = links.remove(&id).unwrap_or_default();
                (id, node)
            })
            .collect())
    }
}

/// Attribute rows of a node, de-duplicated per attribute and indexed from 0
fn attribute_rows<V: Clone + Eq + Hash>(
    owner: &NodeId,
    attributes: &IndexMap<String, Vec<V>>,
) -> Vec<(NodeAttributeValueId, V)> {
    attributes
        .iter()
        .flat_map(|(attribute, values)| {
            values
                .iter()
                .collect::<IndexSet<_>>()
                .into_iter()
                .enumerate()
                .map(move |(index, value)| {
                    (
                        NodeAttributeValueId::new(owner.clone(), attribute.as_str(), index),
                        value.clone(),
                    )
                })
        })
        .collect()
}

fn text_rows(node: &Node) -> Vec<(NodeAttributeValueId, LangValue)> {
    attribute_rows(&node.id, &node.properties)
}

fn reference_rows(node: &Node) -> Vec<(NodeAttributeValueId, NodeId)> {
    attribute_rows(&node.id, &node.references)
}

fn group_by_owner<V>(
    mut rows: Vec<(NodeAttributeValueId, V)>,
) -> HashMap<NodeId, IndexMap<String, Vec<V>>> {
    rows.sort_by(|(a, _), (b, _)| a.cmp(b));
    let mut grouped: HashMap<NodeId, IndexMap<String, Vec<V>>> = HashMap::new();
    for (key, value) in rows {
        grouped
            .entry(key.node_id)
            .or_default()
            .entry(key.attribute_id)
            .or_default()
            .push(value);
    }
    grouped
}

async fn relational_rows<P: StoragePort>(
    port: &P,
    specification: Specification<P::Criterion>,
    user: &User,
) -> PersistenceResult<Vec<(P::Key, P::Value)>> {
    let query = Query::builder(specification)
        .backend(QueryBackend::Relational)
        .build();
    port.get_by_specification(&query, user).await
}

async fn row_keys<P: StoragePort>(
    port: &P,
    specification: Specification<P::Criterion>,
    user: &User,
) -> PersistenceResult<Vec<P::Key>> {
    let mut keys: Vec<_> = relational_rows(port, specification, user)
        .await?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    keys.sort();
    Ok(keys)
}

/// Bring stored rows in line with the desired set; true when anything changed
async fn sync_rows<P>(
    port: &P,
    owner: P::Criterion,
    desired: Vec<(P::Key, P::Value)>,
    user: &User,
) -> PersistenceResult<bool>
where
    P: StoragePort,
    P::Value: PartialEq,
{
    let stored: HashMap<P::Key, P::Value> = relational_rows(port, leaf(owner), user)
        .await?
        .into_iter()
        .collect();

    let mut wanted = HashSet::with_capacity(desired.len());
    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    for (key, value) in desired {
        match stored.get(&key) {
            None => inserts.push((key.clone(), value)),
            Some(current) if *current != value => updates.push((key.clone(), value)),
            Some(_) => {}
        }
        wanted.insert(key);
    }
    let mut deletes: Vec<P::Key> = stored
        .into_keys()
        .filter(|k| !wanted.contains(k))
        .collect();
    deletes.sort();

    let changed = !(inserts.is_empty() && updates.is_empty() && deletes.is_empty());
    if !deletes.is_empty() {
        port.delete_many(deletes, user).await?;
    }
    if !updates.is_empty() {
        port.update_many(updates, user).await?;
    }
    if !inserts.is_empty() {
        port.insert_many(inserts, user).await?;
    }
    Ok(changed)
}

#[async_trait]
impl<N, T, R> Repository for NodeRepository<N, T, R>
where
    N: StoragePort<Key = NodeId, Value = Node, Criterion = NodeCriterion>,
    T: StoragePort<Key = NodeAttributeValueId, Value = LangValue, Criterion = TextValueCriterion>,
    R: StoragePort<Key = NodeAttributeValueId, Value = NodeId, Criterion = ReferenceValueCriterion>,
{
    type Id = NodeId;
    type Aggregate = Node;
    type Criterion = NodeCriterion;

    fn entity_type(&self) -> &str {
        "node"
    }

    fn aggregate_id(&self, node: &Node) -> NodeId {
        node.id.clone()
    }

    async fn save(
        &self,
        nodes: Vec<Node>,
        mode: SaveMode,
        user: &User,
    ) -> PersistenceResult<Vec<NodeId>> {
        let now = Utc::now();
        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            ids.push(self.save_node(node, mode, user, now).await?);
        }
        Ok(ids)
    }

    async fn delete(&self, ids: Vec<NodeId>, user: &User) -> PersistenceResult<()> {
        for id in ids {
            self.delete_node(id, user).await?;
        }
        Ok(())
    }

    async fn exists(&self, id: &NodeId, user: &User) -> PersistenceResult<bool> {
        self.nodes.exists(id, user).await
    }

    async fn get_by_ids(
        &self,
        ids: &[NodeId],
        user: &User,
    ) -> PersistenceResult<Vec<(NodeId, Node)>> {
        let rows = self.nodes.get_by_keys(ids, user).await?;
        self.populate(rows, user).await
    }

    async fn get_by_query(
        &self,
        query: &Query<NodeCriterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(NodeId, Node)>> {
        match query.backend {
            QueryBackend::Relational => {
                let rows = self.nodes.get_by_specification(query, user).await?;
                self.populate(rows, user).await
            }
            QueryBackend::Search | QueryBackend::InMemory => {
                query.specification.ensure_supported(query.backend)?;
                let all = self.nodes.get_all(user).await?;
                let matched = self
                    .populate(all, user)
                    .await?
                    .into_iter()
                    .filter(|(id, node)| query.specification.accept(id, node))
                    .collect();
                Ok(finish_query(matched, query))
            }
        }
    }
}
