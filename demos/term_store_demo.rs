// Copyright 2025 Cowboy AI, LLC.

//! Assembles a node store from configuration and runs a few queries
//!
//! Run with: `cargo run --example term_store_demo`

use cim_term_store::node::{
    Node, NodeAttributeValueId, NodeCriterion, NodeId, NodeRepository, ReferenceValueCriterion,
    TextValueCriterion,
};
use cim_term_store::query_parser::parse_query;
use cim_term_store::sequence::{CachedSequenceAllocator, MemorySequenceCounter, SequenceAllocator};
use cim_term_store::specification::QueryBackend;
use cim_term_store::storage::{
    AuthorizedPort, CachingPort, GrantTable, MemoryStoragePort, Permission, PermissionEvaluator,
    Query,
};
use cim_term_store::{AppRole, PersistenceConfig, Repository, SaveMode, User};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== CIM Term Store Demo ===\n");

    let config = PersistenceConfig::from_json(
        r#"{
            "authorization": { "mode": "Filter" },
            "cache": { "entity_type": "node", "key_capacity": 256, "scope": "Shared" },
            "sequence": { "batch_size": 20 }
        }"#,
    )?;

    let graph = Uuid::new_v4();
    let grants = Arc::new(GrantTable::new());
    grants.grant_all(
        "editor",
        graph,
        &[Permission::Read, Permission::Insert, Permission::Update, Permission::Delete],
    )?;
    let evaluator: Arc<dyn PermissionEvaluator<NodeId>> = grants.clone();
    let row_evaluator: Arc<dyn PermissionEvaluator<NodeAttributeValueId>> = grants.clone();
    let reference_evaluator: Arc<dyn PermissionEvaluator<NodeAttributeValueId>> = grants;

    // Authorization outside, so every caller may share cached entries.
    let nodes = AuthorizedPort::from_config(
        CachingPort::builder(MemoryStoragePort::<NodeCriterion>::new("nodes"))
            .config(config.cache.clone())
            .build()?,
        evaluator,
        &config.authorization,
    );
    let texts = AuthorizedPort::from_config(
        MemoryStoragePort::<TextValueCriterion>::new("node_text_values"),
        row_evaluator,
        &config.authorization,
    );
    let references = AuthorizedPort::from_config(
        MemoryStoragePort::<ReferenceValueCriterion>::new("node_reference_values"),
        reference_evaluator,
        &config.authorization,
    );
    let sequences: Arc<dyn SequenceAllocator> = Arc::new(CachedSequenceAllocator::new(
        MemorySequenceCounter::new(),
        &config.sequence,
    )?);
    let repository =
        NodeRepository::new(nodes, texts, references).with_sequences(Arc::clone(&sequences));

    let editor = User::new("alice", AppRole::User).with_graph_role(graph, "editor");
    let outsider = User::new("mallory", AppRole::User);

    println!("1. Saving nodes...");
    let animal = Node::new(NodeId::random(graph, "Concept"))
        .with_code("animal")
        .with_property("label", "en", "Animal");
    let cat = Node::new(NodeId::random(graph, "Concept"))
        .with_code("cat")
        .with_property("label", "en", "Cat")
        .with_property("label", "de", "Katze")
        .with_reference("broader", animal.id.clone());
    let ids = repository
        .save(vec![animal, cat], SaveMode::Insert, &editor)
        .await?;
    for id in &ids {
        if let Some(node) = repository.get(id, &editor).await? {
            println!("   {} code={:?} number={:?}", id, node.code, node.number);
        }
    }

    println!("\n2. Querying...");
    for text in ["code:ca*", "p.label.de:Katze", "type.id:Concept AND NOT code:cat"] {
        let specification = parse_query::<NodeCriterion>(text)?;
        let backend = if specification.supports(QueryBackend::Relational) {
            QueryBackend::Relational
        } else {
            QueryBackend::Search
        };
        let query = Query::builder(specification).backend(backend).build();
        let found = repository.get_by_query(&query, &editor).await?;
        println!("   {text:<36} [{backend}] -> {} node(s)", found.len());
    }

    println!("\n3. Permissions...");
    let hidden = repository.get_by_ids(&ids, &outsider).await?;
    println!("   outsider sees {} of {} nodes", hidden.len(), ids.len());

    sequences.close().await?;
    println!("\n=== Demo Complete ===");
    Ok(())
}
