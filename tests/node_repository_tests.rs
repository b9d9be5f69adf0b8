// Copyright 2025 Cowboy AI, LLC.

//! Node repository over in-memory ports

use async_trait::async_trait;
use cim_term_store::node::{
    LangValue, Node, NodeAttributeValueId, NodeCriterion, NodeId, NodeRepository,
    ReferenceValueCriterion, TextValueCriterion,
};
use cim_term_store::sequence::{
    CachedSequenceAllocator, MemorySequenceCounter, SequenceAllocator, SequenceConfig,
};
use cim_term_store::specification::{leaf, QueryBackend};
use cim_term_store::storage::{CachingPort, MemoryStoragePort, Query, SortDirection, StoragePort};
use cim_term_store::{
    AppRole, AuditOutcome, MemoryAuditSink, MemoryTransactionManager, PersistenceError,
    PersistenceResult, Repository, SaveMode, TransactionParticipant, TransactionalRepository,
    User, WriteAuditRepository,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Forwards to a port and counts mutating calls
struct Counting<P> {
    inner: P,
    writes: AtomicUsize,
}

impl<P> Counting<P> {
    fn new(inner: P) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
        }
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.writes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl<P: StoragePort> StoragePort for Counting<P> {
    type Key = P::Key;
    type Value = P::Value;
    type Criterion = P::Criterion;

    async fn insert_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_many(entries, user).await
    }

    async fn update_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_many(entries, user).await
    }

    async fn delete_many(&self, keys: Vec<Self::Key>, user: &User) -> PersistenceResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_many(keys, user).await
    }

    async fn exists(&self, key: &Self::Key, user: &User) -> PersistenceResult<bool> {
        self.inner.exists(key, user).await
    }

    async fn get(&self, key: &Self::Key, user: &User) -> PersistenceResult<Option<Self::Value>> {
        self.inner.get(key, user).await
    }

    async fn get_all(&self, user: &User) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        self.inner.get_all(user).await
    }

    async fn get_by_keys(
        &self,
        keys: &[Self::Key],
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        self.inner.get_by_keys(keys, user).await
    }

    async fn get_by_specification(
        &self,
        query: &Query<Self::Criterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        self.inner.get_by_specification(query, user).await
    }
}

type NodePort = Arc<MemoryStoragePort<NodeCriterion>>;
type TextPort = Arc<MemoryStoragePort<TextValueCriterion>>;
type ReferencePort = Arc<MemoryStoragePort<ReferenceValueCriterion>>;

struct Ports {
    nodes: NodePort,
    texts: TextPort,
    references: ReferencePort,
}

impl Ports {
    fn new() -> Self {
        Self {
            nodes: Arc::new(MemoryStoragePort::new("nodes")),
            texts: Arc::new(MemoryStoragePort::new("node_text_values")),
            references: Arc::new(MemoryStoragePort::new("node_reference_values")),
        }
    }

    fn repository(&self) -> NodeRepository<NodePort, TextPort, ReferencePort> {
        NodeRepository::new(
            Arc::clone(&self.nodes),
            Arc::clone(&self.texts),
            Arc::clone(&self.references),
        )
    }

    fn participants(&self) -> Vec<Arc<dyn TransactionParticipant>> {
        let nodes: Arc<dyn TransactionParticipant> = self.nodes.clone();
        let texts: Arc<dyn TransactionParticipant> = self.texts.clone();
        let references: Arc<dyn TransactionParticipant> = self.references.clone();
        vec![nodes, texts, references]
    }
}

fn alice() -> User {
    User::new("alice", AppRole::Admin)
}

fn concept(graph: Uuid, code: &str) -> Node {
    Node::new(NodeId::random(graph, "Concept")).with_code(code)
}

#[tokio::test]
async fn saved_node_is_populated_on_read() {
    let graph = Uuid::new_v4();
    let ports = Ports::new();
    let repository = ports.repository();
    let broader = concept(graph, "animal");
    let node = concept(graph, "cat")
        .with_property("label", "en", "Cat")
        .with_property("label", "de", "Katze")
        .with_property("altLabel", "en", "Kitty")
        .with_reference("broader", broader.id.clone());

    repository
        .save(vec![broader.clone(), node.clone()], SaveMode::Insert, &alice())
        .await
        .unwrap();

    let loaded = repository.get(&node.id, &alice()).await.unwrap().unwrap();
    let attributes: Vec<&str> = loaded.properties.keys().map(String::as_str).collect();
    assert_eq!(attributes, vec!["altLabel", "label"]);
    assert_eq!(
        loaded.property("label"),
        &[LangValue::new("en", "Cat"), LangValue::new("de", "Katze")]
    );
    assert_eq!(loaded.reference("broader"), &[broader.id.clone()]);
    assert_eq!(loaded.created_by.as_deref(), Some("alice"));
    assert!(loaded.created_date.is_some());
    assert_eq!(loaded.created_date, loaded.last_modified_date);

    assert_eq!(ports.texts.len().await, 3);
    assert_eq!(ports.references.len().await, 1);
    assert!(ports.nodes.get(&node.id, &alice()).await.unwrap().unwrap().properties.is_empty());
}

#[tokio::test]
async fn duplicate_values_are_stored_once() {
    let ports = Ports::new();
    let repository = ports.repository();
    let node = concept(Uuid::new_v4(), "cat")
        .with_property("label", "en", "Cat")
        .with_property("label", "en", "Cat");

    repository.save_one(node.clone(), SaveMode::Upsert, &alice()).await.unwrap();
    assert_eq!(ports.texts.len().await, 1);
    let key = NodeAttributeValueId::new(node.id.clone(), "label", 0);
    assert!(ports.texts.exists(&key, &alice()).await.unwrap());
}

#[tokio::test]
async fn saving_an_unchanged_node_writes_nothing() {
    let nodes = Arc::new(Counting::new(MemoryStoragePort::<NodeCriterion>::new("nodes")));
    let texts = Arc::new(Counting::new(MemoryStoragePort::<TextValueCriterion>::new("texts")));
    let references = Arc::new(Counting::new(
        MemoryStoragePort::<ReferenceValueCriterion>::new("references"),
    ));
    let repository = NodeRepository::new(nodes.clone(), texts.clone(), references.clone());

    let target = concept(Uuid::new_v4(), "animal");
    let node = concept(target.id.graph_id, "cat")
        .with_property("label", "en", "Cat")
        .with_reference("broader", target.id.clone());
    repository
        .save(vec![target, node.clone()], SaveMode::Upsert, &alice())
        .await
        .unwrap();
    let loaded = repository.get(&node.id, &alice()).await.unwrap().unwrap();

    for counter in [nodes.writes(), texts.writes(), references.writes()] {
        assert!(counter > 0);
    }
    nodes.reset();
    texts.reset();
    references.reset();

    repository.save_one(node.clone(), SaveMode::Upsert, &alice()).await.unwrap();
    repository.save_one(loaded.clone(), SaveMode::Update, &alice()).await.unwrap();
    assert_eq!((nodes.writes(), texts.writes(), references.writes()), (0, 0, 0));

    let relabelled = Node {
        properties: Default::default(),
        ..loaded.clone()
    }
    .with_property("label", "en", "Housecat");
    repository.save_one(relabelled, SaveMode::Update, &alice()).await.unwrap();
    assert_eq!((nodes.writes(), texts.writes(), references.writes()), (1, 1, 0));

    let reloaded = repository.get(&node.id, &alice()).await.unwrap().unwrap();
    assert_eq!(reloaded.property("label"), &[LangValue::new("en", "Housecat")]);
    assert_eq!(reloaded.created_date, loaded.created_date);
    assert!(reloaded.last_modified_date >= loaded.last_modified_date);
}

#[tokio::test]
async fn save_modes_guard_existence() {
    let ports = Ports::new();
    let repository = ports.repository();
    let node = concept(Uuid::new_v4(), "cat");

    assert!(matches!(
        repository.save_one(node.clone(), SaveMode::Update, &alice()).await,
        Err(PersistenceError::IntegrityViolation(_))
    ));
    repository.save_one(node.clone(), SaveMode::Insert, &alice()).await.unwrap();
    assert!(matches!(
        repository.save_one(node.clone(), SaveMode::Insert, &alice()).await,
        Err(PersistenceError::IntegrityViolation(_))
    ));
    repository.save_one(node, SaveMode::Upsert, &alice()).await.unwrap();
}

#[tokio::test]
async fn delete_removes_owned_and_inbound_rows() {
    let graph = Uuid::new_v4();
    let ports = Ports::new();
    let repository = ports.repository();
    let animal = concept(graph, "animal").with_property("label", "en", "Animal");
    let cat = concept(graph, "cat")
        .with_property("label", "en", "Cat")
        .with_reference("broader", animal.id.clone());
    repository
        .save(vec![animal.clone(), cat.clone()], SaveMode::Insert, &alice())
        .await
        .unwrap();

    repository.delete_one(animal.id.clone(), &alice()).await.unwrap();

    assert!(!repository.exists(&animal.id, &alice()).await.unwrap());
    assert_eq!(ports.references.len().await, 0);
    assert_eq!(ports.texts.len().await, 1);
    let cat = repository.get(&cat.id, &alice()).await.unwrap().unwrap();
    assert!(cat.reference("broader").is_empty());
    assert_eq!(cat.property("label"), &[LangValue::new("en", "Cat")]);

    assert!(matches!(
        repository.delete_one(animal.id, &alice()).await,
        Err(PersistenceError::IntegrityViolation(_))
    ));
}

#[tokio::test]
async fn new_nodes_are_numbered_per_graph_and_type() {
    let graph = Uuid::new_v4();
    let ports = Ports::new();
    let allocator: Arc<dyn SequenceAllocator> = Arc::new(
        CachedSequenceAllocator::new(MemorySequenceCounter::new(), &SequenceConfig { batch_size: 10 })
            .unwrap(),
    );
    let repository = ports.repository().with_sequences(Arc::clone(&allocator));

    let first = concept(graph, "a");
    let second = concept(graph, "b");
    let term = Node::new(NodeId::random(graph, "Term"));
    let numbered = concept(graph, "c").with_number(99);
    repository
        .save(
            vec![first.clone(), second.clone(), term.clone(), numbered.clone()],
            SaveMode::Insert,
            &alice(),
        )
        .await
        .unwrap();

    let number = |id: NodeId| {
        let repository = &repository;
        async move { repository.get(&id, &alice()).await.unwrap().unwrap().number }
    };
    assert_eq!(number(first.id).await, Some(0));
    assert_eq!(number(second.id).await, Some(1));
    assert_eq!(number(term.id).await, Some(0));
    assert_eq!(number(numbered.id.clone()).await, Some(99));

    let renumbered = Node {
        number: None,
        ..repository.get(&numbered.id, &alice()).await.unwrap().unwrap()
    };
    repository.save_one(renumbered, SaveMode::Update, &alice()).await.unwrap();
    assert_eq!(number(numbered.id).await, Some(99));

    allocator.close().await.unwrap();
    assert_eq!(allocator.get(&format!("{graph}.Concept")).await.unwrap(), 2);
}

#[tokio::test]
async fn queries_respect_backend_support() {
    let graph = Uuid::new_v4();
    let ports = Ports::new();
    let repository = ports.repository();
    repository
        .save(
            vec![
                concept(graph, "b").with_property("label", "en", "Bee"),
                concept(graph, "a").with_property("label", "en", "Ant"),
                concept(graph, "c"),
                Node::new(NodeId::random(graph, "Term")).with_code("t"),
            ],
            SaveMode::Insert,
            &alice(),
        )
        .await
        .unwrap();

    let concepts = Query::builder(leaf(NodeCriterion::ByTypeId("Concept".into())))
        .backend(QueryBackend::Relational)
        .sort_by("code", SortDirection::Ascending)
        .limit(2)
        .build();
    let found = repository.get_by_query(&concepts, &alice()).await.unwrap();
    let codes: Vec<_> = found.iter().map(|(_, n)| n.code.as_deref().unwrap()).collect();
    assert_eq!(codes, vec!["a", "b"]);
    assert_eq!(found[0].1.property("label"), &[LangValue::new("en", "Ant")]);

    let by_label = leaf(NodeCriterion::ByPropertyPrefix {
        attribute: "label".into(),
        lang: Some("en".into()),
        prefix: "B".into(),
    });
    let search = Query::builder(by_label.clone())
        .backend(QueryBackend::Search)
        .build();
    let found = repository.get_by_query(&search, &alice()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].1.code.as_deref(), Some("b"));

    let relational = Query::builder(by_label)
        .backend(QueryBackend::Relational)
        .build();
    assert!(matches!(
        repository.get_by_query(&relational, &alice()).await,
        Err(PersistenceError::UnsupportedQueryBackend {
            backend: QueryBackend::Relational,
            ..
        })
    ));
}

#[tokio::test]
async fn failed_save_rolls_back_every_port() {
    let graph = Uuid::new_v4();
    let ports = Ports::new();
    let repository = TransactionalRepository::new(
        ports.repository(),
        MemoryTransactionManager::new(ports.participants()),
    );
    let existing = concept(graph, "existing");
    repository.save_one(existing.clone(), SaveMode::Insert, &alice()).await.unwrap();

    let fresh = concept(graph, "fresh").with_property("label", "en", "Fresh");
    let result = repository
        .save(vec![fresh.clone(), existing], SaveMode::Insert, &alice())
        .await;
    assert!(matches!(result, Err(PersistenceError::IntegrityViolation(_))));

    assert!(!repository.exists(&fresh.id, &alice()).await.unwrap());
    assert_eq!(ports.nodes.len().await, 1);
    assert!(ports.texts.is_empty().await);

    repository.save_one(fresh.clone(), SaveMode::Insert, &alice()).await.unwrap();
    assert!(repository.exists(&fresh.id, &alice()).await.unwrap());
}

#[tokio::test]
async fn rollback_clears_reads_cached_inside_the_transaction() {
    let graph = Uuid::new_v4();
    let ports = Ports::new();
    let cached = Arc::new(CachingPort::new(Arc::clone(&ports.nodes)).unwrap());
    let mut participants = ports.participants();
    let cache: Arc<dyn TransactionParticipant> = cached.clone();
    participants.push(cache);

    let repository = TransactionalRepository::new(
        NodeRepository::new(
            Arc::clone(&cached),
            Arc::clone(&ports.texts),
            Arc::clone(&ports.references),
        ),
        MemoryTransactionManager::new(participants),
    );

    let node = concept(graph, "x");
    let result = repository
        .save(vec![node.clone(), node.clone()], SaveMode::Insert, &alice())
        .await;
    assert!(matches!(result, Err(PersistenceError::IntegrityViolation(_))));
    assert!(ports.nodes.is_empty().await);

    assert!(!repository.exists(&node.id, &alice()).await.unwrap());
    assert_eq!(repository.get(&node.id, &alice()).await.unwrap(), None);
}

#[tokio::test]
async fn writes_are_audited_with_outcome() {
    let ports = Ports::new();
    let sink = Arc::new(MemoryAuditSink::new());
    let repository = WriteAuditRepository::new(ports.repository()).with_sink(sink.clone());
    let node = concept(Uuid::new_v4(), "cat");

    repository.save_one(node.clone(), SaveMode::Insert, &alice()).await.unwrap();
    assert!(repository.save_one(node.clone(), SaveMode::Insert, &alice()).await.is_err());
    repository.get(&node.id, &alice()).await.unwrap();
    repository.delete_one(node.id.clone(), &alice()).await.unwrap();

    let records = sink.records();
    let operations: Vec<_> = records.iter().map(|r| r.operation.as_str()).collect();
    assert_eq!(operations, vec!["save", "save", "delete"]);
    assert!(records.iter().all(|r| r.entity_type == "node" && r.user == "alice"));
    assert_eq!(records[0].outcome, AuditOutcome::Success);
    assert_eq!(records[0].keys, vec![format!("{:?}", node.id)]);
    assert!(matches!(
        &records[1].outcome,
        AuditOutcome::Failure(message) if message.contains("already exists")
    ));
    assert_eq!(repository.metrics().get_error_count("repository.save").await, 1);
}
