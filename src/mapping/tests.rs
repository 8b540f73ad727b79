use super::*;
use crate::handler::ClientRequestHandler;
use crate::model::{Model, ModelSchema, ResolutionTag, ResolveTag};
use crate::pipeline::{SendContext, SendNext, SendPipelineBehavior};
use crate::storage::{MemoryStore, QueryBackend};
use crate::supervision::Signal;
use crate::transport::local::LocalRequestHandler;
use crate::wire::{Request, Response};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};

// ============================================================================
// Fixtures
// ============================================================================

struct UserTag;
impl ResolutionTag for UserTag {
    const NAME: &'static str = "User";
}

struct CountryTag;
impl ResolutionTag for CountryTag {
    const NAME: &'static str = "Country";
}

struct NodeTag;
impl ResolutionTag for NodeTag {
    const NAME: &'static str = "Node";
}

#[derive(Debug, Default)]
struct Member {
    user_id: String,
    user_name: Option<String>,
    email: Option<String>,
}

impl Model for Member {
    fn describe(schema: &mut ModelSchema<Self>) {
        schema
            .field("UserId", |m| &m.user_id)
            .resolve(
                "UserName",
                |m| &m.user_name,
                |m| &mut m.user_name,
                ResolveTag::of::<UserTag>("UserId").expression("Name"),
            )
            .resolve(
                "Email",
                |m| &m.email,
                |m| &mut m.email,
                ResolveTag::of::<UserTag>("UserId"),
            );
    }
}

fn member(user_id: &str) -> Member {
    Member {
        user_id: user_id.to_string(),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
struct Team {
    lead: Option<Member>,
    members: Vec<Member>,
}

impl Model for Team {
    fn describe(schema: &mut ModelSchema<Self>) {
        schema
            .nested("Lead", |t| t.lead.as_ref(), |t| t.lead.as_mut())
            .collection(
                "Members",
                |t| t.members.as_slice(),
                |t| t.members.as_mut_slice(),
            );
    }
}

/// A <- B <- C <- D, C resolved through another tag.
#[derive(Debug, Default)]
struct Chained {
    a: Option<String>,
    b: Option<String>,
    c: Option<String>,
    d: String,
}

impl Model for Chained {
    fn describe(schema: &mut ModelSchema<Self>) {
        schema
            .resolve("A", |m| &m.a, |m| &mut m.a, ResolveTag::of::<UserTag>("B"))
            .resolve("B", |m| &m.b, |m| &mut m.b, ResolveTag::of::<UserTag>("C"))
            .resolve("C", |m| &m.c, |m| &mut m.c, ResolveTag::of::<CountryTag>("D"))
            .field("D", |m| &m.d);
    }
}

/// Resolves its parent, which resolves its own parent in the next pass.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Node {
    id: String,
    parent_id: Option<String>,
    #[serde(skip)]
    parent: Option<Box<Node>>,
}

impl Model for Node {
    fn describe(schema: &mut ModelSchema<Self>) {
        schema
            .field("Id", |n| &n.id)
            .field("ParentId", |n| &n.parent_id)
            .resolve_model(
                "Parent",
                |n| n.parent.as_deref(),
                |n| n.parent.as_deref_mut(),
                |n, parent| n.parent = Some(Box::new(parent)),
                ResolveTag::of::<NodeTag>("ParentId").expression("{Id, ParentId}"),
            );
    }
}

impl Node {
    fn depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |p| 1 + p.depth())
    }
}

#[derive(Debug, Default)]
struct Flagged {
    flag: bool,
    label: Option<String>,
}

impl Model for Flagged {
    fn describe(schema: &mut ModelSchema<Self>) {
        schema.field("Flag", |m| &m.flag).resolve(
            "Label",
            |m| &m.label,
            |m| &mut m.label,
            ResolveTag::of::<UserTag>("Flag"),
        );
    }
}

fn store() -> Arc<MemoryStore> {
    let store = MemoryStore::new(QueryBackend::Accessor)
        .with_documents(
            "User",
            vec![
                json!({"Id": "1", "Name": "Alice", "Email": "alice@example.com"}),
                json!({"Id": "2", "Name": "Bob", "Email": "bob@example.com"}),
                json!({"Id": "u1", "B": "u2"}),
                json!({"Id": "u2", "A": "done"}),
            ],
        )
        .with_documents("Country", vec![json!({"Id": "d1", "C": "u1"})])
        .with_documents(
            "Node",
            vec![
                json!({"Id": "n2", "ParentId": "n3"}),
                json!({"Id": "n3", "ParentId": "n4"}),
                json!({"Id": "n4"}),
            ],
        );
    Arc::new(store)
}

fn local(store: &Arc<MemoryStore>, tag: &str) -> Arc<dyn ClientRequestHandler> {
    Arc::new(LocalRequestHandler::new(tag, store.clone()))
}

/// Records every request before delegating.
struct RecordingHandler {
    inner: Arc<dyn ClientRequestHandler>,
    requests: Mutex<Vec<Request>>,
}

impl RecordingHandler {
    fn new(inner: Arc<dyn ClientRequestHandler>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientRequestHandler for RecordingHandler {
    async fn send(&self, request: Request) -> std::result::Result<Response, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.inner.send(request).await
    }
}

/// Never answers.
struct Stalled;

#[async_trait]
impl ClientRequestHandler for Stalled {
    async fn send(&self, _request: Request) -> std::result::Result<Response, TransportError> {
        std::future::pending().await
    }
}

/// Logs the tag and order of every call.
struct OrderLog(Mutex<Vec<(&'static str, usize)>>);

#[async_trait]
impl SendPipelineBehavior for OrderLog {
    async fn handle(
        &self,
        context: SendContext,
        next: SendNext<'_>,
    ) -> std::result::Result<Response, TransportError> {
        self.0.lock().unwrap().push((context.tag.name(), context.order));
        next.run(context).await
    }
}

fn lenient() -> MappingConfig {
    MappingConfig::default()
}

fn strict() -> MappingConfig {
    MappingConfig {
        strict: true,
        ..Default::default()
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_resolves_fields_from_selector_id() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "User"))
        .expect_model::<Member>()
        .build()
        .unwrap();

    let mut alice = member("1");
    let report = mapper.map(&mut alice).await.unwrap();

    assert_eq!(alice.user_name.as_deref(), Some("Alice"));
    assert_eq!(alice.email.as_deref(), Some("alice@example.com"));
    assert_eq!(report.passes, 1);
    assert_eq!(report.calls, 1);
    assert_eq!(report.fields_resolved, 2);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_dependency_chain_resolves_in_one_pass() {
    let store = store();
    let log = Arc::new(OrderLog(Mutex::new(Vec::new())));
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "User"))
        .handler::<CountryTag>(local(&store, "Country"))
        .behavior(log.clone())
        .expect_model::<Chained>()
        .build()
        .unwrap();

    let mut chained = Chained {
        d: "d1".to_string(),
        ..Default::default()
    };
    let report = mapper.map(&mut chained).await.unwrap();

    assert_eq!(chained.c.as_deref(), Some("u1"));
    assert_eq!(chained.b.as_deref(), Some("u2"));
    assert_eq!(chained.a.as_deref(), Some("done"));
    assert_eq!(report.passes, 1);
    assert_eq!(report.calls, 3);
    assert_eq!(
        *log.0.lock().unwrap(),
        vec![("Country", 0), ("User", 1), ("User", 2)]
    );
}

#[tokio::test]
async fn test_fields_sharing_a_tag_are_batched_and_deduplicated() {
    let store = store();
    let recording = RecordingHandler::new(local(&store, "User"));
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(recording.clone())
        .build()
        .unwrap();

    let mut team = Team {
        lead: Some(member("2")),
        members: vec![member("1"), member("1"), member("2")],
    };
    let report = mapper.map(&mut team).await.unwrap();

    let requests = recording.requests();
    assert_eq!(requests.len(), 1);
    let mut ids = requests[0].selector_ids.clone();
    ids.sort();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(
        requests[0].expression_list().unwrap(),
        vec!["Name".to_string(), "Email".to_string()]
    );

    assert_eq!(report.fields_resolved, 8);
    assert_eq!(team.lead.unwrap().user_name.as_deref(), Some("Bob"));
    let names: Vec<_> = team
        .members
        .iter()
        .map(|m| m.user_name.as_deref().unwrap())
        .collect();
    assert_eq!(names, vec!["Alice", "Alice", "Bob"]);
}

#[tokio::test]
async fn test_null_selector_is_skipped() {
    let store = store();
    let recording = RecordingHandler::new(local(&store, "Node"));
    let mapper = DistributedMapper::builder()
        .handler::<NodeTag>(recording.clone())
        .build()
        .unwrap();

    let mut orphan = Node {
        id: "n1".to_string(),
        ..Default::default()
    };
    let report = mapper.map(&mut orphan).await.unwrap();

    assert!(recording.requests().is_empty());
    assert_eq!(report.calls, 0);
    assert!(orphan.parent.is_none());
}

#[tokio::test]
async fn test_unknown_id_leaves_field_unset() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "User"))
        .build()
        .unwrap();

    let mut ghost = member("404");
    let report = mapper.map(&mut ghost).await.unwrap();

    assert!(ghost.user_name.is_none());
    assert_eq!(report.fields_resolved, 0);
    assert!(report.failures.is_empty());
}

// ============================================================================
// Spawned models
// ============================================================================

fn node_chain_root() -> Node {
    Node {
        id: "n1".to_string(),
        parent_id: Some("n2".to_string()),
        parent: None,
    }
}

#[tokio::test]
async fn test_spawned_models_resolve_in_later_passes() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<NodeTag>(local(&store, "Node"))
        .build()
        .unwrap();

    let mut root = node_chain_root();
    let report = mapper.map(&mut root).await.unwrap();

    assert_eq!(root.depth(), 3);
    assert_eq!(report.passes, 4);
    assert_eq!(report.calls, 3);
    let grandparent = root.parent.as_ref().and_then(|p| p.parent.as_ref()).unwrap();
    assert_eq!(grandparent.id, "n3");
}

#[tokio::test]
async fn test_spawn_depth_stops_silently_by_default() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<NodeTag>(local(&store, "Node"))
        .build()
        .unwrap();
    let parameters = MappingConfig {
        max_spawn_depth: 2,
        ..Default::default()
    };

    let mut root = node_chain_root();
    let report = mapper
        .map_data(&mut root, &parameters, &Signal::new())
        .await
        .unwrap();

    assert_eq!(report.passes, 2);
    assert_eq!(root.depth(), 2);
}

#[tokio::test]
async fn test_zero_spawn_depth_still_resolves_the_root() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<NodeTag>(local(&store, "Node"))
        .build()
        .unwrap();
    let parameters = MappingConfig {
        max_spawn_depth: 0,
        ..Default::default()
    };

    let mut root = node_chain_root();
    let report = mapper
        .map_data(&mut root, &parameters, &Signal::new())
        .await
        .unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(root.depth(), 1);
}

#[tokio::test]
async fn test_spawn_depth_can_fail_the_run() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<NodeTag>(local(&store, "Node"))
        .build()
        .unwrap();
    let parameters = MappingConfig {
        max_spawn_depth: 2,
        fail_on_spawn_limit: true,
        ..Default::default()
    };

    let mut root = node_chain_root();
    let err = mapper
        .map_data(&mut root, &parameters, &Signal::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MappingError::SpawnLimitExceeded {
            limit: 2,
            pending: 1
        }
    ));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_remote_failure_is_recorded_when_lenient() {
    // The store has no "Group" collection, so every query faults remotely.
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "Group"))
        .build()
        .unwrap();

    let mut alice = member("1");
    let report = mapper
        .map_data(&mut alice, &lenient(), &Signal::new())
        .await
        .unwrap();

    assert!(alice.user_name.is_none());
    assert_eq!(report.failures.len(), 1);
    match &report.failures[0] {
        MappingError::Remote { tag, source } => {
            assert_eq!(*tag, "User");
            assert_eq!(source.exception_type, "QueryError");
        }
        other => panic!("unexpected failure: {other}"),
    }
}

#[tokio::test]
async fn test_remote_failure_propagates_when_strict() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "Group"))
        .build()
        .unwrap();

    let mut alice = member("1");
    let err = mapper
        .map_data(&mut alice, &strict(), &Signal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::Remote { tag: "User", .. }));
}

#[tokio::test]
async fn test_unsupported_selector_type() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "User"))
        .build()
        .unwrap();

    let mut flagged = Flagged::default();
    let report = mapper.map(&mut flagged).await.unwrap();
    assert!(matches!(
        report.failures.as_slice(),
        [MappingError::UnsupportedSelectorType {
            model: "Flagged",
            field: "Flag",
            found: "boolean"
        }]
    ));
    assert_eq!(report.calls, 0);

    let err = mapper
        .map_data(&mut flagged, &strict(), &Signal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::UnsupportedSelectorType { .. }));
}

#[tokio::test]
async fn test_missing_handler_at_runtime() {
    let store = store();
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "User"))
        .build()
        .unwrap();

    let mut chained = Chained {
        d: "d1".to_string(),
        ..Default::default()
    };
    let report = mapper.map(&mut chained).await.unwrap();
    assert!(matches!(
        report.failures.as_slice(),
        [MappingError::UnresolvedTag {
            tag: "Country",
            field: "C",
            ..
        }]
    ));
    assert!(chained.a.is_none() && chained.b.is_none());

    let err = mapper
        .map_data(&mut chained, &strict(), &Signal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::UnresolvedTag { tag: "Country", .. }));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_recorded() {
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(Arc::new(Stalled))
        .build()
        .unwrap();
    let parameters = MappingConfig {
        request_timeout_ms: 1_000,
        ..Default::default()
    };

    let mut alice = member("1");
    let report = mapper
        .map_data(&mut alice, &parameters, &Signal::new())
        .await
        .unwrap();

    assert!(matches!(
        report.failures.as_slice(),
        [MappingError::Transport {
            tag: "User",
            source: TransportError::Timeout { .. }
        }]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_propagates_even_when_lenient() {
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(Arc::new(Stalled))
        .build()
        .unwrap();
    let cancel = Signal::new();
    let trigger = cancel.clone();
    let parameters = lenient();

    let mut alice = member("1");
    let (outcome, _) = tokio::join!(
        mapper.map_data(&mut alice, &parameters, &cancel),
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.fire();
        }
    );

    assert!(matches!(outcome, Err(MappingError::Cancelled)));
}

#[tokio::test]
async fn test_fired_cancel_stops_before_sending() {
    let store = store();
    let recording = RecordingHandler::new(local(&store, "User"));
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(recording.clone())
        .build()
        .unwrap();
    let cancel = Signal::new();
    cancel.fire();

    let mut alice = member("1");
    let err = mapper
        .map_data(&mut alice, &lenient(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, MappingError::Cancelled));
    assert!(recording.requests().is_empty());
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_builder_rejects_duplicate_handler() {
    let store = store();
    let err = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "User"))
        .handler::<UserTag>(local(&store, "User"))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, MappingError::DuplicateHandler("User")));
}

#[test]
fn test_builder_rejects_model_with_unhandled_tag() {
    let store = store();
    let err = DistributedMapper::builder()
        .handler::<UserTag>(local(&store, "User"))
        .expect_model::<Chained>()
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        MappingError::UnresolvedTag {
            tag: "Country",
            model: "Chained",
            ..
        }
    ));
}

#[test]
fn test_mapping_config_deserializes_with_defaults() {
    let config: MappingConfig =
        serde_json::from_value(json!({"max_spawn_depth": 3, "strict": true})).unwrap();
    assert_eq!(config.max_spawn_depth, 3);
    assert!(config.strict);
    assert_eq!(config.max_concurrency, 16);
    assert_eq!(config.request_timeout(), std::time::Duration::from_secs(30));
}
