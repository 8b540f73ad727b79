//! Mapping over the in-process channel transport, with supervised servers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use distmap::handler::ClientRequestHandler;
use distmap::mapping::{DistributedMapper, MappingConfig, MappingError};
use distmap::model::{Model, ModelSchema, ResolutionTag, ResolveTag};
use distmap::pipeline::{TracingReceiveBehavior, TracingSendBehavior};
use distmap::storage::{MemoryStore, QueryBackend};
use distmap::supervision::{Agent, Health, ServerSupervisor, Signal, Supervisor, SupervisorConfig};
use distmap::transport::channel::{ChannelBroker, ChannelRequestClient, ChannelRequestServer};
use distmap::transport::TransportError;
use distmap::utils::bootstrap::init_tracing;
use distmap::utils::retry::RetryConfig;
use distmap::wire::{Request, Response};

struct UserTag;
impl ResolutionTag for UserTag {
    const NAME: &'static str = "User";
}

struct CountryTag;
impl ResolutionTag for CountryTag {
    const NAME: &'static str = "Country";
}

#[derive(Debug, Default)]
struct Member {
    user_id: String,
    user_name: Option<String>,
    country_id: Option<String>,
    country_name: Option<String>,
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
                "CountryId",
                |m| &m.country_id,
                |m| &mut m.country_id,
                ResolveTag::of::<UserTag>("UserId"),
            )
            .resolve(
                "CountryName",
                |m| &m.country_name,
                |m| &mut m.country_name,
                ResolveTag::of::<CountryTag>("CountryId").expression("Name:upper"),
            );
    }
}

#[derive(Debug, Default)]
struct Roster {
    members: Vec<Member>,
}

impl Model for Roster {
    fn describe(schema: &mut ModelSchema<Self>) {
        schema.collection(
            "Members",
            |r| r.members.as_slice(),
            |r| r.members.as_mut_slice(),
        );
    }
}

fn member(user_id: &str) -> Member {
    Member {
        user_id: user_id.to_string(),
        ..Default::default()
    }
}

/// Records requests on their way to the transport.
struct RecordingHandler {
    inner: ChannelRequestClient,
    requests: Mutex<Vec<Request>>,
}

impl RecordingHandler {
    fn new(inner: ChannelRequestClient) -> Arc<Self> {
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
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.inner.send(request).await
    }
}

fn store() -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new(QueryBackend::Document)
            .with_documents(
                "User",
                vec![
                    json!({"Id": "1", "Name": "Alice", "CountryId": "FR"}),
                    json!({"Id": "2", "Name": "Bob", "CountryId": "FR"}),
                    json!({"Id": "3", "Name": "Chen", "CountryId": "CN"}),
                ],
            )
            .with_documents(
                "Country",
                vec![
                    json!({"Id": "FR", "Name": "France"}),
                    json!({"Id": "CN", "Name": "China"}),
                ],
            ),
    )
}

fn retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 10,
        max_delay_ms: 100,
        max_retries: 20,
        jitter: 0.0,
    }
}

/// One supervised channel server per tag, owned by a root supervisor.
struct Services {
    broker: ChannelBroker,
    root: Supervisor,
    servers: Arc<ServerSupervisor>,
}

impl Services {
    async fn start(store: Arc<MemoryStore>, tags: &[&str]) -> Self {
        let broker = ChannelBroker::new();
        let root = Supervisor::new("root");
        let servers = Arc::new(ServerSupervisor::new(
            "servers",
            SupervisorConfig::default(),
        ));

        let mut connections = Vec::new();
        for tag in tags {
            let server = ChannelRequestServer::new(&broker, *tag, store.clone(), retry(), 8)
                .with_behaviors(vec![Arc::new(TracingReceiveBehavior)]);
            connections.push(server.connections());
            servers.add_server(Arc::new(server));
        }
        servers.start();
        root.add(servers.clone());

        for connection in connections {
            connection.ready().wait().await;
            root.add(connection);
        }

        Self {
            broker,
            root,
            servers,
        }
    }

    fn client(&self, tag: &str) -> Arc<RecordingHandler> {
        RecordingHandler::new(ChannelRequestClient::new(
            &self.broker,
            tag,
            Duration::from_secs(5),
        ))
    }

    async fn stop(self) {
        self.root.stop("test finished").await;
        assert!(self.root.completed().is_fired());
        assert!(self.servers.completed().is_fired());
    }
}

#[tokio::test]
async fn test_member_resolves_through_one_batched_call() {
    init_tracing();
    let services = Services::start(store(), &["User", "Country"]).await;
    let users = services.client("User");
    let countries = services.client("Country");

    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(users.clone())
        .handler::<CountryTag>(countries.clone())
        .behavior(Arc::new(TracingSendBehavior))
        .expect_model::<Member>()
        .build()
        .unwrap();

    let mut alice = member("1");
    let report = mapper.map(&mut alice).await.unwrap();

    assert_eq!(alice.user_name.as_deref(), Some("Alice"));
    assert_eq!(alice.country_id.as_deref(), Some("FR"));
    assert_eq!(alice.country_name.as_deref(), Some("FRANCE"));
    assert!(report.failures.is_empty());

    let user_requests = users.requests();
    assert_eq!(user_requests.len(), 1);
    assert_eq!(user_requests[0].selector_ids, vec!["1".to_string()]);
    assert_eq!(
        user_requests[0].expression_list().unwrap(),
        vec!["Name".to_string(), "CountryId".to_string()]
    );

    let country_requests = countries.requests();
    assert_eq!(country_requests.len(), 1);
    assert_eq!(country_requests[0].selector_ids, vec!["FR".to_string()]);

    assert_eq!(services.servers.health("channel-server-User"), Some(Health::Healthy));
    services.stop().await;
}

#[tokio::test]
async fn test_roster_round_trips_scale_with_tags_not_members() {
    let services = Services::start(store(), &["User", "Country"]).await;
    let users = services.client("User");
    let countries = services.client("Country");
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(users.clone())
        .handler::<CountryTag>(countries.clone())
        .build()
        .unwrap();

    let mut roster = Roster {
        members: vec![member("1"), member("2"), member("3"), member("1")],
    };
    let report = mapper.map(&mut roster).await.unwrap();

    assert_eq!(report.calls, 2);
    assert_eq!(users.requests()[0].selector_ids.len(), 3);
    assert_eq!(countries.requests()[0].selector_ids.len(), 2);
    let countries: Vec<_> = roster
        .members
        .iter()
        .map(|m| m.country_name.as_deref().unwrap())
        .collect();
    assert_eq!(countries, vec!["FRANCE", "FRANCE", "CHINA", "FRANCE"]);

    services.stop().await;
}

#[tokio::test]
async fn test_missing_server_leaves_fields_unset() {
    // Only the User service is running; Country requests find no consumer.
    let services = Services::start(store(), &["User"]).await;
    let mapper = DistributedMapper::builder()
        .handler::<UserTag>(services.client("User"))
        .handler::<CountryTag>(services.client("Country"))
        .build()
        .unwrap();

    let mut alice = member("1");
    let report = mapper.map(&mut alice).await.unwrap();

    assert_eq!(alice.user_name.as_deref(), Some("Alice"));
    assert!(alice.country_name.is_none());
    assert!(matches!(
        report.failures.as_slice(),
        [MappingError::Transport {
            tag: "Country",
            source: TransportError::Disconnected(_)
        }]
    ));

    let strict = MappingConfig {
        strict: true,
        ..Default::default()
    };
    let err = mapper
        .map_data(&mut member("2"), &strict, &Signal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::Transport { tag: "Country", .. }));

    services.stop().await;
}
