//! Shared test infrastructure: a scripted container runtime, container
//! builders and catalog query helpers.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{
    Authority, AuthorityObject, Catalog, LookupControlFlow, LookupOptions, LookupRecords,
    MessageRequest, MessageResponse, UpdateResult, ZoneType,
};
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, RequestInfo, ResponseHandler, ResponseInfo};

use docker_dns::authority::DockerAuthority;
use docker_dns::config::DnsConfig;
use docker_dns::error::RuntimeError;
use docker_dns::runtime::{
    ContainerDetails, ContainerInspector, ContainerRuntime, ContainerSummary, EventStream,
    LifecycleAction, LifecycleEvent, NetworkEndpoint,
};
use docker_dns::state::DnsState;

// --- Constants ---

pub const ZONE: &str = "docker.";
pub const LABEL_PREFIX: &str = "com.dokku.coredns-docker";
pub const FALLBACK_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 53);

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:5353".parse().unwrap(),
        zone: ZONE.to_string(),
        ttl: 30,
        label_prefix: LABEL_PREFIX.to_string(),
        max_backoff: Duration::from_millis(80),
        ..DnsConfig::default()
    }
}

// --- Container builder ---

/// Builds [`ContainerDetails`] attached to a single network.
pub struct ContainerBuilder {
    details: ContainerDetails,
    network: String,
}

impl ContainerBuilder {
    /// Container `id` named `/name` on the default bridge network with `ip`.
    pub fn new(id: &str, name: &str, ip: &str) -> Self {
        let mut details = ContainerDetails {
            id: id.to_string(),
            name: format!("/{}", name),
            network_mode: "default".to_string(),
            ..ContainerDetails::default()
        };
        details.networks.insert(
            "bridge".to_string(),
            NetworkEndpoint {
                ip_address: ip.to_string(),
                ..NetworkEndpoint::default()
            },
        );
        Self {
            details,
            network: "bridge".to_string(),
        }
    }

    /// Move the container's attachment to a user-defined network.
    pub fn network(mut self, network: &str) -> Self {
        let endpoint = self.details.networks.remove(&self.network).unwrap_or_default();
        self.details.networks.insert(network.to_string(), endpoint);
        self.details.network_mode = network.to_string();
        self.network = network.to_string();
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.endpoint().aliases.push(alias.to_string());
        self
    }

    pub fn dns_name(mut self, dns_name: &str) -> Self {
        self.endpoint().dns_names.push(dns_name.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.details
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Add `<prefix>/srv.<proto>.<service> = <port>`.
    pub fn srv_label(self, proto: &str, service: &str, port: u16) -> Self {
        let key = format!("{}/srv.{}.{}", LABEL_PREFIX, proto, service);
        self.label(&key, &port.to_string())
    }

    pub fn compose(self, project: &str, service: &str) -> Self {
        self.label("com.docker.compose.project", project)
            .label("com.docker.compose.service", service)
    }

    pub fn port(mut self, key: &str) -> Self {
        self.details.ports.push(key.to_string());
        self
    }

    pub fn build(self) -> ContainerDetails {
        self.details
    }

    fn endpoint(&mut self) -> &mut NetworkEndpoint {
        self.details.networks.entry(self.network.clone()).or_default()
    }
}

// --- Fake runtime ---

/// Inspector over a fixed set of containers; unknown ids are `NotFound`.
#[derive(Default)]
pub struct MapInspector {
    containers: HashMap<String, ContainerDetails>,
}

impl MapInspector {
    pub fn new(containers: impl IntoIterator<Item = ContainerDetails>) -> Self {
        Self {
            containers: containers.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    /// Summaries for every container, in id order, plus `extra` ids.
    pub fn listing(&self, extra: &[&str]) -> Vec<ContainerSummary> {
        let mut ids: Vec<String> = self.containers.keys().cloned().collect();
        ids.extend(extra.iter().map(|id| id.to_string()));
        ids.sort();
        ids.into_iter().map(ContainerSummary::new).collect()
    }
}

#[async_trait]
impl ContainerInspector for MapInspector {
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        self.containers
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }
}

type EventSender = mpsc::UnboundedSender<Result<LifecycleEvent, RuntimeError>>;

#[derive(Default)]
struct FakeInner {
    running: Mutex<BTreeMap<String, ContainerDetails>>,
    fail_list: AtomicBool,
    fail_subscribe: AtomicBool,
    list_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    subscribed_at: Mutex<Vec<Instant>>,
    events: Mutex<Option<EventSender>>,
}

/// Scripted container runtime shared between a test and the engine under test.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<FakeInner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, details: ContainerDetails) {
        self.inner
            .running
            .lock()
            .unwrap()
            .insert(details.id.clone(), details);
    }

    pub fn remove(&self, id: &str) {
        self.inner.running.lock().unwrap().remove(id);
    }

    pub fn fail_list(&self, fail: bool) {
        self.inner.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }

    /// When the most recent subscription was opened.
    pub fn last_subscribed_at(&self) -> Option<Instant> {
        self.inner.subscribed_at.lock().unwrap().last().copied()
    }

    /// Whether a subscription is currently open.
    pub fn subscribed(&self) -> bool {
        self.inner.events.lock().unwrap().is_some()
    }

    /// Deliver a lifecycle event on the open subscription.
    pub fn emit(&self, action: LifecycleAction, id: &str) {
        self.send(Ok(LifecycleEvent {
            action,
            container_id: id.to_string(),
        }));
    }

    /// Deliver an error on the open subscription and close it.
    pub fn break_stream(&self) {
        self.send(Err(RuntimeError::Unavailable("connection reset".to_string())));
        self.inner.events.lock().unwrap().take();
    }

    /// Close the open subscription without an error.
    pub fn end_stream(&self) {
        self.inner.events.lock().unwrap().take();
    }

    fn send(&self, item: Result<LifecycleEvent, RuntimeError>) {
        let events = self.inner.events.lock().unwrap();
        let sender = events.as_ref().expect("no open subscription");
        sender.unbounded_send(item).expect("subscription receiver dropped");
    }
}

#[async_trait]
impl ContainerInspector for FakeRuntime {
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        self.inner
            .running
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_list.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("list failed".to_string()));
        }
        Ok(self
            .inner
            .running
            .lock()
            .unwrap()
            .keys()
            .map(ContainerSummary::new)
            .collect())
    }

    async fn subscribe_events(
        &self,
        _actions: &[LifecycleAction],
    ) -> Result<EventStream, RuntimeError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("subscribe failed".to_string()));
        }
        let (tx, rx) = mpsc::unbounded();
        self.inner.subscribed_at.lock().unwrap().push(Instant::now());
        *self.inner.events.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

// --- Fallback authority ---

/// Next authority in the chain: answers every A query with [`FALLBACK_IP`].
pub struct FallbackAuthority {
    origin: LowerName,
}

impl FallbackAuthority {
    pub fn new(zone: &str) -> Self {
        Self {
            origin: Name::from_ascii(zone).unwrap().into(),
        }
    }
}

#[async_trait]
impl Authority for FallbackAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        _rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let name = Name::from(name.clone());
        let mut record_set = RecordSet::new(name.clone(), RecordType::A, 0);
        record_set.insert(
            Record::from_rdata(name, 5, RData::A(A::from(FALLBACK_IP))),
            0,
        );
        LookupControlFlow::Break(Ok(LookupRecords::new(
            lookup_options,
            Arc::new(record_set),
        )))
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        Authority::lookup(
            self,
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        LookupControlFlow::Skip
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        Err(ResponseCode::NotImp)
    }
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a fixed client address.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "10.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

/// Build a Catalog with the container authority alone.
pub fn build_catalog(config: DnsConfig, state: DnsState) -> Catalog {
    build_chain(config, state, false)
}

/// Build a Catalog with the container authority, optionally followed by
/// [`FallbackAuthority`] for the same zone.
pub fn build_chain(config: DnsConfig, state: DnsState, with_fallback: bool) -> Catalog {
    let zone = config.zone.clone();
    let authority = DockerAuthority::new(config, state).expect("failed to create DockerAuthority");
    let origin = Authority::origin(&authority).clone();

    let mut chain: Vec<Arc<dyn AuthorityObject>> = vec![Arc::new(authority)];
    if with_fallback {
        chain.push(Arc::new(FallbackAuthority::new(&zone)));
    }

    let mut catalog = Catalog::new();
    catalog.upsert(origin, chain);
    catalog
}

// --- Response helpers ---

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(catalog: &Catalog, name: &str, record_type: RecordType, id: u16) -> Message {
    let request = build_request(name, record_type, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

/// Addresses in the answer section, in order.
pub fn answer_ips(msg: &Message) -> Vec<IpAddr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(IpAddr::V4(Ipv4Addr::from(*a))),
            RData::AAAA(aaaa) => Some(IpAddr::V6((*aaaa).into())),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected addresses.
pub fn assert_addresses(msg: &Message, expected: &[&str]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = answer_ips(msg);
    actual.sort();
    let mut expected: Vec<IpAddr> = expected.iter().map(|ip| ip.parse().unwrap()).collect();
    expected.sort();
    assert_eq!(
        actual, expected,
        "address records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}
