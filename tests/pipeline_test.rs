use async_trait::async_trait;
use parking_lot::Mutex;
use rancher_logstash_adapter::{
    app::{ForwardingPipeline, PipelineConfig, PipelineState},
    domain::{
        ContainerDescriptor, LogMessage, MetadataLookup, OrchestrationMetadata, RancherContainer,
        RancherStack,
    },
    enrich::{Enricher, FieldCache, MetadataCache},
    rancher::ResolveMetadata,
    reliability::{DeliveryMode, RetryConfig, RetryPolicy},
    sender::{Connection, TcpTransport, Transport, TransportError},
};
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Answers from a fixed table and counts the calls.
struct TableResolver {
    entries: HashMap<String, OrchestrationMetadata>,
    calls: AtomicUsize,
}

impl TableResolver {
    fn new(entries: impl IntoIterator<Item = (&'static str, OrchestrationMetadata)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(id, metadata)| (id.to_string(), metadata))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ResolveMetadata for TableResolver {
    async fn resolve(&self, docker_id: &str) -> MetadataLookup {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.entries.get(docker_id) {
            Some(metadata) => MetadataLookup::Found(metadata.clone()),
            None => MetadataLookup::Absent,
        }
    }
}

fn checkout_metadata(docker_id: &str) -> OrchestrationMetadata {
    OrchestrationMetadata {
        environment: "production".to_string(),
        container: RancherContainer {
            name: "checkout-web-1".to_string(),
            ip: "10.42.0.7".to_string(),
            id: "1i42".to_string(),
            host_id: "1h3".to_string(),
            docker_id: docker_id.to_string(),
        },
        stack: RancherStack {
            service: "web".to_string(),
            stack_name: "checkout".to_string(),
            stack_state: "active".to_string(),
        },
    }
}

fn container(id: &str, name: &str, env: &[&str]) -> Arc<ContainerDescriptor> {
    Arc::new(ContainerDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        image: "nginx:1.27".to_string(),
        hostname: id[..8.min(id.len())].to_string(),
        env: env.iter().map(|e| e.to_string()).collect(),
        labels: HashMap::new(),
    })
}

fn enricher(resolver: Arc<dyn ResolveMetadata>, default_fields: &str) -> Enricher {
    Enricher::new(
        Arc::new(FieldCache::new(default_fields)),
        Arc::new(MetadataCache::new(resolver)),
    )
}

fn fast_retry(mode: DeliveryMode, max_attempts: u32) -> PipelineConfig {
    PipelineConfig {
        write_timeout: Duration::from_secs(1),
        retry: RetryPolicy::new(
            mode,
            RetryConfig {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        ),
    }
}

/// Run a pipeline over TCP against a local listener and collect the lines it wrote.
async fn forward_over_tcp(enricher: Enricher, messages: Vec<LogMessage>) -> Vec<Value> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let expected = messages.len();

    let reader = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let mut records = Vec::new();
        while records.len() < expected {
            match lines.next_line().await.unwrap() {
                Some(line) => records.push(serde_json::from_str::<Value>(&line).unwrap()),
                None => break,
            }
        }
        records
    });

    let transport = Arc::new(TcpTransport::new(address, Duration::from_secs(2)));
    let pipeline = ForwardingPipeline::connect(transport, enricher, PipelineConfig::default())
        .await
        .unwrap();
    assert_eq!(pipeline.state(), PipelineState::Connected);

    let (tx, rx) = mpsc::channel(16);
    let run = tokio::spawn(pipeline.run(rx, CancellationToken::new()));
    for message in messages {
        tx.send(message).await.unwrap();
    }
    drop(tx);

    let snapshot = run.await.unwrap();
    assert_eq!(snapshot.forwarded as usize, expected);

    tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_json_message_enriched_with_rancher_metadata() {
    let resolver = Arc::new(TableResolver::new([("deadbeef01", checkout_metadata("deadbeef01"))]));
    let web = container("deadbeef01", "/checkout_web_1", &[]);

    let records = forward_over_tcp(
        enricher(resolver.clone(), "env=prod"),
        vec![
            LogMessage::new(r#"{"level":"info","msg":"order placed"}"#, web.clone()),
            LogMessage::new(r#"{"level":"warn","msg":"slow payment"}"#, web),
        ],
    )
    .await;

    assert_eq!(records.len(), 2);
    let first = &records[0];
    assert_eq!(first["level"], "info");
    assert_eq!(first["msg"], "order placed");
    assert_eq!(first["env"], "prod");
    assert_eq!(first["index"], "checkout");
    assert_eq!(first["docker"]["name"], "/checkout_web_1");
    assert_eq!(first["docker"]["id"], "deadbeef01");
    assert_eq!(first["docker"]["image"], "nginx:1.27");
    assert_eq!(first["rancher"]["environment"], "production");
    assert_eq!(first["rancher"]["container"]["name"], "checkout-web-1");
    assert_eq!(first["rancher"]["container"]["dockerId"], "deadbeef01");
    assert_eq!(first["rancher"]["stack"]["stackName"], "checkout");
    assert_eq!(records[1]["msg"], "slow payment");

    // Second line of the same container is served from the cache.
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_plain_text_without_metadata() {
    let resolver = Arc::new(TableResolver::empty());
    let worker = container("cafebabe02", "/batch_worker", &[]);

    let records = forward_over_tcp(
        enricher(resolver.clone(), ""),
        vec![
            LogMessage::new("starting worker pool", worker.clone()),
            LogMessage::new(r#"{"rancher":"spoofed","n":1}"#, worker),
        ],
    )
    .await;

    assert_eq!(records[0]["message"], "starting worker pool");
    assert_eq!(records[0]["index"], "batch_worker");
    assert!(records[0].get("rancher").is_none());

    // A raw `rancher` key never survives an absent lookup.
    assert_eq!(records[1]["n"], 1);
    assert!(records[1].get("rancher").is_none());

    // Absent results are not cached.
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_container_fields_override_default() {
    let resolver = Arc::new(TableResolver::empty());
    let tagged = container("0ddba11003", "/api", &["LOGSTASH_FIELDS=team=payments,tier=backend"]);
    let untagged = container("0ddba11004", "/cron", &[]);

    let records = forward_over_tcp(
        enricher(resolver, "team=platform"),
        vec![
            LogMessage::new("request served", tagged),
            LogMessage::new("tick", untagged),
        ],
    )
    .await;

    assert_eq!(records[0]["team"], "payments");
    assert_eq!(records[0]["tier"], "backend");
    assert_eq!(records[1]["team"], "platform");
    assert!(records[1].get("tier").is_none());
}

/// In-memory transport whose writes fail a configured number of times,
/// or never return when `hang` is set.
#[derive(Default)]
struct FlakyShared {
    failures_left: AtomicUsize,
    hang: AtomicBool,
    dials: AtomicUsize,
    written: Mutex<Vec<Vec<u8>>>,
}

struct FlakyTransport(Arc<FlakyShared>);

struct FlakyConnection(Arc<FlakyShared>);

#[async_trait]
impl Transport for FlakyTransport {
    async fn dial(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.0.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakyConnection(self.0.clone())))
    }

    fn describe(&self) -> String {
        "memory://flaky".to_string()
    }
}

#[async_trait]
impl Connection for FlakyConnection {
    async fn write_record(&mut self, record: &[u8]) -> Result<(), TransportError> {
        if self.0.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        let failed = self
            .0
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Write(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "collector went away",
            )));
        }
        self.0.written.lock().push(record.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

async fn run_flaky(
    failures: usize,
    config: PipelineConfig,
    lines: &[&str],
) -> (Arc<FlakyShared>, rancher_logstash_adapter::sender::StatsSnapshot) {
    let shared = Arc::new(FlakyShared {
        failures_left: AtomicUsize::new(failures),
        ..Default::default()
    });
    let transport = Arc::new(FlakyTransport(shared.clone()));
    let pipeline = ForwardingPipeline::connect(
        transport,
        enricher(Arc::new(TableResolver::empty()), ""),
        config,
    )
    .await
    .unwrap();

    let (tx, rx) = mpsc::channel(16);
    let app = container("feedface05", "/app", &[]);
    for line in lines {
        tx.send(LogMessage::new(*line, app.clone())).await.unwrap();
    }
    drop(tx);

    let snapshot = pipeline.run(rx, CancellationToken::new()).await;
    (shared, snapshot)
}

#[tokio::test]
async fn test_retry_mode_reconnects_after_write_failure() {
    let (shared, snapshot) = run_flaky(1, fast_retry(DeliveryMode::Retry, 3), &["one", "two"]).await;

    assert_eq!(snapshot.forwarded, 2);
    assert_eq!(snapshot.dropped, 0);
    assert_eq!(snapshot.write_failures, 1);
    assert_eq!(snapshot.reconnects, 1);
    // Initial dial plus one reconnect.
    assert_eq!(shared.dials.load(Ordering::SeqCst), 2);

    let written = shared.written.lock();
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|line| line.ends_with(b"\n")));
    let first: Value = serde_json::from_slice(&written[0]).unwrap();
    assert_eq!(first["message"], "one");
}

#[tokio::test]
async fn test_retry_mode_gives_up_after_max_attempts() {
    let (shared, snapshot) = run_flaky(3, fast_retry(DeliveryMode::Retry, 2), &["lost", "kept"]).await;

    // One initial write plus two retries, all failing.
    assert_eq!(snapshot.write_failures, 3);
    assert_eq!(snapshot.dropped, 1);
    assert_eq!(snapshot.forwarded, 1);

    let written = shared.written.lock();
    let kept: Value = serde_json::from_slice(&written[0]).unwrap();
    assert_eq!(kept["message"], "kept");
}

#[tokio::test]
async fn test_drop_mode_keeps_processing() {
    let (shared, snapshot) =
        run_flaky(2, fast_retry(DeliveryMode::Drop, 5), &["a", "b", "c", "d"]).await;

    assert_eq!(snapshot.received, 4);
    assert_eq!(snapshot.dropped, 2);
    assert_eq!(snapshot.forwarded, 2);

    let written = shared.written.lock();
    let messages: Vec<Value> = written
        .iter()
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect();
    assert_eq!(messages[0]["message"], "c");
    assert_eq!(messages[1]["message"], "d");
}

#[tokio::test]
async fn test_cancel_stops_forwarding() {
    let shared = Arc::new(FlakyShared::default());
    let pipeline = ForwardingPipeline::connect(
        Arc::new(FlakyTransport(shared.clone())),
        enricher(Arc::new(TableResolver::empty()), ""),
        PipelineConfig::default(),
    )
    .await
    .unwrap();

    let (_tx, rx) = mpsc::channel::<LogMessage>(1);
    let cancel = CancellationToken::new();
    let run = tokio::spawn(pipeline.run(rx, cancel.clone()));
    cancel.cancel();

    let snapshot = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.received, 0);
}

#[tokio::test]
async fn test_connect_fails_without_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = ForwardingPipeline::connect(
        Arc::new(TcpTransport::new(address, Duration::from_secs(1))),
        enricher(Arc::new(TableResolver::empty()), ""),
        PipelineConfig::default(),
    )
    .await;
    assert!(matches!(result, Err(TransportError::Dial { .. })));
}

#[tokio::test]
async fn test_block_mode_delivers_after_repeated_failures() {
    let (shared, snapshot) =
        run_flaky(4, fast_retry(DeliveryMode::Block, 1), &["persistent", "next"]).await;

    // The attempt budget does not apply in block mode.
    assert_eq!(snapshot.write_failures, 4);
    assert_eq!(snapshot.reconnects, 4);
    assert_eq!(snapshot.dropped, 0);
    assert_eq!(snapshot.forwarded, 2);

    let written = shared.written.lock();
    let first: Value = serde_json::from_slice(&written[0]).unwrap();
    assert_eq!(first["message"], "persistent");
}

#[tokio::test]
async fn test_write_timeout_counts_as_failure() {
    let shared = Arc::new(FlakyShared::default());
    shared.hang.store(true, Ordering::SeqCst);

    let config = PipelineConfig {
        write_timeout: Duration::from_millis(50),
        ..fast_retry(DeliveryMode::Drop, 0)
    };
    let pipeline = ForwardingPipeline::connect(
        Arc::new(FlakyTransport(shared.clone())),
        enricher(Arc::new(TableResolver::empty()), ""),
        config,
    )
    .await
    .unwrap();

    let (tx, rx) = mpsc::channel(1);
    tx.send(LogMessage::new("stalled", container("feedface05", "/app", &[])))
        .await
        .unwrap();
    drop(tx);

    let run = pipeline.run(rx, CancellationToken::new());
    let snapshot = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("write timeout should bound a hanging connection");

    assert_eq!(snapshot.write_failures, 1);
    assert_eq!(snapshot.dropped, 1);
    assert_eq!(snapshot.forwarded, 0);
    assert!(shared.written.lock().is_empty());
}

/// Start a pipeline with one queued message and cancel it once `ready` holds.
async fn cancel_mid_record(
    resolver: Arc<dyn ResolveMetadata>,
    shared: Arc<FlakyShared>,
    config: PipelineConfig,
    ready: impl Fn(&rancher_logstash_adapter::sender::StatsSnapshot) -> bool,
) -> rancher_logstash_adapter::sender::StatsSnapshot {
    let pipeline = ForwardingPipeline::connect(
        Arc::new(FlakyTransport(shared)),
        enricher(resolver, ""),
        config,
    )
    .await
    .unwrap();
    let stats = pipeline.stats();

    let (tx, rx) = mpsc::channel(1);
    tx.send(LogMessage::new("in flight", container("feedface05", "/app", &[])))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let run = tokio::spawn(pipeline.run(rx, cancel.clone()));

    tokio::time::timeout(Duration::from_secs(2), async {
        while !ready(&stats.snapshot()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    cancel.cancel();

    let snapshot = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("pipeline should stop promptly after cancel")
        .unwrap();
    drop(tx);
    snapshot
}

/// Never answers within a test's lifetime.
struct StallingResolver;

#[async_trait]
impl ResolveMetadata for StallingResolver {
    async fn resolve(&self, _docker_id: &str) -> MetadataLookup {
        tokio::time::sleep(Duration::from_secs(30)).await;
        MetadataLookup::Absent
    }
}

#[tokio::test]
async fn test_cancel_during_metadata_lookup() {
    let shared = Arc::new(FlakyShared::default());
    let snapshot = cancel_mid_record(
        Arc::new(StallingResolver),
        shared.clone(),
        PipelineConfig::default(),
        |stats| stats.received == 1,
    )
    .await;

    assert_eq!(snapshot.received, 1);
    assert_eq!(snapshot.dropped, 1);
    assert_eq!(snapshot.forwarded, 0);
    assert!(shared.written.lock().is_empty());
}

#[tokio::test]
async fn test_cancel_during_retry_backoff() {
    let shared = Arc::new(FlakyShared {
        failures_left: AtomicUsize::new(usize::MAX),
        ..Default::default()
    });
    let config = PipelineConfig {
        write_timeout: Duration::from_secs(1),
        retry: RetryPolicy::new(
            DeliveryMode::Block,
            RetryConfig {
                max_attempts: 1,
                base_delay: Duration::from_secs(20),
                max_delay: Duration::from_secs(20),
            },
        ),
    };

    let snapshot = cancel_mid_record(
        Arc::new(TableResolver::empty()),
        shared,
        config,
        |stats| stats.write_failures == 1,
    )
    .await;

    assert_eq!(snapshot.write_failures, 1);
    assert_eq!(snapshot.dropped, 1);
    assert_eq!(snapshot.forwarded, 0);
}

#[tokio::test]
async fn test_cancel_during_hanging_write() {
    let shared = Arc::new(FlakyShared::default());
    shared.hang.store(true, Ordering::SeqCst);
    let config = PipelineConfig {
        write_timeout: Duration::from_secs(30),
        ..fast_retry(DeliveryMode::Block, 1)
    };

    let snapshot = cancel_mid_record(
        Arc::new(TableResolver::empty()),
        shared,
        config,
        |stats| stats.received == 1,
    )
    .await;

    assert_eq!(snapshot.dropped, 1);
    assert_eq!(snapshot.write_failures, 0);
    assert_eq!(snapshot.forwarded, 0);
}
