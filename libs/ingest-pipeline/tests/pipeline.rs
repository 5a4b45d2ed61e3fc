use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ingest_pipeline::{
    AckMode, Connection, LogPublisher, PipelineConfig, TcpAcceptor, spawn_source,
};
use score_api::{Ack, LogClient, LogError, ProduceRequest, ScoreUpdate, decode_update};
use score_log::{LogConfig, PartitionedLog};

// ═══════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════

/// Wraps the embedded log and fails every `fail_every`-th send.
///
/// With `lose_ack` the failing send is still appended first, as if the
/// broker wrote it and the acknowledgment got lost on the way back.
struct FlakyLog {
    inner: Arc<PartitionedLog>,
    fail_every: u64,
    lose_ack: bool,
    calls: AtomicU64,
}

impl FlakyLog {
    fn new(inner: Arc<PartitionedLog>, fail_every: u64, lose_ack: bool) -> Self {
        Self {
            inner,
            fail_every,
            lose_ack,
            calls: AtomicU64::new(0),
        }
    }
}

impl LogClient for FlakyLog {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn partition_count(&self) -> u32 {
        self.inner.partition_count()
    }

    fn produce(
        &self,
        request: ProduceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, LogError>> + Send + '_>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % self.fail_every != 0 {
                return self.inner.produce(request).await;
            }
            if self.lose_ack {
                let _ = self.inner.produce(request).await;
                return Err(LogError::Timeout("ack lost".into()));
            }
            Err(LogError::LeaderNotAvailable { partition: request.partition })
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        self.inner.flush()
    }
}

/// A log whose sends never resolve.
struct StalledLog {
    inner: Arc<PartitionedLog>,
    calls: AtomicU64,
}

impl LogClient for StalledLog {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn partition_count(&self) -> u32 {
        self.inner.partition_count()
    }

    fn produce(
        &self,
        _request: ProduceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, LogError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(std::future::pending())
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        self.inner.flush()
    }
}

fn fast_retry_config(ack_mode: AckMode) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.publisher.retry_backoff_ms = 1;
    config.publisher.retry_backoff_max_ms = 4;
    config.publisher.ack_mode = ack_mode;
    config.publisher.max_pending_acks = 8;
    config
}

fn open_log(partitions: u32) -> Arc<PartitionedLog> {
    Arc::new(PartitionedLog::open(&LogConfig::in_memory("score_updates", partitions)).unwrap())
}

fn line(lb: &str, player: &str, score: i64) -> String {
    format!("{{\"lb\":\"{lb}\",\"player\":\"{player}\",\"score\":{score}}}\n")
}

/// Every record in the log, grouped by partition key, in log order.
fn updates_by_player(log: &PartitionedLog) -> HashMap<String, Vec<ScoreUpdate>> {
    let mut by_player: HashMap<String, Vec<ScoreUpdate>> = HashMap::new();
    for partition in 0..log.partition_count() {
        for record in log.read(partition, 0, usize::MAX).unwrap() {
            let update = decode_update(&record.payload).unwrap();
            assert_eq!(record.key.as_ref(), update.player_id.as_bytes());
            by_player.entry(update.player_id.clone()).or_default().push(update);
        }
    }
    by_player
}

/// Feed `payload` through an in-memory connection, split into `chunk`-sized
/// writes, then close it.
async fn send(conns: &mpsc::Sender<Connection>, peer: &str, payload: Vec<u8>, chunk: usize) {
    let (mut client, server) = tokio::io::duplex(256);
    conns.send(Connection::new(peer, server)).await.unwrap();
    for piece in payload.chunks(chunk) {
        client.write_all(piece).await.unwrap();
    }
    client.shutdown().await.unwrap();
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn end_to_end_over_tcp() {
    let log = open_log(12);
    let config = Arc::new(PipelineConfig::default());
    let publisher = Arc::new(LogPublisher::new(log.clone(), &config.publisher));
    let token = CancellationToken::new();

    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let addr = acceptor.local_addr().unwrap();
    let source = spawn_source(acceptor, publisher, config, token.clone());

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(br#"{"lb":"global","player":"p1","score":123}"#)
        .await
        .unwrap();
    stream.write_all(b"\n").await.unwrap();
    stream.shutdown().await.unwrap();

    let partition = log.partition_for(b"p1");
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.end_offset(partition).unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("record was not published");

    let records = log.read(partition, 0, 10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.as_ref(), b"p1");
    let update = decode_update(&records[0].payload).unwrap();
    assert_eq!(update.leaderboard_id, "global");
    assert_eq!(update.score, 123);

    token.cancel();
    source.await.unwrap();
}

#[tokio::test]
async fn malformed_line_among_valid_ones() {
    let log = open_log(4);
    let config = Arc::new(PipelineConfig::default());
    let publisher = Arc::new(LogPublisher::new(log.clone(), &config.publisher));
    let (conns, acceptor) = mpsc::channel(4);
    let source = spawn_source(acceptor, publisher, config, CancellationToken::new());

    let mut payload = String::from("{not json}\n");
    for score in 0..10 {
        payload.push_str(&line("weekly", &format!("p{score}"), score));
    }
    send(&conns, "peer-1", payload.into_bytes(), 7).await;
    drop(conns);
    source.await.unwrap();

    let by_player = updates_by_player(&log);
    assert_eq!(by_player.len(), 10);
    assert_eq!(by_player["p3"][0].score, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_key_order_survives_concurrency_and_retries() {
    for ack_mode in [AckMode::Sync, AckMode::Pipelined] {
        let log = open_log(3);
        let flaky = Arc::new(FlakyLog::new(log.clone(), 3, false));
        let config = Arc::new(fast_retry_config(ack_mode));
        let publisher = Arc::new(LogPublisher::new(flaky, &config.publisher));
        let (conns, acceptor) = mpsc::channel(8);
        let source = spawn_source(acceptor, publisher, config, CancellationToken::new());

        // each connection interleaves its own three players
        let mut senders = Vec::new();
        for conn in 0..4 {
            let conns = conns.clone();
            senders.push(tokio::spawn(async move {
                let mut payload = String::new();
                for score in 0..30 {
                    for player in 0..3 {
                        payload.push_str(&line("g", &format!("c{conn}-p{player}"), score));
                    }
                }
                send(&conns, &format!("conn-{conn}"), payload.into_bytes(), 64).await;
            }));
        }
        for sender in senders {
            sender.await.unwrap();
        }
        drop(conns);
        source.await.unwrap();

        let by_player = updates_by_player(&log);
        assert_eq!(by_player.len(), 12, "{ack_mode:?}");
        for (player, updates) in by_player {
            let scores: Vec<i64> = updates.iter().map(|u| u.score).collect();
            assert_eq!(scores, (0..30).collect::<Vec<_>>(), "{ack_mode:?} {player}");
        }
    }
}

#[tokio::test]
async fn lost_acks_do_not_duplicate_records() {
    let log = open_log(2);
    let flaky = Arc::new(FlakyLog::new(log.clone(), 2, true));
    let config = fast_retry_config(AckMode::Sync);
    let publisher = LogPublisher::new(flaky, &config.publisher);

    let mut offsets = Vec::new();
    for i in 0..10 {
        let ack = publisher
            .publish(Bytes::from("p1"), Bytes::from(format!("r{i}")))
            .await
            .unwrap();
        offsets.push(ack.offset);
    }

    assert_eq!(offsets, (0..10).collect::<Vec<u64>>());
    let partition = log.partition_for(b"p1");
    assert_eq!(log.end_offset(partition).unwrap(), 10);
}

#[tokio::test]
async fn records_split_across_writes_are_reassembled() {
    let log = open_log(1);
    let config = Arc::new(PipelineConfig::default());
    let publisher = Arc::new(LogPublisher::new(log.clone(), &config.publisher));
    let (conns, acceptor) = mpsc::channel(1);
    let source = spawn_source(acceptor, publisher, config, CancellationToken::new());

    let payload = format!("{}{}", line("g", "p", 1), line("g", "p", 2)).into_bytes();
    send(&conns, "trickle", payload, 1).await;
    drop(conns);
    source.await.unwrap();

    let scores: Vec<i64> = updates_by_player(&log)["p"].iter().map(|u| u.score).collect();
    assert_eq!(scores, [1, 2]);
}

#[tokio::test]
async fn cancel_stops_accepting_and_drains() {
    let log = open_log(1);
    let config = Arc::new(PipelineConfig::default());
    let publisher = Arc::new(LogPublisher::new(log.clone(), &config.publisher));
    let token = CancellationToken::new();
    let (conns, acceptor) = mpsc::channel(1);
    let source = spawn_source(acceptor, publisher, config, token.clone());

    // a connection that never closes on its own
    let (mut client, server) = tokio::io::duplex(256);
    conns.send(Connection::new("idle", server)).await.unwrap();
    client.write_all(line("g", "p", 7).as_bytes()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while log.end_offset(0).unwrap() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), source)
        .await
        .expect("source did not stop")
        .unwrap();
    assert_eq!(log.end_offset(0).unwrap(), 1);
    drop(client);
}

#[tokio::test]
async fn aborting_the_source_aborts_stuck_connections() {
    let log = Arc::new(StalledLog {
        inner: open_log(1),
        calls: AtomicU64::new(0),
    });
    let config = Arc::new(PipelineConfig::default());
    let publisher = Arc::new(LogPublisher::new(log.clone(), &config.publisher));
    let token = CancellationToken::new();
    let (conns, acceptor) = mpsc::channel(1);
    let mut source = spawn_source(acceptor, publisher.clone(), config, token.clone());

    let (mut client, server) = tokio::io::duplex(256);
    conns.send(Connection::new("stuck", server)).await.unwrap();
    client.write_all(line("g", "p", 1).as_bytes()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // the connection waits on a delivery that never resolves, so the drain hangs
    token.cancel();
    assert!(tokio::time::timeout(Duration::from_millis(100), &mut source).await.is_err());

    source.abort();
    assert!(source.await.unwrap_err().is_cancelled());

    // the aborted connection task released its publisher handle
    tokio::time::timeout(Duration::from_secs(5), async {
        while Arc::strong_count(&publisher) > 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("connection task still running after abort");
    drop(client);
}
