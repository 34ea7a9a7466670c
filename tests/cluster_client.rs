//! End-to-end client behaviour over in-process nodes

use assert_matches::assert_matches;
use bytes::Bytes;
use futures::TryStreamExt;
use oss_cluster_client::{
    BucketMode, ClientConfig, Error, MemoryBackend, NodeConfig, NodeRole, ObjectBackendRef,
    ObjectStore, OssClient, SchedulePolicy, UploadOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const BUCKET: &str = "cnpm-test";

fn memory_client(config: ClientConfig) -> (OssClient, Vec<Arc<MemoryBackend>>) {
    let store = Arc::new(ObjectStore::new());
    let backends: Vec<Arc<MemoryBackend>> = config
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let id = node.id.clone().unwrap_or_else(|| format!("node-{}", i));
            Arc::new(MemoryBackend::with_store(id, store.clone()))
        })
        .collect();
    let refs = backends.iter().map(|b| b.clone() as ObjectBackendRef).collect();
    (OssClient::with_backends(config, refs).unwrap(), backends)
}

fn single_config() -> ClientConfig {
    ClientConfig::single(BUCKET, NodeConfig::new("http://oss-cn-hangzhou.aliyuncs.com"))
}

fn master_slave_config() -> ClientConfig {
    ClientConfig::cluster(
        BUCKET,
        SchedulePolicy::MasterSlave,
        vec![
            NodeConfig::new("http://oss-cn-hangzhou.aliyuncs.com").id("primary").role(NodeRole::Primary),
            NodeConfig::new("http://oss-cn-beijing.aliyuncs.com").id("secondary").role(NodeRole::Secondary),
        ],
    )
}

fn round_robin_config() -> ClientConfig {
    ClientConfig::cluster(
        BUCKET,
        SchedulePolicy::RoundRobin,
        vec![
            NodeConfig::new("http://a.example").id("a"),
            NodeConfig::new("http://b.example").id("b"),
            NodeConfig::new("http://c.example").id("c"),
        ],
    )
}

fn example_key(version: &str) -> String {
    format!("/oss-cnpm-example/-/example2.js-{}", version)
}

async fn round_trip(client: &OssClient) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("example2.js");
    let contents = b"module.exports = function example() {};\n".repeat(100);
    tokio::fs::write(&source, &contents).await.unwrap();

    let key = example_key("1.0.0");
    let result = client.upload(&source, UploadOptions::new(key.clone())).await.unwrap();
    assert_eq!(result.key, key);

    let destination = dir.path().join("downloaded.js");
    client.download(&key, &destination).await.unwrap();
    assert_eq!(tokio::fs::read(&destination).await.unwrap(), contents);

    let streamed: Vec<Bytes> = client
        .create_download_stream(&key)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(streamed.concat(), contents);

    assert_eq!(
        client.url(&key),
        format!("http://{}.oss-cn-hangzhou.aliyuncs.com{}", BUCKET, key)
    );

    client.remove(&key).await.unwrap();
    let err = client.download(&key, dir.path().join("gone.js")).await.unwrap_err();
    assert_eq!(err.name(), "NoSuchKeyError");
    assert!(!dir.path().join("gone.js").exists());
}

#[tokio::test]
async fn test_round_trip_single_node() {
    let (client, _) = memory_client(single_config());
    round_trip(&client).await;
}

#[tokio::test]
async fn test_round_trip_master_slave() {
    let (client, _) = memory_client(master_slave_config());
    round_trip(&client).await;
}

#[tokio::test]
async fn test_round_trip_round_robin() {
    let (client, _) = memory_client(round_robin_config());
    round_trip(&client).await;
}

#[tokio::test]
async fn test_public_bucket_upload_returns_url() {
    let (client, _) = memory_client(single_config().mode(BucketMode::Public));
    let key = example_key("2.0.0");
    let result = client
        .upload_buffer(Bytes::from_static(b"x"), UploadOptions::new(key.clone()))
        .await
        .unwrap();
    assert_eq!(result.url, Some(client.url(&key)));
}

#[tokio::test]
async fn test_upload_stream_round_trip() {
    let (client, backends) = memory_client(master_slave_config());
    let key = example_key("stream");
    let chunks = vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"module.exports = ")),
        Ok(Bytes::from_static(b"42;")),
        Ok(Bytes::from_static(b"\n")),
    ];
    let result = client
        .upload_stream(futures::stream::iter(chunks), UploadOptions::new(key.clone()))
        .await
        .unwrap();
    assert_eq!(result.key, key);
    assert_eq!(backends[0].put_count(), 1);

    let data = client.read_bytes(&key).await.unwrap();
    assert_eq!(data.as_ref(), b"module.exports = 42;\n");
    let meta = client.stat(&key).await.unwrap();
    assert_eq!(meta.cache_control.as_deref(), Some("max-age=0, s-maxage=60"));
}

#[tokio::test]
async fn test_upload_stream_source_error_sends_nothing() {
    let (client, backends) = memory_client(single_config());
    let chunks = vec![
        Ok(Bytes::from_static(b"partial")),
        Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "source closed")),
    ];
    let err = client
        .upload_stream(futures::stream::iter(chunks), UploadOptions::new("/broken"))
        .await
        .unwrap_err();
    assert_matches!(err, Error::Io(_));
    assert_eq!(backends[0].put_count(), 0);
}

#[tokio::test]
async fn test_upload_sets_cache_control() {
    let (client, _) = memory_client(round_robin_config());
    let key = example_key("cache");
    client
        .upload_buffer(Bytes::from_static(b"cached"), UploadOptions::new(key.clone()))
        .await
        .unwrap();
    let meta = client.stat(&key).await.unwrap();
    assert_eq!(meta.cache_control.as_deref(), Some("max-age=0, s-maxage=60"));
    assert_eq!(meta.size, 6);
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let (client, _) = memory_client(master_slave_config());
    assert_ok!(client.remove("/never/uploaded").await);
    assert_ok!(client.remove("/never/uploaded").await);
}

#[tokio::test]
async fn test_round_robin_rotates_in_order() {
    let (client, backends) = memory_client(round_robin_config());
    let key = example_key("rr");
    // One upload lands on node a and advances the cursor
    client
        .upload_buffer(Bytes::from_static(b"v"), UploadOptions::new(key.clone()))
        .await
        .unwrap();

    for _ in 0..3 {
        client.stat(&key).await.unwrap();
    }
    // Operations 1..4 went to a, b, c, a
    assert_eq!(backends[0].put_count(), 1);
    assert_eq!(backends[1].head_count(), 1);
    assert_eq!(backends[2].head_count(), 1);
    assert_eq!(backends[0].head_count(), 1);
}

#[tokio::test]
async fn test_round_robin_retries_next_node_without_skipping() {
    let (client, backends) = memory_client(round_robin_config());
    let key = example_key("retry");
    client
        .upload_buffer(Bytes::from_static(b"v"), UploadOptions::new(key.clone()))
        .await
        .unwrap();

    backends[1].set_offline(true);
    // Scheduled on b, retried on c
    let data = client.read_bytes(&key).await.unwrap();
    assert_eq!(data.as_ref(), b"v");
    assert_eq!(backends[1].get_count(), 1);
    assert_eq!(backends[2].get_count(), 1);

    // The retry did not move the cursor: the next operation goes to c
    client.read_bytes(&key).await.unwrap();
    assert_eq!(backends[2].get_count(), 2);
    assert_eq!(backends[0].get_count(), 0);

    let stats = client.node_stats();
    assert!(!stats[1].reachable);
    assert_eq!(stats[1].failures, 1);
}

#[tokio::test]
async fn test_round_robin_both_attempts_fail() {
    let (client, backends) = memory_client(round_robin_config());
    backends[0].set_offline(true);
    backends[1].set_offline(true);

    let err = client.stat("/any").await.unwrap_err();
    assert_eq!(err.name(), "ConnectivityError");
    assert_eq!(backends[2].request_count(), 0);
}

#[tokio::test]
async fn test_master_slave_read_fails_over_to_secondary() {
    let (client, backends) = memory_client(master_slave_config());
    let (primary, secondary) = (&backends[0], &backends[1]);
    let key = example_key("ms");
    client
        .upload_buffer(Bytes::from_static(b"payload"), UploadOptions::new(key.clone()))
        .await
        .unwrap();
    assert_eq!(primary.put_count(), 1);
    assert_eq!(secondary.put_count(), 0);

    primary.set_offline(true);
    let dir = tempfile::tempdir().unwrap();
    client.download(&key, dir.path().join("out")).await.unwrap();
    assert_eq!(secondary.get_count(), 1);

    // Primary is now marked: later reads go straight to the secondary
    client.read_bytes(&key).await.unwrap();
    assert_eq!(primary.get_count(), 1);
    assert_eq!(secondary.get_count(), 2);
}

#[tokio::test]
async fn test_master_slave_write_fails_fast_while_primary_down() {
    let (client, backends) = memory_client(master_slave_config());
    let (primary, secondary) = (&backends[0], &backends[1]);
    primary.set_offline(true);

    let err = client
        .upload_buffer(Bytes::from_static(b"a"), UploadOptions::new("/k"))
        .await
        .unwrap_err();
    assert_matches!(err, Error::Connectivity { ref node, .. } if node == "primary");

    // Marked now; no further attempt reaches the primary
    let err = client.remove("/k").await.unwrap_err();
    assert_eq!(err.name(), "ConnectivityError");
    assert_eq!(primary.put_count(), 1);
    assert_eq!(primary.delete_count(), 0);
    assert_eq!(secondary.request_count(), 0);

    primary.set_offline(false);
    client.scheduler().mark_reachable("primary").unwrap();
    client
        .upload_buffer(Bytes::from_static(b"a"), UploadOptions::new("/k"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_master_slave_mark_expires() {
    let mut config = master_slave_config();
    config.unreachable_ttl_secs = 1;
    let (client, backends) = memory_client(config);

    backends[0].set_offline(true);
    assert_err!(
        client
            .upload_buffer(Bytes::from_static(b"a"), UploadOptions::new("/k"))
            .await
    );
    backends[0].set_offline(false);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    client
        .upload_buffer(Bytes::from_static(b"a"), UploadOptions::new("/k"))
        .await
        .unwrap();
    assert!(client.node_stats()[0].reachable);
}

#[tokio::test]
async fn test_health_monitor_restores_primary() {
    let mut config = master_slave_config();
    config.unreachable_ttl_secs = 0;
    config.health_check.interval_secs = 1;
    let (client, backends) = memory_client(config);

    backends[0].set_offline(true);
    assert_err!(client.stat("/k").await);
    assert!(!client.node_stats()[0].reachable);

    backends[0].set_offline(false);
    let monitor = client.start_health_monitor();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(client.node_stats()[0].reachable);
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_no_such_key_is_not_retried() {
    let (client, backends) = memory_client(round_robin_config());
    let err = client.read_bytes("/missing").await.unwrap_err();
    assert_matches!(err, Error::NoSuchKey { ref key, .. } if key == "/missing");
    assert_eq!(backends.iter().map(|b| b.get_count()).sum::<u64>(), 1);
    assert!(client.node_stats().iter().all(|s| s.reachable));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_round_robin_is_fair() {
    let (client, backends) = memory_client(round_robin_config());
    let client = Arc::new(client);
    client
        .upload_buffer(Bytes::from_static(b"v"), UploadOptions::new("/fair"))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..299)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.stat("/fair").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // 300 operations in total, 100 per node
    for backend in &backends {
        assert_eq!(backend.put_count() + backend.head_count(), 100);
    }
}

#[test]
fn test_invalid_configurations() {
    let no_primary = ClientConfig::cluster(
        BUCKET,
        SchedulePolicy::MasterSlave,
        vec![NodeConfig::new("http://a"), NodeConfig::new("http://b")],
    );
    assert_matches!(OssClient::new(no_primary), Err(Error::Configuration(_)));

    let no_schedule = ClientConfig {
        schedule: None,
        ..round_robin_config()
    };
    assert_matches!(OssClient::new(no_schedule), Err(Error::Configuration(_)));

    let no_nodes = ClientConfig::cluster(BUCKET, SchedulePolicy::RoundRobin, vec![]);
    assert_eq!(OssClient::new(no_nodes).unwrap_err().name(), "ConfigurationError");
}
