//! Integration tests for btn-core
//!
//! These tests use wiremock to simulate the BTN server and exercise rule
//! fetching and ping submission end to end.


use btn_core::{
    BtnRule, PingBuilder, PingSubmitter, RuleFetcher, RuleUpdate, SubmitOutcome,
};
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_helpers::*;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn submitter(
    client: Arc<btn_core::BtnClient>,
    downloaders: Vec<Arc<dyn btn_core::Downloader>>,
    enabled: bool,
) -> PingSubmitter {
    let builder = PingBuilder::new(downloaders, Arc::new(AtomicU64::new(0)));
    PingSubmitter::new(client, builder, enabled)
}

// =============================================================================
// Rule Fetch Tests
// =============================================================================

#[tokio::test]
async fn test_rule_not_modified_keeps_state() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = temp_dir.path().join("rule.json");
    std::fs::write(&cache, r#"{"version":"7","cached":true}"#).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .and(query_param("rev", "7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, &cache, btn_config(&server, &["rule"], 10, 0));
    client.set_rule(BtnRule::parse(r#"{"version":"7"}"#).unwrap());
    let fetcher = RuleFetcher::new(Arc::clone(&client));

    assert_eq!(fetcher.update_rule().await, RuleUpdate::NotModified);
    assert_eq!(client.rule().unwrap().version(), Some("7"));
    assert_eq!(
        std::fs::read_to_string(&cache).unwrap(),
        r#"{"version":"7","cached":true}"#
    );
}

#[tokio::test]
async fn test_rule_update_writes_cache() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = temp_dir.path().join("rule.json");
    let body = r#"{"version":"9","peer_id":{"xunlei":["-XL0012-"]},"ip":{}}"#;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .and(query_param("rev", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, &cache, btn_config(&server, &["rule"], 10, 0));
    let fetcher = RuleFetcher::new(Arc::clone(&client));

    assert_eq!(
        fetcher.update_rule().await,
        RuleUpdate::Updated {
            version: Some("9".to_string())
        }
    );
    let rule = client.rule().expect("Rule should be loaded");
    assert_eq!(rule.version(), Some("9"));
    assert_eq!(rule.raw(), body);
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), body);
}

#[tokio::test]
async fn test_rule_request_carries_identity_headers() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .and(header("X-BTN-AppID", APP_ID))
        .and(header("X-BTN-AppSecret", APP_SECRET))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["rule"], 10, 0),
    );
    let fetcher = RuleFetcher::new(client);
    assert_eq!(fetcher.update_rule().await, RuleUpdate::NotModified);
}

#[tokio::test]
async fn test_rule_disabled_without_ability() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 10, 0),
    );
    let fetcher = RuleFetcher::new(client);
    assert_eq!(fetcher.update_rule().await, RuleUpdate::Disabled);
}

#[tokio::test]
async fn test_rule_server_error_keeps_previous_rule() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = temp_dir.path().join("rule.json");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .respond_with(ResponseTemplate::new(500).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, &cache, btn_config(&server, &["rule"], 10, 0));
    client.set_rule(BtnRule::parse(r#"{"version":"7"}"#).unwrap());
    let fetcher = RuleFetcher::new(Arc::clone(&client));

    assert_eq!(fetcher.update_rule().await, RuleUpdate::Failed);
    assert_eq!(client.rule().unwrap().version(), Some("7"));
    assert!(!cache.exists());
}

#[tokio::test]
async fn test_rule_malformed_body_keeps_previous_rule() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = temp_dir.path().join("rule.json");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = test_client(&server, &cache, btn_config(&server, &["rule"], 10, 0));
    client.set_rule(BtnRule::parse(r#"{"version":"7"}"#).unwrap());
    let fetcher = RuleFetcher::new(Arc::clone(&client));

    assert_eq!(fetcher.update_rule().await, RuleUpdate::Failed);
    assert_eq!(client.rule().unwrap().version(), Some("7"));
    assert!(!cache.exists());
}

#[tokio::test]
async fn test_rule_cache_write_failure_keeps_new_rule() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let blocker = temp_dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    let cache = blocker.join("rule.json");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"version":"2"}"#))
        .mount(&server)
        .await;

    let client = test_client(&server, &cache, btn_config(&server, &["rule"], 10, 0));
    let fetcher = RuleFetcher::new(Arc::clone(&client));

    assert!(matches!(fetcher.update_rule().await, RuleUpdate::Updated { .. }));
    assert_eq!(client.rule().unwrap().version(), Some("2"));
}

#[tokio::test]
async fn test_cached_rule_sets_revision() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = temp_dir.path().join("rule.json");
    std::fs::write(&cache, r#"{"version":"5"}"#).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .and(query_param("rev", "5"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, &cache, btn_config(&server, &["rule"], 10, 0));
    let fetcher = RuleFetcher::new(Arc::clone(&client));

    assert_eq!(fetcher.load_cache().await, Some("5".to_string()));
    assert_eq!(fetcher.update_rule().await, RuleUpdate::NotModified);
}

#[tokio::test]
async fn test_corrupt_cache_is_ignored() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = temp_dir.path().join("rule.json");
    std::fs::write(&cache, "not json").unwrap();

    let server = MockServer::start().await;
    let client = test_client(&server, &cache, btn_config(&server, &["rule"], 10, 0));
    let fetcher = RuleFetcher::new(Arc::clone(&client));

    assert_eq!(fetcher.load_cache().await, None);
    assert!(client.rule().is_none());
}

#[tokio::test]
async fn test_overlapping_rule_checks_send_one_request() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache = temp_dir.path().join("rule.json");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"version":"9"}"#)
                .set_delay(Duration::from_millis(300)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"version":"10"}"#))
        .mount(&server)
        .await;

    let client = test_client(&server, &cache, btn_config(&server, &["rule"], 10, 0));
    let fetcher = RuleFetcher::new(Arc::clone(&client));

    let (first, second) = tokio::join!(fetcher.update_rule(), fetcher.update_rule());
    assert_eq!(
        first,
        RuleUpdate::Updated {
            version: Some("9".to_string())
        }
    );
    assert_eq!(second, RuleUpdate::Busy);
    assert_eq!(requests_to(&server, "/rule").await.len(), 1);

    // The lock is released once the first check finishes.
    assert!(matches!(fetcher.update_rule().await, RuleUpdate::Updated { .. }));
    assert_eq!(client.rule().unwrap().version(), Some("10"));
    assert_eq!(std::fs::read_to_string(&cache).unwrap(), r#"{"version":"10"}"#);
}

#[tokio::test]
async fn test_rule_endpoint_query_is_preserved() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .and(query_param("app", "peerbanhelper"))
        .and(query_param("rev", "0"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = btn_config(&server, &["rule"], 10, 0);
    config["abilityRule"]["endpoint"] =
        serde_json::json!(format!("{}/rule?app=peerbanhelper", server.uri()));
    let client = test_client(&server, &temp_dir.path().join("rule.json"), config);
    let fetcher = RuleFetcher::new(client);

    assert_eq!(fetcher.update_rule().await, RuleUpdate::NotModified);
}

#[tokio::test]
async fn test_rule_not_modified_logs_no_warning() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["rule"], 10, 0),
    );
    client.set_rule(BtnRule::parse(r#"{"version":"7"}"#).unwrap());
    let fetcher = RuleFetcher::new(client);

    let (_guard, logs) = capture_warnings();
    assert_eq!(fetcher.update_rule().await, RuleUpdate::NotModified);
    assert!(logs.is_empty(), "unexpected warnings: {}", logs.contents());
}

#[tokio::test]
async fn test_rule_failure_logs_warning() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rule"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["rule"], 10, 0),
    );
    let fetcher = RuleFetcher::new(client);

    let (_guard, logs) = capture_warnings();
    assert_eq!(fetcher.update_rule().await, RuleUpdate::Failed);
    assert!(logs.contents().contains("BTN rule request failed"));
}

// =============================================================================
// Submission Tests
// =============================================================================

#[tokio::test]
async fn test_submit_batches_pings() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ping"))
        .and(header("Content-Encoding", "gzip"))
        .and(header("X-BTN-AppID", APP_ID))
        .respond_with(ResponseTemplate::new(200))
        .expect(5)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 3, 0),
    );
    let submitter = submitter(client, downloaders(5), true);

    let report = match submitter.submit(&CancellationToken::new()).await {
        SubmitOutcome::Completed(report) => report,
        other => panic!("Unexpected outcome: {:?}", other),
    };
    assert_eq!(report.pings, 5);
    assert_eq!(report.batches, 2);
    assert_eq!(report.sent, 5);
    assert_eq!(report.failed, 0);

    let pings: Vec<_> = requests_to(&server, "/ping")
        .await
        .iter()
        .map(decode_ping)
        .collect();
    assert_eq!(pings.len(), 5);

    let indices: Vec<_> = pings.iter().map(|p| p.batch_index).collect();
    assert_eq!(indices, vec![0, 0, 0, 1, 1]);
    assert!(pings.iter().all(|p| p.batch_size == 2));
    assert!(pings.iter().all(|p| p.submit_id == report.submit_id));

    let names: Vec<_> = pings.iter().map(|p| p.downloader.as_str()).collect();
    assert_eq!(names, vec!["dl-0", "dl-1", "dl-2", "dl-3", "dl-4"]);

    for (i, ping) in pings.iter().enumerate() {
        let info_hash = format!("{:040x}", i);
        assert_eq!(ping.peers.len(), 1);
        assert_ne!(ping.peers[0].torrent.hash, info_hash);
        assert_eq!(
            ping.peers[0].torrent.hash,
            btn_core::projection::salted_hash(&info_hash)
        );
    }
}

#[tokio::test]
async fn test_submit_zero_batch_size_sends_one_per_batch() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 0, 0),
    );
    let submitter = submitter(client, downloaders(3), true);

    let (_guard, logs) = capture_warnings();
    let report = match submitter.submit(&CancellationToken::new()).await {
        SubmitOutcome::Completed(report) => report,
        other => panic!("Unexpected outcome: {:?}", other),
    };
    assert_eq!(report.batches, 3);
    assert_eq!(report.sent, 3);
    assert!(logs.contents().contains("perBatchSize 0"));

    let pings: Vec<_> = requests_to(&server, "/ping")
        .await
        .iter()
        .map(decode_ping)
        .collect();
    let indices: Vec<_> = pings.iter().map(|p| p.batch_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(pings.iter().all(|p| p.batch_size == 3));
}

#[tokio::test]
async fn test_submit_isolates_failed_downloader() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 10, 0),
    );
    let downloaders = vec![
        FakeDownloader::new("A").failing_login().torrent("aa", 5).into_arc(),
        FakeDownloader::new("B").torrent("bb", 2).into_arc(),
    ];
    let submitter = submitter(client, downloaders, true);

    let outcome = submitter.submit(&CancellationToken::new()).await;
    assert!(matches!(outcome, SubmitOutcome::Completed(ref r) if r.pings == 1 && r.peers == 2));

    let pings: Vec<_> = requests_to(&server, "/ping")
        .await
        .iter()
        .map(decode_ping)
        .collect();
    assert_eq!(pings.len(), 1);
    assert_eq!(pings[0].downloader, "B");
    assert_eq!(pings[0].peers.len(), 2);
    assert_eq!(pings[0].batch_index, 0);
    assert_eq!(pings[0].batch_size, 1);
}

#[tokio::test]
async fn test_submit_cancellation_stops_cycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 2, 50),
    );
    let submitter = submitter(client, downloaders(4), true);
    let cancel = CancellationToken::new();

    let watcher = {
        let cancel = cancel.clone();
        let server = &server;
        async move {
            loop {
                if requests_to(server, "/ping").await.len() >= 2 {
                    cancel.cancel();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    };

    let (outcome, _) = tokio::join!(submitter.submit(&cancel), watcher);
    assert!(matches!(outcome, SubmitOutcome::Cancelled(ref r) if r.sent + r.failed <= 2));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(requests_to(&server, "/ping").await.len(), 2);
}

#[tokio::test]
async fn test_submit_continues_after_rejection() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(500).set_body_string("busy"))
        .expect(3)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 2, 0),
    );
    let submitter = submitter(client, downloaders(3), true);

    match submitter.submit(&CancellationToken::new()).await {
        SubmitOutcome::Completed(report) => {
            assert_eq!(report.sent, 0);
            assert_eq!(report.failed, 3);
            assert_eq!(report.batches, 2);
        }
        other => panic!("Unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_disabled_locally() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 2, 0),
    );
    let submitter = submitter(client, downloaders(2), false);
    assert_eq!(
        submitter.submit(&CancellationToken::new()).await,
        SubmitOutcome::Disabled
    );
}

#[tokio::test]
async fn test_submit_disabled_without_ability() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["rule"], 2, 0),
    );
    let submitter = submitter(client, downloaders(2), true);
    assert_eq!(
        submitter.submit(&CancellationToken::new()).await,
        SubmitOutcome::Disabled
    );
}

#[tokio::test]
async fn test_overlapping_submit_is_busy() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 2, 0),
    );
    let gate = Arc::new(Notify::new());
    let downloaders = vec![FakeDownloader::new("slow")
        .torrent("aa", 1)
        .gated(Arc::clone(&gate))
        .into_arc()];
    let submitter = Arc::new(submitter(client, downloaders, true));

    let first = {
        let submitter = Arc::clone(&submitter);
        tokio::spawn(async move { submitter.submit(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        submitter.submit(&CancellationToken::new()).await,
        SubmitOutcome::Busy
    );

    gate.notify_one();
    let outcome = first.await.expect("Submit task panicked");
    assert!(matches!(outcome, SubmitOutcome::Completed(ref r) if r.sent == 1));
}

#[tokio::test]
async fn test_submit_ids_differ_between_cycles() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = test_client(
        &server,
        &temp_dir.path().join("rule.json"),
        btn_config(&server, &["submit"], 10, 0),
    );
    let submitter = submitter(client, downloaders(2), true);
    let cancel = CancellationToken::new();
    submitter.submit(&cancel).await;
    submitter.submit(&cancel).await;

    let ids: HashSet<_> = requests_to(&server, "/ping")
        .await
        .iter()
        .map(|r| decode_ping(r).submit_id)
        .collect();
    assert_eq!(ids.len(), 2);
}
