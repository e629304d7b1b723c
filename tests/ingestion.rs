//! End-to-end ingestion: wiremock-served feeds → HTTP fetcher → parser →
//! SQLite, driven by the scheduler.
//!
//! Each test gets its own file-backed database in a temp directory so
//! concurrent feed saves go through real SQLite locking.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use newsroom::feed::{
    FeedDirectory, FeedProcessor, FeedSource, HttpFetcher, Pipeline, Stage, SyndicationParser,
};
use newsroom::scheduler::{Scheduler, SchedulerConfig};
use newsroom::storage::Database;

const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
    <title>Example News</title>
    <link>https://example.com/news</link>
    <description>Everything that happened</description>
    <item>
        <title>First</title>
        <link>https://example.com/news/first</link>
        <description>One</description>
        <pubDate>Mon, 02 Jan 2006 15:04:05 MST</pubDate>
    </item>
    <item>
        <title>Second</title>
        <link>https://example.com/news/second</link>
        <description>Two</description>
        <pubDate>Tue, 03 Jan 2006 12:00:00 GMT</pubDate>
    </item>
    <item>
        <title>Undated</title>
        <link>https://example.com/news/undated</link>
        <pubDate>not-a-date</pubDate>
    </item>
</channel>
</rss>"#;

fn rss_with_items(prefix: &str, count: usize) -> String {
    let items: String = (0..count)
        .map(|i| {
            format!(
                "<item><title>{prefix} {i}</title><link>https://{prefix}.example.com/{i}</link>\
                 <pubDate>Wed, 04 Jan 2006 0{i}:00:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{prefix}</title>{items}</channel></rss>"#)
}

async fn test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("news.db");
    let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
    (dir, db)
}

fn pipeline(db: &Database, sources: &[FeedSource]) -> Pipeline {
    Pipeline::new(
        Arc::new(HttpFetcher::new(tracing::Span::none()).unwrap()),
        Arc::new(SyndicationParser::new(tracing::Span::none())),
        Arc::new(db.clone()),
        Arc::new(FeedDirectory::new(sources)),
        tracing::Span::none(),
    )
}

async fn serve(server: &MockServer, route: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_string(body)
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_process_feed_stores_dated_entries() {
    let server = MockServer::start().await;
    serve(&server, "/rss", 200, RSS).await;
    let url = format!("{}/rss", server.uri());
    let (_dir, db) = test_db().await;

    let report = pipeline(&db, &[])
        .process_feed(&CancellationToken::new(), &url)
        .await
        .unwrap();
    assert_eq!(report.found, 2);
    assert_eq!(report.saved, 2);

    let stored = db.get_recent(10).await.unwrap();
    let summary: Vec<(&str, &str)> = stored
        .iter()
        .map(|e| (e.title.as_str(), e.link.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Second", "https://example.com/news/second"),
            ("First", "https://example.com/news/first"),
        ]
    );
    assert_eq!(
        stored[0].published_at,
        Utc.with_ymd_and_hms(2006, 1, 3, 12, 0, 0).unwrap()
    );
    // The MST abbreviation carries no offset
    assert_eq!(
        stored[1].published_at,
        Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap()
    );
}

#[tokio::test]
async fn test_reprocessing_unchanged_feed_saves_nothing() {
    let server = MockServer::start().await;
    serve(&server, "/rss", 200, RSS).await;
    let url = format!("{}/rss", server.uri());
    let (_dir, db) = test_db().await;
    let pipeline = pipeline(&db, &[]);
    let cancel = CancellationToken::new();

    let first = pipeline.process_feed(&cancel, &url).await.unwrap();
    let second = pipeline.process_feed(&cancel, &url).await.unwrap();

    assert_eq!(first.saved, 2);
    assert_eq!(second.found, 2);
    assert_eq!(second.saved, 0);
    assert_eq!(db.count_entries().await.unwrap(), 2);
}

#[tokio::test]
async fn test_http_error_reports_fetch_stage_with_name() {
    let server = MockServer::start().await;
    serve(&server, "/gone", 404, "").await;
    let url = format!("{}/gone", server.uri());
    let (_dir, db) = test_db().await;
    let sources = [FeedSource {
        name: "Gone Daily".to_string(),
        url: url.clone(),
    }];

    let err = pipeline(&db, &sources)
        .process_feed(&CancellationToken::new(), &url)
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Fetch);
    assert_eq!(err.feed(), "Gone Daily");
    assert_eq!(db.count_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cycle_isolates_one_broken_feed() {
    let server = MockServer::start().await;
    let mut urls = Vec::new();
    for name in ["alpha", "bravo", "charlie", "delta"] {
        serve(&server, &format!("/{name}"), 200, &rss_with_items(name, 3)).await;
        urls.push(format!("{}/{name}", server.uri()));
    }
    serve(&server, "/broken", 200, "<html>not a feed</html>").await;
    urls.push(format!("{}/broken", server.uri()));

    let (_dir, db) = test_db().await;
    let scheduler = Scheduler::new(
        Arc::new(pipeline(&db, &[])),
        urls,
        SchedulerConfig::default(),
        tracing::Span::none(),
    );

    let summary = scheduler.run_cycle().await;
    assert_eq!(summary.total, 5);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.entries_saved, 12);
    assert_eq!(db.count_entries().await.unwrap(), 12);

    // Second cycle: same documents, nothing new
    let summary = scheduler.run_cycle().await;
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.entries_saved, 0);
}

#[tokio::test]
async fn test_slow_feed_times_out_without_blocking_others() {
    let server = MockServer::start().await;
    serve(&server, "/fast", 200, &rss_with_items("fast", 2)).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss_with_items("slow", 2))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let (_dir, db) = test_db().await;
    let scheduler = Scheduler::new(
        Arc::new(pipeline(&db, &[])),
        vec![format!("{}/fast", server.uri()), format!("{}/slow", server.uri())],
        SchedulerConfig {
            unit_timeout: Duration::from_millis(500),
            ..SchedulerConfig::default()
        },
        tracing::Span::none(),
    );

    let summary = scheduler.run_cycle().await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(summary.elapsed < Duration::from_secs(5));
    assert_eq!(db.count_entries().await.unwrap(), 2);
}

#[tokio::test]
async fn test_stopped_scheduler_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_items("x", 2)))
        .expect(0)
        .mount(&server)
        .await;

    let (_dir, db) = test_db().await;
    let scheduler = Scheduler::new(
        Arc::new(pipeline(&db, &[])),
        vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())],
        SchedulerConfig::default(),
        tracing::Span::none(),
    );

    scheduler.stop();
    let summary = scheduler.run_cycle().await;
    assert_eq!(summary.cancelled, 2);
    assert_eq!(db.count_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_running_scheduler_ingests_then_shuts_down() {
    let server = MockServer::start().await;
    serve(&server, "/rss", 200, RSS).await;
    let (_dir, db) = test_db().await;
    let scheduler = Scheduler::new(
        Arc::new(pipeline(&db, &[])),
        vec![format!("{}/rss", server.uri())],
        SchedulerConfig::default(),
        tracing::Span::none(),
    );

    scheduler.start().unwrap();
    // The first cycle starts immediately; poll until it lands
    let mut stored = 0;
    for _ in 0..50 {
        stored = db.count_entries().await.unwrap();
        if stored == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(stored, 2);
    scheduler.stop();
    scheduler.wait().await;
    db.close().await;

    assert_eq!(
        scheduler.state(),
        newsroom::scheduler::SchedulerState::Stopped
    );
}
