use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use sticky_player::nowplaying::{LiveMetadataSnapshot, LiveMode};
use sticky_player::poller::NowPlayingPoller;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serves a failure, then an empty answer, then a DJ slot forever.
async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> (StatusCode, String) {
    match hits.fetch_add(1, Ordering::SeqCst) {
        0 => (StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
        1 => (StatusCode::OK, r#"{"nowPlaying":null}"#.into()),
        _ => (
            StatusCode::OK,
            r#"{"nowPlaying":{"title":"Blue","artist":"Joni","mode":"dj","djName":"Karesse"}}"#
                .into(),
        ),
    }
}

async fn serve(hits: Arc<AtomicUsize>) -> String {
    let app = Router::new()
        .route("/now-playing", get(flaky))
        .with_state(hits);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/now-playing")
}

#[tokio::test]
async fn poller_skips_failures_and_empty_answers() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve(hits.clone()).await;

    let (tx, mut rx) = mpsc::channel::<LiveMetadataSnapshot>(8);
    let handle = NowPlayingPoller::new(url, Duration::from_millis(20))
        .unwrap()
        .spawn(tx);

    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("a snapshot arrives")
        .expect("channel open");
    assert_eq!(snapshot.mode, LiveMode::DjLive);
    assert_eq!(snapshot.title, "Blue");
    assert_eq!(snapshot.dj_name.as_deref(), Some("Karesse"));
    assert!(hits.load(Ordering::SeqCst) >= 3);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_the_task_and_closes_the_channel() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve(hits.clone()).await;

    let (tx, mut rx) = mpsc::channel::<LiveMetadataSnapshot>(64);
    let handle = NowPlayingPoller::new(url, Duration::from_millis(20))
        .unwrap()
        .spawn(tx);
    handle.shutdown().await;

    let after = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    // at most a request that was already on the wire when cancelled
    assert!(hits.load(Ordering::SeqCst) <= after + 1);

    // the sender went away with the task; drain whatever was sent before
    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok());
}

#[tokio::test]
async fn fetch_reports_http_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve(hits).await;
    let poller = NowPlayingPoller::new(url, Duration::from_secs(60)).unwrap();

    assert!(poller.fetch().await.is_err());
    assert!(poller.fetch().await.unwrap().is_none());
    assert!(poller.fetch().await.unwrap().is_some());
}
