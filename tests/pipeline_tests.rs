//! End-to-end tests for the search pipeline: engine, cache and session
//! controller wired together over a scripted remote source.

use async_trait::async_trait;
use image_search::remote::ImageDto;
use image_search::{
    ImageRepository, ListItem, PageState, PaginationEngine, RemoteSource, SearchError,
    SearchResponse, SearchSession, SessionController, SessionHandle, Storage,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum Reply {
    Hits { count: usize, total_hits: u64 },
    BadRequest,
    UnknownHost,
    Transport,
}

/// Remote source answering from a script; unscripted pages return 20 of 100 hits
#[derive(Default)]
struct ScriptedRemote {
    replies: Mutex<HashMap<(String, u32), Reply>>,
    gates: Mutex<HashMap<(String, u32), Arc<Notify>>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedRemote {
    fn reply(&self, query: &str, page: u32, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert((query.to_string(), page), reply);
    }

    /// Hold the response for (query, page) until the returned notify fires
    fn gate(&self, query: &str, page: u32) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert((query.to_string(), page), Arc::clone(&notify));
        notify
    }

    fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self, query: &str, page: u32) -> usize {
        self.calls()
            .iter()
            .filter(|(q, p)| q == query && *p == page)
            .count()
    }
}

#[async_trait]
impl RemoteSource for ScriptedRemote {
    async fn fetch_page(
        &self,
        query: &str,
        page_size: u32,
        page: u32,
    ) -> Result<SearchResponse, SearchError> {
        let key = (query.to_string(), page);
        self.calls.lock().unwrap().push(key.clone());

        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(Reply::Hits {
                count: page_size as usize,
                total_hits: 100,
            });

        match reply {
            Reply::Hits { count, total_hits } => Ok(SearchResponse {
                hits: (0..count).map(|i| make_dto(query, page, i)).collect(),
                total: total_hits,
                total_hits,
            }),
            Reply::BadRequest => Err(SearchError::ClientRequest {
                status: 400,
                message: "[ERROR 400] \"page\" is out of valid range.".to_string(),
            }),
            Reply::UnknownHost => Err(SearchError::NoConnectivity(
                "dns error: failed to lookup address information".to_string(),
            )),
            Reply::Transport => Err(SearchError::Transport(
                "API error (502 Bad Gateway)".to_string(),
            )),
        }
    }
}

fn make_dto(query: &str, page: u32, index: usize) -> ImageDto {
    let query_offset = query.bytes().map(i64::from).sum::<i64>() * 100_000;
    ImageDto {
        id: query_offset + i64::from(page) * 1_000 + index as i64,
        tags: format!("{query}, photo"),
        likes: index as i64,
        image_width: 640,
        image_height: 427,
        preview_url: format!("https://cdn.example.com/{query}/{page}/{index}_150.jpg"),
        user: "photographer".to_string(),
        user_id: 42,
        ..ImageDto::default()
    }
}

fn pipeline() -> (Arc<PaginationEngine>, Arc<ScriptedRemote>) {
    let remote = Arc::new(ScriptedRemote::default());
    let engine = Arc::new(PaginationEngine::new(
        remote.clone(),
        Storage::open_in_memory().unwrap(),
    ));
    (engine, remote)
}

async fn wait_for(
    session: &SessionHandle,
    predicate: impl FnMut(&SearchSession) -> bool,
) -> SearchSession {
    tokio::time::timeout(WAIT, session.wait_for(predicate))
        .await
        .expect("timed out waiting for session state")
        .unwrap()
}

async fn wait_for_call(remote: &ScriptedRemote, query: &str, page: u32) {
    tokio::time::timeout(WAIT, async {
        while remote.call_count(query, page) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("remote was never called");
}

fn settled(session: &SearchSession) -> bool {
    !session.pages.is_empty() && !session.is_loading()
}

#[tokio::test]
async fn test_uncached_page_fetches_once_then_serves_from_cache() {
    let (engine, remote) = pipeline();

    let first = engine.load_page("cats", 1).await.unwrap();
    assert_eq!(remote.call_count("cats", 1), 1);
    assert_eq!(first.items.len(), 20);

    let second = engine.load_page("cats", 1).await.unwrap();
    assert_eq!(remote.call_count("cats", 1), 1);
    assert_eq!(first.items, second.items);
}

#[tokio::test]
async fn test_last_page_from_total_hits() {
    let (engine, remote) = pipeline();
    remote.reply("birds", 2, Reply::Hits { count: 20, total_hits: 45 });
    remote.reply("birds", 3, Reply::Hits { count: 20, total_hits: 45 });

    let page_two = engine.load_page("birds", 2).await.unwrap();
    assert!(!page_two.is_last_page);

    let page_three = engine.load_page("birds", 3).await.unwrap();
    assert!(page_three.is_last_page);
}

#[tokio::test]
async fn test_short_page_is_last() {
    let (engine, remote) = pipeline();
    remote.reply("birds", 2, Reply::Hits { count: 19, total_hits: 45 });

    let page = engine.load_page("birds", 2).await.unwrap();
    assert!(page.is_last_page);
}

#[tokio::test]
async fn test_out_of_range_page_is_empty_last_page() {
    let (engine, remote) = pipeline();
    remote.reply("cats", 1, Reply::BadRequest);

    let page = engine.load_page("cats", 1).await.unwrap();
    assert!(page.items.is_empty());
    assert!(page.is_last_page);
}

#[tokio::test]
async fn test_other_failures_propagate() {
    let (engine, remote) = pipeline();
    remote.reply("cats", 1, Reply::Transport);
    remote.reply("dogs", 1, Reply::UnknownHost);

    let err = engine.load_page("cats", 1).await.unwrap_err();
    assert!(matches!(err, SearchError::Transport(_)));

    let err = engine.load_page("dogs", 1).await.unwrap_err();
    assert!(err.is_no_connectivity());

    // Nothing was cached, so the next attempt goes back to the remote
    remote.reply("cats", 1, Reply::Hits { count: 20, total_hits: 100 });
    engine.load_page("cats", 1).await.unwrap();
    assert_eq!(remote.call_count("cats", 1), 2);
}

#[tokio::test]
async fn test_fresh_query_first_page() {
    let (engine, _remote) = pipeline();
    let session = SessionController::spawn(engine);

    session.set_query("cats").await.unwrap();
    let state = wait_for(&session, settled).await;

    assert_eq!(state.query, "cats");
    assert_eq!(state.image_count(), 20);
    assert_eq!(state.next_page, 2);
    assert!(!state.is_end_of_list);
    assert!(state.can_load_more());

    session.shutdown().await;
}

#[tokio::test]
async fn test_load_next_page_appends_success() {
    let (engine, remote) = pipeline();
    let session = SessionController::spawn(engine);

    session.set_query("cats").await.unwrap();
    wait_for(&session, settled).await;

    session.load_next_page().await.unwrap();
    let state = wait_for(&session, |s| s.next_page == 3 && !s.is_loading()).await;

    assert_eq!(state.pages.len(), 2);
    assert!(state
        .pages
        .iter()
        .all(|p| matches!(p, PageState::Success(items) if items.len() == 20)));
    assert!(!state.list_items().contains(&ListItem::Loading));
    assert_eq!(remote.calls(), vec![("cats".to_string(), 1), ("cats".to_string(), 2)]);

    // Repeating the same query does not load more
    session.set_query("cats").await.unwrap();
    session.select_item(Some(7)).await.unwrap();
    let state = wait_for(&session, |s| s.selected_item == Some(7)).await;
    assert_eq!(state.next_page, 3);
    assert_eq!(remote.calls().len(), 2);

    session.shutdown().await;
}

#[tokio::test]
async fn test_query_change_cancels_in_flight_fetch() {
    let (engine, remote) = pipeline();
    let release_cats = remote.gate("cats", 2);
    let session = SessionController::spawn(engine);

    session.set_query("cats").await.unwrap();
    wait_for(&session, settled).await;

    session.load_next_page().await.unwrap();
    wait_for_call(&remote, "cats", 2).await;
    assert!(session.snapshot().is_loading());

    session.set_query("dogs").await.unwrap();
    let state = wait_for(&session, |s| s.query == "dogs" && settled(s)).await;
    assert_eq!(state.next_page, 2);
    assert_eq!(state.pages.len(), 1);

    // A late "cats" page must not leak into the "dogs" session
    release_cats.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = session.snapshot();
    assert_eq!(state.query, "dogs");
    assert_eq!(state.image_count(), 20);
    assert!(state.list_items().iter().all(|row| match row {
        ListItem::Image(item) => item.search_query.as_deref() == Some("dogs"),
        _ => false,
    }));

    session.shutdown().await;
}

#[tokio::test]
async fn test_bad_request_on_first_page_shows_empty_result() {
    let (engine, remote) = pipeline();
    remote.reply("qwxzv", 1, Reply::BadRequest);
    let session = SessionController::spawn(engine);

    session.set_query("qwxzv").await.unwrap();
    let state = wait_for(&session, settled).await;

    assert_eq!(state.list_items(), vec![ListItem::EmptyResult]);
    assert!(!state.is_error());
    assert!(state.is_end_of_list);

    session.shutdown().await;
}

#[tokio::test]
async fn test_unknown_host_shows_no_connectivity_then_retry_recovers() {
    let (engine, remote) = pipeline();
    remote.reply("cats", 1, Reply::UnknownHost);
    let session = SessionController::spawn(engine);

    session.set_query("cats").await.unwrap();
    let state = wait_for(&session, settled).await;
    assert_eq!(state.list_items(), vec![ListItem::NoConnectivity]);
    assert!(!state.is_error());

    remote.reply("cats", 1, Reply::Hits { count: 20, total_hits: 100 });
    session.retry().await.unwrap();
    let state = wait_for(&session, |s| s.image_count() == 20 && !s.is_loading()).await;
    assert_eq!(state.pages.len(), 1);
    assert_eq!(state.next_page, 2);

    session.shutdown().await;
}

#[tokio::test]
async fn test_transport_failure_shows_error_banner() {
    let (engine, remote) = pipeline();
    remote.reply("cats", 2, Reply::Transport);
    let session = SessionController::spawn(engine);

    session.set_query("cats").await.unwrap();
    wait_for(&session, settled).await;
    session.load_next_page().await.unwrap();
    let state = wait_for(&session, |s| s.is_error()).await;

    let rows = state.list_items();
    assert_eq!(rows.len(), 21);
    assert!(matches!(rows.last(), Some(ListItem::Error(message)) if message.contains("502")));
    assert_eq!(state.next_page, 2);

    session.shutdown().await;
}

#[tokio::test]
async fn test_item_details_after_search() {
    let (engine, _remote) = pipeline();
    let session = SessionController::spawn(engine);

    session.set_query("cats").await.unwrap();
    let state = wait_for(&session, settled).await;
    let first = match &state.list_items()[0] {
        ListItem::Image(item) => item.clone(),
        other => panic!("unexpected row {other:?}"),
    };

    session.select_item(Some(first.id)).await.unwrap();
    let state = wait_for(&session, |s| s.selected_item.is_some()).await;
    assert_eq!(state.selected().map(|i| i.id), Some(first.id));

    let details = session.item_details(first.id).await.unwrap().unwrap();
    assert_eq!(details, first);
    assert_eq!(details.tag_list(), vec!["cats", "photo"]);
    assert!(session.item_details(-1).await.unwrap().is_none());

    session.shutdown().await;
}
