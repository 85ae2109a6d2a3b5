//! Pull engine integration tests: in-memory SQLite + MockRemote.

mod common;

use common::*;
use harbor_sync::{CancelSignal, PullQuery, RemoteMethod, RemoteResponse, SyncError};
use serde_json::json;

fn todo_row(id: &str, title: &str, secs: i64) -> serde_json::Value {
    json!({ "id": id, "title": title, "version": format!("v-{}", id), "updatedAt": stamp(secs) })
}

fn tombstone(id: &str, secs: i64) -> serde_json::Value {
    json!({ "id": id, "title": "", "deleted": true, "updatedAt": stamp(secs) })
}

fn all_todos() -> Vec<PullQuery> {
    vec![PullQuery::new("todo", "all")]
}

#[tokio::test]
async fn test_pull_applies_inserts_replacements_and_deletions() {
    let (ctx, remote) = setup().await;

    remote.push_page("todo", json!([todo_row("a", "one", 10), todo_row("b", "two", 20)]));
    let first = ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();
    let todo = first.table("todo").unwrap();
    assert_eq!(todo.additions, 2);
    assert_eq!(todo.pages, 1);

    remote.push_page("todo", json!([todo_row("a", "one v2", 30), tombstone("b", 40)]));
    let second = ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();
    let todo = second.table("todo").unwrap();
    assert_eq!(todo.replacements, 1);
    assert_eq!(todo.deletions, 1);
    assert_eq!(second.total_changes(), 2);

    let items = ctx.list_items::<TodoItem>().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "one v2");

    let watermark = ctx
        .database()
        .delta_tokens()
        .get("dt.todo.all")
        .await
        .unwrap();
    assert_eq!(watermark, Some(at(40)));
}

#[tokio::test]
async fn test_first_pull_has_no_watermark_filter_and_later_pulls_do() {
    let (ctx, remote) = setup().await;

    remote.push_page("todo", json!([todo_row("a", "one", 10)]));
    ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();
    ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();

    let queries: Vec<String> = remote
        .requests_with(RemoteMethod::Get)
        .into_iter()
        .map(|r| r.query.unwrap())
        .collect();
    assert_eq!(queries.len(), 2);

    assert!(!queries[0].contains("updatedAt+ge"));
    assert!(queries[0].contains("__includedeleted=true"));
    assert!(queries[0].contains("%24top=50"));
    assert!(queries[1].contains("updatedAt+ge+2024-01-01T00%3A00%3A10"));
}

#[tokio::test]
async fn test_watermark_never_moves_backwards() {
    let (ctx, remote) = setup().await;

    remote.push_page("todo", json!([todo_row("a", "one", 50), todo_row("b", "two", 20)]));
    ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();

    remote.push_page("todo", json!([todo_row("c", "three", 5)]));
    ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();

    let tokens = ctx.database().delta_tokens();
    assert_eq!(tokens.get("dt.todo.all").await.unwrap(), Some(at(50)));
    assert_eq!(ctx.list_items::<TodoItem>().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_query_ids_track_separate_watermarks() {
    let (ctx, remote) = setup().await;

    remote.push_page("todo", json!([todo_row("a", "one", 10)]));
    remote.push_page("todo", json!([todo_row("b", "two", 99)]));
    let queries = vec![
        PullQuery::new("todo", "mine").filter("owner eq 'me'"),
        PullQuery::new("todo", "shared").page_size(5),
    ];
    ctx.pull(queries, 1, CancelSignal::never()).await.unwrap();

    let tokens = ctx.database().delta_tokens();
    assert_eq!(tokens.get("dt.todo.mine").await.unwrap(), Some(at(10)));
    assert_eq!(tokens.get("dt.todo.shared").await.unwrap(), Some(at(99)));

    let gets = remote.requests_with(RemoteMethod::Get);
    assert!(gets[0].query.as_deref().unwrap().contains("owner+eq"));
    assert!(gets[1].query.as_deref().unwrap().contains("%24top=5"));

    assert!(ctx.reset_delta_token("todo", "mine").await.unwrap());
    assert_eq!(tokens.get("dt.todo.mine").await.unwrap(), None);
    assert_eq!(tokens.get("dt.todo.shared").await.unwrap(), Some(at(99)));
}

#[tokio::test]
async fn test_pull_refused_while_table_has_pending_operations() {
    let (ctx, remote) = setup().await;
    ctx.insert_item(&TodoItem::new("1", "local")).await.unwrap();

    let err = ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap_err();

    match err {
        SyncError::PendingOperations { tables } => assert_eq!(tables, vec!["todo".to_string()]),
        other => panic!("expected PendingOperations, got {:?}", other),
    }
    assert!(remote.requests().is_empty());

    // Other tables are unaffected
    let result = ctx
        .pull(vec![PullQuery::new("tag", "all")], 1, CancelSignal::never())
        .await
        .unwrap();
    assert!(result.is_successful());
}

#[tokio::test]
async fn test_next_page_requested_only_after_previous_page_applied() {
    let (ctx, remote) = setup().await;
    remote.observe(ctx.database().clone());
    remote.set_delay(std::time::Duration::from_millis(10));

    remote.push_page(
        "todo",
        json!({
            "items": [todo_row("a", "one", 10), todo_row("b", "two", 11), todo_row("c", "three", 12)],
            "nextLink": "https://remote.test/tables/todo?page=2"
        }),
    );
    remote.push_page(
        "todo",
        json!({
            "items": [todo_row("d", "four", 13)],
            "nextLink": "https://remote.test/tables/todo?page=3"
        }),
    );
    remote.push_page("todo", json!({ "items": [todo_row("e", "five", 14)] }));
    remote.push_page("tag", json!([{ "id": "t1", "label": "x", "updatedAt": stamp(1) }]));

    let queries = vec![PullQuery::new("todo", "all"), PullQuery::new("tag", "all")];
    let result = ctx.pull(queries, 2, CancelSignal::never()).await.unwrap();

    assert!(result.is_successful());
    assert_eq!(result.table("todo").unwrap().pages, 3);
    assert_eq!(result.table("todo").unwrap().additions, 5);
    assert_eq!(result.table("tag").unwrap().additions, 1);

    let calls = remote.next_page_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].next_link, "https://remote.test/tables/todo?page=2");
    assert_eq!(calls[0].local_rows, 3);
    assert_eq!(calls[1].next_link, "https://remote.test/tables/todo?page=3");
    assert_eq!(calls[1].local_rows, 4);

    // One table never has two requests out, so two in flight means the
    // tables were fetched side by side
    assert_eq!(remote.max_in_flight(), 2);
}

#[tokio::test]
async fn test_pull_preserves_local_only_fields() {
    let (ctx, remote) = setup().await;

    let mut item = TodoItem::new("1", "local");
    item.complete = true;
    ctx.insert_item(&item).await.unwrap();
    ctx.push(&[], 1, CancelSignal::never()).await.unwrap();

    remote.push_page(
        "todo",
        json!([{ "id": "1", "title": "renamed", "version": "srv9", "updatedAt": stamp(60) }]),
    );
    let result = ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();
    assert_eq!(result.table("todo").unwrap().replacements, 1);

    let local = ctx.get_item::<TodoItem>("1").await.unwrap().unwrap();
    assert_eq!(local.title, "renamed");
    assert_eq!(local.version.as_deref(), Some("srv9"));
    assert!(local.complete);
}

#[tokio::test]
async fn test_failing_table_does_not_stop_others() {
    let (ctx, remote) = setup().await;

    remote.push_page_answer(
        "todo",
        Scripted::Respond(RemoteResponse::new(503, None)),
    );
    remote.push_page("tag", json!([{ "id": "t1", "label": "x", "updatedAt": stamp(1) }]));

    let queries = vec![PullQuery::new("todo", "all"), PullQuery::new("tag", "all")];
    let result = ctx.pull(queries, 2, CancelSignal::never()).await.unwrap();

    assert!(!result.is_successful());
    assert!(result.table("todo").unwrap().error.as_deref().unwrap().contains("503"));
    assert!(result.table("tag").unwrap().is_successful());
    assert_eq!(result.table("tag").unwrap().additions, 1);
}

#[tokio::test]
async fn test_malformed_page_fails_only_that_table() {
    let (ctx, remote) = setup().await;

    remote.push_page("todo", json!({ "items": "oops" }));
    remote.push_page("tag", json!([{ "id": "t1", "label": "x", "updatedAt": stamp(1) }]));

    let queries = vec![PullQuery::new("todo", "all"), PullQuery::new("tag", "all")];
    let result = ctx.pull(queries, 1, CancelSignal::never()).await.unwrap();

    assert!(result.table("todo").unwrap().error.is_some());
    assert!(result.table("tag").unwrap().is_successful());
    assert_eq!(ctx.list_items::<TodoItem>().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_tombstone_for_unknown_row_and_rows_without_id_are_skipped() {
    let (ctx, remote) = setup().await;

    remote.push_page(
        "todo",
        json!([tombstone("ghost", 10), { "title": "no id" }, todo_row("a", "one", 11)]),
    );
    let result = ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();

    let todo = result.table("todo").unwrap();
    assert_eq!(todo.additions, 1);
    assert_eq!(todo.deletions, 0);
    assert_eq!(todo.skipped, 2);
}

#[tokio::test]
async fn test_pull_transport_error_is_reported_per_table() {
    let (ctx, remote) = setup().await;
    remote.push_page_answer("todo", Scripted::TransportError("dns failure".into()));

    let result = ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();

    let error = result.table("todo").unwrap().error.clone().unwrap();
    assert!(error.contains("dns failure"));
}

#[tokio::test]
async fn test_pull_unknown_table_is_rejected() {
    let (ctx, remote) = setup().await;

    let err = ctx
        .pull(vec![PullQuery::new("nope", "all")], 1, CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownTable(_)));
    assert!(remote.requests().is_empty());
}

#[tokio::test]
async fn test_cancelled_pull_sends_nothing() {
    let (ctx, remote) = setup().await;
    let (handle, signal) = CancelSignal::new();
    handle.cancel();

    let err = ctx.pull(all_todos(), 1, signal).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert!(remote.requests().is_empty());
}

#[tokio::test]
async fn test_cancel_between_pages_stops_the_table() {
    let (ctx, remote) = setup().await;

    remote.push_page(
        "todo",
        json!({ "items": [todo_row("a", "one", 10)], "nextLink": "https://remote.test/next" }),
    );
    let (handle, signal) = CancelSignal::new();
    remote.cancel_after(1, handle);

    let err = ctx.pull(all_todos(), 1, signal).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));

    // The first page landed; the continuation was never requested
    assert_eq!(remote.requests().len(), 1);
    assert_eq!(ctx.list_items::<TodoItem>().await.unwrap().len(), 1);
}

// =============================================================================
// Purge
// =============================================================================

#[tokio::test]
async fn test_purge_refused_while_pending() {
    let (ctx, _remote) = setup().await;
    ctx.insert_item(&TodoItem::new("1", "local")).await.unwrap();

    let err = ctx.purge("todo", false).await.unwrap_err();
    assert!(matches!(err, SyncError::PendingOperations { .. }));
    assert!(ctx.get_item::<TodoItem>("1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_purge_with_discard_clears_rows_queue_and_tokens() {
    let (ctx, remote) = setup().await;

    remote.push_page("todo", json!([todo_row("a", "one", 10), todo_row("b", "two", 20)]));
    ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();
    ctx.insert_item(&TodoItem::new("c", "local")).await.unwrap();

    let removed = ctx.purge("todo", true).await.unwrap();
    assert_eq!(removed, 3);

    assert!(ctx.list_items::<TodoItem>().await.unwrap().is_empty());
    assert_eq!(ctx.pending_operations_count(&["todo"]).await.unwrap(), 0);
    assert_eq!(
        ctx.database().delta_tokens().get("dt.todo.all").await.unwrap(),
        None
    );

    // Next pull starts from scratch
    ctx.pull(all_todos(), 1, CancelSignal::never()).await.unwrap();
    let last = remote.requests_with(RemoteMethod::Get).pop().unwrap();
    assert!(!last.query.unwrap().contains("updatedAt+ge"));
}

#[tokio::test]
async fn test_purge_leaves_other_tables_alone() {
    let (ctx, remote) = setup().await;

    remote.push_page("todo", json!([todo_row("a", "one", 10)]));
    remote.push_page("tag", json!([{ "id": "t1", "label": "x", "updatedAt": stamp(1) }]));
    let queries = vec![PullQuery::new("todo", "all"), PullQuery::new("tag", "all")];
    ctx.pull(queries, 2, CancelSignal::never()).await.unwrap();

    assert_eq!(ctx.purge("todo", false).await.unwrap(), 1);
    assert_eq!(ctx.list_items::<Tag>().await.unwrap().len(), 1);
    assert_eq!(
        ctx.database().delta_tokens().get("dt.tag.all").await.unwrap(),
        Some(at(1))
    );
}
