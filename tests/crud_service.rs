use millstream::{CrudService, MemoryRepository, Request, Response, Status, User};
use std::sync::Arc;
use tower::ServiceExt;

fn service() -> CrudService<MemoryRepository> {
    CrudService::new(Arc::new(MemoryRepository::new()))
}

async fn send(service: &CrudService<MemoryRepository>, request: Request) -> Response {
    service.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn delete_reports_presence_honestly() {
    let service = service();

    // Nothing to delete yet.
    let response = send(&service, Request::Delete("u-1".into())).await;
    assert_eq!(response.status, Status::NotFound);

    let user = User::new("u-1", "alice", 30).with_email("alice@example.com");
    let response = send(&service, Request::create(&user).unwrap()).await;
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.record(), Some(user));

    let response = send(&service, Request::Delete("u-1".into())).await;
    assert_eq!(response.status, Status::Ok);
    assert!(response.body.is_none());

    let response = send(&service, Request::Get("u-1".into())).await;
    assert_eq!(response.status, Status::NotFound);
}

#[tokio::test]
async fn list_returns_records_in_insertion_order() {
    let repo = Arc::new(MemoryRepository::with_users([
        User::new("u-1", "alice", 30),
        User::new("u-2", "bob", 41),
        User::new("u-3", "carol", 25),
    ]));
    let service = CrudService::new(repo);

    let response = send(&service, Request::List).await;
    assert_eq!(response.status, Status::Ok);

    let ids: Vec<String> = response.records().into_iter().map(|user| user.id).collect();
    assert_eq!(ids, vec!["u-1", "u-2", "u-3"]);
}

#[tokio::test]
async fn search_matches_by_name() {
    let repo = Arc::new(MemoryRepository::with_users([
        User::new("u-1", "alice", 30),
        User::new("u-2", "bob", 41),
        User::new("u-3", "alice", 52),
    ]));
    let service = CrudService::new(repo);

    let response = send(&service, Request::Search("alice".into())).await;
    let ages: Vec<u32> = response.records().into_iter().map(|user| user.age).collect();
    assert_eq!(ages, vec![30, 52]);

    let response = send(&service, Request::Search("dave".into())).await;
    assert_eq!(response.status, Status::Ok);
    assert!(response.records().is_empty());
}

#[tokio::test]
async fn update_replaces_the_stored_record() {
    let service = service();

    let original = User::new("u-1", "alice", 30);
    send(&service, Request::create(&original).unwrap()).await;

    let updated = original.clone().with_email("alice@example.com");
    let response = send(&service, Request::update(&updated).unwrap()).await;
    assert_eq!(response.status, Status::Ok);

    let response = send(&service, Request::Get("u-1".into())).await;
    assert_eq!(response.record(), Some(updated));
}

#[tokio::test]
async fn clones_share_the_backing_repository() {
    let service = service();
    let clone = service.clone();

    send(&service, Request::create(&User::new("u-1", "alice", 30)).unwrap()).await;

    let response = send(&clone, Request::Get("u-1".into())).await;
    assert_eq!(response.status, Status::Ok);
}
