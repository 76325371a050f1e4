//! CRUD transport over the repository, as a tower service.
//!
//! [`CrudService`] exposes the [`Repository`] capability set behind one
//! `tower_service::Service` taking [`Request`] and answering [`Response`].
//! Outcomes are encoded in the response [`Status`], never in the service
//! error channel: the service itself is infallible, so middleware stacks
//! treat delivery and domain failure separately.
//!
//! Payloads cross the boundary as raw JSON, the way an HTTP adapter would
//! hand them over. A payload that does not decode into a
//! [`User`](crate::repo::User) is answered with
//! [`Status::BadRequest`] instead of panicking or dying in the decoder.

use crate::error::{Failure, RepoError};
use crate::repo::{Repository, User};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;

/// One transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Request {
    /// Store a new record from a JSON payload.
    Create(Value),
    /// Fetch one record by id.
    Get(String),
    /// Replace an existing record from a JSON payload.
    Update(Value),
    /// Remove one record by id.
    Delete(String),
    /// Fetch every record.
    List,
    /// Fetch records matching a name exactly.
    Search(String),
}

impl Request {
    /// A [`Request::Create`] carrying `user` serialized as its payload.
    pub fn create(user: &User) -> Result<Self, serde_json::Error> {
        Ok(Self::Create(serde_json::to_value(user)?))
    }

    /// A [`Request::Update`] carrying `user` serialized as its payload.
    pub fn update(user: &User) -> Result<Self, serde_json::Error> {
        Ok(Self::Update(serde_json::to_value(user)?))
    }
}

/// Outcome class of a transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation succeeded.
    Ok,
    /// No record under the requested id.
    NotFound,
    /// An insert collided with an existing id.
    Conflict,
    /// The payload did not decode into a record.
    BadRequest,
    /// The adapter or store failed.
    ServerError,
}

impl Status {
    /// The HTTP status code this outcome maps to.
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NotFound => 404,
            Status::Conflict => 409,
            Status::BadRequest => 400,
            Status::ServerError => 500,
        }
    }
}

/// Transport answer: an outcome class plus an optional JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: Option<Value>,
}

impl Response {
    fn ok_json<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self { status: Status::Ok, body: Some(body) },
            Err(err) => Self::server_error(err),
        }
    }

    fn ok_empty() -> Self {
        Self { status: Status::Ok, body: None }
    }

    fn not_found(id: &str) -> Self {
        Self {
            status: Status::NotFound,
            body: Some(json!({ "error": format!("no user with id {id}") })),
        }
    }

    fn conflict(failure: &Failure) -> Self {
        Self {
            status: Status::Conflict,
            body: Some(json!({ "error": failure.to_string() })),
        }
    }

    fn bad_request(err: impl std::fmt::Display) -> Self {
        Self {
            status: Status::BadRequest,
            body: Some(json!({ "error": err.to_string() })),
        }
    }

    fn server_error(err: impl std::fmt::Display) -> Self {
        Self {
            status: Status::ServerError,
            body: Some(json!({ "error": err.to_string() })),
        }
    }

    /// Decode the body as one record.
    pub fn record(&self) -> Option<User> {
        self.body.as_ref().and_then(|body| serde_json::from_value(body.clone()).ok())
    }

    /// Decode the body as a record listing.
    pub fn records(&self) -> Vec<User> {
        self.body
            .as_ref()
            .and_then(|body| serde_json::from_value(body.clone()).ok())
            .unwrap_or_default()
    }
}

/// The repository capability set served as one tower service.
pub struct CrudService<R> {
    repo: Arc<R>,
}

impl<R> CrudService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }
}

impl<R> Clone for CrudService<R> {
    fn clone(&self) -> Self {
        Self { repo: Arc::clone(&self.repo) }
    }
}

impl<R> std::fmt::Debug for CrudService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudService").finish_non_exhaustive()
    }
}

impl<R: Repository> Service<Request> for CrudService<R> {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let repo = Arc::clone(&self.repo);
        Box::pin(async move { Ok(handle(&*repo, request).await) })
    }
}

fn is_duplicate(failure: &Failure) -> bool {
    matches!(failure.downcast_ref::<RepoError>(), Some(RepoError::DuplicateId(_)))
}

async fn handle<R: Repository>(repo: &R, request: Request) -> Response {
    match request {
        Request::Create(payload) => {
            let user: User = match serde_json::from_value(payload) {
                Ok(user) => user,
                Err(err) => return Response::bad_request(err),
            };
            tracing::debug!(id = %user.id, "Creating user");
            match repo.insert(user).resolve().await {
                Ok(Some(stored)) => Response::ok_json(&stored),
                Ok(None) => Response::server_error("insert resolved to nothing"),
                Err(failure) if is_duplicate(&failure) => Response::conflict(&failure),
                Err(failure) => Response::server_error(failure),
            }
        }
        Request::Get(id) => match repo.find_by_id(&id).resolve().await {
            Ok(Some(user)) => Response::ok_json(&user),
            Ok(None) => Response::not_found(&id),
            Err(failure) => Response::server_error(failure),
        },
        Request::Update(payload) => {
            let user: User = match serde_json::from_value(payload) {
                Ok(user) => user,
                Err(err) => return Response::bad_request(err),
            };
            // Update is replace-if-present: a missing id is reported, not
            // upserted.
            match repo.find_by_id(&user.id).resolve().await {
                Ok(Some(_)) => match repo.save(user).resolve().await {
                    Ok(Some(saved)) => Response::ok_json(&saved),
                    Ok(None) => Response::server_error("save resolved to nothing"),
                    Err(failure) => Response::server_error(failure),
                },
                Ok(None) => Response::not_found(&user.id),
                Err(failure) => Response::server_error(failure),
            }
        }
        Request::Delete(id) => match repo.delete_by_id(&id).resolve().await {
            Ok(Some(())) => Response::ok_empty(),
            Ok(None) => Response::not_found(&id),
            Err(failure) => Response::server_error(failure),
        },
        Request::List => match repo.find_all().collect().await {
            Ok(users) => Response::ok_json(&users),
            Err(failure) => Response::server_error(failure),
        },
        Request::Search(name) => match repo.find_by_name(&name).collect().await {
            Ok(users) => Response::ok_json(&users),
            Err(failure) => Response::server_error(failure),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use tower::ServiceExt;

    fn service() -> CrudService<MemoryRepository> {
        CrudService::new(Arc::new(MemoryRepository::new()))
    }

    #[tokio::test]
    async fn malformed_payloads_are_bad_requests() {
        let response = service()
            .oneshot(Request::Create(json!({ "id": 7, "name": "broken" })))
            .await
            .unwrap();
        assert_eq!(response.status, Status::BadRequest);
        assert_eq!(response.status.code(), 400);
    }

    #[tokio::test]
    async fn duplicate_creates_conflict() {
        let repo = Arc::new(MemoryRepository::with_users([User::new("u-1", "alice", 30)]));
        let service = CrudService::new(repo);

        let request = Request::create(&User::new("u-1", "imposter", 31)).unwrap();
        let response = service.oneshot(request).await.unwrap();

        assert_eq!(response.status, Status::Conflict);
        assert_eq!(response.status.code(), 409);
    }

    #[tokio::test]
    async fn update_requires_an_existing_record() {
        let request = Request::update(&User::new("u-9", "ghost", 99)).unwrap();
        let response = service().oneshot(request).await.unwrap();
        assert_eq!(response.status, Status::NotFound);
    }

    #[test]
    fn status_codes_follow_http() {
        assert_eq!(Status::Ok.code(), 200);
        assert_eq!(Status::NotFound.code(), 404);
        assert_eq!(Status::Conflict.code(), 409);
        assert_eq!(Status::BadRequest.code(), 400);
        assert_eq!(Status::ServerError.code(), 500);
    }
}
