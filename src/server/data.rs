//! Data channel: pull one cached buffer at a time.
//!
//! `GET /buffer?id=<client>&buffer=<name>[&cycle=<n>]`. Every pull that
//! resolves a live session records into that session's completion barrier
//! once the response is done with, whether it succeeded or not. A served
//! body records when it has been fully streamed or dropped.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL, CONTENT_ENCODING,
    CONTENT_LENGTH, CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;

use crate::streaming::{
    CacheMiss, CachedBuffer, ClientId, ClientSession, RecordOutcome, SessionRegistry,
    BUFFER_CONTENT_TYPE,
};

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    pub id: ClientId,
    pub buffer: String,
    pub cycle: Option<u64>,
}

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/buffer", get(pull_buffer).options(preflight))
        .layer(axum::middleware::from_fn(cors_middleware))
        .with_state(registry)
}

async fn cors_middleware(req: Request<Body>, next: axum::middleware::Next) -> Response {
    let mut resp = next.run(req).await;
    apply_cors_headers(resp.headers_mut());
    resp
}

/// Buffers are fetched from a different origin than the page, so allow any.
fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Encoding, Content-Length"),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Records one pull into the session's barrier when dropped.
struct PullCompletion {
    session: Arc<ClientSession>,
    cycle: Option<u64>,
    buffer: String,
}

impl Drop for PullCompletion {
    fn drop(&mut self) {
        let Some(cycle) = self.cycle else {
            return;
        };
        let outcome = self.session.barrier().record(cycle, &self.buffer);
        match outcome {
            RecordOutcome::Counted { received, expected } => tracing::trace!(
                client_id = %self.session.id(),
                cycle,
                buffer = %self.buffer,
                received,
                expected,
                "pull recorded"
            ),
            RecordOutcome::Completed => tracing::trace!(
                client_id = %self.session.id(),
                cycle,
                "pull completed barrier"
            ),
            other => tracing::debug!(
                client_id = %self.session.id(),
                cycle,
                buffer = %self.buffer,
                outcome = ?other,
                "pull ignored by barrier"
            ),
        }
    }
}

async fn pull_buffer(
    State(registry): State<Arc<SessionRegistry>>,
    query: Result<Query<PullQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "malformed buffer pull");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let Some(session) = registry.get(query.id) else {
        let miss = CacheMiss::UnknownClient(query.id);
        tracing::warn!(buffer = %query.buffer, error = %miss, "buffer pull failed");
        return StatusCode::NOT_FOUND.into_response();
    };

    match session.cache().get(&query.buffer, query.cycle) {
        Ok(cached) => {
            session.stats().record_pull(true);
            let completion = PullCompletion {
                session: Arc::clone(&session),
                cycle: Some(cached.cycle),
                buffer: query.buffer,
            };
            buffer_response(cached, completion)
        }
        Err(miss) => {
            session.stats().record_pull(false);
            tracing::warn!(
                client_id = %session.id(),
                buffer = %query.buffer,
                error = %miss,
                "buffer pull failed"
            );
            let _completion = PullCompletion {
                cycle: miss.cycle(),
                session,
                buffer: query.buffer,
            };
            let status = match miss {
                CacheMiss::Stale { .. } => StatusCode::GONE,
                _ => StatusCode::NOT_FOUND,
            };
            status.into_response()
        }
    }
}

fn buffer_response(cached: CachedBuffer, completion: PullCompletion) -> Response {
    let length = cached.data.len();
    let data = cached.data;
    let stream = async_stream::stream! {
        let _completion = completion;
        yield Ok::<Bytes, Infallible>(data);
    };

    let mut resp = Body::from_stream(stream).into_response();
    let headers = resp.headers_mut();
    headers.insert(
        CONTENT_ENCODING,
        HeaderValue::from_static(cached.encoding.content_encoding()),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(BUFFER_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}
