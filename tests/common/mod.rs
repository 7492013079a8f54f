#![allow(dead_code)]

// Shared helpers for integration tests.
//
// Cookies are parsed and encoded with `tower_cookies::Cookie` to match what the middleware emits
// in `Set-Cookie` and what browsers send back in `Cookie`.
use std::convert::Infallible;

use axum::body::Body;
use http::{HeaderMap, Request, Response, header};
use http_body_util::BodyExt as _;
use tower_cookies::Cookie;
use tower_sessions_redistore::{
    KeyChain, KeyPair, MemoryBackend, RedisSessionManagerLayer, RedisSessionStore, SessionConfig,
    SessionHandle,
};

pub async fn body_string(body: Body) -> String {
    let bytes = body
        .collect()
        .await
        .expect("body collects successfully")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Write a single key into the session.
    let session = req
        .extensions()
        .get::<SessionHandle>()
        .cloned()
        .expect("request includes SessionHandle extension");

    session.insert("foo", 42).expect("session insert succeeds");

    Ok(Response::new(Body::empty()))
}

pub async fn noop_handler(_: Request<Body>) -> Result<Response<Body>, Infallible> {
    Ok(Response::new(Body::empty()))
}

pub fn make_store(keys: KeyChain) -> RedisSessionStore<MemoryBackend> {
    RedisSessionStore::with_backend(MemoryBackend::new(), keys)
}

pub fn make_layer(
    config: SessionConfig,
) -> (
    RedisSessionStore<MemoryBackend>,
    RedisSessionManagerLayer<MemoryBackend>,
) {
    // Return the store too, so tests can inspect what reached the backend.
    let store = make_store(KeyPair::generate(true).into());
    store.set_config(config);
    let layer = RedisSessionManagerLayer::new(store.clone());
    (store, layer)
}

pub fn get_session_cookie(res: &Response<Body>) -> Cookie<'static> {
    get_session_cookie_from_headers(res.headers())
}

pub fn get_session_cookie_from_headers(headers: &HeaderMap) -> Cookie<'static> {
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .expect("response includes set-cookie header");
    let set_cookie = set_cookie
        .to_str()
        .expect("set-cookie header is valid utf-8");
    Cookie::parse_encoded(set_cookie)
        .expect("set-cookie parses successfully")
        .into_owned()
}

pub fn cookie_header_value(cookie: &Cookie<'_>) -> String {
    cookie.encoded().to_string()
}
