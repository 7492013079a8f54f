// Store-level tests driving `RedisSessionStore` directly, without the HTTP layer.
mod common;

use serde_json::json;
use time::Duration;
use tower_sessions_redistore::{
    Error, KeyChain, KeyPair, RedisSessionStore, SessionId, SessionState,
};

fn store() -> RedisSessionStore<tower_sessions_redistore::MemoryBackend> {
    common::make_store(KeyPair::generate(true).into())
}

#[tokio::test]
async fn load_without_cookie_gets_fresh_id_on_save() {
    let store = store();
    let mut session = store.load(None).await;

    assert!(session.is_new());
    assert!(session.is_empty());
    assert_eq!(session.state(), SessionState::New);

    session.insert("n", 1).expect("value serializes");
    store.save(&mut session).await.expect("session saves");

    let id = session.id().expect("save assigns an id");
    assert!(!id.as_str().is_empty());
    assert!(store.backend().contains_key(id.as_str()));
}

#[tokio::test]
async fn save_load_delete_roundtrip() {
    let store = store();
    let mut session = store.new_session();
    session.insert("user", "alice").expect("value serializes");
    session.set_max_age(Duration::seconds(3600));

    let cookie = store.save(&mut session).await.expect("session saves");
    assert_eq!(cookie.max_age(), Some(Duration::seconds(3600)));

    let mut loaded = store.load(Some(cookie.value())).await;
    assert_eq!(loaded.state(), SessionState::Loaded);
    assert_eq!(loaded.id(), session.id());
    assert_eq!(loaded.get_value("user"), Some(&json!("alice")));
    assert_eq!(loaded.max_age(), Duration::seconds(3600));

    let removal = store.delete(&mut loaded).await.expect("session deletes");
    assert_eq!(removal.value(), "");
    assert_eq!(loaded.state(), SessionState::Deleted);

    let reloaded = store.load(Some(cookie.value())).await;
    assert!(reloaded.is_new());
    assert!(reloaded.is_empty());
}

#[tokio::test]
async fn key_prefix_is_applied() {
    let store = store();
    store.set_key_prefix("app:");

    let mut session = tower_sessions_redistore::Session::with_id(
        SessionId::new("abc123"),
        Duration::hours(1),
    );
    session.insert("n", 1).expect("value serializes");
    store.save(&mut session).await.expect("session saves");

    assert_eq!(store.backend().keys(), vec!["app:abc123".to_string()]);
}

#[tokio::test]
async fn oversized_payload_is_not_written() {
    let store = store();
    store.set_max_length(64);

    let mut session = store.new_session();
    session
        .insert("blob", "x".repeat(256))
        .expect("value serializes");

    let err = store.save(&mut session).await.expect_err("payload is too large");
    assert!(matches!(err, Error::PayloadTooLarge { max: 64, .. }));
    assert!(store.backend().is_empty());
    assert!(session.is_new());
}

#[tokio::test]
async fn zero_max_length_disables_limit() {
    let store = store();
    store.set_max_length(0);

    let mut session = store.new_session();
    session
        .insert("blob", "x".repeat(64 * 1024))
        .expect("value serializes");

    store.save(&mut session).await.expect("session saves");
    assert_eq!(store.backend().len(), 1);
}

#[tokio::test]
async fn tampered_cookie_loads_new_session() {
    let store = store();
    let mut session = store.new_session();
    session.insert("user", "alice").expect("value serializes");
    let cookie = store.save(&mut session).await.expect("session saves");

    let mut value = cookie.value().to_string();
    value.insert(0, '9');

    assert!(store.load(Some(&value)).await.is_new());
    assert!(store.load(Some("")).await.is_new());
    assert!(store.load(Some("a.b.c")).await.is_new());
}

#[tokio::test]
async fn ping_reaches_backend() {
    store().ping().await.expect("memory backend answers");
}

#[tokio::test]
async fn constructor_rejects_bad_configuration() {
    let keys = || -> KeyChain { KeyPair::generate(false).into() };

    assert!(matches!(
        RedisSessionStore::new(10, "udp", "127.0.0.1:6379", "", keys()),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        RedisSessionStore::new(0, "tcp", "127.0.0.1:6379", "", keys()),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        RedisSessionStore::new_with_db(10, "tcp", "127.0.0.1:6379", "", "zero", keys()),
        Err(Error::Config(_))
    ));
    assert!(RedisSessionStore::new(10, "tcp", "127.0.0.1:6379", "", keys()).is_ok());
}
