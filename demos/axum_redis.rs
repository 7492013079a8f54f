use std::net::SocketAddr;

use axum::{Router, routing::get};
use time::Duration;
use tower_sessions_redistore::{
    KeyChain, KeyPair, RedisSessionManagerLayer, RedisSessionStore, SameSite, SessionConfig,
    SessionHandle,
};

async fn index(session: SessionHandle) -> String {
    let n: usize = session
        .get("n")
        .expect("session get succeeds")
        .unwrap_or(0);
    session
        .insert("n", n + 1)
        .expect("session insert succeeds");
    format!("n={n}")
}

async fn logout(session: SessionHandle) -> &'static str {
    session.purge();
    "bye"
}

#[tokio::main]
async fn main() {
    // Keys generated at startup invalidate every cookie on restart. Load them from
    // configuration in a real deployment, newest pair first.
    let keys = KeyChain::from(KeyPair::generate(true));
    let store = RedisSessionStore::new(10, "tcp", "127.0.0.1:6379", "", keys)
        .expect("session store builds successfully");
    store.set_key_prefix("demo:session:");
    store
        .ping()
        .await
        .expect("redis answers on 127.0.0.1:6379");

    store.set_config(
        SessionConfig::default()
            // Default: "session"
            .with_name("session")
            // Default: true
            .with_http_only(true)
            // Default: SameSite::Strict
            .with_same_site(SameSite::Strict)
            // Default: 30 days
            .with_max_age(Duration::hours(1))
            // Default: true (set to false for local HTTP development)
            .with_secure(false)
            // Default: "/"
            .with_path("/")
            // Default: None
            .without_domain()
            // Default: false
            .with_always_save(false)
            // Default: true
            .with_clear_on_invalid_cookie(true),
    );
    // Default: 4096
    store.set_max_length(4096);

    let app = Router::new()
        .route("/", get(index))
        .route("/logout", get(logout))
        .layer(RedisSessionManagerLayer::new(store));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("tcp listener binds successfully");
    let local_addr = listener.local_addr().expect("local address is available");
    println!("listening at http://{local_addr}");

    axum::serve(listener, app)
        .await
        .expect("server runs successfully");
}
