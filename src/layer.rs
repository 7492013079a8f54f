use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use http::{Request, Response};
use tower_cookies::{CookieManager, Cookies};
use tower_layer::Layer;
use tower_service::Service;

use crate::{
    backend::Backend,
    pool::RedisPool,
    session::{SessionHandle, SessionState},
    store::RedisSessionStore,
};

/// Layer that loads the request's session from a [`RedisSessionStore`], exposes it to the
/// inner service as a [`SessionHandle`] extension and persists it after the response.
#[derive(Debug, Clone)]
pub struct RedisSessionManagerLayer<B: Backend = RedisPool> {
    store: RedisSessionStore<B>,
}

impl<B: Backend> RedisSessionManagerLayer<B> {
    #[must_use]
    pub fn new(store: RedisSessionStore<B>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RedisSessionStore<B> {
        &self.store
    }
}

#[derive(Debug, Clone)]
pub struct RedisSessionManager<S, B: Backend> {
    inner: S,
    store: RedisSessionStore<B>,
}

impl<S, B: Backend> Layer<S> for RedisSessionManagerLayer<B> {
    type Service = CookieManager<RedisSessionManager<S, B>>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieManager::new(RedisSessionManager {
            inner,
            store: self.store.clone(),
        })
    }
}

impl<ReqBody, ResBody, S, B> Service<Request<ReqBody>> for RedisSessionManager<S, B>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send,
    B: Backend,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let store = self.store.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(cookies) = req.extensions().get::<Cookies>().cloned() else {
                let mut res = Response::default();
                *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
                return Ok(res);
            };

            let config = store.config();
            let cookie_value = cookies
                .get(&config.name)
                .map(|cookie| cookie.value().to_string());
            let had_cookie = cookie_value.is_some();

            let session = match store.try_load(cookie_value.as_deref()).await {
                Ok(session) => {
                    // Expire a cookie that no longer resolves to a stored session. A later
                    // save overwrites this with a fresh cookie.
                    if had_cookie && session.is_new() && config.clear_on_invalid_cookie {
                        cookies.add(config.removal_cookie());
                    }
                    session
                }
                Err(err) => {
                    // The cookie may still be valid; keep it for the next request.
                    tracing::warn!(err = %err, "session load failed");
                    store.new_session()
                }
            };

            let handle = SessionHandle::new(session);
            req.extensions_mut().insert(handle.clone());

            let res = inner.call(req).await?;

            let mut session = handle.snapshot();
            let modified = session.is_dirty();

            if session.is_empty() && session.state() != SessionState::Deleted {
                let persisted = session.stale_id.is_some() || (modified && !session.is_new());
                if persisted {
                    match store.delete(&mut session).await {
                        Ok(cookie) => cookies.add(cookie),
                        Err(err) => tracing::error!(err = %err, "session delete failed"),
                    }
                }
                return Ok(res);
            }

            if (modified || config.always_save) && !res.status().is_server_error() {
                match store.save(&mut session).await {
                    Ok(cookie) => cookies.add(cookie),
                    Err(err) => {
                        tracing::error!(err = %err, "session save failed");
                        let mut res = Response::default();
                        *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
                        return Ok(res);
                    }
                }
            }

            Ok(res)
        })
    }
}
