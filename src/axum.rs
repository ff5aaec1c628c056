//! Axum integration utilities.

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::actor::Actor;
use crate::checker::PermissionChecker;

use ::axum::body::Body;
use ::axum::http::{Request, StatusCode};
use ::axum::response::{IntoResponse, Response};
use ::tower::{Layer, Service};
use tracing::warn;

/// Authorization context attached to a request by the authentication layer.
#[derive(Clone)]
pub struct AuthContext {
    /// Checker of the tenant the request targets.
    pub checker: Arc<dyn PermissionChecker>,
    /// Authenticated caller.
    pub actor: Actor,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

impl AuthContext {
    pub fn new(checker: Arc<dyn PermissionChecker>, actor: Actor) -> Self {
        Self { checker, actor }
    }
}

/// Maps a check outcome to the response that should short-circuit the
/// request, or `None` to let it through.
pub fn rejection(outcome: &crate::Result<bool>) -> Option<(StatusCode, &'static str)> {
    match outcome {
        Ok(true) => None,
        Ok(false) => Some((StatusCode::FORBIDDEN, "forbidden")),
        Err(err) if err.is_validation() => Some((StatusCode::BAD_REQUEST, "invalid request")),
        Err(err) => {
            warn!(error = %err, "authorization check failed");
            Some((StatusCode::INTERNAL_SERVER_ERROR, "auth error"))
        }
    }
}

/// Middleware layer requiring a container-level permission.
#[derive(Debug, Clone)]
pub struct RequireContainerPermLayer {
    container_type: Arc<str>,
    action: Arc<str>,
}

impl RequireContainerPermLayer {
    /// Requires `action` on the `$$default$$` item of `container_type`.
    pub fn new(container_type: &str, action: &str) -> Self {
        Self {
            container_type: container_type.into(),
            action: action.into(),
        }
    }
}

impl<Inner> Layer<Inner> for RequireContainerPermLayer {
    type Service = RequireContainerPermService<Inner>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RequireContainerPermService {
            inner,
            container_type: self.container_type.clone(),
            action: self.action.clone(),
        }
    }
}

/// Middleware service that enforces a container-level permission.
#[derive(Debug, Clone)]
pub struct RequireContainerPermService<Inner> {
    inner: Inner,
    container_type: Arc<str>,
    action: Arc<str>,
}

impl<Inner> Service<Request<Body>> for RequireContainerPermService<Inner>
where
    Inner: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
{
    type Response = Response;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let container_type = self.container_type.clone();
        let action = self.action.clone();

        Box::pin(async move {
            let context = req.extensions().get::<AuthContext>().cloned();
            let Some(context) = context else {
                return Ok((StatusCode::UNAUTHORIZED, "missing auth context").into_response());
            };

            let outcome = context
                .checker
                .check_container_perm(&context.actor, &container_type, &action)
                .await;
            match rejection(&outcome) {
                None => {
                    poll_fn(|cx| inner.poll_ready(cx)).await?;
                    inner.call(req).await
                }
                Some(response) => Ok(response.into_response()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::fixtures::AllowAll;
    use crate::actor::User;
    use crate::error::Error;
    use crate::types::ActorName;
    use futures::executor::block_on;
    use std::convert::Infallible;

    fn context() -> AuthContext {
        let actor = Actor::from(User::new(ActorName::try_from("bob").unwrap()));
        AuthContext::new(Arc::new(AllowAll), actor)
    }

    #[derive(Clone)]
    struct Ok200;

    impl Service<Request<Body>> for Ok200 {
        type Response = Response;
        type Error = Infallible;
        type Future = std::future::Ready<Result<Response, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Body>) -> Self::Future {
            std::future::ready(Ok(StatusCode::OK.into_response()))
        }
    }

    #[test]
    fn rejection_should_map_outcomes_to_status_codes() {
        assert_eq!(rejection(&Ok(true)), None);
        assert_eq!(rejection(&Ok(false)).map(|r| r.0), Some(StatusCode::FORBIDDEN));
        assert_eq!(
            rejection(&Err(Error::UnknownAction("frobnatz".into()))).map(|r| r.0),
            Some(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            rejection(&Err(Error::Store("disk full".into()))).map(|r| r.0),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[test]
    fn layer_should_pass_allowed_requests() {
        let mut service = RequireContainerPermLayer::new("nodes", "read").layer(Ok200);
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(context());

        let response = block_on(service.call(req)).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn layer_should_reject_unknown_actions_and_missing_context() {
        let mut service = RequireContainerPermLayer::new("nodes", "frobnatz").layer(Ok200);
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(context());
        let response = block_on(service.call(req)).unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = block_on(service.call(Request::new(Body::empty()))).unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
