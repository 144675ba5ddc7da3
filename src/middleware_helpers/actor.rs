use crate::errors::ServiceError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Header carrying the acting user's id, set by the authenticating gateway.
pub const ACTOR_HEADER: &str = "x-user-id";

/// The user on whose behalf a request mutates the ledger. Anonymous when the
/// header is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Actor(pub Option<Uuid>);

impl Actor {
    pub fn user_id(&self) -> Option<Uuid> {
        self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(ACTOR_HEADER) else {
            return Ok(Actor(None));
        };
        let value = raw
            .to_str()
            .map_err(|_| ServiceError::ValidationError(format!("{} is not valid text", ACTOR_HEADER)))?;
        let user_id = Uuid::parse_str(value.trim()).map_err(|_| {
            ServiceError::ValidationError(format!("{} must be a UUID", ACTOR_HEADER))
        })?;
        Ok(Actor(Some(user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<Actor, ServiceError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(ACTOR_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_header_is_anonymous() {
        assert_eq!(extract(None).await.unwrap(), Actor(None));
    }

    #[tokio::test]
    async fn uuid_header_is_parsed() {
        let id = Uuid::new_v4();
        let actor = extract(Some(&id.to_string())).await.unwrap();
        assert_eq!(actor.user_id(), Some(id));
    }

    #[tokio::test]
    async fn malformed_header_is_rejected() {
        assert_matches!(
            extract(Some("admin")).await,
            Err(ServiceError::ValidationError(_))
        );
    }
}
