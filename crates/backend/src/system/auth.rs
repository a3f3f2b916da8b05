use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// An empty configured token keeps the trigger endpoints locked rather
/// than open.
pub(crate) fn token_is_valid(authorization: Option<&str>, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    matches!(
        authorization.and_then(|h| h.strip_prefix("Bearer ")),
        Some(token) if token == expected
    )
}

/// Bearer-token guard for the sync trigger routes.
pub async fn require_sync_token(request: Request, next: Next) -> Result<Response, StatusCode> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if token_is_valid(authorization, &crate::shared::config::get().sync.token) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;

    #[test]
    fn test_token_check() {
        assert!(token_is_valid(Some("Bearer s3cret"), "s3cret"));
        assert!(!token_is_valid(Some("Bearer wrong"), "s3cret"));
        assert!(!token_is_valid(Some("s3cret"), "s3cret"));
        assert!(!token_is_valid(None, "s3cret"));
        // Unset token must not open the endpoint.
        assert!(!token_is_valid(Some("Bearer "), ""));
        assert!(!token_is_valid(None, ""));
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let app = Router::new()
            .route("/api/omie/sync", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn(require_sync_token));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let without_header = client
            .post(format!("http://{addr}/api/omie/sync"))
            .send()
            .await
            .unwrap();
        assert_eq!(without_header.status(), 401);

        let wrong_token = client
            .post(format!("http://{addr}/api/omie/sync"))
            .header("Authorization", "Bearer nope")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong_token.status(), 401);
    }
}
