use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::resolver::{AuthorityError, AuthorityRecord, AuthorityService};

/// Authority service reached over HTTP: `GET {base_url}?ids=A,B,C` answering with a
/// JSON array of `{query_id, resolved_id, resolution_type}` objects.
pub struct HttpAuthorityService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthorityService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthorityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("idmapper/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthorityError::Permanent(format!("could not build HTTP client: {}", e)))?;
        Ok(Self { client, base_url: base_url.into() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Map a non-success HTTP status onto the retry taxonomy
pub fn classify_status(status: u16, body: &str) -> AuthorityError {
    let message = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
    match status {
        429 | 500..=599 => AuthorityError::Transient(message),
        _ => AuthorityError::Permanent(message),
    }
}

fn classify_transport(err: reqwest::Error) -> AuthorityError {
    if err.is_builder() {
        AuthorityError::Permanent(err.to_string())
    } else {
        // timeouts, refused connections, resets
        AuthorityError::Transient(err.to_string())
    }
}

#[async_trait]
impl AuthorityService for HttpAuthorityService {
    async fn lookup(&self, ids: &[String]) -> Result<Vec<AuthorityRecord>, AuthorityError> {
        let joined = ids.join(",");
        debug!("authority GET {} ({} ids)", self.base_url, ids.len());
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("ids", joined.as_str())])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let bytes = resp.bytes().await.map_err(classify_transport)?;
        serde_json::from_slice::<Vec<AuthorityRecord>>(&bytes)
            .map_err(|e| AuthorityError::Permanent(format!("malformed authority response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idmapper_core::ResolutionType;

    #[test]
    fn test_throttling_and_server_errors_are_transient() {
        for status in [429, 500, 502, 503, 504] {
            assert!(matches!(classify_status(status, ""), AuthorityError::Transient(_)), "{}", status);
        }
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400, 401, 404, 422] {
            assert!(matches!(classify_status(status, "bad ids"), AuthorityError::Permanent(_)), "{}", status);
        }
    }

    #[test]
    fn test_response_shape() {
        let body = r#"[
            {"query_id": "P1", "resolved_id": "Q1", "resolution_type": "secondary"},
            {"query_id": "P9", "resolved_id": null, "resolution_type": "obsolete"},
            {"query_id": "P7", "resolution_type": "obsolete"}
        ]"#;
        let records: Vec<AuthorityRecord> = serde_json::from_str(body).unwrap();

        assert_eq!(records[0], AuthorityRecord::new("P1", Some("Q1"), ResolutionType::Secondary));
        assert_eq!(records[1].resolved_id, None);
        assert_eq!(records[2].resolution_type, ResolutionType::Obsolete);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let service = HttpAuthorityService::new("http://127.0.0.1:9/resolve", Duration::from_millis(500)).unwrap();
        let err = service.lookup(&["P1".to_string()]).await.unwrap_err();
        assert!(matches!(err, AuthorityError::Transient(_)));
    }
}
