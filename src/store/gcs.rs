//! Cloud Storage backend over the JSON API.
//!
//! - create: media upload of an empty body with `ifGenerationMatch=0`, which
//!   only succeeds when no live object exists (HTTP 412 otherwise)
//! - delete: `DELETE` with `ifGenerationMatch=<generation>` (HTTP 412 when
//!   another creation now occupies the key, 404 when it is gone)

use super::auth::TokenSource;
use super::{CreateOutcome, DeleteOutcome, Generation, ObjectStore, StoreError};
use crate::config::Config;
use crate::location::Location;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Public Cloud Storage endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The subset of an object resource we need.
#[derive(Deserialize)]
struct ObjectResource {
    generation: GenerationField,
}

/// The API encodes int64 fields as strings; some emulators send numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum GenerationField {
    Text(String),
    Number(i64),
}

impl GenerationField {
    fn parse(self) -> Result<Generation, StoreError> {
        match self {
            GenerationField::Number(n) => Ok(Generation(n)),
            GenerationField::Text(s) => s
                .parse()
                .map(Generation)
                .map_err(|_| StoreError::InvalidResponse(format!("invalid generation '{}'", s))),
        }
    }
}

/// Cloud Storage client for lock objects.
pub struct GcsStore {
    http: Client,
    endpoint: Url,
    tokens: Option<TokenSource>,
}

fn build_http_client() -> Result<Client, StoreError> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("gslock/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

impl GcsStore {
    /// Connect to Cloud Storage with the credentials selected by `config`.
    ///
    /// Fetches an access token up front so credential problems surface here.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let http = build_http_client()?;
        let tokens = TokenSource::from_config(http.clone(), config)?;
        tokens.access_token().await?;

        Ok(Self {
            http,
            endpoint: parse_endpoint(DEFAULT_ENDPOINT)?,
            tokens: Some(tokens),
        })
    }

    /// Connect to an unauthenticated emulator at `host` (`host:port` or a URL).
    pub fn emulator(host: &str) -> Result<Self, StoreError> {
        let endpoint = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };

        Ok(Self {
            http: build_http_client()?,
            endpoint: parse_endpoint(&endpoint)?,
            tokens: None,
        })
    }

    /// `.../upload/storage/v1/b/{bucket}/o?uploadType=media&name={key}&ifGenerationMatch=0`
    fn create_url(&self, location: &Location) -> Result<Url, StoreError> {
        let mut url = self.endpoint_with(&["upload", "storage", "v1", "b", &location.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &location.key)
            .append_pair("ifGenerationMatch", "0");
        Ok(url)
    }

    /// `.../storage/v1/b/{bucket}/o/{key}?ifGenerationMatch={generation}`
    fn delete_url(&self, location: &Location, generation: Generation) -> Result<Url, StoreError> {
        let mut url = self.endpoint_with(&[
            "storage",
            "v1",
            "b",
            &location.bucket,
            "o",
            &location.key,
        ])?;
        url.query_pairs_mut()
            .append_pair("ifGenerationMatch", &generation.to_string());
        Ok(url)
    }

    /// Append path segments; each one is percent-encoded, including `/` in keys.
    fn endpoint_with(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::InvalidResponse(format!("endpoint '{}' cannot be a base", self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        match &self.tokens {
            Some(tokens) => Ok(request.bearer_auth(tokens.access_token().await?)),
            None => Ok(request),
        }
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, StoreError> {
    Url::parse(endpoint)
        .map_err(|e| StoreError::InvalidResponse(format!("invalid endpoint '{}': {}", endpoint, e)))
}

/// Pull `error.message` out of an API error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

async fn created_generation(response: Response) -> Result<Generation, StoreError> {
    let object: ObjectResource = response.json().await?;
    object.generation.parse()
}

async fn unexpected(operation: &'static str, response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Status {
        operation,
        status,
        message: error_message(&body),
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn create_if_absent(&self, location: &Location) -> Result<CreateOutcome, StoreError> {
        let request = self
            .http
            .post(self.create_url(location)?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(Vec::new());
        let response = self.authorize(request).await?.send().await?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => Ok(CreateOutcome::AlreadyExists),
            status if status.is_success() => {
                // The object exists now; without its generation we cannot
                // release it, so it has to be cleared by hand.
                let generation = match created_generation(response).await {
                    Ok(generation) => generation,
                    Err(err) => {
                        warn!(
                            %location,
                            error = %err,
                            "lock object was created but its generation is unreadable; clear it by hand"
                        );
                        return Err(err);
                    }
                };
                debug!(%location, %generation, "created lock object");
                Ok(CreateOutcome::Created(generation))
            }
            _ => Err(unexpected("create", response).await),
        }
    }

    async fn delete_if_generation_matches(
        &self,
        location: &Location,
        generation: Generation,
    ) -> Result<DeleteOutcome, StoreError> {
        let request = self.http.delete(self.delete_url(location, generation)?);
        let response = self.authorize(request).await?.send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            StatusCode::PRECONDITION_FAILED => Ok(DeleteOutcome::GenerationMismatch),
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            _ => Err(unexpected("delete", response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(key: &str) -> Location {
        Location {
            bucket: "jobs".to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn create_url_targets_media_upload_with_absence_precondition() {
        let store = GcsStore::emulator("localhost:4443").unwrap();
        let url = store.create_url(&location("locks/nightly job")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/upload/storage/v1/b/jobs/o\
             ?uploadType=media&name=locks%2Fnightly+job&ifGenerationMatch=0"
        );
    }

    #[test]
    fn delete_url_encodes_the_whole_key_as_one_segment() {
        let store = GcsStore::emulator("http://127.0.0.1:9000/").unwrap();
        let url = store
            .delete_url(&location("locks/nightly"), Generation(1700000000123456))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/storage/v1/b/jobs/o/locks%2Fnightly?ifGenerationMatch=1700000000123456"
        );
    }

    #[test]
    fn generation_accepts_string_and_number_encodings() {
        let text: ObjectResource =
            serde_json::from_str(r#"{"name":"k","generation":"1712345678901234"}"#).unwrap();
        assert_eq!(text.generation.parse().unwrap(), Generation(1712345678901234));

        let number: ObjectResource = serde_json::from_str(r#"{"generation":42}"#).unwrap();
        assert_eq!(number.generation.parse().unwrap(), Generation(42));

        let bad: ObjectResource = serde_json::from_str(r#"{"generation":"abc"}"#).unwrap();
        assert!(matches!(
            bad.generation.parse(),
            Err(StoreError::InvalidResponse(_))
        ));
    }

    #[test]
    fn error_message_prefers_api_error_field() {
        let body = r#"{"error":{"code":403,"message":"caller does not have storage.objects.create access"}}"#;
        assert_eq!(
            error_message(body),
            "caller does not have storage.objects.create access"
        );
        assert_eq!(error_message("  Service Unavailable\n"), "Service Unavailable");
    }

    #[test]
    fn emulator_rejects_unparseable_host() {
        assert!(matches!(
            GcsStore::emulator("http://"),
            Err(StoreError::InvalidResponse(_))
        ));
    }

    mod responses {
        use super::*;
        use serde_json::json;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const CREATE_PATH: &str = "/upload/storage/v1/b/jobs/o";
        const DELETE_PATH: &str = "/storage/v1/b/jobs/o/locks%2Fnightly";

        async fn mock_create(server: &MockServer, response: ResponseTemplate) {
            Mock::given(method("POST"))
                .and(path(CREATE_PATH))
                .and(query_param("uploadType", "media"))
                .and(query_param("name", "locks/nightly"))
                .and(query_param("ifGenerationMatch", "0"))
                .respond_with(response)
                .expect(1)
                .mount(server)
                .await;
        }

        async fn mock_delete(server: &MockServer, response: ResponseTemplate) {
            Mock::given(method("DELETE"))
                .and(path(DELETE_PATH))
                .and(query_param("ifGenerationMatch", "1712345678901234"))
                .respond_with(response)
                .expect(1)
                .mount(server)
                .await;
        }

        fn store(server: &MockServer) -> GcsStore {
            GcsStore::emulator(&server.uri()).unwrap()
        }

        async fn delete(server: &MockServer) -> Result<DeleteOutcome, StoreError> {
            store(server)
                .delete_if_generation_matches(
                    &location("locks/nightly"),
                    Generation(1712345678901234),
                )
                .await
        }

        #[tokio::test]
        async fn create_returns_generation_of_new_object() {
            let server = MockServer::start().await;
            mock_create(
                &server,
                ResponseTemplate::new(200).set_body_json(json!({
                    "bucket": "jobs",
                    "name": "locks/nightly",
                    "generation": "1712345678901234",
                    "size": "0"
                })),
            )
            .await;

            let outcome = store(&server)
                .create_if_absent(&location("locks/nightly"))
                .await
                .unwrap();
            assert_eq!(outcome, CreateOutcome::Created(Generation(1712345678901234)));
        }

        #[tokio::test]
        async fn create_precondition_failure_means_already_exists() {
            let server = MockServer::start().await;
            mock_create(
                &server,
                ResponseTemplate::new(412).set_body_json(json!({
                    "error": {"code": 412, "message": "At least one of the pre-conditions you specified did not hold."}
                })),
            )
            .await;

            let outcome = store(&server)
                .create_if_absent(&location("locks/nightly"))
                .await
                .unwrap();
            assert_eq!(outcome, CreateOutcome::AlreadyExists);
        }

        #[tokio::test]
        async fn create_with_other_status_is_an_error() {
            let server = MockServer::start().await;
            mock_create(
                &server,
                ResponseTemplate::new(403).set_body_json(json!({
                    "error": {"code": 403, "message": "caller does not have storage.objects.create access"}
                })),
            )
            .await;

            let err = store(&server)
                .create_if_absent(&location("locks/nightly"))
                .await
                .unwrap_err();
            match err {
                StoreError::Status {
                    operation,
                    status,
                    message,
                } => {
                    assert_eq!(operation, "create");
                    assert_eq!(status, 403);
                    assert_eq!(message, "caller does not have storage.objects.create access");
                }
                other => panic!("expected status error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn create_with_unreadable_body_is_an_error() {
            let server = MockServer::start().await;
            mock_create(&server, ResponseTemplate::new(200).set_body_string("not json")).await;

            let err = store(&server)
                .create_if_absent(&location("locks/nightly"))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Http(_)), "{err:?}");
        }

        #[tokio::test]
        async fn create_with_invalid_generation_is_an_error() {
            let server = MockServer::start().await;
            mock_create(
                &server,
                ResponseTemplate::new(200).set_body_json(json!({"generation": "soon"})),
            )
            .await;

            let err = store(&server)
                .create_if_absent(&location("locks/nightly"))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidResponse(_)), "{err:?}");
        }

        #[tokio::test]
        async fn delete_success_means_deleted() {
            let server = MockServer::start().await;
            mock_delete(&server, ResponseTemplate::new(204)).await;

            assert_eq!(delete(&server).await.unwrap(), DeleteOutcome::Deleted);
        }

        #[tokio::test]
        async fn delete_not_found_means_lock_is_gone() {
            let server = MockServer::start().await;
            mock_delete(&server, ResponseTemplate::new(404)).await;

            assert_eq!(delete(&server).await.unwrap(), DeleteOutcome::NotFound);
        }

        #[tokio::test]
        async fn delete_precondition_failure_means_generation_mismatch() {
            let server = MockServer::start().await;
            mock_delete(&server, ResponseTemplate::new(412)).await;

            assert_eq!(
                delete(&server).await.unwrap(),
                DeleteOutcome::GenerationMismatch
            );
        }

        #[tokio::test]
        async fn delete_with_other_status_is_an_error() {
            let server = MockServer::start().await;
            mock_delete(&server, ResponseTemplate::new(503).set_body_string("backend unavailable")).await;

            let err = delete(&server).await.unwrap_err();
            assert!(
                matches!(err, StoreError::Status { operation: "delete", status: 503, ref message } if message == "backend unavailable"),
                "{err:?}"
            );
        }
    }
}
