//! Tiles served by a `{z}/{x}/{y}` URL template.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::TileKey;
use crate::error::{HttpError, SourceFetchError};

use super::client::SourceClient;

const USER_AGENT: &str = concat!("chizu/", env!("CARGO_PKG_VERSION"));

/// Blocking HTTP GET, called from worker threads.
pub trait HttpClient: Send + Sync {
    /// Returns the response body of a successful request.
    fn get(&self, url: &str) -> Result<Vec<u8>, HttpError>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HttpError::Request(e.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| HttpError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|body| body.to_vec())
            .map_err(|e| HttpError::Request(e.to_string()))
    }
}

/// How a tile server numbers rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileScheme {
    /// Row 0 at the north edge, the same as [`TileKey`].
    #[default]
    Xyz,
    /// Row 0 at the south edge.
    Tms,
}

impl TileScheme {
    /// Row of `key` in this scheme, `None` for keys outside the grid.
    pub fn row(self, key: &TileKey) -> Option<u32> {
        if !key.is_valid() {
            return None;
        }

        match self {
            TileScheme::Xyz => Some(key.y),
            TileScheme::Tms => Some((1u32 << key.zoom) - 1 - key.y),
        }
    }
}

/// Fetches tiles by filling `{z}`, `{x}` and `{y}` in a URL template.
///
/// A `404` answer means the server has no such tile and becomes
/// [`SourceFetchError::NotFound`]. Any other failure is a transport error.
#[derive(Debug, Clone)]
pub struct HttpSourceClient<H> {
    client: H,
    template: String,
    scheme: TileScheme,
}

impl<H: HttpClient> HttpSourceClient<H> {
    pub fn new(client: H, template: impl Into<String>, scheme: TileScheme) -> Self {
        Self {
            client,
            template: template.into(),
            scheme,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn scheme(&self) -> TileScheme {
        self.scheme
    }

    pub fn url_for(&self, key: &TileKey) -> Option<String> {
        let row = self.scheme.row(key)?;

        let url = self
            .template
            .replace("{z}", &key.zoom.to_string())
            .replace("{x}", &key.x.to_string())
            .replace("{y}", &row.to_string());

        Some(url)
    }
}

impl<H: HttpClient + 'static> SourceClient for HttpSourceClient<H> {
    fn fetch(&self, key: &TileKey) -> Result<Vec<u8>, SourceFetchError> {
        let url = self
            .url_for(key)
            .ok_or(SourceFetchError::InvalidKey(*key))?;

        tracing::trace!("requesting {}", url);
        self.client.get(&url).map_err(|e| match e {
            HttpError::Status { status: 404 } => SourceFetchError::NotFound(*key),
            other => SourceFetchError::Transport {
                key: *key,
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    const TEMPLATE: &str = "https://tiles.local/{z}/{x}/{y}.pbf";

    /// Answers from a fixed table and remembers what was asked.
    #[derive(Default)]
    struct MockHttp {
        answers: HashMap<String, Result<Vec<u8>, HttpError>>,
        requested: Mutex<Vec<String>>,
    }

    impl MockHttp {
        fn answer(mut self, url: &str, answer: Result<Vec<u8>, HttpError>) -> Self {
            self.answers.insert(url.to_string(), answer);
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl HttpClient for MockHttp {
        fn get(&self, url: &str) -> Result<Vec<u8>, HttpError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.answers
                .get(url)
                .cloned()
                .unwrap_or(Err(HttpError::Status { status: 404 }))
        }
    }

    #[test]
    fn test_url_template() {
        let key = TileKey::new(2, 1, 0);

        let xyz = HttpSourceClient::new(MockHttp::default(), TEMPLATE, TileScheme::Xyz);
        assert_eq!(xyz.url_for(&key).as_deref(), Some("https://tiles.local/2/1/0.pbf"));

        let tms = HttpSourceClient::new(MockHttp::default(), TEMPLATE, TileScheme::Tms);
        assert_eq!(tms.url_for(&key).as_deref(), Some("https://tiles.local/2/1/3.pbf"));
        assert_eq!(
            tms.url_for(&TileKey::new(0, 0, 0)).as_deref(),
            Some("https://tiles.local/0/0/0.pbf")
        );

        assert_eq!(xyz.url_for(&TileKey::new(2, 0, 4)), None);
    }

    #[test]
    fn test_fetch_maps_answers() {
        let found = TileKey::new(1, 0, 0);
        let missing = TileKey::new(1, 1, 0);
        let broken = TileKey::new(1, 0, 1);
        let refused = TileKey::new(1, 1, 1);

        let http = MockHttp::default()
            .answer("https://tiles.local/1/0/0.pbf", Ok(b"tile".to_vec()))
            .answer(
                "https://tiles.local/1/0/1.pbf",
                Err(HttpError::Status { status: 500 }),
            )
            .answer(
                "https://tiles.local/1/1/1.pbf",
                Err(HttpError::Request("connection refused".into())),
            );
        let client = HttpSourceClient::new(http, TEMPLATE, TileScheme::Xyz);

        assert_eq!(client.fetch(&found), Ok(b"tile".to_vec()));
        assert_eq!(client.fetch(&missing), Err(SourceFetchError::NotFound(missing)));
        assert_eq!(
            client.fetch(&broken),
            Err(SourceFetchError::Transport {
                key: broken,
                reason: "Server answered with status 500".into(),
            })
        );
        assert_eq!(
            client.fetch(&refused),
            Err(SourceFetchError::Transport {
                key: refused,
                reason: "Request failed: connection refused".into(),
            })
        );
    }

    #[test]
    fn test_invalid_key_is_not_requested() {
        let client = HttpSourceClient::new(MockHttp::default(), TEMPLATE, TileScheme::Tms);
        let key = TileKey::new(1, 2, 0);

        assert_eq!(client.fetch(&key), Err(SourceFetchError::InvalidKey(key)));
        assert!(client.client.requested().is_empty());
    }

    #[test]
    fn test_fetch_through_procedure() {
        use crate::core::Payload;
        use crate::scheduler::{Procedure, ProcedureContext, WorkerConfig};
        use crate::source::FetchTileProcedure;

        let key = TileKey::new(3, 2, 1);
        let http = MockHttp::default().answer("https://tiles.local/3/2/6.pbf", Ok(vec![7; 3]));
        let procedure =
            FetchTileProcedure::new(HttpSourceClient::new(http, TEMPLATE, TileScheme::Tms));

        let config = WorkerConfig::default();
        let context = ProcedureContext {
            slot: 0,
            region: None,
            config: &config,
        };

        assert_eq!(
            procedure.call(&context, Payload::Inline(key.to_bytes().to_vec())),
            Ok(Payload::Inline(vec![7; 3]))
        );
    }
}
