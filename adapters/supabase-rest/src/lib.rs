//! Supabase REST adapter implementing the `ImprovementRepository` port.
//!
//! Production implementation backed by the hosted table store's REST API
//! (PostgREST dialect), spoken through `reqwest`.
//! - Stores improvements as flat rows in a single table keyed by `uuid`.
//! - Provides `from_env()` wiring for apps using env vars:
//!   `SUPABASE_URL`, `SUPABASE_KEY`, `SUPABASE_TABLE`.
//!
//! Notes:
//! - The domain `ImprovementRepository` trait is synchronous. We bridge to the
//!   async HTTP client using an internal `tokio::runtime::Runtime` and
//!   `block_on`.
//! - Every operation is a single unguarded store call: no retries, no local
//!   timeouts beyond the client library's defaults.

use chrono::{DateTime, Utc};
use domain::{validate, CoreError, Improvement, ImprovementId, ImprovementRepository, Original};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

/// Configuration for the hosted table store.
#[derive(Clone, Debug)]
pub struct SupaConfig {
    pub url: String,
    pub key: String,
    pub table: String,
}

impl SupaConfig {
    /// Create with explicit values. The project URL must be http(s).
    pub fn new(
        url: impl Into<String>,
        key: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let url = url.into();
        validate::validate_link(&url)?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.into(),
            table: table.into(),
        })
    }

    /// Build from environment variables:
    /// - `SUPABASE_URL` (required)
    /// - `SUPABASE_KEY` (required)
    /// - `SUPABASE_TABLE` (optional, defaults to `improvements`)
    pub fn from_env() -> Result<Self, CoreError> {
        let url = std::env::var("SUPABASE_URL").map_err(|_| CoreError::Config {
            field: "SUPABASE_URL",
            message: "missing".into(),
        })?;
        let key = std::env::var("SUPABASE_KEY").map_err(|_| CoreError::Config {
            field: "SUPABASE_KEY",
            message: "missing".into(),
        })?;
        let table = std::env::var("SUPABASE_TABLE").unwrap_or_else(|_| "improvements".into());
        Self::new(url, key, table)
    }
}

/// Repository backed by the hosted table store's REST API.
///
/// Supports both standalone mode (creates its own tokio runtime) and embedded
/// mode (reuses the surrounding runtime via `Handle::current()`).
#[derive(Clone, Debug)]
pub struct SupaRepo {
    config: SupaConfig,
    client: reqwest::Client,
    // Optional runtime - None when already inside a runtime (reuses it)
    rt: Option<std::sync::Arc<tokio::runtime::Runtime>>,
}

impl SupaRepo {
    /// Construct without touching the network.
    pub fn new(config: SupaConfig) -> Result<Self, CoreError> {
        let rt = Self::maybe_create_runtime()?;
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            rt,
        })
    }

    /// Construct and verify connectivity with a single-row read.
    ///
    /// The probe failure is returned to the caller instead of being
    /// swallowed; use [`SupaRepo::new`] when construction must always
    /// succeed and the first real operation may carry the failure.
    pub fn connect(config: SupaConfig) -> Result<Self, CoreError> {
        let repo = Self::new(config)?;
        if let Err(e) = repo.probe() {
            tracing::warn!(error = %e, "store connectivity probe failed");
            return Err(e);
        }
        Ok(repo)
    }

    /// Construct from the environment (see [`SupaConfig::from_env`]) and probe.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::connect(SupaConfig::from_env()?)
    }

    /// Issue a single-row read to check that the store is reachable.
    pub fn probe(&self) -> Result<(), CoreError> {
        let req = self
            .request(Method::GET)
            .query(&[("select", "uuid"), ("limit", "1")]);
        self.execute(req)?;
        Ok(())
    }

    /// Check if we're inside a tokio runtime. If yes, return None (reuse
    /// existing). If no, create a new runtime.
    fn maybe_create_runtime(
    ) -> Result<Option<std::sync::Arc<tokio::runtime::Runtime>>, CoreError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            // Already inside a runtime - don't create another
            Ok(None)
        } else {
            // Standalone mode - create our own runtime
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map_err(|e| CoreError::Repository(format!("tokio runtime init: {e}")))?;
            Ok(Some(std::sync::Arc::new(rt)))
        }
    }

    /// Run an async future, using either our owned runtime or the current one.
    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        match &self.rt {
            Some(rt) => rt.block_on(fut),
            None => {
                // We're inside an existing runtime - use block_in_place + Handle::current()
                tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
            }
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.url, self.config.table)
    }

    fn request(&self, method: Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.table_url())
            .header("apikey", self.config.key.as_str())
            .bearer_auth(&self.config.key)
    }

    /// Send a request and return the response body on success. Non-success
    /// statuses map to domain errors; the call itself is never retried.
    fn execute(&self, req: reqwest::RequestBuilder) -> Result<String, CoreError> {
        self.block_on(async {
            let resp = req.send().await.map_err(map_http_err)?;
            let status = resp.status();
            let body = resp.text().await.map_err(map_http_err)?;
            if status == StatusCode::CONFLICT {
                // Primary-key violation reported by the store
                return Err(CoreError::AlreadyExists(trim_body(&body)));
            }
            if !status.is_success() {
                return Err(CoreError::Repository(format!(
                    "store returned {status}: {}",
                    trim_body(&body)
                )));
            }
            Ok(body)
        })
    }

    fn fetch_rows(&self, req: reqwest::RequestBuilder) -> Result<Vec<ImprovementRow>, CoreError> {
        let body = self.execute(req)?;
        serde_json::from_str(&body)
            .map_err(|e| CoreError::Repository(format!("bad row payload: {e}")))
    }

    fn insert_rows(&self, rows: &[ImprovementRow]) -> Result<(), CoreError> {
        tracing::debug!(count = rows.len(), table = %self.config.table, "insert rows");
        let req = self
            .request(Method::POST)
            .header("Prefer", "return=minimal")
            .json(rows);
        self.execute(req)?;
        Ok(())
    }
}

impl ImprovementRepository for SupaRepo {
    fn add(&self, improvement: Improvement) -> Result<(), CoreError> {
        self.insert_rows(&[to_row(&improvement)])
    }

    fn add_all(&self, improvements: Vec<Improvement>) -> Result<(), CoreError> {
        if improvements.is_empty() {
            // Nothing to insert; succeed without a store call.
            return Ok(());
        }
        let rows: Vec<ImprovementRow> = improvements.iter().map(to_row).collect();
        self.insert_rows(&rows)
    }

    fn get(&self, id: &ImprovementId) -> Result<Improvement, CoreError> {
        tracing::debug!(id = id.as_str(), "get improvement");
        let filter = format!("eq.{}", id.as_str());
        let req = self
            .request(Method::GET)
            .query(&[("select", "*"), ("uuid", filter.as_str())]);
        let rows = self.fetch_rows(req)?;
        rows.into_iter()
            .next()
            .map(from_row)
            .transpose()?
            .ok_or_else(|| CoreError::NotFound(id.as_str().to_string()))
    }

    fn get_all(&self, last_n: Option<usize>) -> Result<Vec<Improvement>, CoreError> {
        tracing::debug!(limit = ?last_n, "list improvements");
        let mut req = self
            .request(Method::GET)
            .query(&[("select", "*"), ("order", "date_orig_ts.desc")]);
        if let Some(n) = last_n {
            let lim = n.to_string();
            req = req.query(&[("limit", lim.as_str())]);
        }
        let rows = self.fetch_rows(req)?;
        rows.into_iter().map(from_row).collect()
    }

    fn remove(&self, id: &ImprovementId) -> Result<Improvement, CoreError> {
        tracing::debug!(id = id.as_str(), "remove improvement");
        let filter = format!("eq.{}", id.as_str());
        let req = self
            .request(Method::DELETE)
            .header("Prefer", "return=representation")
            .query(&[("uuid", filter.as_str())]);
        let rows = self.fetch_rows(req)?;
        rows.into_iter()
            .next()
            .map(from_row)
            .transpose()?
            .ok_or_else(|| CoreError::NotFound(id.as_str().to_string()))
    }

    fn remove_all(&self, ids: &[ImprovementId]) -> Result<Vec<Improvement>, CoreError> {
        if ids.is_empty() {
            return Err(CoreError::Repository("no ids to remove".into()));
        }
        tracing::debug!(count = ids.len(), "remove improvements");
        let joined = ids
            .iter()
            .map(ImprovementId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let filter = format!("in.({joined})");
        let req = self
            .request(Method::DELETE)
            .header("Prefer", "return=representation")
            .query(&[("uuid", filter.as_str())]);
        let rows = self.fetch_rows(req)?;
        if rows.is_empty() {
            return Err(CoreError::NotFound(joined));
        }
        rows.into_iter().map(from_row).collect()
    }
}

fn map_http_err(e: reqwest::Error) -> CoreError {
    CoreError::Repository(format!("http error: {e}"))
}

fn trim_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        let head: String = body.chars().take(MAX).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}

/// Flat row representation as stored in the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImprovementRow {
    uuid: String,
    title: String,
    summary: String,
    title_orig: String,
    summary_orig: String,
    link_orig: String,
    /// Empty string when the original had no image; never null in the table.
    #[serde(default)]
    image_link_orig: String,
    date_orig_ts: i64,
}

fn to_row(imp: &Improvement) -> ImprovementRow {
    ImprovementRow {
        uuid: imp.id.as_str().to_string(),
        title: imp.title.clone(),
        summary: imp.summary.clone(),
        title_orig: imp.original.title.clone(),
        summary_orig: imp.original.summary.clone(),
        link_orig: imp.original.link.clone(),
        image_link_orig: imp.original.image_link.clone().unwrap_or_default(),
        // Whole seconds only; sub-second precision is dropped here.
        date_orig_ts: imp.original.date.timestamp(),
    }
}

fn from_row(row: ImprovementRow) -> Result<Improvement, CoreError> {
    let date = DateTime::<Utc>::from_timestamp(row.date_orig_ts, 0).ok_or_else(|| {
        CoreError::Repository(format!("bad date_orig_ts in row: {}", row.date_orig_ts))
    })?;
    let id = ImprovementId::new(row.uuid)
        .map_err(|e| CoreError::Repository(format!("bad uuid in row: {e}")))?;
    let image_link = if row.image_link_orig.is_empty() {
        None
    } else {
        Some(row.image_link_orig)
    };
    Ok(Improvement::with_id(
        id,
        row.title,
        row.summary,
        Original {
            title: row.title_orig,
            summary: row.summary_orig,
            link: row.link_orig,
            date,
            image_link,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::prelude::*;

    const TABLE_PATH: &str = "/rest/v1/improvements";

    fn sample_improvement(id: &str, secs: i64) -> Improvement {
        Improvement::with_id(
            ImprovementId::new(id).unwrap(),
            "Better title",
            "Better summary",
            Original {
                title: "Original title".into(),
                summary: "Original summary".into(),
                link: "https://example.com/post".into(),
                date: Utc.timestamp_opt(secs, 0).unwrap(),
                image_link: Some("https://example.com/img.png".into()),
            },
        )
    }

    fn row_json(id: &str, secs: i64) -> serde_json::Value {
        serde_json::json!({
            "uuid": id,
            "title": "Better title",
            "summary": "Better summary",
            "title_orig": "Original title",
            "summary_orig": "Original summary",
            "link_orig": "https://example.com/post",
            "image_link_orig": "https://example.com/img.png",
            "date_orig_ts": secs,
        })
    }

    fn test_repo(server: &MockServer) -> SupaRepo {
        let config = SupaConfig::new(server.base_url(), "test-key", "improvements").unwrap();
        SupaRepo::new(config).unwrap()
    }

    #[test]
    fn roundtrip_row_mapping_truncates_to_whole_seconds() {
        let mut imp = sample_improvement("abc", 1_700_000_000);
        imp.original.date = imp.original.date + chrono::Duration::milliseconds(250);

        let row = to_row(&imp);
        assert_eq!(row.date_orig_ts, 1_700_000_000);

        let back = from_row(row).unwrap();
        assert_eq!(back.id, imp.id);
        assert_eq!(back.title, imp.title);
        assert_eq!(back.summary, imp.summary);
        assert_eq!(back.original.title, imp.original.title);
        assert_eq!(back.original.summary, imp.original.summary);
        assert_eq!(back.original.link, imp.original.link);
        assert_eq!(back.original.image_link, imp.original.image_link);
        // The 250ms are gone; only whole seconds survive the store.
        assert_eq!(
            back.original.date,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap()
        );
    }

    #[test]
    fn missing_image_link_maps_to_empty_string_field() {
        let mut imp = sample_improvement("abc", 1_700_000_000);
        imp.original.image_link = None;

        let row = to_row(&imp);
        assert_eq!(row.image_link_orig, "");

        let back = from_row(row).unwrap();
        assert_eq!(back.original.image_link, None);
    }

    #[test]
    fn row_without_image_field_deserializes_to_empty_string() {
        let raw = r#"{
            "uuid": "abc",
            "title": "t",
            "summary": "s",
            "title_orig": "ot",
            "summary_orig": "os",
            "link_orig": "https://example.com",
            "date_orig_ts": 1700000000
        }"#;
        let row: ImprovementRow = serde_json::from_str(raw).unwrap();
        assert_eq!(row.image_link_orig, "");
    }

    #[test]
    fn from_row_rejects_unrepresentable_timestamp() {
        let mut imp = sample_improvement("abc", 0);
        imp.original.image_link = None;
        let mut row = to_row(&imp);
        row.date_orig_ts = i64::MAX;
        assert!(matches!(from_row(row), Err(CoreError::Repository(_))));
    }

    #[test]
    fn add_posts_row_with_auth_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path(TABLE_PATH)
                .header("apikey", "test-key")
                .header("Authorization", "Bearer test-key")
                .header("Prefer", "return=minimal")
                .json_body(serde_json::json!([row_json("abc", 1_700_000_000)]));
            then.status(201);
        });

        let repo = test_repo(&server);
        repo.add(sample_improvement("abc", 1_700_000_000)).unwrap();
        mock.assert();
    }

    #[test]
    fn add_all_empty_skips_the_store() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path(TABLE_PATH);
            then.status(201);
        });

        let repo = test_repo(&server);
        repo.add_all(Vec::new()).unwrap();
        assert_eq!(mock.hits(), 0);
    }

    #[test]
    fn add_maps_conflict_to_already_exists() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(TABLE_PATH);
            then.status(409)
                .json_body(serde_json::json!({"code": "23505", "message": "duplicate key"}));
        });

        let repo = test_repo(&server);
        let err = repo.add(sample_improvement("abc", 1)).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[test]
    fn get_filters_by_uuid_and_parses_row() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path(TABLE_PATH)
                .query_param("select", "*")
                .query_param("uuid", "eq.abc");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([row_json("abc", 1_700_000_000)]));
        });

        let repo = test_repo(&server);
        let id = ImprovementId::new("abc").unwrap();
        let imp = repo.get(&id).unwrap();
        mock.assert();
        assert_eq!(imp, sample_improvement("abc", 1_700_000_000));
    }

    #[test]
    fn get_on_empty_result_is_typed_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(TABLE_PATH);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([]));
        });

        let repo = test_repo(&server);
        let id = ImprovementId::new("missing").unwrap();
        assert!(matches!(repo.get(&id), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn get_all_orders_by_date_descending_with_limit() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path(TABLE_PATH)
                .query_param("order", "date_orig_ts.desc")
                .query_param("limit", "3");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([
                    row_json("b", 2_000),
                    row_json("a", 1_000),
                ]));
        });

        let repo = test_repo(&server);
        let all = repo.get_all(Some(3)).unwrap();
        mock.assert();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id.as_str(), "b");
    }

    #[test]
    fn get_all_without_limit_still_orders_descending() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path(TABLE_PATH)
                .query_param("order", "date_orig_ts.desc");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([row_json("a", 1_000)]));
        });

        let repo = test_repo(&server);
        let all = repo.get_all(None).unwrap();
        mock.assert();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn remove_returns_the_deleted_row() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(DELETE)
                .path(TABLE_PATH)
                .header("Prefer", "return=representation")
                .query_param("uuid", "eq.abc");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([row_json("abc", 1_700_000_000)]));
        });

        let repo = test_repo(&server);
        let id = ImprovementId::new("abc").unwrap();
        let deleted = repo.remove(&id).unwrap();
        mock.assert();
        assert_eq!(deleted, sample_improvement("abc", 1_700_000_000));
    }

    #[test]
    fn remove_of_unknown_id_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(DELETE).path(TABLE_PATH);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([]));
        });

        let repo = test_repo(&server);
        let id = ImprovementId::new("ghost").unwrap();
        assert!(matches!(repo.remove(&id), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn remove_all_uses_in_filter_and_returns_deleted_rows() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(DELETE)
                .path(TABLE_PATH)
                .query_param("uuid", "in.(a,b)");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([row_json("a", 1_000), row_json("b", 2_000)]));
        });

        let repo = test_repo(&server);
        let ids = vec![
            ImprovementId::new("a").unwrap(),
            ImprovementId::new("b").unwrap(),
        ];
        let removed = repo.remove_all(&ids).unwrap();
        mock.assert();
        assert_eq!(removed.len(), 2);
    }

    #[test]
    fn remove_all_with_no_matches_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(DELETE).path(TABLE_PATH);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([]));
        });

        let repo = test_repo(&server);
        let ids = vec![ImprovementId::new("ghost").unwrap()];
        assert!(matches!(
            repo.remove_all(&ids),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn connect_probes_with_single_row_read() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path(TABLE_PATH)
                .query_param("select", "uuid")
                .query_param("limit", "1");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!([]));
        });

        let config = SupaConfig::new(server.base_url(), "test-key", "improvements").unwrap();
        let _repo = SupaRepo::connect(config).unwrap();
        mock.assert();
    }

    #[test]
    fn connect_surfaces_probe_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(TABLE_PATH);
            then.status(500).body("boom");
        });

        let config = SupaConfig::new(server.base_url(), "test-key", "improvements").unwrap();
        let err = SupaRepo::connect(config).unwrap_err();
        assert!(matches!(err, CoreError::Repository(_)));
    }

    #[test]
    fn config_rejects_non_http_url() {
        let err = SupaConfig::new("ftp://example.com", "k", "t").unwrap_err();
        assert!(matches!(err, CoreError::InvalidLink(_)));
    }

    #[test]
    fn config_trims_trailing_slash() {
        let config = SupaConfig::new("https://example.supabase.co/", "k", "improvements").unwrap();
        assert_eq!(config.url, "https://example.supabase.co");
    }
}
