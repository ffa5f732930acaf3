//! ApiClient - the admin API of one cluster instance.
//!
//! Every call is an HTTP GET against an endpoint path with query
//! parameters. The fixed base parameters (`c=main`, `format=json`,
//! `showinput=0`) are an immutable [`BaseParams`] value composed with the
//! per-call parameters; per-call values win.
//!
//! ```text
//! ApiClient::call → Transport::get → cluster
//!        ↓
//!  malformed status line?  "(Doc force deleted)" / "(Record not found)"
//!        ↓                              ↓
//!  ApiError::ProtocolAnomaly     synthetic ApiResponse (success)
//! ```

use std::time::Duration;

use probe_types::{ApiResponse, ResponseError, Sentinel, SpiderQueueSnapshot};
use serde_json::Value;
use thiserror::Error;

use crate::transport::{Request, Transport, TransportError};

/// Settle time after an injection; the cluster returns before indexing completes.
pub const INJECT_SETTLE: Duration = Duration::from_millis(100);

/// Admin API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Cluster unreachable, or the request failed without a usable response.
    #[error("cluster unreachable: {0}")]
    Connectivity(#[source] TransportError),

    /// A malformed status line that is not one of the known sentinels.
    #[error("protocol anomaly on {endpoint}: {line:?}")]
    ProtocolAnomaly {
        /// Endpoint called.
        endpoint: String,
        /// The raw status line.
        line: String,
    },

    /// Non-2xx status with an undecodable body.
    #[error("HTTP {status} from {endpoint}")]
    Http {
        /// Endpoint called.
        endpoint: String,
        /// HTTP status.
        status: u16,
    },

    /// Body is not the expected JSON.
    #[error("invalid response from {endpoint}: {source}")]
    Decode {
        /// Endpoint called.
        endpoint: String,
        /// Decoder error.
        #[source]
        source: ResponseError,
    },

    /// A required response field is missing.
    #[error("{endpoint} response has no {field}")]
    MissingField {
        /// Endpoint called.
        endpoint: String,
        /// Field name.
        field: &'static str,
    },
}

impl ApiError {
    /// True for [`ApiError::Connectivity`].
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Connectivity(_))
    }
}

/// Parameters sent with every request unless overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseParams {
    params: Vec<(String, String)>,
}

impl Default for BaseParams {
    fn default() -> Self {
        Self::new([("c", "main"), ("format", "json"), ("showinput", "0")])
    }
}

impl BaseParams {
    /// Base parameters from key/value pairs.
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// A copy with one more base parameter, or one replaced.
    pub fn with(&self, key: &str, value: &str) -> Self {
        Self {
            params: self.compose(&[(key, value)]),
        }
    }

    /// Base parameters overlaid with per-call ones. Per-call values win.
    pub fn compose(&self, overrides: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut params = self.params.clone();
        for (key, value) in overrides {
            match params.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.to_string(),
                None => params.push((key.to_string(), value.to_string())),
            }
        }
        params
    }
}

/// Admin API client for one instance.
#[derive(Debug, Clone)]
pub struct ApiClient<T: Transport> {
    transport: T,
    base: BaseParams,
    inject_settle: Duration,
}

impl<T: Transport> ApiClient<T> {
    /// Create a client with the default base parameters.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            base: BaseParams::default(),
            inject_settle: INJECT_SETTLE,
        }
    }

    /// Replace the base parameters.
    pub fn with_base_params(mut self, base: BaseParams) -> Self {
        self.base = base;
        self
    }

    /// Override the settle time after injections.
    pub fn with_inject_settle(mut self, settle: Duration) -> Self {
        self.inject_settle = settle;
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Base parameters in effect.
    pub fn base_params(&self) -> &BaseParams {
        &self.base
    }

    /// Call an endpoint and decode the JSON response.
    ///
    /// A malformed status line carrying a known sentinel becomes the
    /// matching synthetic response rather than an error.
    pub async fn call(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<ApiResponse, ApiError> {
        let request = Request {
            endpoint: endpoint.to_string(),
            params: self.base.compose(params),
        };

        let raw = match self.transport.get(&request).await {
            Ok(raw) => raw,
            Err(err) => {
                if let Some(sentinel) = err.status_text().and_then(Sentinel::from_status_text) {
                    tracing::debug!(endpoint, ?sentinel, "status line carries sentinel");
                    return Ok(sentinel.response());
                }
                return Err(match err {
                    TransportError::MalformedStatusLine { line } => ApiError::ProtocolAnomaly {
                        endpoint: endpoint.to_string(),
                        line,
                    },
                    other => ApiError::Connectivity(other),
                });
            }
        };

        ApiResponse::from_body(&raw.body).map_err(|source| {
            if raw.is_success() {
                ApiError::Decode {
                    endpoint: endpoint.to_string(),
                    source,
                }
            } else {
                ApiError::Http {
                    endpoint: endpoint.to_string(),
                    status: raw.status,
                }
            }
        })
    }

    /// Call an endpoint whose body does not matter; only reachability does.
    pub async fn send(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<(), ApiError> {
        match self.call(endpoint, params).await {
            Ok(_) => Ok(()),
            Err(e @ (ApiError::Decode { .. } | ApiError::Http { .. })) => {
                tracing::debug!(endpoint, error = %e, "ignoring response body");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Queue a URL for spidering.
    pub async fn add_url(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/addurl", &[("urls", url)]).await
    }

    /// Inject a URL: the cluster fetches and indexes it immediately.
    pub async fn inject_url(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.inject(&[("url", url)]).await
    }

    /// Inject a document with the given content.
    pub async fn inject_document(
        &self,
        url: &str,
        content: &str,
        content_type: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut params = vec![("url", url), ("content", content)];
        if let Some(content_type) = content_type {
            params.push(("contenttype", content_type));
        }
        self.inject(&params).await
    }

    /// Delete a URL by injection. Answers with the synthetic `FORCE_DELETED`.
    pub async fn delete_url(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.inject(&[("url", url), ("deleteurl", "1")]).await
    }

    async fn inject(&self, params: &[(&str, &str)]) -> Result<ApiResponse, ApiError> {
        let response = self.call("admin/inject", params).await?;
        tokio::time::sleep(self.inject_settle).await;
        Ok(response)
    }

    /// Delete a document by id.
    pub async fn doc_delete(&self, doc_id: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/docdelete", &[("d", doc_id)]).await
    }

    /// Delete a document by URL.
    pub async fn doc_delete_by_url(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/docdelete", &[("u", url)]).await
    }

    /// Rebuild a document by id.
    pub async fn doc_rebuild(&self, doc_id: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/docrebuild", &[("d", doc_id)]).await
    }

    /// Rebuild a document by URL.
    pub async fn doc_rebuild_by_url(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/docrebuild", &[("u", url)]).await
    }

    /// Reindex a document by id.
    pub async fn doc_reindex(&self, doc_id: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/docreindex", &[("d", doc_id)]).await
    }

    /// Reindex a document by URL.
    pub async fn doc_reindex_by_url(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/docreindex", &[("u", url)]).await
    }

    /// Replace the spider site list. Seeds are newline separated.
    pub async fn config_sitelist(&self, sitelist: &str) -> Result<(), ApiError> {
        self.send("admin/settings", &[("sitelist", sitelist)]).await
    }

    /// Set the crawl delays for sites without robots.txt and with robots.txt but no delay.
    pub async fn config_crawl_delay(&self, no_robots: &str, robots_no_delay: &str) -> Result<(), ApiError> {
        self.send(
            "admin/spider",
            &[("crwldlnorobot", no_robots), ("crwldlrobotnodelay", robots_no_delay)],
        )
        .await
    }

    /// Set the primary and secondary DNS servers.
    pub async fn config_dns(&self, primary: &str, secondary: Option<&str>) -> Result<(), ApiError> {
        self.send(
            "admin/master",
            &[("pdns", primary), ("sdns", secondary.unwrap_or_default())],
        )
        .await
    }

    /// Set one log flag.
    pub async fn config_log(&self, flag: &str, value: &str) -> Result<(), ApiError> {
        self.send("admin/log", &[(flag, value)]).await
    }

    /// Set arbitrary master configuration parameters.
    pub async fn custom_config(&self, pairs: &[(String, String)]) -> Result<(), ApiError> {
        let params: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.send("admin/master", &params).await
    }

    /// Link records pointing at `url`.
    pub async fn lookup_linkdb(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/linkdblookup", &[("u", url)]).await
    }

    /// Spider request/reply records for `url`.
    pub async fn lookup_spiderdb(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/spiderdblookup", &[("u", url)]).await
    }

    /// Title record for `url`.
    pub async fn lookup_titledb(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/titledblookup", &[("u", url)]).await
    }

    /// Fetch a cached document by id. May answer with the synthetic `RECORD_NOT_FOUND`.
    pub async fn get(&self, doc_id: &str) -> Result<ApiResponse, ApiError> {
        self.call("get", &[("d", doc_id)]).await
    }

    /// Add a tag for `url`.
    pub async fn insert_tagdb(&self, url: &str, tag_type: &str, tag_data: &str) -> Result<ApiResponse, ApiError> {
        self.call(
            "admin/tagdb",
            &[("u", url), ("tagtype", tag_type), ("tagdata", tag_data), ("add", "1")],
        )
        .await
    }

    /// Tags stored for `url`.
    pub async fn lookup_tagdb(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.call("admin/tagdb", &[("u", url), ("lookup", "1")]).await
    }

    /// Search.
    pub async fn search(&self, query: &str, extra: &[(String, String)]) -> Result<ApiResponse, ApiError> {
        let mut params = vec![("q", query)];
        params.extend(extra.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        self.call("search", &params).await
    }

    /// Instance status.
    pub async fn status(&self) -> Result<ApiResponse, ApiError> {
        self.call("admin/status", &[]).await
    }

    /// The `processStartTime` status field, used as the liveness fingerprint.
    pub async fn status_process_start_time(&self) -> Result<i64, ApiError> {
        let status = self.status().await?;
        status
            .field("processStartTime")
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| ApiError::MissingField {
                endpoint: "admin/status".into(),
                field: "processStartTime",
            })
    }

    /// Current spider queue state.
    pub async fn spider_queue(&self) -> Result<SpiderQueueSnapshot, ApiError> {
        const ENDPOINT: &str = "admin/spiderdb";
        let response = self.call(ENDPOINT, &[]).await?;
        let body = response
            .payload
            .get("response")
            .cloned()
            .unwrap_or(Value::Object(response.payload));
        serde_json::from_value(body).map_err(|e| ApiError::Decode {
            endpoint: ENDPOINT.into(),
            source: e.into(),
        })
    }

    /// Dump in-memory trees to disk.
    pub async fn dump(&self) -> Result<(), ApiError> {
        self.send("admin/master", &[("dump", "1")]).await
    }

    /// Save in-memory state.
    pub async fn save(&self) -> Result<(), ApiError> {
        self.send("admin/master", &[("js", "1")]).await
    }

    /// Save and shut the instance down.
    ///
    /// The connection drops as the instance exits; that error is expected
    /// and swallowed.
    pub async fn save_and_exit(&self) -> Result<(), ApiError> {
        match self.send("admin/master", &[("save", "1")]).await {
            Err(ApiError::Connectivity(e)) => {
                tracing::debug!(error = %e, "connection dropped on shutdown");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockReply, MockTransport};
    use probe_types::STATUS_STEADY;
    use serde_json::json;

    fn client() -> (ApiClient<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let client = ApiClient::new(mock.clone()).with_inject_settle(Duration::ZERO);
        (client, mock)
    }

    #[test]
    fn base_params_compose() {
        let base = BaseParams::default();
        let params = base.compose(&[("q", "x"), ("format", "html")]);
        assert_eq!(
            params,
            vec![
                ("c".to_string(), "main".to_string()),
                ("format".to_string(), "html".to_string()),
                ("showinput".to_string(), "0".to_string()),
                ("q".to_string(), "x".to_string()),
            ]
        );
        // compose never mutates the base
        assert_eq!(base, BaseParams::default());
        assert_eq!(base.with("c", "other").compose(&[])[0].1, "other");
    }

    #[tokio::test]
    async fn call_injects_default_params() {
        let (client, mock) = client();
        client.status().await.unwrap();

        let request = &mock.requests_to("admin/status")[0];
        assert_eq!(request.param("c"), Some("main"));
        assert_eq!(request.param("format"), Some("json"));
        assert_eq!(request.param("showinput"), Some("0"));
    }

    #[tokio::test]
    async fn force_deleted_is_idempotent_success() {
        let (client, mock) = client();
        mock.on(
            "admin/inject",
            MockReply::Malformed("HTTP/1.1 32805 (Doc force deleted)".into()),
        );

        for _ in 0..3 {
            let response = client.delete_url("http://a.example/").await.unwrap();
            assert!(response.is(Sentinel::ForceDeleted));
            assert_eq!(response.status_msg, "Doc force deleted");
        }
        let request = &mock.requests_to("admin/inject")[0];
        assert_eq!(request.param("deleteurl"), Some("1"));
    }

    #[tokio::test]
    async fn record_not_found_is_synthesized() {
        let (client, mock) = client();
        mock.on("get", MockReply::Malformed("HTTP/1.0 32771 (Record not found)".into()));

        let response = client.get("12345").await.unwrap();
        assert_eq!(response.status_code, 32771);
    }

    #[tokio::test]
    async fn other_malformed_lines_are_anomalies() {
        let (client, mock) = client();
        mock.on("get", MockReply::Malformed("HTTP/1.0 99999 (Something else)".into()));

        let err = client.get("1").await.unwrap_err();
        assert!(matches!(err, ApiError::ProtocolAnomaly { ref line, .. } if line.contains("99999")));
    }

    #[tokio::test]
    async fn unreachable_is_connectivity() {
        let (client, mock) = client();
        mock.set_unreachable(true);
        assert!(client.status().await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn save_and_exit_swallows_disconnect() {
        let (client, mock) = client();
        mock.on("admin/master", MockReply::Unreachable);
        client.save_and_exit().await.unwrap();
        assert!(client.save().await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn send_ignores_body() {
        let (client, mock) = client();
        mock.on("admin/settings", MockReply::Status(500, "<html>".into()));
        client.config_sitelist("http://a/\nhttp://b/").await.unwrap();

        assert!(matches!(
            client.call("admin/settings", &[]).await,
            Err(ApiError::Http { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn decode_errors() {
        let (client, mock) = client();
        mock.on("admin/status", MockReply::Body("not json".into()));
        assert!(matches!(client.status().await, Err(ApiError::Decode { .. })));
    }

    #[tokio::test]
    async fn process_start_time() {
        let (client, mock) = client();
        mock.on(
            "admin/status",
            MockReply::json(json!({"response": {"statusCode": 0, "processStartTime": 1700000000}})),
        );
        assert_eq!(client.status_process_start_time().await.unwrap(), 1_700_000_000);

        mock.on("admin/status", MockReply::json(json!({"response": {"statusCode": 0}})));
        assert!(matches!(
            client.status_process_start_time().await,
            Err(ApiError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn spider_queue_reads_envelope() {
        let (client, mock) = client();
        mock.on(
            "admin/spiderdb",
            MockReply::json(json!({"response": {
                "statusCode": 7,
                "doleIPCount": 0,
                "spiderCount": 1,
                "waitingTreeCount": 0,
                "waitingTrees": []
            }})),
        );
        let snapshot = client.spider_queue().await.unwrap();
        assert_eq!(snapshot.status_code, STATUS_STEADY);
        assert_eq!(snapshot.spider_count, 1);
    }

    #[tokio::test]
    async fn wrappers_shape_params() {
        let (client, mock) = client();

        client.config_crawl_delay("0", "0").await.unwrap();
        client.config_dns("127.0.0.1", None).await.unwrap();
        client.config_log("ldq", "1").await.unwrap();
        client
            .custom_config(&[("maxmem".into(), "4000000".into())])
            .await
            .unwrap();
        client.search("case1", &[("n".into(), "10".into())]).await.unwrap();
        client.insert_tagdb("http://a/", "sitenuminlinks", "5").await.unwrap();
        client
            .inject_document("http://a/doc", "<html></html>", Some("text/html"))
            .await
            .unwrap();

        let spider = &mock.requests_to("admin/spider")[0];
        assert_eq!(spider.param("crwldlnorobot"), Some("0"));
        assert_eq!(spider.param("crwldlrobotnodelay"), Some("0"));

        let master = mock.requests_to("admin/master");
        assert_eq!(master[0].param("pdns"), Some("127.0.0.1"));
        assert_eq!(master[0].param("sdns"), Some(""));
        assert_eq!(master[1].param("maxmem"), Some("4000000"));

        assert_eq!(mock.requests_to("admin/log")[0].param("ldq"), Some("1"));

        let search = &mock.requests_to("search")[0];
        assert_eq!(search.param("q"), Some("case1"));
        assert_eq!(search.param("n"), Some("10"));

        let tag = &mock.requests_to("admin/tagdb")[0];
        assert_eq!(tag.param("add"), Some("1"));
        assert_eq!(tag.param("tagtype"), Some("sitenuminlinks"));

        let inject = &mock.requests_to("admin/inject")[0];
        assert_eq!(inject.param("contenttype"), Some("text/html"));
    }
}
