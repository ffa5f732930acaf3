//! Assertion actions.
//!
//! Each takes its literals inline or, with no arguments, one per line from
//! the expectation file named after the action. Every literal yields one
//! record. A literal that does not parse fails immediately and the remaining
//! literals of that action are not attempted.

use std::collections::BTreeSet;
use std::time::Instant;

use probe_client::{ApiClient, ApiError, Transport};
use probe_core::literal::{
    normalize_result_url, parse_absent_literal, parse_language_literal, parse_link_literal, parse_property_literal,
    parse_search_literal, property_mismatches,
};
use probe_core::{probable_doc_id_with, site_hash32_with, FormatError, IdHasher};
use probe_types::ApiResponse;
use serde_json::{Map, Value};

use super::{Action, RecordKind, ResultShape};
use crate::cluster::ClusterControl;
use crate::engine::{CaseRun, Engine, Outcome};

/// How inline arguments become literals.
#[derive(Clone, Copy)]
enum Inline {
    /// All arguments joined by spaces form one literal.
    Joined,
    /// Only the first argument is used.
    First,
    /// Every argument is its own literal.
    Each,
}

fn text_field<'v>(value: &'v Value, name: &str) -> &'v str {
    value.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn number_field(value: &Value, name: &str) -> Option<u64> {
    let field = value.get(name)?;
    field.as_u64().or_else(|| field.as_str().and_then(|s| s.parse().ok()))
}

fn query_info<'r>(response: &'r ApiResponse, name: &str) -> Option<&'r Value> {
    response.field("queryInfo").and_then(|info| info.get(name))
}

/// Compare a search response against the expected fields of one literal.
fn compare_results(shape: ResultShape, count: usize, expected: &[String], response: &ApiResponse) -> Outcome {
    let actual: Vec<String> = match shape {
        ResultShape::UnorderedUrls | ResultShape::Urls => response
            .results()
            .iter()
            .map(|r| normalize_result_url(text_field(r, "url")))
            .collect(),
        ResultShape::TitleSummary => response
            .results()
            .iter()
            .flat_map(|r| [text_field(r, "title").to_string(), text_field(r, "sum").to_string()])
            .collect(),
        ResultShape::QueryTerms => query_info(response, "terms")
            .and_then(Value::as_array)
            .map(|terms| terms.iter().map(|t| text_field(t, "termStr").to_string()).collect())
            .unwrap_or_default(),
    };

    let found = actual.len() / shape.fields_per_result();
    if found != count {
        return Outcome::Fail(format!("expected {count} results, got {found}: {actual:?}"));
    }

    match shape {
        ResultShape::UnorderedUrls => {
            let mut want = expected.to_vec();
            let mut got = actual.clone();
            want.sort();
            got.sort();
            Outcome::check(want == got, || format!("expected {expected:?} in any order, got {actual:?}"))
        }
        _ => match expected.iter().zip(&actual).position(|(want, got)| want != got) {
            None => Outcome::Pass,
            Some(i) => Outcome::Fail(format!(
                "field {i}: expected {:?}, got {:?}",
                expected[i], actual[i]
            )),
        },
    }
}

/// Compare stored link records positionally against recomputed identifiers.
fn compare_links(hasher: &dyn IdHasher, linkers: &[String], links: &[Value]) -> Outcome {
    if links.len() != linkers.len() {
        return Outcome::Fail(format!("expected {} link records, got {}", linkers.len(), links.len()));
    }

    let mismatches: Vec<String> = linkers
        .iter()
        .zip(links)
        .enumerate()
        .flat_map(|(i, (linker, link))| {
            let doc_id = probable_doc_id_with(hasher, linker);
            let site_hash = u64::from(site_hash32_with(hasher, linker));
            let mut problems = Vec::new();
            if number_field(link, "linkerDocId") != Some(doc_id) {
                problems.push(format!(
                    "link {i} ({linker}): linkerDocId expected {doc_id}, got {}",
                    link.get("linkerDocId").unwrap_or(&Value::Null)
                ));
            }
            if number_field(link, "linkerSiteHash32") != Some(site_hash) {
                problems.push(format!(
                    "link {i} ({linker}): linkerSiteHash32 expected {site_hash}, got {}",
                    link.get("linkerSiteHash32").unwrap_or(&Value::Null)
                ));
            }
            problems
        })
        .collect();

    Outcome::check(mismatches.is_empty(), || mismatches.join("; "))
}

impl<T: Transport, C: ClusterControl> Engine<T, C> {
    pub(crate) async fn verification(&mut self, run: &mut CaseRun<'_>, action: Action, args: &[String]) {
        let inline = match action {
            Action::VerifySpidered | Action::VerifyNotSpidered => Inline::First,
            Action::VerifyOnlySpidered => Inline::Each,
            _ => Inline::Joined,
        };
        let Some(literals) = self.literals(run, action, args, inline).await else {
            return;
        };
        if literals.is_empty() {
            return;
        }
        tracing::info!(test = action.name(), literals = literals.len(), "running test");

        match action {
            Action::JustSearch => self.just_search(run, &literals).await,
            Action::VerifyIndexed => self.verify_membership(run, action, &literals, true).await,
            Action::VerifyNotIndexed => self.verify_membership(run, action, &literals, false).await,
            Action::VerifySpidered => self.verify_spidered(run, action, &literals, true).await,
            Action::VerifyNotSpidered => self.verify_spidered(run, action, &literals, false).await,
            Action::VerifyOnlySpidered => self.verify_only_spidered(run, &literals).await,
            Action::VerifySearchResult => {
                self.verify_search_results(run, action, &literals, ResultShape::UnorderedUrls)
                    .await
            }
            Action::VerifySearchResultUrl => {
                self.verify_search_results(run, action, &literals, ResultShape::Urls).await
            }
            Action::VerifySearchResultTitleSummary => {
                self.verify_search_results(run, action, &literals, ResultShape::TitleSummary)
                    .await
            }
            Action::VerifyQueryTerms => {
                self.verify_search_results(run, action, &literals, ResultShape::QueryTerms)
                    .await
            }
            Action::VerifyQueryLanguage => self.verify_query_language(run, &literals).await,
            Action::VerifySpiderRequest => {
                self.verify_record(run, action, &literals, RecordKind::SpiderRequest).await
            }
            Action::VerifySpiderResponse => {
                self.verify_record(run, action, &literals, RecordKind::SpiderReply).await
            }
            Action::VerifyTitleRecord => self.verify_record(run, action, &literals, RecordKind::TitleRec).await,
            Action::VerifyNoSpiderRequest => {
                self.verify_no_record(run, action, &literals, RecordKind::SpiderRequest)
                    .await
            }
            Action::VerifyNoSpiderResponse => {
                self.verify_no_record(run, action, &literals, RecordKind::SpiderReply).await
            }
            Action::VerifyNoTitleRecord => {
                self.verify_no_record(run, action, &literals, RecordKind::TitleRec).await
            }
            Action::VerifyLinkdbRecord => self.verify_linkdb_record(run, &literals).await,
            _ => tracing::error!(action = action.name(), "not a verification"),
        }
    }

    /// Inline literals, or the action's expectation file. `None` when the
    /// file could not be read; that failure is already recorded.
    async fn literals(
        &mut self,
        run: &mut CaseRun<'_>,
        action: Action,
        args: &[String],
        inline: Inline,
    ) -> Option<Vec<String>> {
        if !args.is_empty() {
            return Some(match inline {
                Inline::Joined => vec![args.join(" ")],
                Inline::First => vec![args[0].clone()],
                Inline::Each => args.to_vec(),
            });
        }

        let case = run.case;
        match case.expectations(action.name()).await {
            Ok(lines) => Some(lines),
            Err(e) => {
                self.record(run, action.name(), "", Instant::now(), Outcome::Fail(e.to_string()))
                    .await;
                None
            }
        }
    }

    async fn format_failure(&mut self, run: &mut CaseRun<'_>, action: Action, literal: &str, error: FormatError) {
        self.record(run, action.name(), literal, Instant::now(), error.into())
            .await;
        tracing::warn!(action = action.name(), "skipping remaining literals after format error");
    }

    async fn just_search(&mut self, run: &mut CaseRun<'_>, queries: &[String]) {
        for query in queries {
            let started = Instant::now();
            let outcome = match self.query.search(query, &[]).await {
                Ok(_) => Outcome::Pass,
                Err(e) => e.into(),
            };
            self.record(run, "just_search", query, started, outcome).await;
        }
    }

    async fn verify_membership(&mut self, run: &mut CaseRun<'_>, action: Action, queries: &[String], indexed: bool) {
        for query in queries {
            let started = Instant::now();
            let outcome = match self.query.search(query, &[]).await {
                Ok(response) => {
                    let hits = response.results().len();
                    if (hits > 0) != indexed {
                        tracing::debug!(payload = ?response.payload, "unexpected search response");
                    }
                    Outcome::check((hits > 0) == indexed, || {
                        if indexed {
                            "no results".to_string()
                        } else {
                            format!("{hits} unexpected results")
                        }
                    })
                }
                Err(e) => e.into(),
            };
            self.record(run, action.name(), query, started, outcome).await;
        }
    }

    async fn verify_spidered(&mut self, run: &mut CaseRun<'_>, action: Action, items: &[String], spidered: bool) {
        let served = self.served.served_urls();
        for item in items {
            let started = Instant::now();
            let url = self.settings.placeholders.apply(item);
            let outcome = Outcome::check(served.contains(&url) == spidered, || {
                if spidered {
                    format!("{url} was not requested")
                } else {
                    format!("{url} was requested")
                }
            });
            self.record(run, action.name(), item, started, outcome).await;
        }
    }

    async fn verify_only_spidered(&mut self, run: &mut CaseRun<'_>, items: &[String]) {
        let started = Instant::now();
        let expected: BTreeSet<String> = items.iter().map(|i| self.settings.placeholders.apply(i)).collect();
        let served: BTreeSet<String> = self.served.served_urls().into_iter().collect();

        let missing: Vec<&String> = expected.difference(&served).collect();
        let unexpected: Vec<&String> = served.difference(&expected).collect();
        let outcome = Outcome::check(missing.is_empty() && unexpected.is_empty(), || {
            format!("not requested: {missing:?}; unexpectedly requested: {unexpected:?}")
        });
        self.record(run, "verify_only_spidered", &items.join(" "), started, outcome)
            .await;
    }

    async fn verify_search_results(
        &mut self,
        run: &mut CaseRun<'_>,
        action: Action,
        literals: &[String],
        shape: ResultShape,
    ) {
        for literal in literals {
            let started = Instant::now();
            let parsed = match parse_search_literal(literal, shape.fields_per_result()) {
                Ok(parsed) => parsed,
                Err(e) => return self.format_failure(run, action, literal, e).await,
            };

            let expected: Vec<String> = match shape {
                ResultShape::UnorderedUrls | ResultShape::Urls => parsed
                    .fields
                    .iter()
                    .map(|f| self.settings.placeholders.apply(f))
                    .collect(),
                _ => parsed.fields.clone(),
            };

            let outcome = match self.query.search(&parsed.search.query, &parsed.search.params).await {
                Ok(response) => compare_results(shape, parsed.count, &expected, &response),
                Err(e) => e.into(),
            };
            self.record(run, action.name(), literal, started, outcome).await;
        }
    }

    async fn verify_query_language(&mut self, run: &mut CaseRun<'_>, literals: &[String]) {
        let action = Action::VerifyQueryLanguage;
        for literal in literals {
            let started = Instant::now();
            let (search, language) = match parse_language_literal(literal) {
                Ok(parsed) => parsed,
                Err(e) => return self.format_failure(run, action, literal, e).await,
            };

            let outcome = match self.query.search(&search.query, &search.params).await {
                Ok(response) => {
                    let actual = query_info(&response, "queryLanguage")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Outcome::check(actual == language, || {
                        format!("expected language {language:?}, got {actual:?}")
                    })
                }
                Err(e) => e.into(),
            };
            self.record(run, action.name(), literal, started, outcome).await;
        }
    }

    /// Look a record up on every shard; the first shard holding it wins.
    async fn lookup_record(&self, kind: RecordKind, url: &str) -> Result<Option<Map<String, Value>>, ApiError> {
        for shard in &self.shards {
            let response = lookup(&shard.client, kind, url).await?;
            match response.field(kind.marker()) {
                None | Some(Value::Null) => continue,
                Some(Value::Object(record)) => return Ok(Some(record.clone())),
                Some(_) => return Ok(Some(Map::new())),
            }
        }
        Ok(None)
    }

    async fn verify_record(&mut self, run: &mut CaseRun<'_>, action: Action, literals: &[String], kind: RecordKind) {
        for literal in literals {
            let started = Instant::now();
            let parsed = match parse_property_literal(literal) {
                Ok(parsed) => parsed,
                Err(e) => return self.format_failure(run, action, literal, e).await,
            };
            let url = self.settings.placeholders.apply(&parsed.url);

            let outcome = match self.lookup_record(kind, &url).await {
                Ok(Some(record)) => {
                    let mismatches = property_mismatches(&parsed.properties, &record);
                    Outcome::check(mismatches.is_empty(), || mismatches.join("; "))
                }
                Ok(None) => Outcome::Fail(format!("no {} for {url}", kind.marker())),
                Err(e) => e.into(),
            };
            self.record(run, action.name(), literal, started, outcome).await;
        }
    }

    async fn verify_no_record(&mut self, run: &mut CaseRun<'_>, action: Action, literals: &[String], kind: RecordKind) {
        for literal in literals {
            let started = Instant::now();
            let url = match parse_absent_literal(literal) {
                Ok(url) => self.settings.placeholders.apply(&url),
                Err(e) => return self.format_failure(run, action, literal, e).await,
            };

            let outcome = match self.lookup_record(kind, &url).await {
                Ok(None) => Outcome::Pass,
                Ok(Some(_)) => Outcome::Fail(format!("unexpected {} for {url}", kind.marker())),
                Err(e) => e.into(),
            };
            self.record(run, action.name(), literal, started, outcome).await;
        }
    }

    async fn verify_linkdb_record(&mut self, run: &mut CaseRun<'_>, literals: &[String]) {
        let action = Action::VerifyLinkdbRecord;
        for literal in literals {
            let started = Instant::now();
            let parsed = match parse_link_literal(literal) {
                Ok(parsed) => parsed,
                Err(e) => return self.format_failure(run, action, literal, e).await,
            };
            let url = self.settings.placeholders.apply(&parsed.url);
            let linkers: Vec<String> = parsed
                .linkers
                .iter()
                .map(|l| self.settings.placeholders.apply(l))
                .collect();

            let outcome = match self.lookup_links(&url).await {
                Ok(links) => compare_links(self.hasher.as_ref(), &linkers, &links),
                Err(e) => e.into(),
            };
            self.record(run, action.name(), literal, started, outcome).await;
        }
    }

    /// Link records for `url` from the first shard holding any.
    async fn lookup_links(&self, url: &str) -> Result<Vec<Value>, ApiError> {
        for shard in &self.shards {
            let response = shard.client.lookup_linkdb(url).await?;
            if let Some(links) = response.field("links").and_then(Value::as_array) {
                if !links.is_empty() {
                    return Ok(links.clone());
                }
            }
        }
        Ok(Vec::new())
    }
}

async fn lookup<T: Transport>(client: &ApiClient<T>, kind: RecordKind, url: &str) -> Result<ApiResponse, ApiError> {
    match kind {
        RecordKind::SpiderRequest | RecordKind::SpiderReply => client.lookup_spiderdb(url).await,
        RecordKind::TitleRec => client.lookup_titledb(url).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::{probable_doc_id, site_hash32, Blake3Hasher};
    use serde_json::json;

    fn response(value: Value) -> ApiResponse {
        ApiResponse::from_value(value).unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unordered_urls_ignore_order_and_normalize_scheme() {
        let r = response(json!({"results": [{"url": "x.example/2"}, {"url": "http://x.example/1"}]}));
        let expected = strings(&["http://x.example/1", "http://x.example/2"]);
        assert_eq!(compare_results(ResultShape::UnorderedUrls, 2, &expected, &r), Outcome::Pass);
        assert!(matches!(
            compare_results(ResultShape::Urls, 2, &expected, &r),
            Outcome::Fail(_)
        ));
    }

    #[test]
    fn result_count_must_match() {
        let r = response(json!({"results": [{"url": "http://x.example/1"}]}));
        let outcome = compare_results(ResultShape::Urls, 2, &strings(&["a", "b"]), &r);
        assert!(matches!(outcome, Outcome::Fail(reason) if reason.contains("expected 2 results, got 1")));
    }

    #[test]
    fn title_summary_pairs_positionally() {
        let r = response(json!({"results": [
            {"title": "One", "sum": "first", "url": "u1"},
            {"title": "Two", "sum": "second", "url": "u2"}
        ]}));
        let expected = strings(&["One", "first", "Two", "second"]);
        assert_eq!(compare_results(ResultShape::TitleSummary, 2, &expected, &r), Outcome::Pass);
    }

    #[test]
    fn query_terms_come_from_query_info() {
        let r = response(json!({"queryInfo": {"terms": [{"termStr": "hello"}, {"termStr": "world"}]}}));
        assert_eq!(
            compare_results(ResultShape::QueryTerms, 2, &strings(&["hello", "world"]), &r),
            Outcome::Pass
        );
    }

    #[test]
    fn link_records_match_recomputed_identifiers() {
        let linker = "http://a.case1.privacore.test:28080/";
        let good = json!({
            "linkerDocId": probable_doc_id(linker),
            "linkerSiteHash32": site_hash32(linker),
        });
        assert_eq!(compare_links(&Blake3Hasher, &strings(&[linker]), &[good]), Outcome::Pass);

        let bad = json!({"linkerDocId": 1, "linkerSiteHash32": site_hash32(linker).to_string()});
        assert!(matches!(
            compare_links(&Blake3Hasher, &strings(&[linker]), &[bad]),
            Outcome::Fail(reason) if reason.contains("linkerDocId") && !reason.contains("linkerSiteHash32")
        ));

        assert!(matches!(compare_links(&Blake3Hasher, &strings(&[linker]), &[]), Outcome::Fail(_)));
    }

    /// Stands in for the cluster's own hash.
    #[derive(Debug)]
    struct ClusterHasher;

    impl IdHasher for ClusterHasher {
        fn hash64(&self, data: &[u8]) -> u64 {
            data.iter().fold(0, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(*b)))
        }

        fn hash32(&self, data: &[u8]) -> u32 {
            self.hash64(data) as u32
        }

        fn hash8(&self, data: &[u8]) -> u8 {
            self.hash64(data) as u8
        }
    }

    #[test]
    fn link_records_use_the_configured_hasher() {
        let linker = "http://b.case1.privacore.test:28080/";
        let stored = json!({
            "linkerDocId": probable_doc_id_with(&ClusterHasher, linker),
            "linkerSiteHash32": site_hash32_with(&ClusterHasher, linker),
        });

        assert_eq!(
            compare_links(&ClusterHasher, &strings(&[linker]), &[stored.clone()]),
            Outcome::Pass
        );
        assert!(matches!(
            compare_links(&Blake3Hasher, &strings(&[linker]), &[stored]),
            Outcome::Fail(_)
        ));
    }
}
