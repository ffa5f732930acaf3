//! Actions that change cluster state: seeding, configuration and document
//! operations. Each logical operation produces one record.

use std::time::{Duration, Instant};

use probe_client::{ApiClient, ApiError, Transport};
use probe_core::literal::key_value_pairs;
use probe_types::{ApiResponse, Sentinel};

use super::Action;
use crate::cluster::ClusterControl;
use crate::engine::{CaseRun, Engine, Outcome};

/// Whether an action changes state rather than asserting on it.
pub(crate) fn is_operation(action: Action) -> bool {
    matches!(
        action,
        Action::Seed
            | Action::WaitSpiderDone
            | Action::Save
            | Action::Dump
            | Action::Sleep
            | Action::InstallFile
            | Action::CustomConfig
            | Action::ConfigCrawlDelay
            | Action::ConfigDns
            | Action::ConfigLog
            | Action::AddUrl
            | Action::InjectUrl
            | Action::InjectDocument
            | Action::DeleteUrl
            | Action::DocDelete
            | Action::DocDeleteUrl
            | Action::DocRebuild
            | Action::DocRebuildUrl
            | Action::DocReindex
            | Action::DocReindexUrl
            | Action::InsertTagDb
    )
}

fn status_outcome(response: Result<ApiResponse, ApiError>) -> Outcome {
    match response {
        Ok(response) => Outcome::check(response.is_ok(), || {
            format!("statusCode {} ({})", response.status_code, response.status_msg)
        }),
        Err(e) => e.into(),
    }
}

/// Which document operation to run.
#[derive(Clone, Copy)]
enum DocOp {
    Delete,
    Rebuild,
    Reindex,
}

impl<T: Transport, C: ClusterControl> Engine<T, C> {
    /// Client for collection-wide admin operations: host 0.
    pub(crate) fn admin(&self) -> &ApiClient<T> {
        self.shards.first().map_or(&self.query, |s| &s.client)
    }

    pub(crate) async fn operation(&mut self, run: &mut CaseRun<'_>, action: Action, args: &[String]) {
        let kind = action.name();
        match action {
            Action::Seed => self.seed(run, args).await,
            Action::Save => {
                let started = Instant::now();
                let outcome = self.on_every_shard(|client| async move { client.save().await }).await;
                self.record(run, kind, "", started, outcome).await;
            }
            Action::Dump => {
                let started = Instant::now();
                let outcome = self.on_every_shard(|client| async move { client.dump().await }).await;
                self.record(run, kind, "", started, outcome).await;
            }
            Action::Sleep => {
                let started = Instant::now();
                let outcome = match args[0].parse::<f64>() {
                    Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                        Outcome::Pass
                    }
                    _ => Outcome::Fail(format!("invalid duration {:?}", args[0])),
                };
                self.record(run, kind, &args[0], started, outcome).await;
            }
            Action::InstallFile => {
                let started = Instant::now();
                let outcome = match self.cluster.install_file(&args[0]).await {
                    Ok(()) => Outcome::Pass,
                    Err(e) => Outcome::Fail(e.to_string()),
                };
                self.record(run, kind, &args[0], started, outcome).await;
            }
            Action::CustomConfig => {
                let started = Instant::now();
                let pairs = key_value_pairs(args);
                let outcome = self
                    .on_every_shard(|client| {
                        let pairs = pairs.clone();
                        async move { client.custom_config(&pairs).await }
                    })
                    .await;
                self.record(run, kind, &args.join(" "), started, outcome).await;
            }
            Action::ConfigCrawlDelay => {
                let started = Instant::now();
                let (a, b) = (args[0].as_str(), args[1].as_str());
                let outcome = self
                    .on_every_shard(|client| async move { client.config_crawl_delay(a, b).await })
                    .await;
                self.record(run, kind, &args.join(" "), started, outcome).await;
            }
            Action::ConfigDns => {
                let started = Instant::now();
                let primary = args[0].as_str();
                let secondary = args.get(1).map(String::as_str);
                let outcome = self
                    .on_every_shard(|client| async move { client.config_dns(primary, secondary).await })
                    .await;
                self.record(run, kind, &args.join(" "), started, outcome).await;
            }
            Action::ConfigLog => {
                let started = Instant::now();
                let flag = args[0].as_str();
                let value = args.get(1).map_or("1", String::as_str);
                let outcome = self
                    .on_every_shard(|client| async move { client.config_log(flag, value).await })
                    .await;
                self.record(run, kind, &args.join(" "), started, outcome).await;
            }
            Action::AddUrl | Action::InjectUrl | Action::DeleteUrl => {
                for url in args {
                    let url = self.settings.placeholders.apply(url);
                    let started = Instant::now();
                    let client = self.admin();
                    let outcome = match action {
                        Action::AddUrl => status_outcome(client.add_url(&url).await),
                        Action::InjectUrl => status_outcome(client.inject_url(&url).await),
                        _ => match client.delete_url(&url).await {
                            Ok(r) => Outcome::check(r.is(Sentinel::ForceDeleted) || r.is_ok(), || {
                                format!("statusCode {} ({})", r.status_code, r.status_msg)
                            }),
                            Err(e) => e.into(),
                        },
                    };
                    self.record(run, kind, &url, started, outcome).await;
                }
            }
            Action::InjectDocument => self.inject_document(run, args).await,
            Action::DocDelete => self.doc_op(run, kind, DocOp::Delete, false, &args[0]).await,
            Action::DocDeleteUrl => self.doc_op(run, kind, DocOp::Delete, true, &args[0]).await,
            Action::DocRebuild => self.doc_op(run, kind, DocOp::Rebuild, false, &args[0]).await,
            Action::DocRebuildUrl => self.doc_op(run, kind, DocOp::Rebuild, true, &args[0]).await,
            Action::DocReindex => self.doc_op(run, kind, DocOp::Reindex, false, &args[0]).await,
            Action::DocReindexUrl => self.doc_op(run, kind, DocOp::Reindex, true, &args[0]).await,
            Action::InsertTagDb => {
                let url = self.settings.placeholders.apply(&args[0]);
                let started = Instant::now();
                let outcome = status_outcome(self.admin().insert_tagdb(&url, &args[1], &args[2]).await);
                self.record(run, kind, &args.join(" "), started, outcome).await;
            }
            _ => tracing::error!(action = kind, "not an operation"),
        }
    }

    /// Run `op` against every shard's client, stopping at the first error.
    async fn on_every_shard<'a, F, Fut>(&'a self, op: F) -> Outcome
    where
        F: Fn(&'a ApiClient<T>) -> Fut,
        Fut: std::future::Future<Output = Result<(), ApiError>>,
    {
        for shard in &self.shards {
            if let Err(e) = op(&shard.client).await {
                return Outcome::Fail(format!("host {}: {e}", shard.host_id));
            }
        }
        Outcome::Pass
    }

    async fn seed(&mut self, run: &mut CaseRun<'_>, args: &[String]) {
        tracing::info!("adding seeds for spidering");
        let started = Instant::now();
        let case = run.case;
        let placeholders = self.settings.placeholders.clone();

        let mut seeds: Vec<String> = args.iter().map(|a| placeholders.apply(a)).collect();
        if seeds.is_empty() {
            match case.expectations("seeds").await {
                Ok(lines) => seeds = lines.iter().map(|l| placeholders.apply(l)).collect(),
                Err(e) => {
                    self.record(run, "seed", "", started, Outcome::Fail(e.to_string())).await;
                    return;
                }
            }
        }
        if seeds.is_empty() {
            match case.origins().await {
                Ok(origins) => {
                    seeds = origins
                        .iter()
                        .map(|origin| {
                            format!(
                                "{}://{}.{}.{}:{}/",
                                placeholders.scheme, origin, case.name, placeholders.domain, placeholders.port
                            )
                        })
                        .collect();
                }
                Err(e) => {
                    self.record(run, "seed", "", started, Outcome::Fail(e.to_string())).await;
                    return;
                }
            }
        }

        let sitelist = seeds.join("\n");
        let outcome = match self.admin().config_sitelist(&sitelist).await {
            Ok(()) => Outcome::Pass,
            Err(e) => e.into(),
        };
        self.record(run, "seed", &seeds.join(" "), started, outcome).await;
    }

    async fn inject_document(&mut self, run: &mut CaseRun<'_>, args: &[String]) {
        let url = self.settings.placeholders.apply(&args[0]);
        let started = Instant::now();
        let path = run.case.config_dir().join(&args[1]);

        let outcome = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let content_type = args.get(2).map(String::as_str);
                status_outcome(self.admin().inject_document(&url, &content, content_type).await)
            }
            Err(e) => Outcome::Fail(format!("cannot read {}: {e}", path.display())),
        };
        self.record(run, "inject_document", &url, started, outcome).await;
    }

    async fn doc_op(&mut self, run: &mut CaseRun<'_>, kind: &str, op: DocOp, by_url: bool, target: &str) {
        let target = if by_url {
            self.settings.placeholders.apply(target)
        } else {
            target.to_string()
        };
        let started = Instant::now();
        let client = self.admin();

        let response = match (op, by_url) {
            (DocOp::Delete, false) => client.doc_delete(&target).await,
            (DocOp::Delete, true) => client.doc_delete_by_url(&target).await,
            (DocOp::Rebuild, false) => client.doc_rebuild(&target).await,
            (DocOp::Rebuild, true) => client.doc_rebuild_by_url(&target).await,
            (DocOp::Reindex, false) => client.doc_reindex(&target).await,
            (DocOp::Reindex, true) => client.doc_reindex_by_url(&target).await,
        };
        let outcome = status_outcome(response);

        // The operation is queued; give it time to land before the next step.
        tokio::time::sleep(self.settings.doc_settle).await;
        self.record(run, kind, &target, started, outcome).await;
    }
}
