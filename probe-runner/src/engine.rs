//! Per-test-case execution.
//!
//! The engine owns one admin client and liveness fingerprint per shard, the
//! query client, the cluster lifecycle and the fixture server's served-URL
//! log. For each test case it starts the cluster, runs the case's
//! instruction scripts (or the default scenario when there are none),
//! records one [`TestRecord`] per step and stops the cluster again.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use probe_client::{ApiClient, ApiError, Liveness, ProcessLiveness, Transport};
use probe_core::{
    parse_script, Blake3Hasher, CompletionPoller, FormatError, IdHasher, Observation, Placeholders, PollState, PollerConfig, Registry,
    RegistryError,
};
use probe_fixture::ServedUrlLog;
use probe_types::{TestRecord, TestSuite};

use crate::actions::{self, Action};
use crate::cluster::ClusterControl;
use crate::config::{Config, ConfigError};
use crate::testcase::TestCase;

/// Log flags switched on after every start.
const DEFAULT_LOG_FLAGS: [&str; 4] = ["ldq", "ltrc_sp", "ltrc_msgfour", "ltrc_xmldoc"];

/// Steps of the default scenario after seeding and waiting, in order.
const DEFAULT_VERIFICATIONS: [Action; 18] = [
    Action::JustSearch,
    Action::VerifyIndexed,
    Action::VerifyNotIndexed,
    Action::VerifySpidered,
    Action::VerifyNotSpidered,
    Action::VerifyOnlySpidered,
    Action::VerifySearchResult,
    Action::VerifySearchResultUrl,
    Action::VerifySearchResultTitleSummary,
    Action::VerifyQueryTerms,
    Action::VerifyQueryLanguage,
    Action::VerifySpiderRequest,
    Action::VerifyNoSpiderRequest,
    Action::VerifySpiderResponse,
    Action::VerifyNoSpiderResponse,
    Action::VerifyTitleRecord,
    Action::VerifyNoTitleRecord,
    Action::VerifyLinkdbRecord,
];

/// Timing and substitution settings of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Fixture placeholder values.
    pub placeholders: Placeholders,
    /// Completion poller timing.
    pub poller: PollerConfig,
    /// Start-up deadline.
    pub startup_deadline: Duration,
    /// Pause between start-up status attempts.
    pub startup_retry: Duration,
    /// Pause after the cluster answered and was configured.
    pub post_start_delay: Duration,
    /// Pause after the durability checkpoint.
    pub save_settle: Duration,
    /// Pause after document delete/rebuild/reindex.
    pub doc_settle: Duration,
}

impl EngineSettings {
    /// Default timing with the given placeholders.
    pub fn new(placeholders: Placeholders) -> Self {
        Self {
            placeholders,
            poller: PollerConfig::default(),
            startup_deadline: Duration::from_secs(300),
            startup_retry: Duration::from_millis(500),
            post_start_delay: Duration::from_secs(1),
            save_settle: Duration::from_millis(500),
            doc_settle: Duration::from_secs(1),
        }
    }

    /// Settings from a loaded configuration, placeholders shifted to the
    /// run's offset.
    pub fn from_config(config: &Config, port_stride: u16) -> Result<Self, ConfigError> {
        Ok(Self {
            poller: config.timeouts.poller(),
            startup_deadline: config.timeouts.startup(),
            doc_settle: config.timeouts.doc_settle(),
            ..Self::new(config.placeholders(port_stride)?)
        })
    }
}

/// One shard's admin client and liveness fingerprint.
#[derive(Debug)]
pub struct Shard<T: Transport> {
    /// Host id of the spidering instance.
    pub host_id: u32,
    /// Admin client of that instance.
    pub client: ApiClient<T>,
    /// Last known process start time.
    pub liveness: ProcessLiveness,
}

impl<T: Transport> Shard<T> {
    /// A shard with no liveness baseline yet.
    pub fn new(host_id: u32, client: ApiClient<T>) -> Self {
        Self {
            host_id,
            client,
            liveness: ProcessLiveness::new(),
        }
    }
}

/// Result of one logical check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Pass,
    Fail(String),
}

impl Outcome {
    pub(crate) fn check(passed: bool, reason: impl FnOnce() -> String) -> Self {
        if passed {
            Outcome::Pass
        } else {
            Outcome::Fail(reason())
        }
    }
}

impl From<ApiError> for Outcome {
    fn from(e: ApiError) -> Self {
        Outcome::Fail(e.to_string())
    }
}

impl From<FormatError> for Outcome {
    fn from(e: FormatError) -> Self {
        Outcome::Fail(format!("format error: {e}"))
    }
}

/// Records of the test case being run.
#[derive(Debug)]
pub(crate) struct CaseRun<'a> {
    pub(crate) case: &'a TestCase,
    pub(crate) records: Vec<TestRecord>,
    /// Set once a step failed in a way that makes later steps meaningless.
    pub(crate) halted: bool,
}

impl<'a> CaseRun<'a> {
    fn new(case: &'a TestCase) -> Self {
        Self {
            case,
            records: Vec::new(),
            halted: false,
        }
    }

    fn skip(&mut self, kind: &str, item: &str) {
        tracing::info!(step = %step_name(kind, item), "skipped");
        self.records
            .push(TestRecord::skipped(&self.case.description, &step_name(kind, item)));
    }
}

fn step_name(kind: &str, item: &str) -> String {
    format!("{kind} - {item}")
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Drives test cases against one cluster.
#[derive(Debug)]
pub struct Engine<T: Transport, C: ClusterControl> {
    pub(crate) cluster: C,
    pub(crate) shards: Vec<Shard<T>>,
    pub(crate) query: ApiClient<T>,
    pub(crate) served: ServedUrlLog,
    pub(crate) settings: EngineSettings,
    /// Hash behind recomputed doc ids and site hashes.
    pub(crate) hasher: Box<dyn IdHasher>,
    registry: Registry<Action>,
}

impl<T: Transport, C: ClusterControl> Engine<T, C> {
    /// Create an engine. Fails only if the action table is malformed.
    pub fn new(
        cluster: C,
        shards: Vec<Shard<T>>,
        query: ApiClient<T>,
        served: ServedUrlLog,
        settings: EngineSettings,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            cluster,
            shards,
            query,
            served,
            settings,
            hasher: Box::new(Blake3Hasher),
            registry: actions::registry()?,
        })
    }

    /// Recompute link record identifiers with `hasher` instead of the
    /// BLAKE3 stand-in.
    pub fn with_hasher(mut self, hasher: impl IdHasher + 'static) -> Self {
        self.hasher = Box::new(hasher);
        self
    }

    /// The served-URL log the engine asserts against.
    pub fn served(&self) -> &ServedUrlLog {
        &self.served
    }

    /// The cluster lifecycle.
    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Engine settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one test case and freeze its records into a suite.
    pub async fn run_case(&mut self, case: &TestCase) -> TestSuite {
        let mut run = CaseRun::new(case);

        if !case.is_runnable().await {
            tracing::warn!(case = %case.name, "no testcase directory; nothing to run");
            return TestSuite::new(&case.name, &case.description, run.records);
        }

        tracing::info!(case = %case.name, description = %case.description, "running test case");
        if !self.start_cluster(&mut run).await {
            run.halted = true;
        }

        if case.instruction_files.is_empty() {
            self.run_default_scenario(&mut run).await;
        } else {
            self.run_instructions(&mut run).await;
        }

        let started = Instant::now();
        if let Err(e) = self.cluster.stop().await {
            tracing::warn!(error = %e, "failed to stop cluster");
            run.records.push(TestRecord::failed(
                &case.description,
                &step_name("post", "stop"),
                started.elapsed().as_secs_f64(),
                &e.to_string(),
            ));
        }

        let suite = TestSuite::new(&case.name, &case.description, run.records);
        tracing::info!(case = %case.name, tests = suite.tests, failures = suite.failures, "test case finished");
        suite
    }

    /// Append one record. A restart seen since the last record fails it.
    pub(crate) async fn record(&mut self, run: &mut CaseRun<'_>, kind: &str, item: &str, started: Instant, outcome: Outcome) {
        let name = step_name(kind, item);
        let elapsed = started.elapsed().as_secs_f64();
        let mut record = match &outcome {
            Outcome::Pass => {
                tracing::debug!(step = %name, "passed");
                TestRecord::passed(&run.case.description, &name, elapsed)
            }
            Outcome::Fail(reason) => {
                tracing::warn!(step = %name, reason = %reason, "failed");
                TestRecord::failed(&run.case.description, &name, elapsed, &format!("{name} - {reason}"))
            }
        };

        for shard in &mut self.shards {
            if shard.liveness.baseline().is_none() {
                continue;
            }
            match shard.liveness.check(&shard.client).await {
                Ok(Liveness::Unchanged) => {}
                Ok(Liveness::Restarted { previous, current }) => {
                    tracing::warn!(host_id = shard.host_id, previous, current, "cluster restarted");
                    record = record.with_failure_annotation(format!(
                        "{name} - cluster restarted (host {}: processStartTime {previous} -> {current})",
                        shard.host_id
                    ));
                }
                Err(e) => {
                    record = record.with_annotation(format!(
                        "{name} - liveness check failed on host {}: {e}",
                        shard.host_id
                    ));
                }
            }
        }

        run.records.push(record);
    }

    async fn start_cluster(&mut self, run: &mut CaseRun<'_>) -> bool {
        let started = Instant::now();
        for shard in &mut self.shards {
            shard.liveness = ProcessLiveness::new();
        }

        if let Err(e) = self.cluster.clean().await {
            self.record(run, "pre", "start", started, Outcome::Fail(e.to_string())).await;
            return false;
        }
        if let Err(e) = self.cluster.start().await {
            self.record(run, "pre", "start", started, Outcome::Fail(e.to_string())).await;
            return false;
        }

        let outcome = loop {
            let attempt = match self.await_reachable().await {
                Ok(()) => self.apply_default_config().await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(()) => break Ok(()),
                Err(e) if e.is_connectivity() && started.elapsed() < self.settings.startup_deadline => {
                    tracing::debug!(error = %e, "cluster not reachable yet");
                    tokio::time::sleep(self.settings.startup_retry).await;
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(()) => {
                tokio::time::sleep(self.settings.post_start_delay).await;
                self.record(run, "pre", "start", started, Outcome::Pass).await;
                true
            }
            Err(e) => {
                self.record(run, "pre", "start", started, e.into()).await;
                false
            }
        }
    }

    /// Record a liveness baseline on every shard.
    async fn await_reachable(&mut self) -> Result<(), ApiError> {
        for shard in &mut self.shards {
            if shard.liveness.baseline().is_none() {
                let start_time = shard.liveness.record(&shard.client).await?;
                tracing::debug!(host_id = shard.host_id, start_time, "liveness baseline");
            }
        }
        Ok(())
    }

    async fn apply_default_config(&self) -> Result<(), ApiError> {
        for shard in &self.shards {
            shard.client.config_crawl_delay("0", "0").await?;
            shard.client.config_dns("127.0.0.1", None).await?;
            for flag in DEFAULT_LOG_FLAGS {
                shard.client.config_log(flag, "1").await?;
            }
        }
        Ok(())
    }

    /// Poll every shard until its background work drained, then checkpoint it.
    pub(crate) async fn wait_spider_done(&mut self, run: &mut CaseRun<'_>) {
        tracing::info!("waiting for spidering to complete");
        let started = Instant::now();
        let config = self.settings.poller;

        let mut outcome = Outcome::Pass;
        for shard in &self.shards {
            let mut poller = CompletionPoller::starting_at(config, started.elapsed());
            loop {
                let observation = match shard.client.spider_queue().await {
                    Ok(snapshot) => {
                        tracing::debug!(host_id = shard.host_id, ?snapshot, "spider queue");
                        Observation::Snapshot(snapshot)
                    }
                    Err(e) => {
                        tracing::warn!(host_id = shard.host_id, error = %e, "spider queue unreachable");
                        Observation::Unreachable
                    }
                };

                match poller.observe(started.elapsed(), now_ms(), observation) {
                    PollState::Done => break,
                    PollState::TimedOut => {
                        outcome = Outcome::Fail(format!(
                            "spidering on host {} did not complete within {:?}",
                            shard.host_id, config.ceiling
                        ));
                        break;
                    }
                    PollState::Starting | PollState::Settling => tokio::time::sleep(config.interval).await,
                }
            }
            if outcome != Outcome::Pass {
                break;
            }

            if let Err(e) = shard.client.save().await {
                outcome = Outcome::Fail(format!("save on host {} failed: {e}", shard.host_id));
                break;
            }
            tokio::time::sleep(self.settings.save_settle).await;
        }

        let timed_out = outcome != Outcome::Pass;
        self.record(run, "pre", "spider", started, outcome).await;
        if timed_out {
            run.halted = true;
        }

        for url in self.served.served_urls() {
            tracing::debug!(%url, "spidered");
        }
    }

    async fn run_instructions(&mut self, run: &mut CaseRun<'_>) {
        let case = run.case;
        for file in &case.instruction_files {
            let started = Instant::now();
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            tracing::info!(file = %name, "processing instructions");

            let text = match tokio::fs::read_to_string(file).await {
                Ok(text) => text,
                Err(e) => {
                    self.record(run, "instructions", &name, started, Outcome::Fail(e.to_string()))
                        .await;
                    continue;
                }
            };

            for instruction in parse_script(&text) {
                let resolved = self.registry.resolve(&instruction).map(|a| a.copied());
                match resolved {
                    Ok(Some(action)) => {
                        tracing::info!(action = %instruction.action, args = %instruction.joined_args(), "instruction");
                        self.dispatch(run, action, &instruction.args).await;
                    }
                    Ok(None) => {
                        tracing::warn!(
                            file = %name,
                            line = instruction.line,
                            action = %instruction.action,
                            "unknown instruction; skipping"
                        );
                    }
                    Err(e) => {
                        let item = instruction.joined_args();
                        self.record(run, &instruction.action, &item, Instant::now(), e.into())
                            .await;
                        tracing::warn!(file = %name, line = instruction.line, "aborting remaining instructions in file");
                        break;
                    }
                }
            }
        }
    }

    async fn run_default_scenario(&mut self, run: &mut CaseRun<'_>) {
        self.dispatch(run, Action::Seed, &[]).await;
        self.dispatch(run, Action::WaitSpiderDone, &[]).await;

        let case = run.case;
        for action in DEFAULT_VERIFICATIONS {
            match case.expectations(action.name()).await {
                Ok(lines) if lines.is_empty() => {}
                Ok(_) => self.dispatch(run, action, &[]).await,
                Err(e) => {
                    self.record(run, action.name(), "", Instant::now(), Outcome::Fail(e.to_string()))
                        .await;
                }
            }
        }
    }

    /// Run one action.
    pub(crate) async fn dispatch(&mut self, run: &mut CaseRun<'_>, action: Action, args: &[String]) {
        if run.halted {
            run.skip(action.name(), &args.join(" "));
            return;
        }

        match action {
            Action::WaitSpiderDone => self.wait_spider_done(run).await,
            _ if actions::is_operation(action) => self.operation(run, action, args).await,
            _ => self.verification(run, action, args).await,
        }
    }
}
