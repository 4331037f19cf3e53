//! Runs a resolved execution job against one asset and collects results.
//!
//! Completion is decided by cardinality: the job is done once every tracked
//! checksum has at least one result. Results may arrive from any thread and
//! in any order.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{Errors, ScanError};
use crate::models::{ExecutionJob, ExecutionQuery, Query, RawResult, Value};
use crate::progress::{NoopProgress, Progress};
use crate::provider::{QueryRuntime, ResultCollector};
use crate::query::QueryCompiler;
use crate::store::ResolutionStore;

#[derive(Default)]
struct State {
    results: HashMap<String, RawResult>,
    /// Denominator for completion.
    tracked: HashSet<String>,
    collected: usize,
    aborted: bool,
    done: bool,
    signalled: bool,
}

struct Shared {
    state: Mutex<State>,
    done: Notify,
    progress: Arc<dyn Progress>,
}

impl Shared {
    fn collect(&self, res: RawResult) {
        let (cur, max, first_done) = {
            let mut state = self.state.lock();
            let is_new = !state.results.contains_key(&res.checksum);
            if is_new && state.tracked.contains(&res.checksum) {
                state.collected += 1;
            }
            state.results.insert(res.checksum.clone(), res);

            let cur = state.collected;
            let max = state.tracked.len();
            state.done = cur == max;

            let first_done = state.done && !state.signalled && !state.aborted;
            if first_done {
                state.signalled = true;
            }
            (cur, max, first_done)
        };

        self.progress.on_progress(cur, max);
        if first_done {
            self.progress.completed();
            self.done.notify_one();
        }
    }
}

/// One execution of a set of queries against one asset.
pub struct Executor {
    shared: Arc<Shared>,
    /// Allow-list of checksums returned by [`Executor::snapshot_results`].
    datapoints: Option<HashSet<String>>,
}

impl Executor {
    pub fn new(progress: Arc<dyn Progress>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                done: Notify::new(),
                progress,
            }),
            datapoints: None,
        }
    }

    /// The callback sub-executors report through.
    pub fn collector(&self) -> ResultCollector {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |res: RawResult| shared.collect(res))
    }

    /// Tracks every checksum of every query, then starts one sub-executor
    /// per query.
    ///
    /// A query that fails to start gets a failed result for each of its
    /// checksums, so the remaining queries can still complete the job.
    pub fn run_code(
        &self,
        runtime: &dyn QueryRuntime,
        queries: &BTreeMap<String, ExecutionQuery>,
        props: &BTreeMap<String, Value>,
    ) -> Result<(), ScanError> {
        {
            let mut state = self.shared.state.lock();
            for query in queries.values() {
                state.tracked.extend(query.code.all_checksums().cloned());
            }
            if state.tracked.is_empty() {
                state.done = true;
                state.signalled = true;
                drop(state);
                debug!("executor> nothing to run");
                self.shared.progress.completed();
                self.shared.done.notify_one();
                return Ok(());
            }
        }

        let collect = self.collector();
        let mut errors = Errors::new();
        for (code_id, query) in queries {
            trace!(code_id = %code_id, "executor> run query");
            if let Err(e) = runtime.execute(&query.code, props, collect.clone()) {
                let message = e.to_string();
                errors.add(e);
                for checksum in query.code.all_checksums() {
                    collect(RawResult::failed(checksum, message.clone()));
                }
            }
        }
        errors.into_result()
    }

    /// Waits for completion. A timeout only wins if the job is still
    /// unfinished once it fires; the instance is then aborted.
    pub async fn wait_until_done(&self, timeout: Duration) -> Result<(), ScanError> {
        if tokio::time::timeout(timeout, self.shared.done.notified())
            .await
            .is_ok()
        {
            return Ok(());
        }

        let mut state = self.shared.state.lock();
        if state.done {
            return Ok(());
        }
        state.aborted = true;
        debug!(
            collected = state.collected,
            tracked = state.tracked.len(),
            "executor> timed out"
        );
        Err(ScanError::Timeout(timeout))
    }

    #[allow(dead_code)] // state checks for tests and callers polling a running job
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().done
    }

    #[allow(dead_code)] // state checks for tests and callers polling a running job
    pub fn is_aborted(&self) -> bool {
        self.shared.state.lock().aborted
    }

    pub fn result(&self, checksum: &str) -> Option<RawResult> {
        self.shared.state.lock().results.get(checksum).cloned()
    }

    /// Collected results, limited to the job's declared datapoints when the
    /// executor runs a resolved job.
    pub fn snapshot_results(&self) -> BTreeMap<String, RawResult> {
        let state = self.shared.state.lock();
        state
            .results
            .iter()
            .filter(|(checksum, _)| {
                self.datapoints
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(*checksum))
            })
            .map(|(checksum, res)| (checksum.clone(), res.clone()))
            .collect()
    }

    /// Hands the collected data to the store.
    pub fn store_query_data(
        &self,
        store: &ResolutionStore,
        asset_mrn: &str,
    ) -> Result<(), ScanError> {
        store.store_results(asset_mrn, &self.snapshot_results())?;
        Ok(())
    }
}

/// Starts every query of a resolved job.
pub fn run_execution_job(
    runtime: &dyn QueryRuntime,
    job: &ExecutionJob,
    props: &BTreeMap<String, Value>,
    progress: Arc<dyn Progress>,
) -> Result<Executor, ScanError> {
    let mut executor = Executor::new(progress);
    executor.datapoints = Some(job.datapoints.keys().cloned().collect());
    executor.run_code(runtime, &job.queries, props)?;
    Ok(executor)
}

/// Evaluates filter queries and returns those whose every entrypoint
/// succeeded, in input order.
///
/// Queries that fail to compile or run are reported in the returned errors
/// and count as not matching.
pub async fn run_filter_queries(
    runtime: &dyn QueryRuntime,
    compiler: &dyn QueryCompiler,
    queries: &[Query],
    props: &BTreeMap<String, Value>,
    timeout: Duration,
) -> (Vec<Query>, Errors) {
    let mut errors = Errors::new();
    let mut compiled = Vec::with_capacity(queries.len());
    let mut equeries = BTreeMap::new();

    for query in queries {
        match compiler.compile(&query.mql) {
            Ok(code) => {
                equeries.insert(
                    code.id.clone(),
                    ExecutionQuery {
                        query: query.mql.clone(),
                        query_mrn: query.mrn.clone(),
                        code: code.clone(),
                    },
                );
                compiled.push((query, code));
            }
            Err(e) => {
                debug!(mql = %query.mql, "executor> skipping filter query: {}", e);
                errors.add(e);
            }
        }
    }

    let executor = Executor::new(Arc::new(NoopProgress));
    if let Err(e) = executor.run_code(runtime, &equeries, props) {
        errors.add(e);
    }
    if let Err(e) = executor.wait_until_done(timeout).await {
        errors.add(e);
    }

    let matched = compiled
        .into_iter()
        .filter(|(_, code)| {
            code.entrypoint_checksums().iter().all(|ep| {
                executor
                    .result(ep)
                    .map(|res| res.is_success())
                    .unwrap_or(false)
            })
        })
        .map(|(query, _)| query.clone())
        .collect();

    (matched, errors)
}
