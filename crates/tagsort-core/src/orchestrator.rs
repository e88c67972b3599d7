//! The pass and phase driver.
//!
//! Pass 1 pulls the original input through the tournament in row mode,
//! one sorted run per phase. While more runs remain than the leaf row can
//! merge at once, intermediate passes stream groups of runs back through
//! the tree, each phase fusing one group into a new run. The final pass
//! streams through the duplicate filter into the output stage, which
//! re-checks ordering as it writes.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::aggregate::Aggregator;
use crate::config::{SortConfig, SortPlan};
use crate::dedup::DuplicateFilter;
use crate::error::SortError;
use crate::predicate::RowContext;
use crate::provider::{InputSource, ProviderSpec, RecordProvider, RowProvider};
use crate::proxy::{ProxyPool, RecordProxy};
use crate::publisher::{OutputTarget, RecordPublisher, StreamPublisher};
use crate::reader::SourceStore;
use crate::segment::{SegmentReader, SegmentStore};
use crate::tournament::{LeafSource, Tournament};

/// Cooperative cancellation shared with the host.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the engine stops at the next phase boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters for one engine run.
#[derive(Debug, Default, Clone)]
pub struct SortStats {
    /// Records read and counted.
    pub input_records: u64,
    /// Records dropped by WHERE.
    pub filtered_records: u64,
    /// Records rejected by the length guard.
    pub length_rejects: u64,
    /// Records dropped by the duplicate disposition.
    pub duplicate_records: u64,
    /// Records written.
    pub output_records: u64,
    /// Passes over the data.
    pub passes: u32,
    /// Phases across all passes.
    pub phases: u64,
    /// Runs materialized between passes.
    pub runs: u64,
    /// Aggregate results, in declaration order.
    pub aggregates: Vec<(String, Option<f64>)>,
}

impl SortStats {
    fn absorb(&mut self, other: SortStats) {
        self.input_records += other.input_records;
        self.filtered_records += other.filtered_records;
        self.length_rejects += other.length_rejects;
        self.duplicate_records += other.duplicate_records;
        self.output_records += other.output_records;
        self.passes += other.passes;
        self.phases += other.phases;
        self.runs += other.runs;
        self.aggregates.extend(other.aggregates);
    }
}

/// The sort/merge/copy engine.
pub struct SortEngine {
    plan: SortPlan,
    cancel: CancelToken,
}

impl SortEngine {
    /// Validates the configuration and builds the engine.
    pub fn new(config: &SortConfig) -> Result<Self, SortError> {
        Ok(Self { plan: config.validate()?, cancel: CancelToken::new() })
    }

    /// Builds the engine from an already-resolved plan.
    pub fn from_plan(plan: SortPlan) -> Self {
        Self { plan, cancel: CancelToken::new() }
    }

    /// The token a host can use to cancel this engine.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs the whole job. `--replace` sorts each input onto itself; any
    /// other target is one sort over all inputs.
    pub fn run(&mut self) -> Result<SortStats, SortError> {
        if self.plan.in_place {
            let files: Vec<PathBuf> = self.plan.input_files.clone();
            let mut total = SortStats::default();
            for file in files {
                let stats =
                    self.process(&[file.clone()], OutputTarget::InPlace(file.clone()))?;
                total.absorb(stats);
            }
            Ok(total)
        } else {
            let target = match &self.plan.output_file {
                Some(path) => OutputTarget::File(path.clone()),
                None => OutputTarget::Stdout,
            };
            let inputs = self.plan.input_files.clone();
            self.process(&inputs, target)
        }
    }

    /// One complete sort of `inputs` into `target`.
    fn process(&self, inputs: &[PathBuf], target: OutputTarget) -> Result<SortStats, SortError> {
        let plan = &self.plan;
        let m = plan.leaf_capacity();

        let sources = InputSource::load(inputs, plan.cache_input)?;
        let spec = ProviderSpec {
            framing: plan.framing_in.clone(),
            csv: plan.csv.clone(),
            layout: plan.layout.clone(),
            codec: plan.codec.clone(),
            where_predicates: plan.where_predicates.clone(),
            stop_predicates: plan.stop_predicates.clone(),
            negate_ordinals: plan.duplicate.negates_ordinals(),
            capture_header: plan.capture_header,
            max_record_len: plan.max_record_len,
            row_max: plan.row_max,
        };
        let (mut provider, mut sources_store) = RowProvider::new(sources, spec);

        let header = if plan.capture_header { provider.prefetch_header()? } else { None };
        let mut publisher = StreamPublisher::new(
            target,
            plan.framing_out.clone(),
            header.filter(|_| plan.emit_header),
        );

        let mut stats = SortStats::default();
        let estimate = provider.max_rows_estimate();
        if estimate == 0 {
            // Empty input: empty output, zero passes.
            publisher.open()?;
            publisher.close()?;
            info!(input = 0u64, output = 0u64, "sort complete");
            return Ok(stats);
        }

        let mut tournament = Tournament::new(plan.depth)?;
        let mut pool = ProxyPool::with_capacity(2 * m);
        let mut dedup = DuplicateFilter::new(plan.duplicate);
        let mut aggregator = Aggregator::new(plan.aggregates.clone(), &plan.layout)?;
        let mut run_store = if plan.disk_work {
            SegmentStore::on_disk(&plan.work_directory)
        } else {
            SegmentStore::in_memory()
        };

        let mut pending_runs: VecDeque<usize> = VecDeque::new();
        let mut final_pass_done = false;

        while !final_pass_done {
            self.ensure_active(&mut tournament, &mut pool)?;
            stats.passes += 1;
            let pass_start = Instant::now();
            let first_pass = stats.passes == 1;

            let pending = if first_pass { estimate } else { pending_runs.len() as u64 };
            let is_final = pending <= m as u64;
            if is_final {
                publisher.open()?;
            }
            tournament.set_streaming(!first_pass);

            let run_base = run_store.run_count();
            let mut phase: u64 = 0;
            let mut pass_rows: u64 = 0;

            if first_pass {
                loop {
                    self.ensure_active(&mut tournament, &mut pool)?;
                    phase += 1;
                    tournament.begin_phase(&mut pool);
                    let mut source = RowLeaves { provider: &mut provider };
                    tournament.prime(phase, &mut source, &mut pool)?;
                    let emitted = if is_final {
                        drain_to_publisher(
                            &mut tournament,
                            phase,
                            &mut source,
                            &mut pool,
                            &mut dedup,
                            &mut publisher,
                            &mut sources_store,
                            &mut aggregator,
                            plan,
                            estimate,
                        )?
                    } else {
                        drain_to_run(&mut tournament, phase, &mut source, &mut pool, &mut run_store)?
                    };
                    if emitted == 0 {
                        break;
                    }
                    pass_rows += emitted;
                    stats.phases += 1;
                }
                provider.close()?;
            } else {
                let fan_in = if is_final {
                    pending_runs.len().max(1)
                } else {
                    merge_fan_in(pending_runs.len(), m)
                };
                while !pending_runs.is_empty() {
                    self.ensure_active(&mut tournament, &mut pool)?;
                    phase += 1;
                    let take = fan_in.min(pending_runs.len());
                    let readers: Vec<SegmentReader> = pending_runs
                        .drain(..take)
                        .map(|run| run_store.open_run(run))
                        .collect::<Result<_, _>>()?;
                    tournament.begin_phase(&mut pool);
                    let mut source = RunLeaves { readers };
                    tournament.prime(phase, &mut source, &mut pool)?;
                    let emitted = if is_final {
                        drain_to_publisher(
                            &mut tournament,
                            phase,
                            &mut source,
                            &mut pool,
                            &mut dedup,
                            &mut publisher,
                            &mut sources_store,
                            &mut aggregator,
                            plan,
                            estimate,
                        )?
                    } else {
                        drain_to_run(&mut tournament, phase, &mut source, &mut pool, &mut run_store)?
                    };
                    pass_rows += emitted;
                    stats.phases += 1;
                }
            }

            let new_runs = run_store.run_count() - run_base;
            stats.runs += new_runs as u64;
            debug!(
                pass = stats.passes,
                phases = phase,
                rows = pass_rows,
                runs = new_runs,
                elapsed_ms = pass_start.elapsed().as_millis() as u64,
                "pass complete"
            );

            if is_final {
                sources_store.close();
                publisher.close()?;
                final_pass_done = true;
            } else {
                pending_runs = (run_base..run_store.run_count()).collect();
            }
        }

        run_store.close()?;
        debug_assert_eq!(pool.live(), 0, "all proxies return to the pool at shutdown");

        let counters = provider.counters();
        stats.input_records = counters.input_records;
        stats.filtered_records = counters.filtered_records;
        stats.length_rejects = counters.length_rejects;
        stats.duplicate_records = dedup.dropped();
        stats.output_records = publisher.written();
        stats.aggregates = aggregator.results();

        info!(
            input = stats.input_records,
            selected = stats.input_records - stats.filtered_records,
            duplicates = stats.duplicate_records,
            output = stats.output_records,
            passes = stats.passes,
            "sort complete"
        );
        Ok(stats)
    }

    fn ensure_active(
        &self,
        tournament: &mut Tournament,
        pool: &mut ProxyPool,
    ) -> Result<(), SortError> {
        if self.cancel.is_cancelled() {
            // Flush stranded proxies back to the pool before bailing;
            // stores and temp files clean up on drop.
            tournament.begin_phase(pool);
            return Err(SortError::Cancelled);
        }
        Ok(())
    }
}

/// Pass-1 leaves: every leaf draws from the shared row provider.
struct RowLeaves<'a> {
    provider: &'a mut RowProvider,
}

impl LeafSource for RowLeaves<'_> {
    fn pull(
        &mut self,
        _leaf: usize,
        pool: &mut ProxyPool,
    ) -> Result<Option<RecordProxy>, SortError> {
        self.provider.next(pool)
    }
}

/// Merge-pass leaves: one run reader per leaf, streamed to exhaustion.
struct RunLeaves {
    readers: Vec<SegmentReader>,
}

impl LeafSource for RunLeaves {
    fn pull(
        &mut self,
        leaf: usize,
        pool: &mut ProxyPool,
    ) -> Result<Option<RecordProxy>, SortError> {
        match self.readers.get_mut(leaf) {
            Some(reader) => reader.next(pool),
            None => Ok(None),
        }
    }
}

/// The smallest fan-in that leaves at most `m` runs for one further pass,
/// never more than the leaf row can hold.
fn merge_fan_in(run_count: usize, m: usize) -> usize {
    run_count.div_ceil(m).clamp(2, m)
}

#[allow(clippy::too_many_arguments)]
fn drain_to_publisher(
    tournament: &mut Tournament,
    phase: u64,
    source: &mut dyn LeafSource,
    pool: &mut ProxyPool,
    dedup: &mut DuplicateFilter,
    publisher: &mut StreamPublisher,
    sources_store: &mut SourceStore,
    aggregator: &mut Aggregator,
    plan: &SortPlan,
    estimate: u64,
) -> Result<u64, SortError> {
    let mut record = Vec::new();
    let mut emitted = 0u64;
    while let Some(proxy) = tournament.shake(phase, source, pool)? {
        emitted += 1;
        if dedup.admit(&proxy) {
            sources_store.read_at(
                proxy.source_index,
                proxy.position,
                proxy.original_size as usize,
                &mut record,
            )?;
            if !publisher.publish(&proxy, &record)? {
                pool.release(proxy);
                return Err(SortError::OutOfOrder {
                    record_number: publisher.written() + 1,
                    row_max: estimate,
                    power: plan.power,
                });
            }
            if !aggregator.is_empty() {
                let fields = plan.csv.as_ref().map(|csv| csv.split_fields(&record));
                let row = RowContext {
                    record: &record,
                    fields: fields.as_deref(),
                    record_number: proxy.ordinal.abs(),
                    record_size: record.len(),
                    layout: &plan.layout,
                };
                aggregator.update(&row);
            }
        }
        pool.release(proxy);
    }
    Ok(emitted)
}

fn drain_to_run(
    tournament: &mut Tournament,
    phase: u64,
    source: &mut dyn LeafSource,
    pool: &mut ProxyPool,
    run_store: &mut SegmentStore,
) -> Result<u64, SortError> {
    let Some(first) = tournament.shake(phase, source, pool)? else {
        return Ok(0);
    };
    run_store.start_run()?;
    run_store.append(first, pool)?;
    let mut emitted = 1u64;
    while let Some(proxy) = tournament.shake(phase, source, pool)? {
        run_store.append(proxy, pool)?;
        emitted += 1;
    }
    run_store.finish_run()?;
    Ok(emitted)
}
