//! Search tree orchestrator.
//!
//! The root leaf is evaluated and optimized first. Each following depth
//! blooms the current optimal leaf, evaluates every child on the worker
//! pool and adopts children that improve enough on the previous depth's
//! optimum. The search stops at the maximum depth, when a depth brings no
//! improvement, or once a leaf reaches the stop criterion.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use rao_linear::LinearSolver;
use rao_types::{
    Network, OptimizationPerimeter, PrePerimeterState, RangeActionActivation, RaoResult, SearchError,
    SensitivityEngine, TreeParameters,
};

use crate::bloomer::Bloomer;
use crate::combination::ActionCombination;
use crate::context::SearchContext;
use crate::leaf::{Leaf, LeafStatus};
use crate::pool::NetworkPool;
use crate::result::SearchTreeResult;

// ---------------------------------------------------------------------------
// Acceptance rule
// ---------------------------------------------------------------------------

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Whether `candidate` improves on `previous_best` by more than both
/// thresholds. A candidate reaching the stop criterion only has to be
/// strictly better.
pub fn improved_enough(
    previous_best: f64,
    candidate: f64,
    absolute_threshold: f64,
    relative_threshold: f64,
    candidate_reaches_stop: bool,
) -> bool {
    if previous_best > candidate && candidate_reaches_stop {
        return true;
    }
    let absolute = absolute_threshold.max(0.0);
    let relative = relative_threshold.max(0.0);
    previous_best - absolute > candidate && (1.0 - sign(previous_best) * relative) * previous_best > candidate
}

// ---------------------------------------------------------------------------
// Best leaf bookkeeping
// ---------------------------------------------------------------------------

struct TrackerState {
    optimal: Arc<Leaf>,
    previous_depth_optimal: Arc<Leaf>,
    open_depth: Option<usize>,
    /// First combination found reaching the stop criterion, kept as the
    /// smallest such combination seen so far.
    stop_combination: Option<ActionCombination>,
}

/// Optimal leaf shared by the workers of one depth. Comparing and adopting
/// happen under one lock.
pub struct BestLeafTracker {
    state: Mutex<TrackerState>,
    absolute_threshold: f64,
    relative_threshold: f64,
}

impl BestLeafTracker {
    pub fn new(root: Leaf, absolute_threshold: f64, relative_threshold: f64) -> Self {
        let root = Arc::new(root);
        Self {
            state: Mutex::new(TrackerState {
                optimal: Arc::clone(&root),
                previous_depth_optimal: root,
                open_depth: None,
                stop_combination: None,
            }),
            absolute_threshold,
            relative_threshold,
        }
    }

    pub fn optimal(&self) -> Arc<Leaf> {
        Arc::clone(&self.state.lock().optimal)
    }

    /// Starts accepting leaves of `depth`, measured against the current optimum.
    pub fn open_depth(&self, depth: usize) {
        let mut state = self.state.lock();
        state.previous_depth_optimal = Arc::clone(&state.optimal);
        state.open_depth = Some(depth);
    }

    /// Late leaves of a closed depth are never adopted.
    pub fn close_depth(&self) {
        self.state.lock().open_depth = None;
    }

    pub fn stop_reached(&self) -> bool {
        self.state.lock().stop_combination.is_some()
    }

    /// Whether a leaf already reached the stop criterion with a combination
    /// ordered before `combination`.
    pub fn is_preempted(&self, combination: &ActionCombination) -> bool {
        self.state
            .lock()
            .stop_combination
            .as_ref()
            .is_some_and(|stop| combination > stop)
    }

    /// Adopts `leaf` as the new optimum if it belongs to the open depth and
    /// improves enough. Returns whether it was adopted.
    pub fn try_adopt(&self, ctx: &SearchContext, leaf: Leaf, depth: usize) -> bool {
        let Some(cost) = leaf.best_cost().map(|c| c.total()) else {
            return false;
        };
        let reaches_stop = ctx.stop_criterion_reached(&leaf);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.open_depth != Some(depth) {
            debug!(leaf = %leaf, depth, "depth already closed, leaf discarded");
            return false;
        }
        let previous = state
            .previous_depth_optimal
            .best_cost()
            .map_or(f64::INFINITY, |c| c.total());
        if !improved_enough(
            previous,
            cost,
            self.absolute_threshold,
            self.relative_threshold,
            reaches_stop,
        ) {
            return false;
        }

        match &state.stop_combination {
            None => {
                let optimal = state.optimal.best_cost().map_or(f64::INFINITY, |c| c.total());
                if cost >= optimal {
                    return false;
                }
                if reaches_stop {
                    state.stop_combination = Some(leaf.combination().clone());
                }
            }
            Some(stop) => {
                if !reaches_stop || leaf.combination() >= stop {
                    return false;
                }
                state.stop_combination = Some(leaf.combination().clone());
            }
        }
        debug!(leaf = %leaf, depth, "new optimal leaf");
        state.optimal = Arc::new(leaf);
        true
    }
}

// ---------------------------------------------------------------------------
// Depth workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafOutcome {
    Skipped,
    Failed,
    Evaluated { adopted: bool },
}

#[derive(Debug, Default, Clone, Copy)]
struct DepthTally {
    evaluated: usize,
    failed: usize,
    adopted: usize,
    skipped: usize,
    /// Still running when the depth deadline passed.
    timed_out: usize,
}

impl DepthTally {
    fn record(&mut self, outcome: LeafOutcome) {
        match outcome {
            LeafOutcome::Skipped => self.skipped += 1,
            LeafOutcome::Failed => self.failed += 1,
            LeafOutcome::Evaluated { adopted } => {
                self.evaluated += 1;
                if adopted {
                    self.adopted += 1;
                }
            }
        }
    }
}

fn evaluate_candidate(
    ctx: &SearchContext,
    pool: &Arc<NetworkPool>,
    tracker: &BestLeafTracker,
    combination: ActionCombination,
    activation: RangeActionActivation,
    depth: usize,
) -> LeafOutcome {
    if tracker.is_preempted(&combination) {
        debug!(leaf = %combination, "skipped, an earlier combination reached the stop criterion");
        return LeafOutcome::Skipped;
    }
    let network = match pool.checkout() {
        Ok(network) => network,
        Err(e) => {
            warn!(leaf = %combination, "no network copy: {}", e);
            return LeafOutcome::Failed;
        }
    };

    let mut leaf = Leaf::new(network, combination, activation, ctx);
    if leaf.status() == LeafStatus::Created {
        leaf.evaluate(ctx);
    }
    if leaf.status() == LeafStatus::Error {
        return LeafOutcome::Failed;
    }
    if !ctx.stop_criterion_reached(&leaf) {
        leaf.optimize(ctx);
    }
    leaf.release_network();
    info!(depth, leaf = %leaf, "leaf evaluated");

    LeafOutcome::Evaluated {
        adopted: tracker.try_adopt(ctx, leaf, depth),
    }
}

// ---------------------------------------------------------------------------
// Search tree
// ---------------------------------------------------------------------------

pub struct SearchTree {
    perimeter: OptimizationPerimeter,
    parameters: TreeParameters,
    engine: Arc<dyn SensitivityEngine>,
    solver: Arc<dyn LinearSolver>,
    workers: ThreadPool,
}

impl SearchTree {
    pub fn new(
        perimeter: OptimizationPerimeter,
        engine: Arc<dyn SensitivityEngine>,
        solver: Arc<dyn LinearSolver>,
        parameters: TreeParameters,
    ) -> RaoResult<Self> {
        parameters.validate()?;
        let workers = ThreadPoolBuilder::new()
            .num_threads(parameters.leaves_in_parallel)
            .thread_name(|i| format!("search-tree-{i}"))
            .build()
            .map_err(|e| SearchError::ThreadPool { message: e.to_string() })?;
        Ok(Self {
            perimeter,
            parameters,
            engine,
            solver,
            workers,
        })
    }

    pub fn parameters(&self) -> &TreeParameters {
        &self.parameters
    }

    /// Runs the search on copies of `network`; the network itself is left untouched.
    pub fn run(&self, network: &dyn Network) -> SearchTreeResult {
        let mut result = SearchTreeResult::new();
        result.mark_running();
        info!(
            run_id = %result.run_id,
            network_actions = self.perimeter.network_actions.len(),
            range_actions = self.perimeter.range_actions.len(),
            cnecs = self.perimeter.cnecs.len(),
            "search tree started"
        );

        let capacity = self
            .parameters
            .leaves_in_parallel
            .min(self.perimeter.network_actions.len())
            .max(1);
        let pool = NetworkPool::new(
            network,
            capacity,
            Duration::from_secs(self.parameters.network_checkout_timeout_seconds),
        );

        let (ctx, mut root) = match self.evaluate_root(&pool) {
            Ok(evaluated) => evaluated,
            Err(e) => {
                error!(run_id = %result.run_id, "{}", e);
                result.mark_failed(e.to_string());
                return result;
            }
        };
        result.leaves_evaluated = 1;
        info!(root = %root, "root leaf evaluated");

        if ctx.stop_criterion_reached(&root) {
            root.release_network();
            info!(purely_virtual = ctx.is_purely_virtual(), "stop criterion reached on root leaf");
            result.mark_completed(&root, true);
            return result;
        }

        root.optimize(&ctx);
        root.release_network();
        info!(root = %root, solve_status = ?root.solve_status(), "root leaf optimized");
        if ctx.stop_criterion_reached(&root) {
            info!("stop criterion reached after root optimization");
            result.mark_completed(&root, true);
            return result;
        }

        let tracker = Arc::new(BestLeafTracker::new(
            root,
            self.parameters.absolute_min_impact_threshold,
            self.parameters.relative_min_impact_threshold,
        ));
        let bloomer = Bloomer::new(&ctx.perimeter, &ctx.parameters, network);

        let mut depth = 0;
        let mut has_improved = true;
        while depth < self.parameters.maximum_search_depth && has_improved && !tracker.stop_reached() {
            let optimal = tracker.optimal();
            let Some(input) = optimal.bloom_input() else {
                break;
            };
            let candidates = bloomer.bloom(&ctx.perimeter, &ctx.pre_perimeter, &input);
            if candidates.is_empty() {
                info!(depth, "no more network action to try");
                break;
            }
            depth += 1;
            info!(depth, candidates = candidates.len(), "search depth started");

            tracker.open_depth(depth);
            let tally = self.evaluate_depth(&ctx, &pool, &tracker, candidates, optimal.range_activation(), depth);
            tracker.close_depth();

            result.leaves_evaluated += tally.evaluated;
            result.leaves_failed += tally.failed;
            result.leaves_timed_out += tally.timed_out;
            let new_optimal = tracker.optimal();
            has_improved = !Arc::ptr_eq(&optimal, &new_optimal);
            info!(
                depth,
                evaluated = tally.evaluated,
                failed = tally.failed,
                skipped = tally.skipped,
                timed_out = tally.timed_out,
                adopted = tally.adopted,
                optimal = %new_optimal,
                "search depth finished"
            );
        }

        let best = tracker.optimal();
        let stop_reached = ctx.stop_criterion_reached(&best);
        info!(
            best = %best,
            depth = best.combination().len(),
            leaves = result.leaves_evaluated,
            stop_reached,
            "search tree finished"
        );
        result.mark_completed(&best, stop_reached);
        result
    }

    fn evaluate_root(&self, pool: &Arc<NetworkPool>) -> RaoResult<(Arc<SearchContext>, Leaf)> {
        let network = pool.checkout()?;
        let sensitivity = self
            .engine
            .compute(&*network, &self.perimeter)
            .map_err(|e| SearchError::RootEvaluationFailed { message: e.to_string() })?;
        let pre_perimeter = PrePerimeterState::capture(&self.perimeter, &sensitivity, &*network);
        let ctx = Arc::new(SearchContext::new(
            self.perimeter.clone(),
            self.parameters.clone(),
            Arc::clone(&self.engine),
            Arc::clone(&self.solver),
            pre_perimeter,
        ));

        let mut root = Leaf::root(network, ctx.pre_perimeter.activation(&ctx.perimeter.range_actions));
        root.record_sensitivity(&ctx, Ok(sensitivity));
        if root.status() == LeafStatus::Error {
            let message = root.error_cause().unwrap_or("unknown cause").to_string();
            return Err(SearchError::RootEvaluationFailed { message }.into());
        }
        Ok((ctx, root))
    }

    fn evaluate_depth(
        &self,
        ctx: &Arc<SearchContext>,
        pool: &Arc<NetworkPool>,
        tracker: &Arc<BestLeafTracker>,
        candidates: Vec<ActionCombination>,
        activation: &RangeActionActivation,
        depth: usize,
    ) -> DepthTally {
        let expected = candidates.len();
        let (sender, receiver) = unbounded();
        for combination in candidates {
            let ctx = Arc::clone(ctx);
            let pool = Arc::clone(pool);
            let tracker = Arc::clone(tracker);
            let activation = activation.clone();
            let sender = sender.clone();
            self.workers.spawn(move || {
                let label = combination.to_string();
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    evaluate_candidate(&ctx, &pool, &tracker, combination, activation, depth)
                }))
                .unwrap_or_else(|_| {
                    warn!("{}", SearchError::WorkerPanicked { combination: label });
                    LeafOutcome::Failed
                });
                let _ = sender.send(outcome);
            });
        }
        drop(sender);

        let deadline = Instant::now() + Duration::from_secs(self.parameters.depth_timeout_seconds);
        let mut tally = DepthTally::default();
        for received in 0..expected {
            match receiver.recv_deadline(deadline) {
                Ok(outcome) => tally.record(outcome),
                Err(RecvTimeoutError::Timeout) => {
                    let timeout = SearchError::DepthTimeout {
                        depth,
                        timeout_seconds: self.parameters.depth_timeout_seconds,
                    };
                    warn!(pending = expected - received, "{}", timeout);
                    tally.timed_out = expected - received;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tally
    }
}
