use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::queue::{BlockingQueue, TakeOutcome};
use crate::stage::Stage;

/// Snapshot of pipeline throughput counters, analogous to a frame-rate
/// counter kept alongside the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub submitted: usize,
    pub delivered: usize,
    pub dropped: usize,
}

/// Lifecycle state of a [`PipelineEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Running,
    Stopping,
    Closed,
}

type Callback<P> = Box<dyn FnOnce(P) + Send>;

struct InnerPackage<P> {
    package: P,
    callback: Option<Callback<P>>,
}

struct Counters {
    submitted: AtomicUsize,
    delivered: AtomicUsize,
    dropped: AtomicUsize,
}

impl Counters {
    fn new() -> Self {
        Self {
            submitted: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }
}

/// Chains N stage workers through N+1 bounded queues plus one delivery
/// worker. Each stage has exactly one worker thread; packages cross the
/// pipeline in submission order except for packages dropped by a failing
/// stage.
pub struct PipelineEngine<P: Send + 'static> {
    name: String,
    stages: Vec<Stage<P>>,
    queue_capacity: usize,
    queues: Vec<std::sync::Arc<BlockingQueue<InnerPackage<P>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<PipelineState>,
    no_more_input: AtomicBool,
    counters: std::sync::Arc<Counters>,
}

impl<P: Send + 'static> PipelineEngine<P> {
    pub fn new(name: impl Into<String>, stages: Vec<Stage<P>>) -> Self {
        Self {
            name: name.into(),
            stages,
            queue_capacity: 100,
            queues: Vec::new(),
            workers: Mutex::new(Vec::new()),
            state: Mutex::new(PipelineState::Uninitialized),
            no_more_input: AtomicBool::new(false),
            counters: std::sync::Arc::new(Counters::new()),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == PipelineState::Running
    }

    /// Constructs N+1 queues, spawns N+1 worker threads, clears shutdown
    /// flags, and transitions to `Running`.
    pub fn start(&mut self, queue_capacity: usize) {
        self.queue_capacity = queue_capacity;
        let n = self.stages.len();
        self.queues = (0..=n)
            .map(|_| std::sync::Arc::new(BlockingQueue::new(queue_capacity)))
            .collect();
        self.no_more_input.store(false, Ordering::SeqCst);

        let mut workers = Vec::with_capacity(n + 1);
        for i in 0..n {
            let stage = self.stages[i].clone();
            let input = std::sync::Arc::clone(&self.queues[i]);
            let output = std::sync::Arc::clone(&self.queues[i + 1]);
            let pipeline_name = self.name.clone();
            let counters = std::sync::Arc::clone(&self.counters);
            let handle = std::thread::Builder::new()
                .name(format!("{pipeline_name}-{}", stage.name()))
                .spawn(move || stage_worker_loop(stage, input, output, counters))
                .expect("failed to spawn pipeline stage worker thread");
            workers.push(handle);
        }
        {
            let input = std::sync::Arc::clone(&self.queues[n]);
            let pipeline_name = self.name.clone();
            let counters = std::sync::Arc::clone(&self.counters);
            let handle = std::thread::Builder::new()
                .name(format!("{pipeline_name}-delivery"))
                .spawn(move || delivery_worker_loop(input, counters))
                .expect("failed to spawn pipeline delivery worker thread");
            workers.push(handle);
        }
        *self.workers.lock().unwrap() = workers;
        *self.state.lock().unwrap() = PipelineState::Running;
    }

    /// Wraps `(pkg, callback)` and blocking-pushes to Q0. Rejected with
    /// `ShuttingDown` once the pipeline has started stopping or closed,
    /// with `Rejected` if it was never started, or if Q0 itself refuses
    /// the push (e.g. disabled out from under a racing `close`).
    pub fn submit(&self, pkg: P, callback: Option<Callback<P>>) -> RuntimeResult<()> {
        self.admit(pkg, callback, |queue, inner| queue.push_blocking(inner))
    }

    /// Same as `submit` but evicts the oldest buffered package at Q0 if
    /// full instead of blocking.
    pub fn submit_cover(&self, pkg: P, callback: Option<Callback<P>>) -> RuntimeResult<()> {
        self.admit(pkg, callback, |queue, inner| queue.push_cover(inner))
    }

    fn admit(
        &self,
        pkg: P,
        callback: Option<Callback<P>>,
        push: impl FnOnce(&BlockingQueue<InnerPackage<P>>, InnerPackage<P>) -> bool,
    ) -> RuntimeResult<()> {
        match *self.state.lock().unwrap() {
            PipelineState::Uninitialized => {
                return Err(RuntimeError::Rejected);
            }
            PipelineState::Stopping | PipelineState::Closed => {
                return Err(RuntimeError::ShuttingDown);
            }
            PipelineState::Running => {}
        }
        let inner = InnerPackage { package: pkg, callback };
        if push(&self.queues[0], inner) {
            self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(RuntimeError::Rejected)
        }
    }

    /// Stop-and-drain: marks Q0 no-more-input. The condition propagates
    /// stage by stage as each worker observes drained input and signals
    /// the next queue. Every in-flight package is still delivered.
    pub fn signal_no_more_input(&self) {
        if !self.is_running() {
            return;
        }
        *self.state.lock().unwrap() = PipelineState::Stopping;
        self.no_more_input.store(true, Ordering::SeqCst);
        if let Some(q0) = self.queues.first() {
            q0.set_no_more_input();
        }
    }

    /// Joins all workers after a `signal_no_more_input` or once the drain
    /// has completed naturally. Transitions to `Closed`.
    pub fn join(&self) {
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        *self.state.lock().unwrap() = PipelineState::Closed;
    }

    /// Disables and clears every queue, joins all workers, abandons
    /// in-flight packages without invoking their callbacks. Idempotent.
    pub fn close(&self) {
        if *self.state.lock().unwrap() == PipelineState::Closed {
            return;
        }
        debug!(pipeline = %self.name, "closing pipeline");
        for q in &self.queues {
            q.disable_and_clear();
        }
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        *self.state.lock().unwrap() = PipelineState::Closed;
        debug!(pipeline = %self.name, "pipeline closed");
    }
}

impl<P: Send + 'static> Drop for PipelineEngine<P> {
    fn drop(&mut self) {
        self.close();
    }
}

fn stage_worker_loop<P>(
    stage: Stage<P>,
    input: std::sync::Arc<BlockingQueue<InnerPackage<P>>>,
    output: std::sync::Arc<BlockingQueue<InnerPackage<P>>>,
    counters: std::sync::Arc<Counters>,
) {
    debug!(stage = stage.name(), "stage worker starting");
    loop {
        match input.take_blocking() {
            TakeOutcome::Drained => {
                debug!(stage = stage.name(), "stage observed drained input, propagating");
                output.set_no_more_input();
                break;
            }
            TakeOutcome::Value(mut inner) => {
                let started = Instant::now();
                let result =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| stage.call(&mut inner.package)));
                debug!(
                    stage = stage.name(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "stage invocation complete"
                );
                let ok = result.unwrap_or(false);
                if !ok {
                    error!(stage = stage.name(), "stage failed, dropping package");
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                output.push_blocking(inner);
            }
        }
    }
    debug!(stage = stage.name(), "stage worker exiting");
}

fn delivery_worker_loop<P>(input: std::sync::Arc<BlockingQueue<InnerPackage<P>>>, counters: std::sync::Arc<Counters>) {
    debug!("delivery worker starting");
    loop {
        match input.take_blocking() {
            TakeOutcome::Drained => break,
            TakeOutcome::Value(inner) => match inner.callback {
                Some(cb) => {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(inner.package)));
                    match result {
                        Ok(()) => counters.delivered.fetch_add(1, Ordering::Relaxed),
                        Err(_) => {
                            error!("delivery callback panicked, dropping package");
                            counters.dropped.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
                None => {
                    warn!("package without valid callback will be dropped");
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }
    debug!("delivery worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tracing_test::traced_test;

    fn make_pipeline() -> PipelineEngine<i32> {
        let stages = vec![
            Stage::new("double", |p: &mut i32| {
                *p *= 2;
                true
            }),
            Stage::new("add_ten", |p: &mut i32| {
                *p += 10;
                true
            }),
        ];
        PipelineEngine::new("test", stages)
    }

    #[test]
    fn pipeline_happy_path() {
        let mut pipeline = make_pipeline();
        pipeline.start(8);
        let (tx, rx) = mpsc::channel();
        for i in [1, 2, 3] {
            let tx = tx.clone();
            pipeline
                .submit(
                    i,
                    Some(Box::new(move |p| {
                        tx.send(p).unwrap();
                    })),
                )
                .unwrap();
        }
        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap());
        }
        assert_eq!(results, vec![12, 14, 16]);
        pipeline.close();
    }

    #[test]
    #[traced_test]
    fn pipeline_stage_failure_drops_only_that_package() {
        let stages = vec![Stage::new("reject_two", |p: &mut i32| *p != 2)];
        let mut pipeline = PipelineEngine::new("test", stages);
        pipeline.start(8);
        let (tx, rx) = mpsc::channel();
        for i in [1, 2, 3] {
            let tx = tx.clone();
            pipeline.submit(i, Some(Box::new(move |p| tx.send(p).unwrap()))).unwrap();
        }
        let mut results = Vec::new();
        while let Ok(v) = rx.recv_timeout(std::time::Duration::from_millis(500)) {
            results.push(v);
        }
        assert_eq!(results, vec![1, 3]);
        pipeline.close();
        assert!(logs_contain("stage failed, dropping package"));
        assert_eq!(pipeline.stats().dropped, 1);
    }

    #[test]
    fn graceful_drain_delivers_every_package() {
        let stages = vec![Stage::new("noop", |_: &mut i32| true)];
        let mut pipeline = PipelineEngine::new("test", stages);
        pipeline.start(16);
        let (tx, rx) = mpsc::channel();
        for i in 0..100 {
            let tx = tx.clone();
            pipeline.submit(i, Some(Box::new(move |p| tx.send(p).unwrap()))).unwrap();
        }
        pipeline.signal_no_more_input();
        pipeline.join();
        let count = rx.try_iter().count();
        assert_eq!(count, 100);
    }

    #[test]
    fn panicking_stage_drops_package_without_stalling_pipeline() {
        let stages = vec![Stage::new("panics_on_two", |p: &mut i32| {
            if *p == 2 {
                panic!("boom");
            }
            true
        })];
        let mut pipeline = PipelineEngine::new("test", stages);
        pipeline.start(8);
        let (tx, rx) = mpsc::channel();
        for i in [1, 2, 3] {
            let tx = tx.clone();
            pipeline.submit(i, Some(Box::new(move |p| tx.send(p).unwrap()))).unwrap();
        }
        let mut results = Vec::new();
        while let Ok(v) = rx.recv_timeout(std::time::Duration::from_millis(500)) {
            results.push(v);
        }
        assert_eq!(results, vec![1, 3]);
        pipeline.close();
    }

    #[test]
    fn close_is_idempotent() {
        let mut pipeline = make_pipeline();
        pipeline.start(4);
        pipeline.close();
        pipeline.close();
        assert!(!pipeline.is_running());
    }

    #[test]
    fn submit_after_close_is_rejected() {
        let mut pipeline = make_pipeline();
        pipeline.start(4);
        pipeline.close();
        assert!(matches!(pipeline.submit(1, None), Err(RuntimeError::ShuttingDown)));
    }
}
