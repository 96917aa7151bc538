use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use crossbeam::channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use crate::index::inverted::{merge_worker, InvertedListReadView, MergeJob};
use crate::core::types::ListId;
use crate::scoring::Ranker;

enum WorkerMessage {
    Job { job: MergeJob, ranker: Ranker, total_records: u32 },
    Shutdown,
}

struct BatchState {
    pending: usize,
    results: Vec<(ListId, Arc<InvertedListReadView>)>,
}

/// Fixed pool of inverted-list merge workers fed from a dispatcher
/// queue. The master thread enqueues every dirty keyword, then sleeps on
/// the condvar until the last worker checks in; completion accounting is
/// mutex-protected so no wakeup is lost.
pub struct MergeWorkerPool {
    sender: Sender<WorkerMessage>,
    state: Arc<(Mutex<BatchState>, Condvar)>,
    workers: Vec<JoinHandle<()>>,
}

impl MergeWorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let (sender, receiver) = unbounded::<WorkerMessage>();
        let state = Arc::new((Mutex::new(BatchState { pending: 0, results: Vec::new() }), Condvar::new()));

        let workers = (0..worker_count.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                let state = state.clone();
                std::thread::Builder::new()
                    .name(format!("merge-worker-{i}"))
                    .spawn(move || {
                        while let Ok(message) = receiver.recv() {
                            match message {
                                WorkerMessage::Job { job, ranker, total_records } => {
                                    let merged = merge_worker(&job, &ranker, total_records);
                                    let (lock, condvar) = &*state;
                                    let mut batch = lock.lock();
                                    batch.results.push((job.list_id, merged));
                                    batch.pending -= 1;
                                    if batch.pending == 0 {
                                        condvar.notify_all();
                                    }
                                }
                                WorkerMessage::Shutdown => break,
                            }
                        }
                    })
                    .expect("spawn merge worker")
            })
            .collect();

        MergeWorkerPool { sender, state, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Run one merge batch to completion and return the new per-list read
    /// views. The caller installs them before swapping the index read
    /// view, so readers never observe a half-merged keyword set.
    pub fn run_batch(
        &self,
        jobs: Vec<MergeJob>,
        ranker: &Ranker,
        total_records: u32,
    ) -> Vec<(ListId, Arc<InvertedListReadView>)> {
        if jobs.is_empty() {
            return Vec::new();
        }
        {
            let (lock, _) = &*self.state;
            let mut batch = lock.lock();
            batch.pending = jobs.len();
            batch.results.clear();
            batch.results.reserve(jobs.len());
        }
        for job in jobs {
            let message = WorkerMessage::Job { job, ranker: ranker.clone(), total_records };
            if self.sender.send(message).is_err() {
                // Workers are gone; account for the undelivered job so the
                // wait below cannot hang.
                let (lock, condvar) = &*self.state;
                let mut batch = lock.lock();
                batch.pending -= 1;
                if batch.pending == 0 {
                    condvar.notify_all();
                }
            }
        }
        let (lock, condvar) = &*self.state;
        let mut batch = lock.lock();
        while batch.pending > 0 {
            condvar.wait(&mut batch);
        }
        std::mem::take(&mut batch.results)
    }
}

impl Drop for MergeWorkerPool {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.sender.send(WorkerMessage::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerTick {
    /// Timer elapsed or a write-threshold signal arrived.
    Merge,
    Stop,
}

/// Wakeup channel between writers and the merge-scheduler thread: the
/// scheduler sleeps up to the timer interval, and a writer crossing the
/// write threshold (or a stop request) wakes it early.
pub struct SchedulerSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

#[derive(Default)]
struct SignalState {
    merge_requested: bool,
    stop_requested: bool,
}

impl SchedulerSignal {
    pub fn new() -> Self {
        SchedulerSignal { state: Mutex::new(SignalState::default()), condvar: Condvar::new() }
    }

    pub fn request_merge(&self) {
        let mut state = self.state.lock();
        state.merge_requested = true;
        self.condvar.notify_one();
    }

    pub fn request_stop(&self) {
        let mut state = self.state.lock();
        state.stop_requested = true;
        self.condvar.notify_all();
    }

    /// Block until the next tick: a signal, a stop, or the timer.
    pub fn wait_tick(&self, timeout: Duration) -> SchedulerTick {
        let mut state = self.state.lock();
        if !state.stop_requested && !state.merge_requested {
            self.condvar.wait_for(&mut state, timeout);
        }
        if state.stop_requested {
            return SchedulerTick::Stop;
        }
        state.merge_requested = false;
        SchedulerTick::Merge
    }
}

impl Default for SchedulerSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RecordId;
    use crate::index::inverted::{InvertedWriter, PendingPosting};

    #[test]
    fn pool_merges_every_dirty_list() {
        let pool = MergeWorkerPool::new(5);
        assert_eq!(pool.worker_count(), 5);

        let mut writer = InvertedWriter::new();
        for list in 0..20u32 {
            for rec in 0..10u32 {
                writer.append_posting(
                    ListId(list),
                    PendingPosting { record: RecordId(rec), tf_boost_sum: 1.0, static_score: 1.0 },
                );
            }
        }
        let jobs = writer.take_pending();
        let results = pool.run_batch(jobs, &Ranker::default(), 100);
        assert_eq!(results.len(), 20);
        writer.install_merged(results);
        let view = writer.read_view();
        for list in 0..20u32 {
            assert_eq!(view.list_length(ListId(list)), 10);
        }
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let pool = MergeWorkerPool::new(2);
        assert!(pool.run_batch(Vec::new(), &Ranker::default(), 0).is_empty());
    }

    #[test]
    fn signal_wakes_before_timer() {
        let signal = Arc::new(SchedulerSignal::new());
        let s2 = signal.clone();
        let waiter = std::thread::spawn(move || s2.wait_tick(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(10));
        signal.request_merge();
        assert_eq!(waiter.join().unwrap(), SchedulerTick::Merge);

        let s3 = signal.clone();
        let waiter = std::thread::spawn(move || s3.wait_tick(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(10));
        signal.request_stop();
        assert_eq!(waiter.join().unwrap(), SchedulerTick::Stop);
    }
}
