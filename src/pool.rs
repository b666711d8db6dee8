//! Worker threads running the frame analyzer, with a bounded queue in front
//! and in-order delivery behind.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::frame::Frame;
use crate::pipeline::{FrameAnalysis, FrameAnalyzer};

const TIMING_LOG_FRAMES: u64 = 300;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Every worker busy and the queue full.
    QueueFull,
    /// Analysis finished after the frame budget.
    OverBudget,
}

#[derive(Debug, Clone)]
pub enum FrameOutcome {
    Analyzed(FrameAnalysis),
    Dropped {
        sequence: u64,
        timestamp: f64,
        dims: (u32, u32),
        reason: DropReason,
    },
}

impl FrameOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            FrameOutcome::Analyzed(a) => a.sequence,
            FrameOutcome::Dropped { sequence, .. } => *sequence,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            FrameOutcome::Analyzed(a) => a.timestamp,
            FrameOutcome::Dropped { timestamp, .. } => *timestamp,
        }
    }

    #[inline]
    pub fn is_dropped(&self) -> bool {
        matches!(self, FrameOutcome::Dropped { .. })
    }
}

struct Job {
    ticket: u64,
    frame: Arc<Frame>,
}

pub struct DetectionPool {
    jobs: Option<SyncSender<Job>>,
    results: Receiver<(u64, FrameOutcome)>,
    workers: Vec<JoinHandle<()>>,
    pending: BTreeMap<u64, FrameOutcome>,
    next_ticket: u64,
    next_out: u64,
    dropped: u64,
}

impl DetectionPool {
    pub fn new(analyzer: Arc<FrameAnalyzer>, runtime: &RuntimeConfig) -> Self {
        let workers_count = runtime.workers.max(1);
        let (job_tx, job_rx) = mpsc::sync_channel::<Job>(runtime.queue_depth);
        let (result_tx, result_rx) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..workers_count)
            .map(|id| {
                let analyzer = analyzer.clone();
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let drop_late = runtime.drop_late_frames;

                std::thread::spawn(move || worker(id, analyzer, jobs, results, drop_late))
            })
            .collect();

        debug!(
            workers = workers_count,
            queue_depth = runtime.queue_depth,
            "detection pool started"
        );

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
            pending: BTreeMap::new(),
            next_ticket: 0,
            next_out: 0,
            dropped: 0,
        }
    }

    /// Queues a frame without blocking. Returns `false` when it was dropped;
    /// the drop is still delivered in order as a [`FrameOutcome::Dropped`].
    pub fn submit(&mut self, frame: Arc<Frame>) -> bool {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let job = Job { ticket, frame };
        let rejected = match &self.jobs {
            Some(tx) => match tx.try_send(job) {
                Ok(()) => return true,
                Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => job,
            },
            None => job,
        };

        warn!(
            sequence = rejected.frame.sequence,
            "detection queue full, frame dropped"
        );

        self.dropped += 1;
        self.pending.insert(
            ticket,
            FrameOutcome::Dropped {
                sequence: rejected.frame.sequence,
                timestamp: rejected.frame.timestamp,
                dims: rejected.frame.dims(),
                reason: DropReason::QueueFull,
            },
        );

        false
    }

    /// Frames dropped because the queue was full.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Frames submitted but not yet handed out.
    #[inline]
    pub fn in_flight(&self) -> u64 {
        self.next_ticket - self.next_out
    }

    /// Next outcome in submission order, if it is ready.
    pub fn try_recv(&mut self) -> Option<FrameOutcome> {
        while let Ok((ticket, outcome)) = self.results.try_recv() {
            self.pending.insert(ticket, outcome);
        }

        self.pop_next()
    }

    /// Next outcome in submission order, waiting for it. `None` once every
    /// submitted frame has been handed out.
    pub fn recv(&mut self) -> Option<FrameOutcome> {
        loop {
            if let Some(outcome) = self.pop_next() {
                return Some(outcome);
            }

            if self.next_out == self.next_ticket {
                return None;
            }

            match self.results.recv() {
                Ok((ticket, outcome)) => {
                    self.pending.insert(ticket, outcome);
                }
                Err(_) => return None,
            }
        }
    }

    /// Closes the queue, waits for the workers and returns what is left.
    pub fn finish(mut self) -> Vec<FrameOutcome> {
        self.shutdown();

        let mut out = Vec::new();
        while let Some(outcome) = self.recv() {
            out.push(outcome);
        }

        out
    }

    fn pop_next(&mut self) -> Option<FrameOutcome> {
        let outcome = self.pending.remove(&self.next_out)?;
        self.next_out += 1;
        Some(outcome)
    }

    fn shutdown(&mut self) {
        self.jobs.take();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("detection worker panicked");
            }
        }
    }
}

impl Drop for DetectionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker(
    id: usize,
    analyzer: Arc<FrameAnalyzer>,
    jobs: Arc<Mutex<Receiver<Job>>>,
    results: Sender<(u64, FrameOutcome)>,
    drop_late: bool,
) {
    let mut prof_frames = 0u64;
    let mut prof_analyze = Duration::ZERO;
    let mut prof_late = 0u64;

    loop {
        let job = {
            let rx = match jobs.lock() {
                Ok(rx) => rx,
                Err(_) => break,
            };

            match rx.recv() {
                Ok(job) => job,
                Err(_) => break,
            }
        };

        let analysis = analyzer.analyze(&job.frame);

        prof_frames += 1;
        prof_analyze += analysis.elapsed;

        let outcome = if analyzer.over_budget(&analysis) {
            prof_late += 1;

            if drop_late {
                warn!(
                    sequence = analysis.sequence,
                    elapsed_ms = format!("{:.2}", analysis.elapsed.as_secs_f64() * 1000.0),
                    "frame over budget, dropped"
                );

                FrameOutcome::Dropped {
                    sequence: analysis.sequence,
                    timestamp: analysis.timestamp,
                    dims: analysis.dims(),
                    reason: DropReason::OverBudget,
                }
            } else {
                FrameOutcome::Analyzed(analysis)
            }
        } else {
            FrameOutcome::Analyzed(analysis)
        };

        if prof_frames % TIMING_LOG_FRAMES == 0 {
            info!(
                worker = id,
                frames = prof_frames,
                late = prof_late,
                analyze_ms_per_frame =
                    format!("{:.2}", prof_analyze.as_secs_f64() * 1000.0 / prof_frames as f64),
                "detection worker timings"
            );
        }

        if results.send((job.ticket, outcome)).is_err() {
            break;
        }
    }

    debug!(worker = id, frames = prof_frames, "detection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{BallProfile, Hsv, HsvTarget};
    use crate::config::PipelineConfig;
    use crate::synthetic::{Disc, Scene, BALL_COLOR};

    fn analyzer(budget_ms: f64) -> Arc<FrameAnalyzer> {
        let mut config = PipelineConfig::default();
        config.runtime.frame_budget_ms = budget_ms;

        let profile = BallProfile {
            ball: HsvTarget::new(Hsv::from_rgb(BALL_COLOR)).with_tolerances(15.0, 0.25, 0.25),
            marker: None,
        };

        Arc::new(FrameAnalyzer::new(&config, profile).unwrap())
    }

    fn frame(seq: u64) -> Arc<Frame> {
        Arc::new(
            Scene::new(80, 80)
                .with_disc(Disc::new(20.0 + seq as f32, 40.0, 6.0, BALL_COLOR))
                .render(seq, seq as f64 / 120.0),
        )
    }

    #[test]
    fn delivers_in_submission_order() {
        let runtime = RuntimeConfig {
            workers: 4,
            queue_depth: 64,
            ..RuntimeConfig::default()
        };

        let mut pool = DetectionPool::new(analyzer(10_000.0), &runtime);
        for seq in 0..20 {
            assert!(pool.submit(frame(seq)));
        }

        let out = pool.finish();
        let seqs: Vec<u64> = out.iter().map(|o| o.sequence()).collect();
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());
        assert!(out.iter().all(|o| !o.is_dropped()));
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        // zero depth is a rendezvous channel: nothing queues up behind a busy worker
        let runtime = RuntimeConfig {
            workers: 1,
            queue_depth: 0,
            ..RuntimeConfig::default()
        };

        let frames: Vec<Arc<Frame>> = (0..50).map(frame).collect();
        let mut pool = DetectionPool::new(analyzer(10_000.0), &runtime);
        let accepted = frames.into_iter().filter(|f| pool.submit(f.clone())).count() as u64;

        assert_eq!(accepted + pool.dropped(), 50);
        assert!(pool.dropped() > 0);

        let out = pool.finish();
        assert_eq!(out.len(), 50);
        for (i, o) in out.iter().enumerate() {
            assert_eq!(o.sequence(), i as u64);
        }

        let dropped = out
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    FrameOutcome::Dropped {
                        reason: DropReason::QueueFull,
                        ..
                    }
                )
            })
            .count() as u64;
        assert_eq!(dropped, 50 - accepted);
    }

    #[test]
    fn late_frames_are_dropped_when_configured() {
        let runtime = RuntimeConfig {
            workers: 1,
            queue_depth: 8,
            drop_late_frames: true,
            ..RuntimeConfig::default()
        };

        // nothing finishes in a nanosecond
        let mut pool = DetectionPool::new(analyzer(1e-6), &runtime);
        pool.submit(frame(0));

        let out = pool.finish();
        assert!(matches!(
            out[0],
            FrameOutcome::Dropped {
                reason: DropReason::OverBudget,
                ..
            }
        ));
    }

    #[test]
    fn late_frames_are_kept_otherwise() {
        let runtime = RuntimeConfig {
            workers: 1,
            queue_depth: 8,
            drop_late_frames: false,
            ..RuntimeConfig::default()
        };

        let mut pool = DetectionPool::new(analyzer(1e-6), &runtime);
        pool.submit(frame(0));

        match pool.recv() {
            Some(FrameOutcome::Analyzed(a)) => assert_eq!(a.candidates.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(pool.recv().is_none());
    }
}
