//! Bounded worker pool for asynchronous action dispatch.
//!
//! # Responsibility
//! - Run queued action jobs on a fixed set of worker threads.
//! - Hand callers an `ActionTicket` with timeout and cancellation.
//!
//! # Invariants
//! - A job whose token is cancelled before a worker picks it up never runs.
//! - A full queue rejects at submit time; callers never block on submit.
//! - A ticket resolves exactly once; later queries return the same result.
//! - Timeouts cancel the job token but cannot preempt extension code.

use crate::extension::boundary::contain;
use crate::extension::error::{ActionError, DispatchError};
use crate::extension::protocol::CancellationToken;
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use log::{debug, error, warn};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type ActionResult = Result<(), DispatchError>;

type Job = Box<dyn FnOnce() -> ActionResult + Send>;

struct QueuedJob {
    label: String,
    token: CancellationToken,
    job: Job,
    reply: Sender<ActionResult>,
}

/// Fixed-size worker pool fed by a bounded queue.
pub struct ActionPool {
    sender: Option<Sender<QueuedJob>>,
    workers: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl std::fmt::Debug for ActionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionPool")
            .field("workers", &self.workers.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ActionPool {
    /// Spawns `workers` threads sharing a queue of `capacity` jobs.
    pub fn new(workers: usize, capacity: usize, timeout: Duration) -> Self {
        let (sender, receiver) = bounded::<QueuedJob>(capacity.max(1));
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("addonkit-action-{index}"))
                .spawn(move || worker_loop(receiver));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => error!(
                    "event=action_pool_start module=dispatch status=error worker={} error={}",
                    index, err
                ),
            }
        }
        debug!(
            "event=action_pool_start module=dispatch status=ok workers={} capacity={} timeout_ms={}",
            handles.len(),
            capacity,
            timeout.as_millis()
        );
        Self {
            sender: Some(sender),
            workers: handles,
            timeout,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queues `job`; `token` is checked once more right before it runs.
    pub fn submit<F>(&self, label: &str, token: CancellationToken, job: F) -> ActionTicket
    where
        F: FnOnce() -> ActionResult + Send + 'static,
    {
        let (reply, receiver) = bounded(1);
        let mut ticket = ActionTicket {
            label: label.to_string(),
            token: token.clone(),
            receiver,
            deadline: Instant::now() + self.timeout,
            resolved: None,
        };

        let Some(sender) = self.sender.as_ref().filter(|_| !self.workers.is_empty()) else {
            ticket.resolved = Some(Err(ActionError::WorkerLost.into()));
            return ticket;
        };

        let queued = QueuedJob {
            label: label.to_string(),
            token,
            job: Box::new(job),
            reply,
        };
        match sender.try_send(queued) {
            Ok(()) => debug!(
                "event=action_dispatch module=dispatch status=queued action={}",
                label
            ),
            Err(TrySendError::Full(_)) => {
                warn!(
                    "event=action_dispatch module=dispatch status=error action={} error_code=action_queue_full",
                    label
                );
                ticket.resolved = Some(Err(ActionError::QueueFull.into()));
            }
            Err(TrySendError::Disconnected(_)) => {
                ticket.resolved = Some(Err(ActionError::WorkerLost.into()));
            }
        }
        ticket
    }
}

impl Drop for ActionPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(receiver: Receiver<QueuedJob>) {
    while let Ok(queued) = receiver.recv() {
        let result = if queued.token.is_cancelled() {
            debug!(
                "event=action_dispatch module=dispatch status=cancelled action={} stage=queued",
                queued.label
            );
            Err(ActionError::Cancelled(queued.label.clone()).into())
        } else {
            let label = queued.label.clone();
            contain(queued.job).unwrap_or_else(|message| {
                Err(ActionError::Faulted {
                    action: label,
                    message,
                }
                .into())
            })
        };
        // The ticket may already be gone; nothing left to notify.
        let _ = queued.reply.send(result);
    }
}

/// Handle to one asynchronously dispatched action.
#[derive(Debug)]
pub struct ActionTicket {
    label: String,
    token: CancellationToken,
    receiver: Receiver<ActionResult>,
    deadline: Instant,
    resolved: Option<ActionResult>,
}

impl ActionTicket {
    /// Ticket that is already resolved, used when dispatch fails up front.
    pub(crate) fn resolved(label: &str, result: ActionResult) -> Self {
        let (_, receiver) = bounded(1);
        Self {
            label: label.to_string(),
            token: CancellationToken::new(),
            receiver,
            deadline: Instant::now(),
            resolved: Some(result),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Blocks until the job reports or the action timeout elapses.
    pub fn wait(mut self) -> ActionResult {
        if let Some(result) = &self.resolved {
            return result.clone();
        }
        match self.receiver.recv_deadline(self.deadline) {
            Ok(result) => self.resolve(result),
            Err(RecvTimeoutError::Timeout) => self.time_out(),
            Err(RecvTimeoutError::Disconnected) => self.resolve(Err(ActionError::WorkerLost.into())),
        }
    }

    /// Waits at most `limit`. Returns `None` while the job is still pending.
    pub fn wait_timeout(&mut self, limit: Duration) -> Option<ActionResult> {
        if let Some(result) = &self.resolved {
            return Some(result.clone());
        }
        let until = (Instant::now() + limit).min(self.deadline);
        match self.receiver.recv_deadline(until) {
            Ok(result) => Some(self.resolve(result)),
            Err(RecvTimeoutError::Timeout) if Instant::now() >= self.deadline => {
                Some(self.time_out())
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(self.resolve(Err(ActionError::WorkerLost.into())))
            }
        }
    }

    /// Non-blocking poll.
    pub fn try_result(&mut self) -> Option<ActionResult> {
        if let Some(result) = &self.resolved {
            return Some(result.clone());
        }
        match self.receiver.try_recv() {
            Ok(result) => Some(self.resolve(result)),
            Err(TryRecvError::Empty) if Instant::now() >= self.deadline => Some(self.time_out()),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(self.resolve(Err(ActionError::WorkerLost.into())))
            }
        }
    }

    fn time_out(&mut self) -> ActionResult {
        self.token.cancel();
        warn!(
            "event=action_dispatch module=dispatch status=timeout action={} error_code=action_timed_out",
            self.label
        );
        self.resolve(Err(ActionError::TimedOut(self.label.clone()).into()))
    }

    fn resolve(&mut self, result: ActionResult) -> ActionResult {
        self.resolved = Some(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionPool, ActionTicket};
    use crate::extension::error::{ActionError, DispatchError};
    use crate::extension::protocol::CancellationToken;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn runs_jobs_and_reports_results() {
        let pool = ActionPool::new(2, 4, Duration::from_secs(5));
        let ok = pool.submit("ok", CancellationToken::new(), || Ok(()));
        let rejected = pool.submit("no", CancellationToken::new(), || {
            Err(ActionError::Rejected("no".to_string()).into())
        });
        assert_eq!(ok.wait(), Ok(()));
        assert_eq!(
            rejected.wait(),
            Err(DispatchError::Action(ActionError::Rejected("no".to_string())))
        );
    }

    #[test]
    fn cancelled_job_never_runs() {
        let pool = ActionPool::new(1, 4, Duration::from_secs(5));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let blocker = pool.submit("block", CancellationToken::new(), move || {
            let _ = release_rx.recv();
            Ok(())
        });

        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_job = Arc::clone(&ran);
        let ticket = pool.submit("queued", CancellationToken::new(), move || {
            ran_in_job.store(true, Ordering::SeqCst);
            Ok(())
        });
        ticket.cancel();
        release_tx.send(()).expect("release blocker");

        assert_eq!(blocker.wait(), Ok(()));
        assert_eq!(
            ticket.wait(),
            Err(DispatchError::Action(ActionError::Cancelled("queued".to_string())))
        );
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn timeout_resolves_ticket_and_cancels_token() {
        let pool = ActionPool::new(1, 4, Duration::from_millis(50));
        let token = CancellationToken::new();
        let observed = token.clone();
        let ticket = pool.submit("slow", token, move || {
            while !observed.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        });

        let mut ticket = ticket;
        let result = ticket.wait_timeout(Duration::from_secs(5)).expect("deadline reached");
        assert_eq!(
            result,
            Err(DispatchError::Action(ActionError::TimedOut("slow".to_string())))
        );
        assert!(ticket.is_cancelled());
        assert_eq!(ticket.try_result(), Some(result));
    }

    #[test]
    fn full_queue_rejects_immediately() {
        let pool = ActionPool::new(1, 1, Duration::from_secs(5));
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let running = pool.submit("running", CancellationToken::new(), move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        });
        started_rx.recv().expect("first job started");

        let queued = pool.submit("queued", CancellationToken::new(), || Ok(()));
        let mut overflow = pool.submit("overflow", CancellationToken::new(), || Ok(()));
        assert_eq!(
            overflow.try_result(),
            Some(Err(DispatchError::Action(ActionError::QueueFull)))
        );

        release_tx.send(()).expect("release");
        assert_eq!(running.wait(), Ok(()));
        assert_eq!(queued.wait(), Ok(()));
    }

    #[test]
    fn panicking_job_is_reported_as_fault() {
        let pool = ActionPool::new(1, 2, Duration::from_secs(5));
        let ticket = pool.submit("explode", CancellationToken::new(), || panic!("job exploded"));
        assert_eq!(
            ticket.wait(),
            Err(DispatchError::Action(ActionError::Faulted {
                action: "explode".to_string(),
                message: "job exploded".to_string(),
            }))
        );

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_in_job = Arc::clone(&counter);
        let after = pool.submit("after", CancellationToken::new(), move || {
            counter_in_job.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(after.wait(), Ok(()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pre_resolved_ticket_returns_result() {
        let mut ticket = ActionTicket::resolved(
            "missing",
            Err(DispatchError::UnknownExtension("missing".to_string())),
        );
        assert!(ticket.try_result().is_some());
        assert_eq!(
            ticket.wait(),
            Err(DispatchError::UnknownExtension("missing".to_string()))
        );
    }

    #[test]
    fn pool_without_workers_reports_worker_lost() {
        let pool = ActionPool::new(0, 1, Duration::from_secs(1));
        assert_eq!(pool.worker_count(), 0);
        let ticket = pool.submit("orphan", CancellationToken::new(), || Ok(()));
        assert_eq!(
            ticket.wait(),
            Err(DispatchError::Action(ActionError::WorkerLost))
        );
    }
}
