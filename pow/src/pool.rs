//! Worker pool: one thread per accelerator, fed from one bounded queue.
//!
//! Each worker owns its [`Driver`], so at most one job runs per accelerator.
//! Submitting blocks while the queue is full and until the job's result is
//! in. Shutting down stops workers from taking new jobs; a search already
//! running on the hardware is not interrupted.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    backend::Backend,
    driver::Driver,
    error::{Error, Result},
};

/// How often idle workers look at the shutdown flag.
const IDLE_CHECK: Duration = Duration::from_millis(50);

struct Job {
    trytes: String,
    difficulty: u32,
    reply: mpsc::Sender<Result<String>>,
}

/// Cloneable handle for submitting jobs from several threads.
#[derive(Clone)]
pub struct Submitter {
    queue: SyncSender<Job>,
    accepting: Arc<AtomicBool>,
}

impl Submitter {
    /// Run a job on the next free accelerator and wait for its nonce.
    pub fn submit(&self, trytes: &str, difficulty: u32) -> Result<String> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        let (reply, result) = mpsc::channel();
        self.queue
            .send(Job {
                trytes: trytes.to_owned(),
                difficulty,
                reply,
            })
            .map_err(|_| Error::ShuttingDown)?;
        result.recv().map_err(|_| Error::ShuttingDown)?
    }
}

pub struct Pool {
    submitter: Submitter,
    workers: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Start one worker per initialized driver; `depth` jobs may wait in the queue.
    pub fn new<B: Backend + 'static>(drivers: Vec<Driver<B>>, depth: usize) -> Self {
        let (queue, jobs) = mpsc::sync_channel(depth);
        let jobs = Arc::new(Mutex::new(jobs));
        let accepting = Arc::new(AtomicBool::new(true));

        let workers = drivers
            .into_iter()
            .enumerate()
            .map(|(index, driver)| {
                let jobs = jobs.clone();
                let accepting = accepting.clone();
                thread::spawn(move || work(index, driver, &jobs, &accepting))
            })
            .collect::<Vec<_>>();
        info!("started {} workers", workers.len());

        Self {
            submitter: Submitter { queue, accepting },
            workers,
        }
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub fn submit(&self, trytes: &str, difficulty: u32) -> Result<String> {
        self.submitter.submit(trytes, difficulty)
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop taking jobs and wait for running ones to finish.
    ///
    /// Queued jobs fail with [`Error::ShuttingDown`].
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.submitter.accepting.store(false, Ordering::Release);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("worker panicked");
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn work<B: Backend>(
    index: usize,
    mut driver: Driver<B>,
    jobs: &Mutex<Receiver<Job>>,
    accepting: &AtomicBool,
) {
    debug!(worker = index, "worker started");
    loop {
        let next = jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv_timeout(IDLE_CHECK);
        let job = match next {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) if accepting.load(Ordering::Acquire) => continue,
            Err(_) => break,
        };
        if !accepting.load(Ordering::Acquire) {
            job.reply.send(Err(Error::ShuttingDown)).ok();
            break;
        }
        let result = driver.do_pow(&job.trytes, job.difficulty);
        if let Err(err) = &result {
            warn!(worker = index, "job failed: {}", err);
        }
        // the submitter may have given up waiting
        job.reply.send(result).ok();
    }
    debug!(worker = index, jobs = driver.jobs(), "worker stopped");
}
