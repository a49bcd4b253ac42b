//! Background CPU-load workers, one per experiment uid.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

const WINDOW_MS: u64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("uid {0} already exists")]
    AlreadyExists(String),
    #[error("cpu percent {0} out of range")]
    OutOfRange(u32),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Each worker burns `percent` ms of every 100 ms window on its own OS
/// thread until stopped.
#[derive(Default)]
pub struct CpuLoadPool {
    workers: Mutex<HashMap<String, Worker>>,
}

impl CpuLoadPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self, uid: &str, percent: u32) -> Result<(), PoolError> {
        if !(1..=100).contains(&percent) {
            return Err(PoolError::OutOfRange(percent));
        }
        let mut workers = self.workers();
        if workers.contains_key(uid) {
            return Err(PoolError::AlreadyExists(uid.to_string()));
        }
        let (stop, rx) = mpsc::channel();
        let worker_uid = uid.to_string();
        let handle = thread::Builder::new()
            .name(format!("cpu-load-{uid}"))
            .spawn(move || burn(&worker_uid, percent, rx))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;
        workers.insert(uid.to_string(), Worker { stop, handle });
        Ok(())
    }

    /// Signals and joins the worker. Returns whether one was running.
    pub fn stop(&self, uid: &str) -> bool {
        let worker = self.workers().remove(uid);
        match worker {
            Some(w) => {
                let _ = w.stop.send(());
                if w.handle.join().is_err() {
                    tracing::warn!("cpu load worker {} panicked", uid);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.workers().contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CpuLoadPool {
    fn drop(&mut self) {
        let workers: Vec<_> = self.workers().drain().collect();
        for (_, w) in workers {
            let _ = w.stop.send(());
            let _ = w.handle.join();
        }
    }
}

fn burn(uid: &str, percent: u32, stop: Receiver<()>) {
    let busy = Duration::from_millis(u64::from(percent).min(WINDOW_MS));
    let idle = Duration::from_millis(WINDOW_MS) - busy;
    tracing::info!("cpu load worker {} started at {}%", uid, percent);

    'run: loop {
        let started = Instant::now();
        while started.elapsed() < busy {
            match stop.try_recv() {
                Err(TryRecvError::Empty) => std::hint::spin_loop(),
                _ => break 'run,
            }
        }
        if idle.is_zero() {
            continue;
        }
        match stop.recv_timeout(idle) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }

    tracing::info!("cpu load worker {} stopped", uid);
}
