//! Fixed-rate tick thread.
//!
//! The tick thread owns the [`Engine`] exclusively (moved in on spawn).
//! Other threads hold a [`Sender`] and queue [`Command`]s over an unbounded
//! crossbeam channel; the loop drains the channel at the start of every
//! tick, so a command sent during tick N is applied at tick N+1.
//!
//! On exit the receiving end is handed back in [`DriverExit`], so a command
//! sent after the final drain is kept rather than dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::command::Command;
use crate::engine::Engine;
use crate::error::TickError;

/// Failure to start, feed or stop the tick thread.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("tick rate must be a positive finite number, got {0}")]
    InvalidTickRate(f64),
    #[error("failed to spawn tick thread: {0}")]
    ThreadSpawn(String),
    #[error("tick thread has stopped")]
    Stopped,
    #[error("tick thread panicked")]
    Panicked,
}

/// What the tick thread hands back when it stops.
#[derive(Debug)]
pub struct DriverExit {
    pub engine: Engine,
    /// Ticks completed by the thread.
    pub ticks: u64,
    /// The structural error that halted the loop, if any.
    pub error: Option<TickError>,
    /// The command channel. Holds anything sent after the final drain;
    /// senders are disconnected once this is dropped.
    pub backlog: Receiver<Command>,
}

impl DriverExit {
    /// Queue everything left in the channel on the engine and return it.
    pub fn into_engine(self) -> Engine {
        let mut engine = self.engine;
        engine.submit_batch(self.backlog.try_iter());
        engine
    }
}

/// Handle to a running tick thread.
#[derive(Debug)]
pub struct TickDriver {
    handle: Option<JoinHandle<DriverExit>>,
    shutdown: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    tx: Sender<Command>,
}

impl TickDriver {
    /// Move `engine` onto a new thread ticking at `tick_rate_hz`.
    pub fn spawn(engine: Engine, tick_rate_hz: f64) -> Result<Self, DriverError> {
        if !tick_rate_hz.is_finite() || tick_rate_hz <= 0.0 {
            return Err(DriverError::InvalidTickRate(tick_rate_hz));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));

        let state = TickLoop {
            engine,
            rx,
            shutdown: Arc::clone(&shutdown),
            stopped: Arc::clone(&stopped),
            ticks: Arc::clone(&ticks),
            tick_budget: Duration::from_secs_f64(1.0 / tick_rate_hz),
        };
        let handle = thread::Builder::new()
            .name("ductwork-tick".into())
            .spawn(move || state.run())
            .map_err(|e| DriverError::ThreadSpawn(e.to_string()))?;

        log::info!("tick thread started at {tick_rate_hz} Hz");
        Ok(Self {
            handle: Some(handle),
            shutdown,
            stopped,
            ticks,
            tx,
        })
    }

    /// A sender other threads can queue commands on.
    pub fn sender(&self) -> Sender<Command> {
        self.tx.clone()
    }

    pub fn submit(&self, command: Command) -> Result<(), DriverError> {
        if self.is_stopped() {
            return Err(DriverError::Stopped);
        }
        self.tx.send(command).map_err(|_| DriverError::Stopped)
    }

    /// True once the loop has exited, by shutdown or on error.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Stop the loop after the current tick and recover the engine.
    /// Commands still in the channel are queued on the engine; later ones
    /// wait in [`DriverExit::backlog`].
    pub fn shutdown(mut self) -> Result<DriverExit, DriverError> {
        self.shutdown.store(true, Ordering::Release);
        let handle = self.handle.take().ok_or(DriverError::Stopped)?;
        handle.join().map_err(|_| DriverError::Panicked)
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

struct TickLoop {
    engine: Engine,
    rx: Receiver<Command>,
    shutdown: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    tick_budget: Duration,
}

impl TickLoop {
    fn run(mut self) -> DriverExit {
        let mut error = None;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let tick_start = Instant::now();

            self.drain_channel();

            match self.engine.tick() {
                Ok(_) => {
                    self.ticks.fetch_add(1, Ordering::Release);
                }
                Err(e) => {
                    log::error!("tick {} halted: {e}", self.engine.sim_state.tick + 1);
                    error = Some(e);
                    break;
                }
            }

            let elapsed = tick_start.elapsed();
            if let Some(remaining) = self.tick_budget.checked_sub(elapsed) {
                thread::sleep(remaining);
            }
        }

        self.stopped.store(true, Ordering::Release);
        self.drain_channel();
        DriverExit {
            ticks: self.ticks.load(Ordering::Acquire),
            engine: self.engine,
            error,
            backlog: self.rx,
        }
    }

    fn drain_channel(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            self.engine.submit(command);
        }
    }
}
