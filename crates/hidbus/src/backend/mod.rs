//! Native backends and the thread that drives each of them.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::events::BusEvent;
use crate::queue::EventSink;

#[cfg(all(target_os = "linux", feature = "udev-backend"))]
pub(crate) mod evdev;
#[cfg(all(target_os = "linux", feature = "udev-backend"))]
mod ioctl;
#[cfg(feature = "hidapi-backend")]
pub(crate) mod platform;
#[cfg(feature = "sdl2-backend")]
pub(crate) mod sdl;
#[cfg(all(target_os = "linux", feature = "udev-backend"))]
pub(crate) mod udev;

/// How long the starter waits for a backend to initialize.
const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one backend wait.
pub(crate) enum Wait {
    Event(BusEvent),
    /// Nothing to report this cycle.
    Pending,
    /// The backend was asked to stop.
    Terminal,
}

/// A native event source owned by its backend thread.
pub(crate) trait Backend {
    /// Returns the next queued event, or blocks in the native wait once and
    /// processes what it produced.
    fn wait(&mut self) -> Wait;
}

/// Makes a blocked [`Backend::wait`] return [`Wait::Terminal`].
pub(crate) trait Waker: Send {
    fn wake(&self);
}

type Ready = Result<Box<dyn Waker>>;

/// A running backend thread.
pub(crate) struct BackendHandle {
    name: &'static str,
    waker: Box<dyn Waker>,
    thread: Option<JoinHandle<()>>,
}

impl BackendHandle {
    /// Runs `init` on a new thread and drives the backend it returns.
    ///
    /// Blocks until initialization succeeds, fails, or times out.
    pub fn spawn<B, F>(name: &'static str, sink: EventSink, init: F) -> Result<Self>
    where
        B: Backend,
        F: FnOnce() -> Result<(B, Box<dyn Waker>)> + Send + 'static,
    {
        Self::spawn_with(name, sink, move |starter| {
            let (backend, waker) = init()?;
            starter.run(backend, waker);
            Ok(())
        })
    }

    /// Like [`BackendHandle::spawn`], for backends that borrow from state
    /// living on the backend thread's stack. `body` must hand its backend to
    /// [`Starter::run`] once initialized.
    pub fn spawn_with<F>(name: &'static str, sink: EventSink, body: F) -> Result<Self>
    where
        F: FnOnce(Starter<'_>) -> Result<()> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Ready>();
        let thread = thread::Builder::new()
            .name(format!("hidbus-{name}"))
            .spawn(move || {
                let starter = Starter {
                    name,
                    ready_tx: ready_tx.clone(),
                    sink: &sink,
                };
                if let Err(err) = body(starter) {
                    if let Err(mpsc::SendError(Err(err))) = ready_tx.send(Err(err)) {
                        warn!("{name} backend failed: {err}");
                    }
                }
            })?;

        match ready_rx.recv_timeout(INIT_TIMEOUT) {
            Ok(Ok(waker)) => {
                debug!("{name} backend started");
                Ok(Self {
                    name,
                    waker,
                    thread: Some(thread),
                })
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => Err(Error::BackendInit(format!("{name}: init timed out"))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wakes the backend and waits for its thread to exit.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.waker.wake();
        if thread.join().is_err() {
            warn!("{} backend thread panicked", self.name);
        }
        debug!("{} backend stopped", self.name);
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hands an initialized backend to its thread's event loop.
pub(crate) struct Starter<'a> {
    name: &'static str,
    ready_tx: mpsc::Sender<Ready>,
    sink: &'a EventSink,
}

impl Starter<'_> {
    /// Reports readiness, then drives `backend` until it turns terminal or
    /// the queue is gone.
    pub fn run<B: Backend>(self, mut backend: B, waker: Box<dyn Waker>) {
        if self.ready_tx.send(Ok(waker)).is_err() {
            return;
        }
        loop {
            match backend.wait() {
                Wait::Event(event) => {
                    if !self.sink.push(event) {
                        break;
                    }
                }
                Wait::Pending => {}
                Wait::Terminal => break,
            }
        }
        debug!("{} backend loop exiting", self.name);
    }
}
