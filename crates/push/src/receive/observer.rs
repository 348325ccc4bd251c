use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use courier_jobs::{RequirementContext, RequirementKind};

use crate::receive::processor::EnvelopeProcessor;
use crate::services::PushServices;
use crate::transport::TransportError;

const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

/// Long-lived reader on the server's streaming pipe.
///
/// Runs on its own thread, outside the job worker pool.
pub struct IncomingMessageObserver {
    services: Arc<PushServices>,
    requirements: Arc<dyn RequirementContext>,
    shutdown: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
}

impl IncomingMessageObserver {
    pub fn spawn(services: Arc<PushServices>, requirements: Arc<dyn RequirementContext>) -> ObserverHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicU64::new(0));
        let observer = IncomingMessageObserver {
            services,
            requirements,
            shutdown: shutdown.clone(),
            processed: processed.clone(),
        };

        let join = thread::Builder::new()
            .name("courier-observer".to_string())
            .spawn(move || observer.run())
            .expect("failed to spawn message observer thread");

        ObserverHandle {
            shutdown,
            processed,
            join: Some(join),
        }
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep in short slices so shutdown is noticed promptly.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SHUTDOWN_CHECK));
        }
    }

    fn run(self) {
        info!(lock = self.services.receive_lock.name(), "message observer started");
        let config = &self.services.config;

        while !self.stopping() {
            if !self.requirements.is_satisfied(RequirementKind::Network) {
                debug!("network unavailable, observer idle");
                self.pause(config.reconnect_delay.min(SHUTDOWN_CHECK * 4));
                continue;
            }

            let mut pipe = match self.services.receiver.open_pipe() {
                Ok(pipe) => pipe,
                Err(err) => {
                    let err = self.services.note_transport_error(err);
                    warn!(error = %err, "failed to open message pipe");
                    self.pause(config.reconnect_delay);
                    continue;
                }
            };
            debug!("message pipe open");

            while !self.stopping() {
                // Held per read so pull jobs can drain between reads.
                let result = {
                    let _guard = self.services.receive_lock.lock();
                    pipe.read(config.receive_timeout).map(|envelope| {
                        EnvelopeProcessor::new(&self.services, "observer").process(envelope)
                    })
                };

                match result {
                    Ok(_) => {
                        self.processed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(TransportError::Timeout) => {}
                    Err(err) => {
                        let err = self.services.note_transport_error(err);
                        warn!(error = %err, "message pipe failed, reconnecting");
                        self.pause(config.reconnect_delay);
                        break;
                    }
                }

                if !self.requirements.is_satisfied(RequirementKind::Network) {
                    debug!("network lost, closing message pipe");
                    break;
                }
            }
        }

        info!(processed = self.processed.load(Ordering::SeqCst), "message observer stopped");
    }
}

/// Owner handle for a running observer thread.
#[derive(Debug)]
pub struct ObserverHandle {
    shutdown: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    join: Option<thread::JoinHandle<()>>,
}

impl ObserverHandle {
    /// Envelopes read from the pipe so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Stop after the current read returns, then join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
