use std::time::Instant;

use tracing::{debug, info, warn};

use courier_jobs::JobError;

use crate::model::Envelope;
use crate::services::PushServices;

/// Decrypts and dispatches envelopes for one drain.
///
/// Failures stay with the envelope that caused them.
pub struct EnvelopeProcessor<'a> {
    services: &'a PushServices,
    source: &'static str,
    started: Instant,
}

impl<'a> EnvelopeProcessor<'a> {
    pub fn new(services: &'a PushServices, source: &'static str) -> Self {
        Self {
            services,
            source,
            started: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Returns `true` when the envelope was decrypted and dispatched.
    pub fn process(&self, envelope: Envelope) -> bool {
        info!(
            source = self.source,
            guid = %envelope.server_guid,
            elapsed_ms = self.elapsed_ms(),
            "retrieved an envelope"
        );

        let plaintext = match self.services.cipher.decrypt(&envelope) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                warn!(source = self.source, guid = %envelope.server_guid, error = %err, "failed to decrypt envelope");
                return false;
            }
        };

        if let Err(err) = self.services.dispatcher.dispatch(&envelope, plaintext) {
            warn!(source = self.source, guid = %envelope.server_guid, error = %err, "failed to dispatch envelope");
            return false;
        }

        info!(
            source = self.source,
            guid = %envelope.server_guid,
            elapsed_ms = self.elapsed_ms(),
            "processed an envelope"
        );
        true
    }
}

/// Drain every queued envelope while holding the receive lock.
///
/// Settles the pull requests seen before the drain started, and only after a
/// complete drain. Returns the number of envelopes handed to the processor.
pub fn pull_and_process(services: &PushServices, source: &'static str) -> Result<usize, JobError> {
    let _guard = services.receive_lock.lock();
    let generation = services.state.message_pull_generation()?;
    let processor = EnvelopeProcessor::new(services, source);

    let mut retrieved = 0usize;
    services
        .receiver
        .retrieve_messages(&mut |envelope| {
            retrieved += 1;
            processor.process(envelope);
        })
        .map_err(|e| services.note_transport_error(e))?;

    if !services.state.clear_needs_message_pull(generation)? {
        debug!(source, "another pull was requested during the drain");
    }
    info!(source, retrieved, elapsed_ms = processor.elapsed_ms(), "message pull complete");
    Ok(retrieved)
}
