//! Debounced event processor
//!
//! `process()` runs dedup and gap detection synchronously, buffers the event,
//! and pokes a single worker task. The worker keeps one deadline and pushes it
//! back by the debounce period on every poke; when the deadline passes without
//! a new event, the buffer is flushed to the callback in one batch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::pipeline::{Ingest, ProcessedBatch, ProcessorCore, ProcessorStats};
use crate::config::ProcessorConfig;
use crate::types::BroadcastEvent;

/// Type alias for the batch callback
pub type OnEventsProcessed = Arc<dyn Fn(ProcessedBatch) + Send + Sync>;

/// Far enough in the future to never fire while disarmed
const IDLE: Duration = Duration::from_secs(86_400 * 365);

#[derive(Debug)]
enum Signal {
    /// An event was buffered; restart the quiet period
    Reset,
    /// Buffer reached `max_batch_size`
    FlushNow,
    Shutdown,
}

/// Turns a stream of events into debounced invalidation batches
pub struct EventProcessor {
    core: Arc<Mutex<ProcessorCore>>,
    signals: mpsc::UnboundedSender<Signal>,
    worker: Mutex<Option<JoinHandle<()>>>,
    max_batch_size: Option<usize>,
}

impl fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventProcessor")
            .field("stats", &self.stats())
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl EventProcessor {
    /// Create a processor with default settings. Must be called inside a tokio runtime.
    pub fn new(on_events_processed: impl Fn(ProcessedBatch) + Send + Sync + 'static) -> Self {
        Self::with_config(&ProcessorConfig::default(), on_events_processed)
    }

    /// Create a processor with custom settings. Must be called inside a tokio runtime.
    pub fn with_config(
        config: &ProcessorConfig,
        on_events_processed: impl Fn(ProcessedBatch) + Send + Sync + 'static,
    ) -> Self {
        let core = Arc::new(Mutex::new(ProcessorCore::new(config)));
        let (signals, rx) = mpsc::unbounded_channel();
        let callback: OnEventsProcessed = Arc::new(on_events_processed);

        let worker = tokio::spawn(run(Arc::clone(&core), callback, config.debounce(), rx));

        Self {
            core,
            signals,
            worker: Mutex::new(Some(worker)),
            max_batch_size: config.max_batch_size,
        }
    }

    /// Feed one event. Malformed events are dropped with a warning and
    /// duplicates are ignored; neither touches the debounce deadline.
    pub fn process(&self, event: BroadcastEvent) {
        if let Err(e) = event.validate() {
            warn!(event_id = %event.event_id, error = %e, "dropping malformed event");
            self.core.lock().record_malformed();
            return;
        }

        let buffered = {
            let mut core = self.core.lock();
            match core.ingest(event) {
                Ingest::Duplicate => return,
                Ingest::Accepted { .. } => core.buffered(),
            }
        };

        let signal = match self.max_batch_size {
            Some(max) if buffered >= max => Signal::FlushNow,
            _ => Signal::Reset,
        };
        if self.signals.send(signal).is_err() {
            debug!("processor worker stopped, event stays buffered");
        }
    }

    /// Feed a raw payload, decoding it first
    pub fn process_value(&self, payload: Value) {
        match BroadcastEvent::from_value(payload) {
            Ok(event) => self.process(event),
            Err(e) => {
                warn!(error = %e, "dropping malformed event");
                self.core.lock().record_malformed();
            }
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        self.core.lock().stats()
    }

    /// Flush whatever is buffered and stop the worker
    pub async fn shutdown(&self) {
        let _ = self.signals.send(Signal::Shutdown);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "processor worker ended abnormally");
            }
        }
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

async fn run(
    core: Arc<Mutex<ProcessorCore>>,
    on_events_processed: OnEventsProcessed,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Signal>,
) {
    let deadline = sleep(IDLE);
    tokio::pin!(deadline);
    let mut armed = false;

    loop {
        tokio::select! {
            signal = rx.recv() => match signal {
                Some(Signal::Reset) => {
                    deadline.as_mut().reset(Instant::now() + debounce);
                    armed = true;
                }
                Some(Signal::FlushNow) => {
                    armed = false;
                    flush(&core, &on_events_processed);
                }
                Some(Signal::Shutdown) | None => {
                    flush(&core, &on_events_processed);
                    break;
                }
            },

            _ = &mut deadline, if armed => {
                armed = false;
                flush(&core, &on_events_processed);
            }
        }
    }
}

fn flush(core: &Mutex<ProcessorCore>, on_events_processed: &OnEventsProcessed) {
    let batch = core.lock().take_batch();
    if let Some(batch) = batch {
        debug!(
            events = batch.events.len(),
            keys = batch.invalidation_keys.len(),
            gaps = batch.gaps.len(),
            "flushing event batch"
        );
        on_events_processed(batch);
    }
}
