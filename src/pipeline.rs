//! The two background pipelines: camera frames into a stable MRZ, and one
//! chip read at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::DynamicImage;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::models::{DocumentRecord, ParsedMrzRecord, RecognizedLine};
use crate::processing::alignment::{AlignmentEngine, AlignmentFrame};
use crate::processing::parsers::MrzParserManager;
use crate::processing::stabilizer::{MrzStabilizer, StabilizerVerdict};
use crate::utils::{PassportError, PipelineConfig, ScanConfig};
use crate::verification::bac::BacKey;
use crate::verification::channel::CardChannel;
use crate::verification::mrtd::{read_document, ReaderContext};

/// External ML text recognizer.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, frame: &DynamicImage) -> Result<Vec<RecognizedLine>, PassportError>;
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    Alignment(AlignmentFrame),
    Pending { consecutive_count: u32 },
    /// Stable MRZ parsed into a record; `key` is ready for a chip read
    Accepted { record: ParsedMrzRecord, key: Option<BacKey> },
    Error(String),
}

struct FrameWorker {
    alignment: Option<AlignmentEngine>,
    stabilizer: MrzStabilizer,
    parsers: MrzParserManager,
    recognizer: Arc<dyn TextRecognizer>,
    require_alignment: bool,
}

impl FrameWorker {
    fn process(&mut self, frame: &DynamicImage) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        if let Some(engine) = self.alignment.as_mut() {
            match engine.process_frame(frame) {
                Ok(alignment) => {
                    let aligned = alignment.aligned;
                    events.push(ScanEvent::Alignment(alignment));
                    if self.require_alignment && !aligned {
                        return events;
                    }
                }
                Err(e) => {
                    events.push(ScanEvent::Error(e.to_string()));
                    return events;
                }
            }
        }

        let lines = match self.recognizer.recognize(frame) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Text recognition failed: {}", e);
                events.push(ScanEvent::Error(e.to_string()));
                return events;
            }
        };

        match self.stabilizer.process_frame(&lines) {
            StabilizerVerdict::Pending { consecutive_count, .. } => {
                events.push(ScanEvent::Pending { consecutive_count });
            }
            StabilizerVerdict::Accepted { text, .. } => match self.parsers.parse_required(&text) {
                Ok(record) => {
                    let key = BacKey::from_record(&record)
                        .map_err(|e| warn!("Accepted MRZ is not a usable access key: {}", e))
                        .ok();
                    events.push(ScanEvent::Accepted { record, key });
                }
                Err(e) => {
                    // keep scanning rather than latching an unparseable read
                    debug!("Stable MRZ did not parse, restarting: {}", e);
                    self.stabilizer.reset();
                    events.push(ScanEvent::Error(e.to_string()));
                }
            },
            StabilizerVerdict::NoCandidates | StabilizerVerdict::AlreadyAccepted => {}
        }
        events
    }
}

/// Clears the in-flight flag when the worker finishes, panics included.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single worker, at most one frame in flight, frames closer than the
/// configured interval dropped.
pub struct FramePipeline {
    worker: Arc<Mutex<FrameWorker>>,
    in_flight: Arc<AtomicBool>,
    last_accepted: Mutex<Option<Instant>>,
    min_interval: Duration,
    events: UnboundedSender<ScanEvent>,
}

impl FramePipeline {
    pub fn new(
        config: &ScanConfig,
        alignment: Option<AlignmentEngine>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> (Self, UnboundedReceiver<ScanEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let PipelineConfig {
            min_frame_interval_ms,
            require_alignment_for_ocr,
        } = config.pipeline.clone();
        let worker = FrameWorker {
            alignment,
            stabilizer: MrzStabilizer::new(config.stabilizer.clone()),
            parsers: MrzParserManager::new(),
            recognizer,
            require_alignment: require_alignment_for_ocr,
        };
        let pipeline = FramePipeline {
            worker: Arc::new(Mutex::new(worker)),
            in_flight: Arc::new(AtomicBool::new(false)),
            last_accepted: Mutex::new(None),
            min_interval: Duration::from_millis(min_frame_interval_ms),
            events,
        };
        (pipeline, receiver)
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Hand a frame to the worker. Returns false when it was dropped.
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, frame: DynamicImage) -> bool {
        self.submit_at(frame, Instant::now())
    }

    pub fn submit_at(&self, frame: DynamicImage, now: Instant) -> bool {
        let Ok(mut last) = self.last_accepted.lock() else {
            return false;
        };
        if let Some(previous) = *last {
            if now.saturating_duration_since(previous) < self.min_interval {
                return false;
            }
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *last = Some(now);
        drop(last);

        let guard = InFlight(Arc::clone(&self.in_flight));
        let worker = Arc::clone(&self.worker);
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || {
            let produced = {
                let _guard = guard;
                match worker.lock() {
                    Ok(mut worker) => worker.process(&frame),
                    Err(_) => vec![ScanEvent::Error("Frame worker poisoned".to_string())],
                }
            };
            for event in produced {
                if events.send(event).is_err() {
                    break;
                }
            }
        });
        true
    }

    /// New scanning session: clears stabilizer and alignment state.
    pub fn reset(&self) {
        if let Ok(mut worker) = self.worker.lock() {
            worker.stabilizer.reset();
            if let Some(engine) = worker.alignment.as_mut() {
                engine.reset();
            }
        }
        if let Ok(mut last) = self.last_accepted.lock() {
            *last = None;
        }
    }
}

#[derive(Debug)]
pub enum ReadEvent {
    Progress { message: String, percent: u8 },
    Success(Box<DocumentRecord>),
    Failure(String),
}

/// Fails every command once the flag is set, so a cancelled read stops at
/// the next APDU. A transceive already in progress is not interrupted.
struct CancellableChannel {
    inner: Box<dyn CardChannel>,
    cancel: Arc<AtomicBool>,
}

impl CardChannel for CancellableChannel {
    fn connect(&mut self) -> Result<(), PassportError> {
        self.inner.connect()
    }

    fn transceive(&mut self, command: &[u8]) -> Result<Vec<u8>, PassportError> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(PassportError::Cancelled);
        }
        self.inner.transceive(command)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.inner.set_timeout(timeout);
    }
}

struct ReadSlot {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// One chip read in flight at a time.
pub struct ChipReadCoordinator {
    context: Arc<ReaderContext>,
    slot: Mutex<Option<ReadSlot>>,
}

impl ChipReadCoordinator {
    pub fn new(context: Arc<ReaderContext>) -> Self {
        ChipReadCoordinator {
            context,
            slot: Mutex::new(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.as_ref().map(|s| !s.task.is_finished()).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Start a read on a worker thread. Events end with exactly one
    /// `Success` or `Failure`, unless the read is cancelled.
    pub fn start(
        &self,
        channel: Box<dyn CardChannel>,
        key: BacKey,
    ) -> Result<UnboundedReceiver<ReadEvent>, PassportError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| PassportError::TransportError("Reader state poisoned".to_string()))?;
        if slot.as_ref().map(|s| !s.task.is_finished()).unwrap_or(false) {
            return Err(PassportError::ReaderBusy);
        }

        let (events, receiver) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let channel = Box::new(CancellableChannel {
            inner: channel,
            cancel: Arc::clone(&cancel),
        });
        let context = Arc::clone(&self.context);
        let worker_cancel = Arc::clone(&cancel);
        let task = tokio::task::spawn_blocking(move || {
            let progress_events = events.clone();
            let progress_cancel = Arc::clone(&worker_cancel);
            let mut progress = move |message: &str, percent: u8| {
                if !progress_cancel.load(Ordering::Acquire) {
                    let _ = progress_events.send(ReadEvent::Progress {
                        message: message.to_string(),
                        percent,
                    });
                }
            };
            let outcome = read_document(channel, context, &key, &mut progress);
            if worker_cancel.load(Ordering::Acquire) {
                info!("Chip read cancelled");
                return;
            }
            let event = match outcome {
                Ok(record) => ReadEvent::Success(Box::new(record)),
                Err(e) => {
                    error!("Chip read failed: {}", e);
                    ReadEvent::Failure(e.to_string())
                }
            };
            let _ = events.send(event);
        });
        *slot = Some(ReadSlot { cancel, task });
        Ok(receiver)
    }

    /// Flag the running read and release the slot.
    pub fn cancel(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(running) = slot.take() {
                running.cancel.store(true, Ordering::Release);
                debug!("Chip read slot released");
            }
        }
    }
}
