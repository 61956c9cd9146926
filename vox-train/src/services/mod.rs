//! Training job services
//!
//! - `job_registry`: in-memory job state
//! - `process_supervisor`: worker launch, monitoring, cancellation
//! - `progress_parser`: progress markers in worker output
//! - `audio_processing`: uploaded audio storage
//! - `retention`: eviction of finished jobs

pub mod audio_processing;
pub mod job_registry;
pub mod process_supervisor;
pub mod progress_parser;
pub mod retention;

pub use audio_processing::{process_audio_file, store_training_upload};
pub use job_registry::JobRegistry;
pub use process_supervisor::{AdmissionPermit, ProcessSupervisor, SupervisorError};
pub use progress_parser::{parse_progress, WorkerLineCodec};
pub use retention::{reap_once, spawn_reaper};
