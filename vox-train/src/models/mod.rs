//! Data models for vox-train (Training microservice)

pub mod processed_audio;
pub mod training_job;

pub use processed_audio::ProcessedAudioFile;
pub use training_job::{JobOutcome, JobStatus, TrainingJob};
