//! HTTP API handlers for vox-train

pub mod health;
pub mod sse;
pub mod training;
pub mod upload;

pub use health::health_routes;
pub use sse::training_event_stream;
pub use training::training_routes;
pub use upload::upload_routes;
