// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod service;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{AccessError, Config, Paths, Result};
pub use core::{
    AccessDecision, CorpusBuilder, IdentityCapability, LabelMap, Lockout, RecognitionAggregator,
    TrainingReport,
};
pub use camera::{Camera, DirectoryReplay, FrameSource};
pub use storage::{EnrollmentTree, EventLog, RosterRecord, RosterStore};
pub use service::{AccessStation, StationDisplay};
