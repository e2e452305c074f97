pub mod station;
pub mod training_job;

pub use station::{
    AccessStation, EnrollmentRequest, RunSummary, StationCommand, StationDisplay, TickSchedule,
};
pub use training_job::{TrainerCommand, TrainingJob, TrainingOutcome, EXIT_EMPTY_CORPUS};
