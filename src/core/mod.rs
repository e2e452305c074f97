pub mod aggregator;
pub mod capability;
pub mod corpus;
pub mod detector;
pub mod embedding;
pub mod labels;
pub mod lbph;
pub mod lockout;

pub use aggregator::{AccessDecision, ObservationWindow, RecognitionAggregator, RosterLookup};
pub use capability::{
    load_identity_model, new_identity_model, FaceDetect, FaceRect, IdentityCapability,
    IdentityModel, Prediction, TrainingSample,
};
pub use corpus::{run_training, Corpus, CorpusBuilder, TrainingReport};
pub use detector::OnnxFaceDetector;
pub use embedding::EmbeddingModel;
pub use labels::{LabelMap, UNKNOWN};
pub use lbph::LbphModel;
pub use lockout::{Lockout, LockoutState, PinCredential, SubmitOutcome};
