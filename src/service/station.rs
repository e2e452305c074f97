//! The live access station: frames in, stabilized door decisions out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use crate::camera::FrameSource;
use crate::common::{AccessError, Config, Result};
use crate::core::aggregator::{AccessDecision, RecognitionAggregator, RosterLookup};
use crate::core::capability::{load_identity_model, FaceRect, IdentityCapability};
use crate::core::labels::LabelMap;
use crate::core::lockout::Lockout;
use crate::service::training_job::{TrainerCommand, TrainingJob, TrainingOutcome};
use crate::storage::enrollment::AddReport;
use crate::storage::{EnrollmentTree, RosterStore};

const MAX_CONSECUTIVE_FRAME_ERRORS: u32 = 50;

/// Operator input picked up between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationCommand {
    Train,
    Enroll,
    Quit,
}

/// An enrollment edit entered at the station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentRequest {
    Add { identity: String, images: Vec<PathBuf> },
    Delete { identity: String, files: Vec<String> },
}

impl EnrollmentRequest {
    /// Parses `add <identity> <image>...` or `delete <identity> <file>...`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let action = words.next()?;
        let identity = words.next()?.to_string();
        let rest: Vec<&str> = words.collect();
        if rest.is_empty() {
            return None;
        }
        match action {
            "add" | "a" => Some(Self::Add {
                identity,
                images: rest.into_iter().map(PathBuf::from).collect(),
            }),
            "delete" | "d" => Some(Self::Delete {
                identity,
                files: rest.into_iter().map(str::to_string).collect(),
            }),
            _ => None,
        }
    }
}

/// Where decisions and status messages are shown.
pub trait StationDisplay {
    fn show_decision(&mut self, decision: &AccessDecision);
    fn show_status(&mut self, status: &str);
    fn poll_command(&mut self) -> Result<Option<StationCommand>> {
        Ok(None)
    }

    /// Asks for the PIN through `lockout`, then for the edit to apply.
    /// `None` when the PIN is refused or the operator cancels.
    fn enrollment_request(&mut self, _lockout: &mut Lockout) -> Result<Option<EnrollmentRequest>> {
        Ok(None)
    }
}

/// Fixed-rate tick schedule. A tick that overruns drops the ticks it missed
/// instead of firing them back to back.
#[derive(Debug)]
pub struct TickSchedule {
    interval: Duration,
    next: Instant,
    skipped: u64,
}

impl TickSchedule {
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self { interval, next: start + interval, skipped: 0 }
    }

    /// Time to sleep before the next tick, given the current time.
    pub fn advance(&mut self, now: Instant) -> Duration {
        if now < self.next {
            let wait = self.next - now;
            self.next += self.interval;
            return wait;
        }
        let behind = now - self.next;
        let missed = (behind.as_nanos() / self.interval.as_nanos().max(1)) as u64;
        if missed > 0 {
            tracing::debug!("Frame tick overran, skipping {} tick(s)", missed);
            self.skipped += missed;
        }
        self.next += self.interval * (missed as u32 + 1);
        Duration::ZERO
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub decisions: u64,
    pub skipped_ticks: u64,
}

pub struct AccessStation<D: StationDisplay, R: RosterLookup = RosterStore> {
    capability: IdentityCapability,
    aggregator: RecognitionAggregator<R>,
    enrollment: EnrollmentTree,
    display: D,
    config: Config,
    frames_paused: bool,
    training: Option<TrainingJob>,
    trainer: Option<TrainerCommand>,
    lockout: Option<Lockout>,
    debug_dir: Option<PathBuf>,
}

impl<D: StationDisplay, R: RosterLookup> AccessStation<D, R> {
    pub fn new(
        capability: IdentityCapability,
        aggregator: RecognitionAggregator<R>,
        display: D,
        config: Config,
    ) -> Self {
        Self {
            capability,
            aggregator,
            enrollment: EnrollmentTree::new(config.paths.dataset_dir.clone()),
            display,
            config,
            frames_paused: false,
            training: None,
            trainer: None,
            lockout: None,
            debug_dir: None,
        }
    }

    pub fn with_trainer(mut self, trainer: TrainerCommand) -> Self {
        self.trainer = Some(trainer);
        self
    }

    /// Enables operator enrollment edits behind this PIN lockout.
    pub fn with_lockout(mut self, lockout: Lockout) -> Self {
        self.lockout = Some(lockout);
        self
    }

    /// Annotated copies of decision frames are written here.
    pub fn with_debug_dir(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn is_training(&self) -> bool {
        self.training.is_some()
    }

    pub fn frames_paused(&self) -> bool {
        self.frames_paused
    }

    pub fn pause_frames(&mut self) {
        self.frames_paused = true;
    }

    pub fn resume_frames(&mut self) {
        self.frames_paused = false;
    }

    /// Detects and classifies every face in `frame`, feeding each prediction
    /// to the aggregator. Returns the decisions this frame completed.
    pub fn process_frame(&mut self, frame: &GrayImage) -> Vec<AccessDecision> {
        let mut decisions = Vec::new();
        if self.frames_paused {
            return decisions;
        }

        let faces = match self.capability.detect_faces(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!("Face detection failed: {}", e);
                return decisions;
            }
        };

        for face in &faces {
            let prediction = match self.capability.predict(frame, face) {
                Ok(Some(prediction)) => prediction,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Prediction failed: {}", e);
                    continue;
                }
            };
            tracing::trace!(
                "Face at ({}, {}): {} ({:.2})",
                face.x, face.y, self.capability.label_name(prediction.label), prediction.confidence
            );

            let labels = self.capability.labels();
            if let Some(decision) = self.aggregator.observe(prediction.label, prediction.confidence, labels) {
                self.display.show_decision(&decision);
                decisions.push(decision);
            }
        }

        if !decisions.is_empty() {
            self.save_debug_snapshot(frame, &faces);
        }
        decisions
    }

    fn save_debug_snapshot(&self, frame: &GrayImage, faces: &[FaceRect]) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
        let path = dir.join(format!("decision_{}.png", timestamp));
        match annotate(frame, faces).save(&path) {
            Ok(()) => tracing::debug!("Saved decision frame to {}", path.display()),
            Err(e) => tracing::warn!("Failed to save decision frame {}: {}", path.display(), e),
        }
    }

    /// Copies images into an identity folder with frame processing paused.
    pub fn add_images(&mut self, identity: &str, sources: &[PathBuf]) -> Result<AddReport> {
        self.pause_frames();
        let result = self.enrollment.add_images(identity, sources);
        self.resume_frames();
        result
    }

    /// Deletes images from an identity folder with frame processing paused.
    pub fn delete_images(&mut self, identity: &str, file_names: &[String]) -> Result<usize> {
        self.pause_frames();
        let result = self.enrollment.delete_images(identity, file_names);
        self.resume_frames();
        result
    }

    /// Runs an operator enrollment edit: PIN first, then the add or delete
    /// with frames paused. Returns the applied request.
    pub fn handle_enrollment(&mut self) -> Result<Option<EnrollmentRequest>> {
        let Some(lockout) = self.lockout.as_mut() else {
            self.display.show_status("Enrollment is disabled");
            return Ok(None);
        };
        self.frames_paused = true;
        let request = self.display.enrollment_request(lockout);
        lockout.relock();
        self.frames_paused = false;

        let Some(request) = request? else {
            self.display.show_status("Enrollment cancelled");
            return Ok(None);
        };
        let status = match &request {
            EnrollmentRequest::Add { identity, images } => {
                let report = self.add_images(identity, images)?;
                format!("Added {} image(s) to {}, {} failed", report.copied, identity, report.failed)
            }
            EnrollmentRequest::Delete { identity, files } => {
                let deleted = self.delete_images(identity, files)?;
                format!("Deleted {} image(s) from {}", deleted, identity)
            }
        };
        self.display.show_status(&format!("{}. Press t to retrain", status));
        Ok(Some(request))
    }

    /// Launches the trainer. The current model keeps serving until it finishes.
    pub fn start_training(&mut self) -> Result<()> {
        if self.training.is_some() {
            tracing::warn!("Training already in progress");
            return Ok(());
        }
        let trainer = self
            .trainer
            .as_ref()
            .ok_or_else(|| AccessError::Config("No trainer configured".into()))?;
        self.training = Some(TrainingJob::spawn(trainer)?);
        self.display.show_status("Training...");
        Ok(())
    }

    /// Checks on a running trainer and swaps in the new model once it succeeds.
    pub fn poll_training(&mut self) -> Option<TrainingOutcome> {
        let job = self.training.as_mut()?;
        let outcome = match job.try_finish() {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Lost track of the trainer: {}", e);
                TrainingOutcome::Failed(None)
            }
        };
        self.training = None;

        match outcome {
            TrainingOutcome::Succeeded => match self.reload_model() {
                Ok(()) => self.display.show_status("Training complete"),
                Err(e) => {
                    tracing::error!("Trained model could not be loaded: {}", e);
                    self.display.show_status("Training finished but reload failed");
                }
            },
            TrainingOutcome::EmptyCorpus => {
                self.display.show_status("Training failed: no usable face images")
            }
            TrainingOutcome::Failed(_) => self.display.show_status("Training failed"),
        }
        Some(outcome)
    }

    /// Reloads model and label map from disk and drops the partial window.
    pub fn reload_model(&mut self) -> Result<()> {
        let model = load_identity_model(&self.config)?;
        let labels = LabelMap::load(&self.config.paths.labels_file)?;
        tracing::info!("Loaded model with {} identities", labels.len());
        self.capability.replace_model(model, labels);
        self.aggregator.reset();
        Ok(())
    }

    /// Runs until the source is exhausted, the operator quits, or `shutdown` is set.
    /// With `paced` the loop holds the configured frame interval.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        shutdown: &AtomicBool,
        paced: bool,
    ) -> Result<RunSummary> {
        let interval = Duration::from_millis(self.config.recognition.frame_interval_ms);
        let mut schedule = TickSchedule::new(interval, Instant::now());
        let mut summary = RunSummary::default();
        let mut consecutive_errors = 0;

        self.display.show_status("Ready");
        while !shutdown.load(Ordering::SeqCst) {
            self.poll_training();

            match self.display.poll_command()? {
                Some(StationCommand::Quit) => break,
                Some(StationCommand::Train) => {
                    if let Err(e) = self.start_training() {
                        tracing::error!("Could not start training: {}", e);
                        self.display.show_status("Training could not start");
                    }
                }
                Some(StationCommand::Enroll) => {
                    if let Err(e) = self.handle_enrollment() {
                        tracing::error!("Enrollment edit failed: {}", e);
                        self.display.show_status("Enrollment edit failed");
                    }
                }
                None => {}
            }

            match source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    summary.frames += 1;
                    summary.decisions += self.process_frame(&frame).len() as u64;
                }
                Ok(None) => {
                    tracing::info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!("Frame capture failed: {}", e);
                    if consecutive_errors >= MAX_CONSECUTIVE_FRAME_ERRORS {
                        return Err(AccessError::Camera(format!(
                            "Giving up after {} failed captures: {}",
                            consecutive_errors, e
                        )));
                    }
                }
            }

            if paced {
                let wait = schedule.advance(Instant::now());
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
            }
        }

        if let Some(job) = self.training.take() {
            tracing::info!("Waiting for trainer to finish");
            if let Err(e) = job.wait() {
                tracing::warn!("Trainer did not exit cleanly: {}", e);
            }
        }
        summary.skipped_ticks = schedule.skipped();
        Ok(summary)
    }
}

/// Frame as RGB with each face outlined in green.
pub fn annotate(frame: &GrayImage, faces: &[FaceRect]) -> RgbImage {
    let mut img = RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let v = frame.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });
    for face in faces {
        let rect = Rect::at(face.x as i32, face.y as i32).of_size(face.width.max(1), face.height.max(1));
        draw_hollow_rect_mut(&mut img, rect, Rgb([0, 255, 0]));
    }
    img
}
