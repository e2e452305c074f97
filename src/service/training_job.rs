use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use crate::common::{AccessError, Result};

/// Trainer exit status for a dataset without a single usable face.
pub const EXIT_EMPTY_CORPUS: i32 = 3;
pub const TRAINER_BINARY: &str = "door-train";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingOutcome {
    Succeeded,
    EmptyCorpus,
    Failed(Option<i32>),
}

impl From<ExitStatus> for TrainingOutcome {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Self::Succeeded,
            Some(EXIT_EMPTY_CORPUS) => Self::EmptyCorpus,
            code => Self::Failed(code),
        }
    }
}

/// How to launch the trainer: the binary plus the flags that select the same
/// data directory and config as the running station.
#[derive(Debug, Clone)]
pub struct TrainerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl TrainerCommand {
    /// The trainer installed next to the current executable.
    pub fn sibling(dev: bool, system: bool, config: Option<&Path>) -> Result<Self> {
        let exe = std::env::current_exe()?;
        let program = exe.with_file_name(TRAINER_BINARY);

        let mut args = Vec::new();
        if dev {
            args.push("--dev".to_string());
        }
        if system {
            args.push("--system".to_string());
        }
        if let Some(path) = config {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        Ok(Self { program, args })
    }
}

/// A trainer process running alongside the live loop.
pub struct TrainingJob {
    child: Child,
    started: Instant,
}

impl TrainingJob {
    pub fn spawn(command: &TrainerCommand) -> Result<Self> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| {
                AccessError::Model(format!(
                    "Failed to start trainer {}: {}",
                    command.program.display(),
                    e
                ))
            })?;
        tracing::info!("Training started (pid {})", child.id());
        Ok(Self { child, started: Instant::now() })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking completion check.
    pub fn try_finish(&mut self) -> Result<Option<TrainingOutcome>> {
        let status = self.child.try_wait()?;
        Ok(status.map(|status| {
            let outcome = TrainingOutcome::from(status);
            tracing::info!("Training finished after {:.1}s: {:?}", self.elapsed().as_secs_f32(), outcome);
            outcome
        }))
    }

    /// Blocks until the trainer exits.
    pub fn wait(mut self) -> Result<TrainingOutcome> {
        Ok(self.child.wait()?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> TrainerCommand {
        TrainerCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn exit_codes_map_to_outcomes() {
        assert_eq!(TrainingJob::spawn(&shell("exit 0")).unwrap().wait().unwrap(), TrainingOutcome::Succeeded);
        assert_eq!(TrainingJob::spawn(&shell("exit 3")).unwrap().wait().unwrap(), TrainingOutcome::EmptyCorpus);
        assert_eq!(TrainingJob::spawn(&shell("exit 1")).unwrap().wait().unwrap(), TrainingOutcome::Failed(Some(1)));
    }

    #[test]
    fn try_finish_is_none_while_running() {
        let mut job = TrainingJob::spawn(&shell("sleep 2")).unwrap();
        assert_eq!(job.try_finish().unwrap(), None);
        assert_eq!(job.wait().unwrap(), TrainingOutcome::Succeeded);
    }

    #[test]
    fn missing_trainer_is_reported() {
        let command = TrainerCommand {
            program: PathBuf::from("/nonexistent/door-train"),
            args: vec![],
        };
        assert!(TrainingJob::spawn(&command).is_err());
    }
}
