use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use door_access::camera::{Camera, DirectoryReplay, FrameSource};
use door_access::cli::{self, DoorPanel, LogDisplay};
use door_access::common::{setup_logging, Config, Paths};
use door_access::core::lockout::{generate_salt, hash_pin, Lockout};
use door_access::core::{
    load_identity_model, run_training, IdentityCapability, LabelMap, OnnxFaceDetector,
    RecognitionAggregator,
};
use door_access::service::{AccessStation, StationDisplay, TrainerCommand};
use door_access::storage::{AccessLevel, EnrollmentTree, EventLog, JobStatus, RosterStore};

#[derive(Parser)]
#[command(name = "door-access")]
#[command(about = "Face recognition door access station")]
struct Cli {
    /// Development mode: keep all data under ./dev_data
    #[arg(long, global = true)]
    dev: bool,

    /// Use the system-wide data and config locations
    #[arg(long, global = true)]
    system: bool,

    /// Explicit config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live station on the configured camera
    Run {
        /// Start a training run as soon as the station is up
        #[arg(long)]
        train_on_start: bool,
    },
    /// Feed a directory of images through the recognizer instead of a camera
    Replay {
        #[arg(short, long)]
        dir: PathBuf,
        /// Times each image is repeated as a frame
        #[arg(short, long, default_value = "1")]
        repeat: usize,
        /// Hold the configured frame interval between frames
        #[arg(long)]
        paced: bool,
    },
    /// Train the identity model from the dataset directory
    Train,
    /// Inspect or edit the roster
    Roster {
        #[command(subcommand)]
        command: RosterCommands,
    },
    /// Manage enrollment images
    Enroll {
        #[command(subcommand)]
        command: EnrollCommands,
    },
    /// Print pin_hash/pin_salt config lines for a new PIN
    HashPin {
        pin: String,
    },
    /// List video capture devices
    Cameras,
}

#[derive(Subcommand)]
enum RosterCommands {
    /// List every profile
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one profile
    Show {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Replace the roster with one default row per dataset folder
    Rebuild {
        #[arg(long)]
        pin: Option<String>,
    },
    /// Change job status and access level of a profile
    Update {
        name: String,
        /// Manager, Employee or Admin
        #[arg(short, long)]
        job: String,
        /// Access level 1-3
        #[arg(short, long)]
        level: u8,
        #[arg(long)]
        pin: Option<String>,
    },
}

#[derive(Subcommand)]
enum EnrollCommands {
    /// Copy images into an identity folder
    Add {
        identity: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[arg(long)]
        pin: Option<String>,
    },
    /// Delete images from an identity folder
    Delete {
        identity: String,
        #[arg(required = true)]
        files: Vec<String>,
        #[arg(long)]
        pin: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let paths = Paths::new(cli.dev, cli.system)?;
    let config = paths.load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { train_on_start } => {
            let trainer = TrainerCommand::sibling(cli.dev, cli.system, cli.config.as_deref())?;
            let panel = DoorPanel::new(config.doors.count)?;
            let mut station = build_station(&config, &paths, panel)?
                .with_trainer(trainer)
                .with_lockout(Lockout::from_config(&config.lockout)?);
            if train_on_start {
                station.start_training()?;
            }

            let camera = Camera::new(&config.camera)?;
            let mut session = camera.start_session()?;
            let summary = run_until_interrupted(&mut station, &mut session, true)?;
            drop(station);
            println!("Processed {} frames, {} decisions", summary.frames, summary.decisions);
        }
        Commands::Replay { dir, repeat, paced } => {
            let display = LogDisplay::new(config.doors.count);
            let mut station = build_station(&config, &paths, display)?;
            let mut replay = DirectoryReplay::new(&dir, repeat)?;
            if replay.is_empty() {
                bail!("No images found in {}", dir.display());
            }
            let summary = run_until_interrupted(&mut station, &mut replay, paced)?;
            println!("Replayed {} frames, {} decisions", summary.frames, summary.decisions);
        }
        Commands::Train => {
            let report = run_training(&config)?;
            for (name, count) in &report.per_identity {
                println!("  {:<20} {} sample(s)", name, count);
            }
            println!("Trained on {} samples from {} identities", report.total_samples, report.identities());
        }
        Commands::Roster { command } => roster_command(&config, command)?,
        Commands::Enroll { command } => enroll_command(&config, command)?,
        Commands::HashPin { pin } => {
            if pin.len() != 4 || !pin.chars().all(|c| c.is_ascii_digit()) {
                bail!("PIN must be exactly 4 digits");
            }
            let salt = generate_salt();
            let digest = hash_pin(&pin, &salt)?;
            println!("[lockout]");
            println!("pin_hash = \"{}\"", hex::encode(&digest));
            println!("pin_salt = \"{}\"", hex::encode(salt));
        }
        Commands::Cameras => {
            let cameras = Camera::list_cameras()?;
            if cameras.is_empty() {
                println!("No video capture devices found");
            }
            for (index, name) in cameras {
                println!("/dev/video{}: {}", index, name);
            }
        }
    }

    Ok(())
}

fn build_station<D: StationDisplay>(
    config: &Config,
    paths: &Paths,
    display: D,
) -> Result<AccessStation<D>> {
    let detector = OnnxFaceDetector::new(&config.paths.detector_model, &config.detector)?;
    let model = load_identity_model(config).with_context(|| {
        format!(
            "No trained model at {}; run `door-access train` first",
            config.paths.model_file.display()
        )
    })?;
    let labels = LabelMap::load_or_empty(&config.paths.labels_file);
    if !labels.is_dense() {
        tracing::warn!("Label map {} has gaps", config.paths.labels_file.display());
    }

    let capability = IdentityCapability::new(
        Box::new(detector),
        model,
        labels,
        config.recognition.face_size,
    );
    let aggregator = RecognitionAggregator::new(
        config.recognition.acceptance_threshold,
        config.recognition.window_capacity,
        RosterStore::new(config.paths.roster_file.clone()),
        EventLog::create_fresh(&config.paths.event_log_file)?,
    );

    let mut station = AccessStation::new(capability, aggregator, display, config.clone());
    if let Some(dir) = paths.debug_dir() {
        std::fs::create_dir_all(&dir)?;
        station = station.with_debug_dir(dir);
    }
    Ok(station)
}

fn run_until_interrupted<D: StationDisplay>(
    station: &mut AccessStation<D>,
    source: &mut dyn FrameSource,
    paced: bool,
) -> Result<door_access::service::RunSummary> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    Ok(station.run(source, &shutdown, paced)?)
}

/// Asks for the administrator PIN, from the flag when given, interactively otherwise.
fn require_pin(config: &Config, pin: Option<&str>) -> Result<()> {
    let mut lockout = Lockout::from_config(&config.lockout)?;
    let granted = match pin {
        Some(pin) => cli::check_pin(&mut lockout, pin),
        None => cli::prompt_for_pin(&mut lockout)?,
    };
    if !granted {
        bail!("PIN not accepted");
    }
    Ok(())
}

fn roster_command(config: &Config, command: RosterCommands) -> Result<()> {
    let roster = RosterStore::new(config.paths.roster_file.clone());
    let tree = EnrollmentTree::new(config.paths.dataset_dir.clone());

    match command {
        RosterCommands::List { json } => {
            let records = roster.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            if records.is_empty() {
                println!("Roster {} is empty", roster.path().display());
            }
            for (i, record) in records.iter().enumerate() {
                println!(
                    "{:>3}. {:<20} {}  {:<8} level {}  door {}",
                    i + 1,
                    record.name,
                    record.date_enrolled.format("%Y-%m-%d"),
                    record.job_status,
                    record.access_level,
                    record.door_number
                );
            }
        }
        RosterCommands::Show { name, json } => {
            let Some(record) = roster.lookup(&name)? else {
                bail!("No roster entry for {}", name);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
                return Ok(());
            }
            println!("Name:         {}", record.name);
            println!("Date joined:  {}", record.date_enrolled.format("%Y-%m-%d %H:%M:%S"));
            println!("Job status:   {}", record.job_status);
            println!("Access level: {}", record.access_level);
            println!("Door:         {}", record.door_number);
            match tree.first_image(&record.name) {
                Some(image) => println!("Picture:      {}", image.display()),
                None => println!("Picture:      none"),
            }
        }
        RosterCommands::Rebuild { pin } => {
            require_pin(config, pin.as_deref())?;
            let rows = roster.rebuild_from_enrollment_tree(tree.root())?;
            println!("Roster rebuilt with {} identities", rows);
        }
        RosterCommands::Update { name, job, level, pin } => {
            let job: JobStatus = job.parse()?;
            let level = AccessLevel::new(level)?;
            require_pin(config, pin.as_deref())?;
            roster.update(&name, job, level)?;
            println!("Updated {}: {} / level {}", name, job, level);
        }
    }
    Ok(())
}

fn enroll_command(config: &Config, command: EnrollCommands) -> Result<()> {
    let tree = EnrollmentTree::new(config.paths.dataset_dir.clone());
    match command {
        EnrollCommands::Add { identity, images, pin } => {
            require_pin(config, pin.as_deref())?;
            let report = tree.add_images(&identity, &images)?;
            println!("Added {} image(s), {} failed", report.copied, report.failed);
        }
        EnrollCommands::Delete { identity, files, pin } => {
            require_pin(config, pin.as_deref())?;
            let deleted = tree.delete_images(&identity, &files)?;
            println!("Deleted {} image(s)", deleted);
        }
    }
    println!("Run `door-access train` to pick up the change");
    Ok(())
}
