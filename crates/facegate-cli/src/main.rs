use anyhow::Result;
use clap::{Parser, Subcommand};
use facegate_camera::{V4lCamera, V4lCameraSource};
use facegate_verify::{HttpCatalog, Phase, SessionEvent, Verifier, VerifyConfig};
use facegate_vision::{FaceAnalyzer, OnnxFaceAnalyzer};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate facial-verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full verification session against the camera
    Verify {
        /// Employee id to verify against
        #[arg(short, long)]
        subject: String,
        /// Shots to capture for the burst
        #[arg(long, default_value_t = 3)]
        shots: usize,
    },
    /// Detect faces in an image file (model diagnostics)
    Detect {
        /// Path to an encoded image (PNG/JPEG)
        image: String,
    },
    /// List available capture devices
    Cameras,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify { subject, shots } => run_verify(subject, shots).await,
        Commands::Detect { image } => run_detect(image),
        Commands::Cameras => {
            let devices = V4lCamera::list_devices();
            if devices.is_empty() {
                println!("no capture devices found");
            }
            for device in devices {
                println!("{}\t{} ({})", device.path, device.name, device.driver);
            }
            Ok(())
        }
    }
}

async fn run_verify(subject: String, shots: usize) -> Result<()> {
    let config = VerifyConfig::from_env();
    let analyzer = Arc::new(OnnxFaceAnalyzer::new(config.model_dir.clone()));
    let catalog = Arc::new(HttpCatalog::new(&config)?);
    let verifier = Verifier::new(analyzer, catalog, Arc::new(V4lCameraSource), config);

    let mut session = verifier.start_camera(&subject);
    let mut state = session.watch_state();
    let mut last_phase = Phase::Initial;
    let mut triggered = false;

    loop {
        let snapshot = *state.borrow_and_update();
        if snapshot.phase != last_phase {
            println!("phase: {:?}", snapshot.phase);
            last_phase = snapshot.phase;
        }

        if snapshot.phase == Phase::Ready && !triggered {
            println!("face detected, capturing {shots} shots");
            let mut burst = Vec::new();
            for _ in 0..shots {
                if let Some(photo) = session.capture_photo().await {
                    burst.push(photo);
                }
            }
            session.capture_and_verify(burst).await;
            triggered = true;
        }

        if snapshot.phase.is_terminal() {
            break;
        }
        if state.changed().await.is_err() {
            break;
        }
    }

    let result = match session.next_event().await {
        Some(SessionEvent::Completed(report)) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_match {
                println!("verified as {}", report.label);
            } else {
                println!("not verified");
            }
            Ok(())
        }
        Some(SessionEvent::Error(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("session ended without a result")),
    };

    session.stop_camera();
    result
}

fn run_detect(image: String) -> Result<()> {
    let config = VerifyConfig::from_env();
    let analyzer = OnnxFaceAnalyzer::new(config.model_dir);
    let bytes = std::fs::read(&image)?;
    let count = analyzer.face_count(&bytes)?;
    println!("{image}: {count} face(s)");
    Ok(())
}
