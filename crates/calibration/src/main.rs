use anyhow::Context;
use bridge::{FrameShape, StopSignal, paths};
use capture::{FrameSource, SourceConfig, SourceError};
use clap::Parser;
use common::{Environment, setup_logging};
use controller::{Calibration, TrackedHand, fingertips_from_env, tap_signal};
use indicatif::{ProgressBar, ProgressStyle};
use inference::{Detector, DetectorConfig, HandLandmark};
use std::path::PathBuf;

/// Measure resting fingertip distance to the reference line and write calibration JSON.
///
/// The frame source and detector are configured from the same environment
/// variables as the capture and controller binaries.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Reference line, pixels from the top of the frame.
    #[arg(long = "reference-y", value_name = "PX")]
    reference_y: f64,
    /// Frames with a tracked hand to sample.
    #[arg(long, default_value_t = 100)]
    frames: usize,
    /// Give up after this many frames read in total.
    #[arg(long = "max-reads", default_value_t = 10_000)]
    max_reads: usize,
    #[arg(long, default_value = paths::DEFAULT_FRAME_SHAPE)]
    shape: FrameShape,
    #[arg(long, default_value = "left")]
    hand: TrackedHand,
    #[arg(long, short, default_value = "calibration.json")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(Environment::from_env())?;

    let fingertips = fingertips_from_env()?;
    let stop = StopSignal::new();
    let mut source = SourceConfig::from_env()?
        .build(args.shape, &stop)
        .context("Failed to initialize frame source")?;
    let mut detector = DetectorConfig::from_env()?.build();

    println!(
        "Hold the {} hand still near the line at y={}",
        args.hand, args.reference_y
    );
    let progress = ProgressBar::new(args.frames as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} samples ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let distances = sample(&mut source, &mut detector, &args, &fingertips, || {
        progress.inc(1)
    });
    progress.finish();
    let distances = distances?;

    let calibration = Calibration::from_distances(args.reference_y, &distances)?;
    calibration.save(&args.output)?;

    println!(
        "Sampled {} frames: mean offset {:.2}px, std {:.2}px -> {}",
        distances.len(),
        calibration.mean_offset,
        calibration.std_offset,
        args.output.display()
    );
    Ok(())
}

/// Start `source`, collect distances, and release the source whatever the outcome.
fn sample<S, D>(
    source: &mut S,
    detector: &mut D,
    args: &Args,
    fingertips: &[HandLandmark],
    on_sample: impl FnMut(),
) -> anyhow::Result<Vec<f64>>
where
    S: FrameSource + ?Sized,
    D: Detector,
{
    let result = source
        .start()
        .context("Failed to start frame source")
        .and_then(|()| collect_distances(source, detector, args, fingertips, on_sample));
    source.cleanup();
    result
}

/// Distance of the tracked hand's fingertips to the reference line, one per frame
/// that contains such a hand.
fn collect_distances<S, D>(
    source: &mut S,
    detector: &mut D,
    args: &Args,
    fingertips: &[HandLandmark],
    mut on_sample: impl FnMut(),
) -> anyhow::Result<Vec<f64>>
where
    S: FrameSource + ?Sized,
    D: Detector,
{
    let mut distances = Vec::with_capacity(args.frames);
    let mut reads = 0usize;

    while distances.len() < args.frames {
        if reads >= args.max_reads {
            anyhow::bail!(
                "only {} of {} samples after {} frames; is the hand in view?",
                distances.len(),
                args.frames,
                reads
            );
        }
        reads += 1;

        let frame = match source.read_frame() {
            Ok((frame, _)) => frame,
            Err(SourceError::EndOfStream) => break,
            Err(e) => return Err(e.into()),
        };
        if frame.is_empty() {
            break;
        }

        let distance = detector
            .detect(&frame)?
            .iter()
            .filter(|hand| args.hand.accepts(hand.handedness))
            .find_map(|hand| {
                tap_signal(hand, fingertips, frame.height(), args.reference_y)
            });
        if let Some(distance) = distance {
            distances.push(distance);
            on_sample();
        }
    }

    tracing::debug!(samples = distances.len(), reads, "Calibration sampling done");
    Ok(distances)
}
