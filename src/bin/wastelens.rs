//! wastelens - run the detection pipeline on a local image

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wastelens::annotate::{self, LabelFont};
use wastelens::config::ServiceConfig;
use wastelens::{DisplayGeometry, EnrichedDetection, Frame, Point, PointQuery, PredictResponse};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect waste objects in an image, optionally at a point.
    Detect {
        /// Image file (JPG, PNG or BMP).
        #[arg(long)]
        image: PathBuf,
        /// Query point x (display space when display size is given, else native).
        #[arg(long, requires = "y", allow_negative_numbers = true)]
        x: Option<f64>,
        /// Query point y.
        #[arg(long, requires = "x", allow_negative_numbers = true)]
        y: Option<f64>,
        /// Width of the surface the point was captured on.
        #[arg(long, requires_all = ["display_height", "x"])]
        display_width: Option<f64>,
        /// Height of the surface the point was captured on.
        #[arg(long, requires_all = ["display_width", "x"])]
        display_height: Option<f64>,
        /// Write an annotated JPEG here.
        #[arg(long, value_name = "PATH")]
        annotate: Option<PathBuf>,
        /// Font for category labels on the annotated image.
        #[arg(long, value_name = "PATH", env = "WASTELENS_FONT_PATH")]
        font: Option<PathBuf>,
        /// Stub detections JSON (overrides WASTELENS_STUB_DETECTIONS).
        #[arg(long, value_name = "PATH")]
        stub_detections: Option<PathBuf>,
        /// Confidence threshold (overrides WASTELENS_CONFIDENCE).
        #[arg(long)]
        confidence: Option<f32>,
    },
    /// Print the resolved label → category table.
    Categories,
    /// List the detector backends this configuration registers.
    Backends,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let mut config = ServiceConfig::load()?;

    match args.command {
        Command::Categories => {
            let table = config.category_table()?;
            let entries: Vec<serde_json::Value> = table
                .entries()
                .into_iter()
                .map(|(label, record)| {
                    serde_json::json!({
                        "label": label,
                        "category": record.category.display_name(),
                        "object": record.object_name,
                        "disposalInfoHTML": record.disposal_info,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Backends => {
            let registry = config.backend_registry()?;
            let listing = serde_json::json!({
                "default": registry.default_name(),
                "backends": registry.list(),
            });
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Command::Detect {
            image,
            x,
            y,
            display_width,
            display_height,
            annotate: annotate_path,
            font,
            stub_detections,
            confidence,
        } => {
            if let Some(path) = stub_detections {
                config.detector.stub_detections = Some(path);
            }
            if let Some(confidence) = confidence {
                config.detector.confidence = confidence;
            }
            config.validate()?;
            let font = font.map(LabelFont::load).transpose()?;
            let pipeline = config.build_pipeline()?;

            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read image {}", image.display()))?;
            let frame = Frame::decode(&bytes)?;

            let (response, drawn): (PredictResponse, Vec<EnrichedDetection>) = match (x, y) {
                (Some(x), Some(y)) => {
                    let point = Point::new(x, y);
                    let query = match (display_width, display_height) {
                        (Some(dw), Some(dh)) => PointQuery::display(
                            point,
                            DisplayGeometry::new(
                                dw,
                                dh,
                                f64::from(frame.width()),
                                f64::from(frame.height()),
                            ),
                        ),
                        _ => PointQuery::native(point),
                    };
                    let outcome = pipeline.query_point(&frame, query)?;
                    let drawn = outcome.matched().cloned().into_iter().collect();
                    (outcome.to_response()?, drawn)
                }
                _ => {
                    let detections = pipeline.detect_all(&frame)?;
                    (PredictResponse::whole_image(&detections), detections)
                }
            };

            if let Some(path) = annotate_path {
                let annotated = annotate::draw_detections(&frame, &drawn, font.as_ref());
                let jpeg = annotate::encode_jpeg(&annotated)?;
                std::fs::write(&path, jpeg)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                log::info!("annotated image written to {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}
