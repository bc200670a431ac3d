//! Render segmentation results offline: the translucent mask overlay
//! with prompt markers, or the transparent cut-out a user downloads.

use std::path::{Path, PathBuf};

use candlelit_core::{
    ClickEvent, Mask, PointMode, PointSet, RgbaImage, SegmenterConfig, cutout, overlay,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Render segmentation overlays and cut-outs from an image and a mask.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keep only the masked region; everything else becomes transparent.
    Cutout {
        /// Input image path.
        image: PathBuf,

        /// Mask image path. Alpha is used if present, else luminance.
        mask: PathBuf,

        /// Output image path (PNG recommended).
        #[arg(short, long, default_value = "cutout.png")]
        output: PathBuf,
    },

    /// Draw the mask fill and prompt markers over the image.
    Overlay {
        /// Input image path.
        image: PathBuf,

        /// Mask image path. Without one, only markers are drawn.
        #[arg(short, long)]
        mask: Option<PathBuf>,

        /// Output image path (PNG recommended).
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        clicks: Clicks,

        #[command(flatten)]
        style: Style,
    },
}

/// Prompt points, replayed as clicks in the order given.
#[derive(ClapArgs)]
struct Clicks {
    /// A click as "X,Y" fractions of the image size. Prefix with "bg:"
    /// for a background point (e.g. "bg:0.1,0.9"). Clicking near an
    /// earlier point removes it, as on the interactive canvas.
    #[arg(long = "click", value_name = "[bg:]X,Y")]
    clicks: Vec<String>,
}

#[derive(ClapArgs)]
struct Style {
    /// JSON file with overlay settings; missing keys use defaults.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Marker radius in pixels, overriding the config file.
    #[arg(long, value_name = "PX")]
    marker_radius: Option<u32>,
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

/// Parse `[bg:]X,Y` into a normalized position and placement mode.
fn parse_click(spec: &str) -> Result<(f64, f64, PointMode), String> {
    let (mode, coords) = spec
        .strip_prefix("bg:")
        .map_or((PointMode::Foreground, spec), |rest| {
            (PointMode::Background, rest)
        });
    let (x_str, y_str) = coords
        .split_once(',')
        .ok_or_else(|| format!("click must be '[bg:]X,Y', got: '{spec}'"))?;
    let x: f64 = x_str
        .trim()
        .parse()
        .map_err(|e| format!("invalid click X '{x_str}': {e}"))?;
    let y: f64 = y_str
        .trim()
        .parse()
        .map_err(|e| format!("invalid click Y '{y_str}': {e}"))?;
    if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
        return Err(format!("click coordinates must be within 0..1, got: '{spec}'"));
    }
    Ok((x, y, mode))
}

/// Replay `specs` through the click reducer on a canvas `width` pixels wide.
fn replay_clicks(
    specs: &[String],
    width: u32,
    config: &SegmenterConfig,
) -> Result<PointSet, String> {
    let mut points = PointSet::new();
    for spec in specs {
        let (x, y, mode) = parse_click(spec)?;
        let click = ClickEvent::new(x, y, mode, config.removal_radius_px, f64::from(width));
        let (next, change) = points.apply(&click);
        tracing::debug!(spec, ?change, "click");
        points = next;
    }
    Ok(points)
}

fn load_config(path: Option<&Path>) -> Result<SegmenterConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(SegmenterConfig::default());
    };
    tracing::info!(path = %path.display(), "reading overlay config");
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn read_image(path: &Path) -> Result<RgbaImage, Box<dyn std::error::Error>> {
    tracing::info!(path = %path.display(), "reading image");
    Ok(image::open(path)?.to_rgba8())
}

fn read_mask(path: &Path) -> Result<Mask, Box<dyn std::error::Error>> {
    tracing::info!(path = %path.display(), "reading mask");
    Ok(Mask::decode(&std::fs::read(path)?)?)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "candlelit_cutout=info,candlelit_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let (rendered, output) = match args.command {
        Command::Cutout {
            image,
            mask,
            output,
        } => {
            let image = read_image(&image)?;
            let mask = read_mask(&mask)?;
            tracing::info!("cutting out masked region");
            (cutout(&image, &mask), output)
        }
        Command::Overlay {
            image,
            mask,
            output,
            clicks,
            style,
        } => {
            let image = read_image(&image)?;
            let mask = mask.as_deref().map(read_mask).transpose()?;
            let mut config = load_config(style.config.as_deref())?;
            if let Some(radius) = style.marker_radius {
                config.marker_radius_px = radius;
            }
            let points = replay_clicks(&clicks.clicks, image.width(), &config)
                .map_err(|e| format!("--click: {e}"))?;
            tracing::info!(points = points.len(), masked = mask.is_some(), "rendering overlay");
            (overlay(&image, mask.as_ref(), &points, &config), output)
        }
    };

    tracing::info!(path = %output.display(), "saving");
    rendered.save(&output)?;
    Ok(())
}
