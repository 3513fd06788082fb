//! Animated summary of the screenshots a role captured.
//!
//! Screenshots are decoded one at a time, scaled down to a bounded size and
//! appended to a looping GIF, so peak memory stays at a single frame.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use tracing::debug;

use crate::{AppError, Result};

/// Directory under a role's saved output holding its screenshots.
pub const SCREENSHOT_DIR_NAME: &str = "Screenshots";

/// File name of the animated summary.
pub const SUMMARY_FILE_NAME: &str = "screenshots.gif";

/// Delay between frames of the summary.
pub const FRAME_DELAY_MS: u32 = 500;

/// Largest width or height of a summary frame.
pub const MAX_DIMENSION: u32 = 800;

/// Maximum frames in one summary; later screenshots are dropped.
pub const MAX_FRAMES: usize = 200;

/// Screenshot files in `dir`, sorted by name.
#[must_use]
pub fn find_screenshots(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        ext.eq_ignore_ascii_case("png")
                            || ext.eq_ignore_ascii_case("jpg")
                            || ext.eq_ignore_ascii_case("jpeg")
                    })
        })
        .collect();
    files.sort();
    files
}

/// Compact every screenshot in `dir` into an animated GIF at `output`.
///
/// Returns `Ok(None)` when `dir` holds no screenshots.
///
/// # Errors
///
/// Returns `AppError::Artifact` if a screenshot cannot be decoded or the
/// GIF cannot be written.
pub fn create_summary(dir: &Path, output: &Path) -> Result<Option<PathBuf>> {
    let screenshots = find_screenshots(dir);
    if screenshots.is_empty() {
        return Ok(None);
    }

    let file = File::create(output).map_err(|err| {
        AppError::Artifact(format!("failed to create {}: {err}", output.display()))
    })?;
    let mut encoder = GifEncoder::new_with_speed(BufWriter::new(file), 10);
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|err| AppError::Artifact(format!("failed to encode gif: {err}")))?;

    let delay = Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1);
    let mut frames = 0_usize;
    for path in screenshots.iter().take(MAX_FRAMES) {
        let image = image::open(path).map_err(|err| {
            AppError::Artifact(format!("failed to decode {}: {err}", path.display()))
        })?;
        let rgba = if image.width() > MAX_DIMENSION || image.height() > MAX_DIMENSION {
            image.thumbnail(MAX_DIMENSION, MAX_DIMENSION).into_rgba8()
        } else {
            image.into_rgba8()
        };
        encoder
            .encode_frame(Frame::from_parts(rgba, 0, 0, delay))
            .map_err(|err| AppError::Artifact(format!("failed to encode gif: {err}")))?;
        frames += 1;
    }
    drop(encoder);

    debug!(frames, output = %output.display(), "screenshot summary written");
    Ok(Some(output.to_path_buf()))
}
