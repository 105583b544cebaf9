//! Camera frame sequences (`<camera>/<index>.jpeg`).

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bridge_rlds_shared::{BridgeRldsError, Frame, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, warn};

/// Read every numbered frame in `dir`, in index order.
///
/// Indices must run contiguously from 0; a gap is reported as the first
/// missing frame.
pub fn read_camera(dir: &Path, resize: Option<(u32, u32)>) -> Result<Vec<Frame>> {
    let indexed = index_frames(dir)?;

    let mut frames = Vec::with_capacity(indexed.len());
    for (expected, (index, path)) in indexed.into_iter().enumerate() {
        if index != expected {
            return Err(BridgeRldsError::missing(dir.join(format!("{expected}.jpeg"))));
        }
        let bytes = std::fs::read(&path).map_err(|e| BridgeRldsError::io(&path, e))?;
        frames.push(decode_frame(&path, bytes, resize)?);
    }

    debug!(camera = %dir.display(), frames = frames.len(), "camera frames loaded");
    Ok(frames)
}

/// Decode one frame to validate it and learn its size, resizing when asked.
///
/// Non-JPEG payloads and resized frames are re-encoded as JPEG.
pub fn decode_frame(path: &Path, bytes: Vec<u8>, resize: Option<(u32, u32)>) -> Result<Frame> {
    let image = image::load_from_memory(&bytes)
        .map_err(|e| BridgeRldsError::decode(path, e.to_string()))?;

    let is_jpeg = matches!(image::guess_format(&bytes), Ok(ImageFormat::Jpeg));

    match resize {
        Some((width, height)) if (image.width(), image.height()) != (width, height) => {
            let resized = image.resize_exact(width, height, FilterType::Triangle);
            Ok(Frame {
                width,
                height,
                jpeg: encode_jpeg(path, &resized)?,
            })
        }
        _ if !is_jpeg => Ok(Frame {
            width: image.width(),
            height: image.height(),
            jpeg: encode_jpeg(path, &image)?,
        }),
        _ => Ok(Frame {
            width: image.width(),
            height: image.height(),
            jpeg: bytes,
        }),
    }
}

/// Encode an image as RGB JPEG.
pub fn encode_jpeg(path: &Path, image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_to(&mut buf, ImageFormat::Jpeg)
        .map_err(|e| BridgeRldsError::decode(path, format!("JPEG encode failed: {e}")))?;
    Ok(buf.into_inner())
}

/// Map frame index → file, from `<index>.jpeg` / `<index>.jpg` names.
fn index_frames(dir: &Path) -> Result<BTreeMap<usize, PathBuf>> {
    let read = std::fs::read_dir(dir).map_err(|e| BridgeRldsError::io(dir, e))?;
    let mut indexed = BTreeMap::new();

    for entry in read {
        let path = entry.map_err(|e| BridgeRldsError::io(dir, e))?.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpeg") || ext.eq_ignore_ascii_case("jpg"));
        if !is_frame {
            continue;
        }
        let Some(index) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<usize>().ok())
        else {
            debug!(path = %path.display(), "ignoring frame file without numeric name");
            continue;
        };
        if let Some(previous) = indexed.insert(index, path.clone()) {
            warn!(
                kept = %path.display(),
                dropped = %previous.display(),
                "duplicate frame index"
            );
        }
    }

    Ok(indexed)
}
