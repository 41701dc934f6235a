use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::GenericImageView;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to decode generated image")]
    Decode(#[source] image::ImageError),

    #[error("target size {width}x{height} is invalid; both dimensions must be non-zero")]
    InvalidTargetSize { width: u32, height: u32 },

    #[error("failed writing {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode PNG {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub original_size: (u32, u32),
    pub final_size: (u32, u32),
    pub file_size_bytes: u64,
}

/// Decodes `bytes`, scales to `target` with Lanczos3 when the size differs,
/// and writes a best-compression PNG to `output_path`.
pub fn process(
    bytes: &[u8],
    output_path: &Path,
    target: (u32, u32),
) -> Result<ImageMetadata, ProcessError> {
    let (width, height) = target;
    if width == 0 || height == 0 {
        return Err(ProcessError::InvalidTargetSize { width, height });
    }

    let decoded = image::load_from_memory(bytes).map_err(ProcessError::Decode)?;
    let original_size = decoded.dimensions();
    let resized = if original_size == target {
        decoded
    } else {
        tracing::debug!(
            "resizing {}x{} -> {width}x{height}",
            original_size.0,
            original_size.1
        );
        decoded.resize_exact(width, height, FilterType::Lanczos3)
    };

    let io_err = |source| ProcessError::Io {
        path: output_path.to_path_buf(),
        source,
    };
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let file = File::create(output_path).map_err(io_err)?;
    let encoder =
        PngEncoder::new_with_quality(BufWriter::new(file), CompressionType::Best, PngFilter::Adaptive);
    resized
        .write_with_encoder(encoder)
        .map_err(|source| ProcessError::Encode {
            path: output_path.to_path_buf(),
            source,
        })?;

    let file_size_bytes = fs::metadata(output_path).map_err(io_err)?.len();
    Ok(ImageMetadata {
        original_size,
        final_size: resized.dimensions(),
        file_size_bytes,
    })
}
