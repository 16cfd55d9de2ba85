//! Final artifact checks before delivery.

use std::io::Read;
use std::path::Path;

use crate::core::error::{AppError, AppResult};

/// Container formats the pipeline can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Matroska,
}

/// Result of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactReport {
    pub size_bytes: u64,
    pub container: Container,
}

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Identifies the container from the first bytes of a file.
pub fn sniff_container(header: &[u8]) -> Option<Container> {
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return Some(Container::Mp4);
    }
    if header.len() >= 4 && header[..4] == EBML_MAGIC {
        return Some(Container::Matroska);
    }
    None
}

fn read_header(path: &Path) -> AppResult<Vec<u8>> {
    let mut file = fs_err::File::open(path)?;
    let mut header = vec![0u8; 12];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    header.truncate(filled);
    Ok(header)
}

/// Checks that the artifact exists, is non-empty, looks like a video container and
/// fits within `max_bytes`.
pub fn validate_artifact(path: &Path, max_bytes: u64) -> AppResult<ArtifactReport> {
    let metadata = match fs_err::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::InvalidArtifact("Output file was not created".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let size_bytes = metadata.len();
    if size_bytes == 0 {
        return Err(AppError::InvalidArtifact("Output file is empty".to_string()));
    }

    let container = sniff_container(&read_header(path)?)
        .ok_or_else(|| AppError::InvalidArtifact("Invalid video file generated".to_string()))?;

    if size_bytes > max_bytes {
        return Err(AppError::SizeExceeded {
            size_bytes,
            limit_bytes: max_bytes,
        });
    }

    log::info!(
        "✅ Output validated: {:.2}MB ({:?})",
        crate::core::utils::bytes_to_mb(size_bytes),
        container
    );
    Ok(ArtifactReport {
        size_bytes,
        container,
    })
}
