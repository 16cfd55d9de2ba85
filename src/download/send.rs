//! Outbound delivery of finished artifacts and user-facing messages.
//!
//! `Delivery` is the seam towards whatever front end owns the conversation (a chat
//! bot, a CLI). `DirectoryDelivery` is the local implementation: it copies the
//! artifact into an output directory and prints messages to stdout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::error::{AppError, AppResult};
use crate::core::utils::escape_filename;

/// What the pipeline hands over together with the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredVideo {
    pub title: String,
    pub caption: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait Delivery: Send + Sync {
    /// Hands over the finished file. The pipeline removes `path` afterwards.
    async fn deliver_video(&self, path: &Path, video: &DeliveredVideo) -> AppResult<()>;

    /// Sends a final text message.
    async fn send_text(&self, text: &str) -> AppResult<()>;

    /// Sends an interim status notice.
    async fn send_status(&self, text: &str) -> AppResult<()> {
        log::info!("{}", text);
        Ok(())
    }
}

/// Copies finished videos into `output_dir` as `<escaped title>.mp4`.
#[derive(Debug, Clone)]
pub struct DirectoryDelivery {
    output_dir: PathBuf,
}

impl DirectoryDelivery {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn destination(&self, title: &str) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", escape_filename(title)))
    }
}

#[async_trait]
impl Delivery for DirectoryDelivery {
    async fn deliver_video(&self, path: &Path, video: &DeliveredVideo) -> AppResult<()> {
        fs_err::tokio::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| AppError::Delivery(e.to_string()))?;

        let destination = self.destination(&video.title);
        fs_err::tokio::copy(path, &destination)
            .await
            .map_err(|e| AppError::Delivery(e.to_string()))?;

        log::info!("📤 Delivered {} ({} bytes)", destination.display(), video.size_bytes);
        println!("{}", video.caption);
        println!("{}", destination.display());
        Ok(())
    }

    async fn send_text(&self, text: &str) -> AppResult<()> {
        println!("{}", text);
        Ok(())
    }

    async fn send_status(&self, text: &str) -> AppResult<()> {
        log::info!("{}", text);
        eprintln!("{}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn destination_uses_escaped_title() {
        let delivery = DirectoryDelivery::new("/out");
        assert_eq!(delivery.destination("a/b"), PathBuf::from("/out/a_b.mp4"));
        assert_eq!(delivery.destination("   "), PathBuf::from("/out/unnamed.mp4"));
    }

    #[tokio::test]
    async fn deliver_copies_into_output_dir() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("artifact.mp4");
        std::fs::write(&source, b"payload").expect("write");

        let delivery = DirectoryDelivery::new(dir.path().join("out"));
        let video = DeliveredVideo {
            title: "Clip".to_string(),
            caption: "caption".to_string(),
            size_bytes: 7,
        };
        delivery.deliver_video(&source, &video).await.expect("deliver");

        let copied = std::fs::read(dir.path().join("out").join("Clip.mp4")).expect("read");
        assert_eq!(copied, b"payload".to_vec());
        assert!(source.exists());
    }
}
