//! Frame sources.

use faceprint_core::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("no image files in {0}")]
    NoFrames(PathBuf),
    #[error("failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Anything that produces frames one at a time.
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Replays the image files of a directory, sorted by file name.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    passes: usize,
    pass: usize,
    yielded_this_pass: bool,
    sequence: u64,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self, CaptureError> {
        if !dir.is_dir() {
            return Err(CaptureError::DirectoryNotFound(dir.to_path_buf()));
        }
        let entries = std::fs::read_dir(dir).map_err(|source| CaptureError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CaptureError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(CaptureError::NoFrames(dir.to_path_buf()));
        }
        files.sort();

        tracing::info!(dir = %dir.display(), files = files.len(), "opened frame directory");

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
            passes: 1,
            pass: 0,
            yielded_this_pass: false,
            sequence: 0,
        })
    }

    /// Replay the directory `passes` times in total (minimum 1).
    pub fn looped(mut self, passes: usize) -> Self {
        self.passes = passes.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Image files found at open time, in playback order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn advance_pass(&mut self) -> bool {
        // A pass with nothing decodable would repeat forever.
        if !self.yielded_this_pass {
            return false;
        }
        self.pass += 1;
        if self.pass >= self.passes {
            return false;
        }
        self.cursor = 0;
        self.yielded_this_pass = false;
        true
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        loop {
            if self.cursor >= self.files.len() && !self.advance_pass() {
                return Ok(None);
            }
            let path = &self.files[self.cursor];
            self.cursor += 1;

            match image::open(path) {
                Ok(img) => {
                    let frame = Frame::from_dynamic(img, self.sequence);
                    self.sequence += 1;
                    self.yielded_this_pass = true;
                    return Ok(Some(frame));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable frame");
                }
            }
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
