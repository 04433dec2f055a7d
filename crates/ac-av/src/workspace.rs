//! Per-task scratch space for conversions.
//!
//! A [`Workspace`] owns a temporary directory holding the downloaded source
//! and the in-progress output. Finalizing moves the output into its
//! permanent directory; dropping the workspace deletes everything left in
//! it, on success and failure alike.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Scratch directory for one conversion.
///
/// # Example
///
/// ```no_run
/// use ac_av::Workspace;
///
/// let ws = Workspace::new(None, "source.mp3", "task.ogg").unwrap();
/// // ... download into ws.input(), transcode into ws.output() ...
/// ws.finalize(std::path::Path::new("converted_files")).unwrap();
/// ```
pub struct Workspace {
    temp_dir: TempDir,
    input_name: String,
    output_name: String,
}

impl Workspace {
    /// Create a workspace under `parent` (or the system temp dir).
    ///
    /// `input_name` and `output_name` are plain file names placed inside the
    /// temporary directory.
    pub fn new(parent: Option<&Path>, input_name: &str, output_name: &str) -> ac_core::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("audioconv-");

        let temp_dir = match parent {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| ac_core::Error::Internal(format!("failed to create temp dir: {e}")))?;

        Ok(Self {
            temp_dir,
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
        })
    }

    /// Where the downloaded source is written.
    pub fn input(&self) -> PathBuf {
        self.temp_dir.path().join(&self.input_name)
    }

    /// Where the transcoder writes its result.
    pub fn output(&self) -> PathBuf {
        self.temp_dir.path().join(&self.output_name)
    }

    /// Path to the temporary directory.
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Move the output into `dest_dir` under its output name and return the
    /// final path. The temporary directory (and the downloaded input) is
    /// removed when `self` is dropped at the end of this call.
    ///
    /// A rename is tried first; across file systems the output is copied to
    /// a hidden partial file next to the destination and renamed into place,
    /// so readers never observe a half-written file.
    ///
    /// # Errors
    ///
    /// Returns an error if the output file does not exist or if moving it
    /// fails.
    pub fn finalize(self, dest_dir: &Path) -> ac_core::Result<PathBuf> {
        let output = self.output();
        if !output.exists() {
            return Err(ac_core::Error::Internal(format!(
                "transcoder produced no output at {}",
                output.display()
            )));
        }

        std::fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(&self.output_name);

        if std::fs::rename(&output, &dest).is_err() {
            let partial = dest_dir.join(format!(".{}.partial", self.output_name));
            std::fs::copy(&output, &partial)?;
            if let Err(e) = std::fs::rename(&partial, &dest) {
                let _ = std::fs::remove_file(&partial);
                return Err(e.into());
            }
        }

        Ok(dest)
    }
}
