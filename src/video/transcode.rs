//! External fragmentation process management.
//!
//! The buffered clip is written to a disposable artifact so the external
//! tool can seek to a trailing index, then the tool's stdout is read back as
//! the fragmented stream. The artifact and the child process are owned by
//! [`TranscodeOutput`] and released on every exit path.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::io::ReaderStream;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to stage clip: {0}")]
    Stage(#[source] io::Error),

    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read transcoder output: {0}")]
    Read(#[source] io::Error),

    #[error("transcoder exited with {0}")]
    Exit(String),
}

/// A clip written to disk for the transcoder; deleted when dropped
#[derive(Debug)]
pub struct StagedClip {
    path: TempPath,
}

impl StagedClip {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete now, reporting failures
    pub fn remove(self) -> io::Result<()> {
        self.path.close()
    }
}

/// A running transcoder
pub struct TranscodeProcess {
    /// `None` for in-process fakes
    pub child: Option<Child>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
}

/// Starts the fragmentation process for a staged clip
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn spawn(&self, input: &Path) -> Result<TranscodeProcess, TranscodeError>;
}

/// Runs ffmpeg (or anything with the same calling convention)
pub struct FfmpegTranscoder {
    binary: PathBuf,
    args: Vec<String>,
}

impl FfmpegTranscoder {
    /// `{input}` in `args` is replaced by the staged clip path
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn spawn(&self, input: &Path) -> Result<TranscodeProcess, TranscodeError> {
        let input = input.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{input}", &input))
            .collect();

        debug!("Spawning {} {:?}", self.binary.display(), args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TranscodeError::Read(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transcoder stdout not captured",
            ))
        })?;

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("transcoder[{:?}]: {}", pid, line);
                }
            });
        }

        Ok(TranscodeProcess {
            child: Some(child),
            stdout: Box::new(stdout),
        })
    }
}

/// Stages clips and starts the transcoder on them
#[derive(Clone)]
pub struct TranscodePipeline {
    temp_dir: PathBuf,
    chunk_size: usize,
    transcoder: Arc<dyn Transcoder>,
}

impl TranscodePipeline {
    pub fn new(temp_dir: PathBuf, chunk_size: usize, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            temp_dir,
            chunk_size: chunk_size.max(1),
            transcoder,
        }
    }

    /// Write the buffered clip to a fresh artifact in the temp directory
    pub async fn stage(&self, clip: Bytes) -> Result<StagedClip, TranscodeError> {
        let path = tempfile::Builder::new()
            .prefix("clip-")
            .suffix(".mp4")
            .tempfile_in(&self.temp_dir)
            .map_err(TranscodeError::Stage)?
            .into_temp_path();

        tokio::fs::write(&path, &clip)
            .await
            .map_err(TranscodeError::Stage)?;

        debug!("Staged {} bytes at {}", clip.len(), path.display());

        Ok(StagedClip { path })
    }

    /// Start the transcoder; the returned output owns the artifact
    pub async fn start(&self, staged: StagedClip) -> Result<TranscodeOutput, TranscodeError> {
        // On spawn failure `staged` is dropped here, deleting the artifact
        let process = self.transcoder.spawn(staged.path()).await?;

        Ok(TranscodeOutput {
            child: process.child,
            stdout: ReaderStream::with_capacity(process.stdout, self.chunk_size),
            artifact: Some(staged),
        })
    }
}

/// Fragmented output of a running transcoder
pub struct TranscodeOutput {
    child: Option<Child>,
    stdout: ReaderStream<Box<dyn AsyncRead + Send + Unpin>>,
    artifact: Option<StagedClip>,
}

impl TranscodeOutput {
    /// Next block of stdout, `None` at end of stream
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, TranscodeError>> {
        self.stdout
            .next()
            .await
            .map(|chunk| chunk.map_err(TranscodeError::Read))
    }

    /// Wait for the process to exit and delete the artifact
    pub async fn finish(mut self) -> Result<(), TranscodeError> {
        let status = match self.child.take() {
            Some(mut child) => Some(child.wait().await.map_err(TranscodeError::Read)),
            None => None,
        };

        self.remove_artifact();

        match status {
            Some(Ok(status)) if !status.success() => Err(TranscodeError::Exit(status.to_string())),
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Kill the process, reap it and delete the artifact
    pub async fn abort(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("Transcoder already gone: {}", e);
            }
        }
        self.remove_artifact();
    }

    fn remove_artifact(&mut self) {
        if let Some(artifact) = self.artifact.take() {
            let path = artifact.path().to_path_buf();
            if let Err(e) = artifact.remove() {
                warn!("Failed to delete transcode artifact {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for TranscodeOutput {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        self.remove_artifact();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(dir: &Path, binary: &str, args: &[&str]) -> TranscodePipeline {
        TranscodePipeline::new(
            dir.to_path_buf(),
            4,
            Arc::new(FfmpegTranscoder::new(
                binary,
                args.iter().map(|a| a.to_string()).collect(),
            )),
        )
    }

    fn is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn relays_stdout_in_chunks_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), "cat", &["{input}"]);

        let staged = pipeline.stage(Bytes::from_static(b"0123456789")).await.unwrap();
        assert!(staged.path().starts_with(dir.path()));
        assert!(!is_empty(dir.path()));

        let mut output = pipeline.start(staged).await.unwrap();
        let mut relayed = Vec::new();
        while let Some(chunk) = output.next_chunk().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= 4);
            relayed.extend_from_slice(&chunk);
        }
        output.finish().await.unwrap();

        assert_eq!(relayed, b"0123456789");
        assert!(is_empty(dir.path()));
    }

    #[tokio::test]
    async fn failed_exit_still_deletes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), "false", &["{input}"]);

        let staged = pipeline.stage(Bytes::from_static(b"clip")).await.unwrap();
        let mut output = pipeline.start(staged).await.unwrap();
        while output.next_chunk().await.is_some() {}

        assert!(matches!(output.finish().await, Err(TranscodeError::Exit(_))));
        assert!(is_empty(dir.path()));
    }

    #[tokio::test]
    async fn missing_binary_deletes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), "/nonexistent/ffmpeg", &["{input}"]);

        let staged = pipeline.stage(Bytes::from_static(b"clip")).await.unwrap();
        assert!(matches!(
            pipeline.start(staged).await,
            Err(TranscodeError::Spawn { .. })
        ));
        assert!(is_empty(dir.path()));
    }

    #[tokio::test]
    async fn abort_and_drop_stop_a_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), "sh", &["-c", "cat \"$0\"; sleep 30", "{input}"]);

        let staged = pipeline.stage(Bytes::from_static(b"abcd")).await.unwrap();
        let mut output = pipeline.start(staged).await.unwrap();
        assert_eq!(output.next_chunk().await.unwrap().unwrap(), Bytes::from_static(b"abcd"));
        output.abort().await;
        assert!(is_empty(dir.path()));

        let staged = pipeline.stage(Bytes::from_static(b"efgh")).await.unwrap();
        let output = pipeline.start(staged).await.unwrap();
        drop(output);
        assert!(is_empty(dir.path()));
    }
}
