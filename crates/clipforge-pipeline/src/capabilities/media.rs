//! Subprocess-backed media capabilities: yt-dlp, whisper, ffmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capabilities::{ClipCutter, MediaDownloader, Transcriber};
use crate::error::{PipelineError, PipelineResult};

/// How to stop a child on cancellation.
enum SoftKill {
    /// ffmpeg exits cleanly when it reads `q` on stdin.
    Stdin(&'static [u8]),
    /// No graceful signal; go straight to kill after the grace period.
    None,
}

/// Wait for `child`, honouring cancellation with soft-then-hard kill.
async fn wait_with_cancel(
    mut child: Child,
    cancel: &CancellationToken,
    soft: SoftKill,
    grace: Duration,
    what: &str,
) -> PipelineResult<std::process::ExitStatus> {
    tokio::select! {
        status = child.wait() => Ok(status?),
        _ = cancel.cancelled() => {
            warn!("{what} cancelled, stopping subprocess");
            if let SoftKill::Stdin(bytes) = soft {
                if let Some(stdin) = child.stdin.as_mut() {
                    stdin.write_all(bytes).await.ok();
                    stdin.flush().await.ok();
                }
                // Give the process a moment to flush and exit on its own.
                if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                    return Err(PipelineError::Cancelled);
                }
            } else {
                tokio::time::sleep(grace).await;
            }
            child.kill().await.ok();
            Err(PipelineError::Cancelled)
        }
    }
}

fn resolve_binary(env_var: &str, default: &str) -> PipelineResult<PathBuf> {
    let name = std::env::var(env_var).unwrap_or_else(|_| default.to_string());
    which::which(&name)
        .map_err(|e| PipelineError::unrecoverable(format!("{name} not found on PATH: {e}")))
}

/// yt-dlp remote downloader.
pub struct YtDlpDownloader {
    binary: PathBuf,
}

impl YtDlpDownloader {
    pub fn discover() -> PipelineResult<Self> {
        Ok(Self {
            binary: resolve_binary("YTDLP_BIN", "yt-dlp")?,
        })
    }
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    async fn download<'a>(
        &self,
        url: &str,
        cookie_jar: Option<&'a Path>,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        info!(%url, dest = %dest.display(), "downloading source video");

        let part = dest.with_extension("part.mp4");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-playlist")
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("-o")
            .arg(&part);
        if let Some(jar) = cookie_jar {
            cmd.arg("--cookies").arg(jar);
        }
        cmd.arg(url).stdout(Stdio::null()).stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| PipelineError::transient(format!("failed to spawn yt-dlp: {e}")))?;

        let status =
            wait_with_cancel(child, cancel, SoftKill::None, Duration::from_secs(5), "download")
                .await
                .inspect_err(|_| {
                    let part = part.clone();
                    tokio::spawn(async move {
                        tokio::fs::remove_file(part).await.ok();
                    });
                })?;

        if !status.success() {
            tokio::fs::remove_file(&part).await.ok();
            // Network-shaped failures are worth a retry; yt-dlp does not
            // distinguish them by exit code, so the stage retry decides.
            return Err(PipelineError::transient(format!(
                "yt-dlp exited with {status}"
            )));
        }

        tokio::fs::rename(&part, dest).await?;
        Ok(())
    }
}

/// whisper speech recognition.
pub struct WhisperTranscriber {
    binary: PathBuf,
}

impl WhisperTranscriber {
    pub fn discover() -> PipelineResult<Self> {
        Ok(Self {
            binary: resolve_binary("WHISPER_BIN", "whisper")?,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        video: &Path,
        dest_srt: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        info!(video = %video.display(), "transcribing");

        let out_base = dest_srt.with_extension("");
        let mut cmd = Command::new(&self.binary);
        cmd.arg(video)
            .arg("--output_format")
            .arg("srt")
            .arg("--output_name")
            .arg(&out_base)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| PipelineError::unrecoverable(format!("failed to spawn whisper: {e}")))?;

        let status = wait_with_cancel(
            child,
            cancel,
            SoftKill::None,
            Duration::from_secs(5),
            "transcription",
        )
        .await?;

        if !status.success() {
            return Err(PipelineError::unrecoverable(format!(
                "whisper exited with {status}"
            )));
        }
        Ok(())
    }
}

/// ffmpeg/ffprobe cutter.
pub struct FfmpegCutter {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    kill_grace: Duration,
}

impl FfmpegCutter {
    pub fn discover(kill_grace: Duration) -> PipelineResult<Self> {
        Ok(Self {
            ffmpeg: resolve_binary("FFMPEG_BIN", "ffmpeg")?,
            ffprobe: resolve_binary("FFPROBE_BIN", "ffprobe")?,
            kill_grace,
        })
    }

    async fn run_ffmpeg(
        &self,
        args: Vec<std::ffi::OsString>,
        dest: &Path,
        cancel: &CancellationToken,
        what: &str,
    ) -> PipelineResult<()> {
        // Cuts land in a `.part` sibling so an interrupted run never leaves
        // a torn output file behind.
        let part = dest.with_extension("part.mp4");

        // stdin stays attached: the `q` soft kill rides on it.
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .args(&args)
            .arg(&part)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| PipelineError::unrecoverable(format!("failed to spawn ffmpeg: {e}")))?;

        let result = wait_with_cancel(child, cancel, SoftKill::Stdin(b"q\n"), self.kill_grace, what)
            .await;

        match result {
            Ok(status) if status.success() => {
                tokio::fs::rename(&part, dest).await?;
                debug!(dest = %dest.display(), "{what} finished");
                Ok(())
            }
            Ok(status) => {
                tokio::fs::remove_file(&part).await.ok();
                Err(PipelineError::unrecoverable(format!(
                    "ffmpeg exited with {status}"
                )))
            }
            Err(e) => {
                tokio::fs::remove_file(&part).await.ok();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ClipCutter for FfmpegCutter {
    async fn cut(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let args: Vec<std::ffi::OsString> = vec![
            "-ss".into(),
            format!("{start:.3}").into(),
            "-to".into(),
            format!("{end:.3}").into(),
            "-i".into(),
            source.as_os_str().to_owned(),
            "-c".into(),
            "copy".into(),
            "-avoid_negative_ts".into(),
            "make_zero".into(),
        ];
        self.run_ffmpeg(args, dest, cancel, "cut").await
    }

    async fn concat(
        &self,
        inputs: &[PathBuf],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        if inputs.is_empty() {
            return Err(PipelineError::unrecoverable("concat with no inputs"));
        }

        // The concat demuxer takes a list file.
        let list_path = dest.with_extension("concat.txt");
        let mut list = String::new();
        for input in inputs {
            list.push_str(&format!("file '{}'\n", input.display()));
        }
        tokio::fs::write(&list_path, list).await?;

        let args: Vec<std::ffi::OsString> = vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.as_os_str().to_owned(),
            "-c".into(),
            "copy".into(),
        ];
        let result = self.run_ffmpeg(args, dest, cancel, "concat").await;
        tokio::fs::remove_file(&list_path).await.ok();
        result
    }

    async fn probe_duration(&self, source: &Path) -> PipelineResult<f64> {
        let output = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(source)
            .output()
            .await
            .map_err(|e| PipelineError::unrecoverable(format!("failed to spawn ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(PipelineError::unrecoverable(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|_| PipelineError::unrecoverable(format!("unparseable duration: {text}")))
    }
}
