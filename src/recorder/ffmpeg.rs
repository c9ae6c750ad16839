//! FFmpeg-backed encoder
//!
//! Video frames are piped as raw RGBA/BGRA into an `ffmpeg` child process by a
//! writer thread, and audio is spooled to a PCM file by a second writer
//! thread, so appending never waits on the encoder or the disk. Both tracks are
//! laid out on fixed slots (frames at the video rate, samples at the audio
//! rate): a buffer whose timestamp lands past the next free slot is preceded
//! by filler, repeated frames or silence. The PCM is muxed in on finish.

use super::encoder::{EncoderError, EncoderFactory, EncoderSettings, EncoderStatus, MediaEncoder};
use crate::capture::{AudioBuffer, CameraFrame};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Frames allowed in the pipe before the encoder reports not ready
const VIDEO_QUEUE_DEPTH: usize = 4;

/// Audio chunks allowed in the spool queue before the encoder reports not ready
const AUDIO_QUEUE_DEPTH: usize = 16;

/// Longest gap (seconds) filled with repeated frames or silence; the rest of a
/// longer gap is written off
const MAX_GAP_FILL_SECS: f64 = 1.0;

/// Zero bytes written per call when spooling silence
const SILENCE_CHUNK: usize = 64 * 1024;

pub struct FfmpegEncoderFactory {
    binary: String,
}

impl FfmpegEncoderFactory {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }

    /// Use a specific ffmpeg executable
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Whether the ffmpeg executable can be run at all
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for FfmpegEncoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(&self, settings: &EncoderSettings) -> Result<Box<dyn MediaEncoder>, EncoderError> {
        Ok(Box::new(FfmpegEncoder::spawn(&self.binary, settings.clone())?))
    }
}

/// Intermediate files next to the final container
fn sidecar_paths(output: &Path) -> (PathBuf, PathBuf) {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    let dir = output.parent().map(Path::to_path_buf).unwrap_or_default();
    (
        dir.join(format!("{stem}.video.mp4")),
        dir.join(format!("{stem}.pcm")),
    )
}

/// Arguments for the live video encode
pub fn video_args(settings: &EncoderSettings, video_path: &Path) -> Vec<String> {
    let video = &settings.video;
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        settings.pixel_format.ffmpeg_name().to_string(),
        "-video_size".to_string(),
        format!("{}x{}", video.width, video.height),
        "-framerate".to_string(),
        video.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        video.codec.ffmpeg_encoder().to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-b:v".to_string(),
        format!("{}k", video.bitrate_kbps),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-g".to_string(),
        (video.fps * 2).to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        video_path.to_string_lossy().to_string(),
    ]
}

/// Arguments for muxing the spooled PCM into the encoded video
pub fn mux_args(settings: &EncoderSettings, video_path: &Path, audio_path: &Path) -> Vec<String> {
    let audio = &settings.audio;
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video_path.to_string_lossy().to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        audio.sample_rate.to_string(),
        "-ac".to_string(),
        audio.channels.to_string(),
        "-i".to_string(),
        audio_path.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v".to_string(),
        "-map".to_string(),
        "1:a".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", audio.bitrate_kbps),
        "-movflags".to_string(),
        "+faststart".to_string(),
        settings.output_path.to_string_lossy().to_string(),
    ]
}

/// Fixed-rate slot bookkeeping for one track
///
/// `position` counts slots already accounted for: written slots plus slots
/// written off after a gap longer than [`MAX_GAP_FILL_SECS`]. Writing off keeps
/// the next buffer from paying the same debt again.
#[derive(Debug, Clone, Copy)]
struct SlotTimeline {
    rate: f64,
    written: u64,
    skipped: u64,
}

impl SlotTimeline {
    fn new(rate: u32) -> Self {
        Self {
            rate: rate.max(1) as f64,
            written: 0,
            skipped: 0,
        }
    }

    fn position(&self) -> u64 {
        self.written + self.skipped
    }

    /// Filler slots to write before a buffer starting at `pts`
    ///
    /// Returns `(filler, written_off)`; the caller then writes `filler` slots
    /// and the buffer's own `len` slots through [`SlotTimeline::commit`].
    fn plan(&self, pts: f64) -> (u64, u64) {
        let target = (pts * self.rate).round().max(0.0) as u64;
        let gap = target.saturating_sub(self.position());
        let max_fill = (MAX_GAP_FILL_SECS * self.rate) as u64;
        let filler = gap.min(max_fill);
        (filler, gap - filler)
    }

    fn commit(&mut self, filler: u64, written_off: u64, len: u64) {
        self.skipped += written_off;
        self.written += filler + len;
    }
}

fn spawn_writer(
    mut stdin: ChildStdin,
    in_flight: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
) -> std::io::Result<(Sender<Arc<Vec<u8>>>, JoinHandle<u64>)> {
    let (tx, rx) = channel::<Arc<Vec<u8>>>();
    let handle = std::thread::Builder::new()
        .name("racemaster-ffmpeg-writer".to_string())
        .spawn(move || {
            let mut written = 0u64;
            for frame in rx {
                let result = stdin.write_all(&frame);
                in_flight.fetch_sub(1, Ordering::AcqRel);
                if let Err(e) = result {
                    tracing::error!("FFmpeg video pipe closed: {}", e);
                    failed.store(true, Ordering::Release);
                    break;
                }
                written += 1;
            }
            written
        })?;
    Ok((tx, handle))
}

/// Work for the audio spool thread
enum AudioChunk {
    /// This many zero bytes
    Silence(usize),
    Pcm(Vec<u8>),
}

/// Spool audio chunks to `path`, creating it on the first chunk
///
/// The thread returns whether anything was written.
fn spawn_audio_writer(
    path: PathBuf,
    in_flight: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
) -> std::io::Result<(Sender<AudioChunk>, JoinHandle<std::io::Result<bool>>)> {
    let (tx, rx) = channel::<AudioChunk>();
    let handle = std::thread::Builder::new()
        .name("racemaster-audio-spool".to_string())
        .spawn(move || spool_audio(&path, rx, &in_flight, &failed))?;
    Ok((tx, handle))
}

fn spool_audio(
    path: &Path,
    rx: Receiver<AudioChunk>,
    in_flight: &AtomicUsize,
    failed: &AtomicBool,
) -> std::io::Result<bool> {
    let mut out: Option<BufWriter<File>> = None;
    for chunk in rx {
        let result = write_audio_chunk(&mut out, path, chunk);
        in_flight.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = result {
            tracing::error!("Audio spool {:?} failed: {}", path, e);
            failed.store(true, Ordering::Release);
            return Err(e);
        }
    }
    match out {
        Some(mut writer) => {
            writer.flush()?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn write_audio_chunk(out: &mut Option<BufWriter<File>>, path: &Path, chunk: AudioChunk) -> std::io::Result<()> {
    if out.is_none() {
        *out = Some(BufWriter::new(File::create(path)?));
    }
    let Some(writer) = out.as_mut() else {
        return Ok(());
    };
    match chunk {
        AudioChunk::Silence(mut remaining) => {
            let zeros = vec![0u8; remaining.min(SILENCE_CHUNK)];
            while remaining > 0 {
                let n = remaining.min(zeros.len());
                writer.write_all(&zeros[..n])?;
                remaining -= n;
            }
            Ok(())
        }
        AudioChunk::Pcm(data) => writer.write_all(&data),
    }
}

pub struct FfmpegEncoder {
    binary: String,
    settings: EncoderSettings,
    video_path: PathBuf,
    audio_path: PathBuf,

    child: Option<Child>,
    video_tx: Option<Sender<Arc<Vec<u8>>>>,
    writer: Option<JoinHandle<u64>>,
    in_flight: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,

    video_slots: SlotTimeline,
    last_frame: Option<Arc<Vec<u8>>>,

    audio_tx: Option<Sender<AudioChunk>>,
    audio_writer: Option<JoinHandle<std::io::Result<bool>>>,
    audio_in_flight: Arc<AtomicUsize>,
    audio_slots: SlotTimeline,
}

impl FfmpegEncoder {
    pub fn spawn(binary: &str, settings: EncoderSettings) -> Result<Self, EncoderError> {
        if let Some(parent) = settings.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let (video_path, audio_path) = sidecar_paths(&settings.output_path);
        let args = video_args(&settings, &video_path);

        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncoderError::Spawn(format!("{}: {}", binary, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("Failed to capture FFmpeg stdin".to_string()))?;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let audio_in_flight = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let writers = spawn_writer(stdin, in_flight.clone(), failed.clone()).and_then(|video| {
            spawn_audio_writer(audio_path.clone(), audio_in_flight.clone(), failed.clone())
                .map(|audio| (video, audio))
        });
        let ((video_tx, writer), (audio_tx, audio_writer)) = match writers {
            Ok(pair) => pair,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EncoderError::Io(e));
            }
        };

        let video_slots = SlotTimeline::new(settings.video.fps);
        let audio_slots = SlotTimeline::new(settings.audio.sample_rate);
        Ok(Self {
            binary: binary.to_string(),
            settings,
            video_path,
            audio_path,
            child: Some(child),
            video_tx: Some(video_tx),
            writer: Some(writer),
            in_flight,
            failed,
            video_slots,
            last_frame: None,
            audio_tx: Some(audio_tx),
            audio_writer: Some(audio_writer),
            audio_in_flight,
            audio_slots,
        })
    }

    fn queue_frame(&mut self, frame: Arc<Vec<u8>>) -> Result<(), EncoderError> {
        let tx = self.video_tx.as_ref().ok_or(EncoderError::Failed)?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if tx.send(frame).is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.failed.store(true, Ordering::Release);
            return Err(EncoderError::Write {
                track: "video",
                message: "writer thread exited".to_string(),
            });
        }
        Ok(())
    }

    fn queue_audio(&mut self, chunk: AudioChunk) -> Result<(), EncoderError> {
        let tx = self.audio_tx.as_ref().ok_or(EncoderError::Failed)?;
        self.audio_in_flight.fetch_add(1, Ordering::AcqRel);
        if tx.send(chunk).is_err() {
            self.audio_in_flight.fetch_sub(1, Ordering::AcqRel);
            self.failed.store(true, Ordering::Release);
            return Err(EncoderError::Write {
                track: "audio",
                message: "spool thread exited".to_string(),
            });
        }
        Ok(())
    }

    fn finish_blocking(mut self) -> Result<PathBuf, EncoderError> {
        // Closing the channels ends the writers; the video one closes ffmpeg's stdin
        drop(self.video_tx.take());
        drop(self.audio_tx.take());
        let frames = match self.writer.take().map(|w| w.join()) {
            Some(Ok(frames)) => frames,
            Some(Err(_)) => return Err(EncoderError::Process("video writer panicked".to_string())),
            None => 0,
        };
        let has_audio = match self.audio_writer.take().map(|w| w.join()) {
            Some(Ok(Ok(written))) => written,
            Some(Ok(Err(e))) => {
                return Err(EncoderError::Write {
                    track: "audio",
                    message: e.to_string(),
                })
            }
            Some(Err(_)) => return Err(EncoderError::Process("audio spool panicked".to_string())),
            None => false,
        };

        let child = self.child.take().ok_or(EncoderError::Failed)?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncoderError::Process(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        tracing::info!(
            "FFmpeg video encode finished: {} frames ({} slots written off)",
            frames,
            self.video_slots.skipped
        );

        if !has_audio {
            std::fs::rename(&self.video_path, &self.settings.output_path)?;
            return Ok(self.settings.output_path.clone());
        }

        let args = mux_args(&self.settings, &self.video_path, &self.audio_path);
        tracing::debug!("Muxing audio: {:?}", args);
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncoderError::Process(format!(
                "FFmpeg mux exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let _ = std::fs::remove_file(&self.video_path);
        let _ = std::fs::remove_file(&self.audio_path);
        tracing::info!(
            "FFmpeg mux finished: {} audio frames, output {:?}",
            self.audio_slots.written,
            self.settings.output_path
        );
        Ok(self.settings.output_path.clone())
    }
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    fn status(&self) -> EncoderStatus {
        if self.failed.load(Ordering::Acquire) {
            EncoderStatus::Failed
        } else if self.child.is_some() {
            EncoderStatus::Writing
        } else {
            EncoderStatus::Completed
        }
    }

    fn is_ready_for_video(&self) -> bool {
        self.status() == EncoderStatus::Writing
            && self.in_flight.load(Ordering::Acquire) < VIDEO_QUEUE_DEPTH
    }

    fn is_ready_for_audio(&self) -> bool {
        self.status() == EncoderStatus::Writing
            && self.audio_in_flight.load(Ordering::Acquire) < AUDIO_QUEUE_DEPTH
    }

    fn append_video(&mut self, frame: &CameraFrame, pts: f64) -> Result<(), EncoderError> {
        let video = &self.settings.video;
        if frame.width != video.width || frame.height != video.height {
            return Err(EncoderError::Mismatch(format!(
                "frame is {}x{}, track is {}x{}",
                frame.width, frame.height, video.width, video.height
            )));
        }
        if frame.format != self.settings.pixel_format {
            return Err(EncoderError::Mismatch(format!(
                "frame is {:?}, track is {:?}",
                frame.format, self.settings.pixel_format
            )));
        }
        let Some(packed) = frame.packed() else {
            return Err(EncoderError::Mismatch(format!(
                "frame buffer holds {} bytes, {}x{} at stride {} needs more",
                frame.data.len(),
                frame.width,
                frame.height,
                frame.stride
            )));
        };
        let data = Arc::new(packed.into_owned());

        let (filler, written_off) = self.video_slots.plan(pts);
        if written_off > 0 {
            tracing::warn!("Video gap at {:.3}s: {} frame slots written off", pts, written_off);
        }
        // Leading slots repeat the first frame
        let fill = self.last_frame.clone().unwrap_or_else(|| data.clone());
        for _ in 0..filler {
            self.queue_frame(fill.clone())?;
        }
        self.queue_frame(data.clone())?;
        self.video_slots.commit(filler, written_off, 1);
        self.last_frame = Some(data);
        Ok(())
    }

    fn append_audio(&mut self, buffer: &AudioBuffer, pts: f64) -> Result<(), EncoderError> {
        let audio = &self.settings.audio;
        if buffer.channels != audio.channels || buffer.sample_rate != audio.sample_rate {
            return Err(EncoderError::Mismatch(format!(
                "audio is {}ch @ {}Hz, track is {}ch @ {}Hz",
                buffer.channels, buffer.sample_rate, audio.channels, audio.sample_rate
            )));
        }

        let bytes_per_frame = audio.channels as usize * 2;
        let (silence, written_off) = self.audio_slots.plan(pts);
        if written_off > 0 {
            tracing::warn!("Audio gap at {:.3}s: {} sample frames written off", pts, written_off);
        }
        if silence > 0 {
            self.queue_audio(AudioChunk::Silence(silence as usize * bytes_per_frame))?;
        }
        self.queue_audio(AudioChunk::Pcm(buffer.to_le_bytes()))?;
        self.audio_slots.commit(silence, written_off, buffer.frames() as u64);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<PathBuf, EncoderError> {
        match tokio::task::spawn_blocking(move || self.finish_blocking()).await {
            Ok(result) => result,
            Err(e) => Err(EncoderError::Process(format!("finalize task failed: {}", e))),
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        // Only reached with a live child when the recording was abandoned
        drop(self.video_tx.take());
        drop(self.audio_tx.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
