//! Transcoder (component D, §4.D). Delegates every operation to `ffprobe`/
//! `ffmpeg` invoked via subprocess with process niceness reduced on POSIX
//! hosts (10 for general conversion, 15 for heavy re-encoding).

mod process;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const NICE_CONVERSION: i32 = 10;
const NICE_HEAVY_REENCODE: i32 = 15;
const OPTIMIZE_THRESHOLD_BYTES: u64 = 48 * 1024 * 1024;
const AUDIO_BITRATE_KBPS: u64 = 128;
const MIN_VIDEO_BITRATE_KBPS: u64 = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
    pub video_codec: Option<String>,
    pub has_aspect_ratio_metadata: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationReason {
    OverSizeThreshold,
    NotH264,
    PortraitWithoutAspectMetadata,
    ProbeFailed,
}

pub struct Transcoder {
    hard_timeout: Duration,
}

impl Transcoder {
    pub fn new(hard_timeout: Duration) -> Self {
        Self { hard_timeout }
    }

    /// Probe a file's dimensions, duration and codec. Fails silently to
    /// "unknown" fields rather than propagating an error (§4.D).
    pub async fn probe(&self, path: &Path) -> ProbeInfo {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            path.to_string_lossy().to_string(),
        ];

        let output = match process::run_niced("ffprobe", &args, NICE_CONVERSION, self.hard_timeout).await {
            Ok(output) if output.status.success() => output,
            _ => return ProbeInfo::default(),
        };

        let Ok(probe) = serde_json::from_slice::<FfprobeOutput>(&output.stdout) else {
            return ProbeInfo::default();
        };

        let video_stream = probe.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"));
        ProbeInfo {
            width: video_stream.and_then(|s| s.width),
            height: video_stream.and_then(|s| s.height),
            duration_secs: probe.format.as_ref().and_then(|f| f.duration.as_deref()?.parse().ok()),
            video_codec: video_stream.and_then(|s| s.codec_name.clone()),
            has_aspect_ratio_metadata: video_stream
                .map(|s| s.sample_aspect_ratio.is_some() || s.display_aspect_ratio.is_some())
                .unwrap_or(false),
        }
    }

    /// True if the file needs re-encoding before it can go over the
    /// transport: oversize, non-H.264 video, or a portrait video lacking
    /// explicit aspect-ratio metadata. Conservative: a probe failure also
    /// returns true (§4.D, invariant 5 of §8).
    pub async fn needs_transport_optimization(
        &self,
        path: &Path,
        size_bytes: u64,
    ) -> (bool, Option<OptimizationReason>) {
        if size_bytes > OPTIMIZE_THRESHOLD_BYTES {
            return (true, Some(OptimizationReason::OverSizeThreshold));
        }

        let probe = self.probe(path).await;
        let Some(codec) = &probe.video_codec else {
            return (true, Some(OptimizationReason::ProbeFailed));
        };

        if codec != "h264" {
            return (true, Some(OptimizationReason::NotH264));
        }

        if let (Some(width), Some(height)) = (probe.width, probe.height) {
            if height > width && !probe.has_aspect_ratio_metadata {
                return (true, Some(OptimizationReason::PortraitWithoutAspectMetadata));
            }
        }

        (false, None)
    }

    /// Re-encode to a transport-safe container: H.264 main profile,
    /// yuv420p, AAC stereo 128 kbit/s, even dimensions, square pixel aspect
    /// ratio, faststart, rotate metadata cleared. CRF 26, `superfast` preset.
    pub async fn optimize(&self, path: &Path) -> Option<PathBuf> {
        let out_path = sibling_with_suffix(path, "optimized");
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            path.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-profile:v".to_string(),
            "main".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-vf".to_string(),
            "scale=ceil(iw/2)*2:ceil(ih/2)*2,setsar=1".to_string(),
            "-preset".to_string(),
            "superfast".to_string(),
            "-crf".to_string(),
            "26".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-b:a".to_string(),
            format!("{AUDIO_BITRATE_KBPS}k"),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-metadata:s:v:0".to_string(),
            "rotate=0".to_string(),
            out_path.to_string_lossy().to_string(),
        ];

        run_ffmpeg(&args, NICE_HEAVY_REENCODE, self.hard_timeout).await.then_some(out_path)
    }

    /// Re-encode in one pass targeting `target_mb`: bitrate is
    /// `(target_bits - audio_bits) / duration * 0.9`, floored at 50 kbit/s,
    /// audio held at 128 kbit/s, hard max/buf rate caps, `medium` preset.
    pub async fn compress(&self, path: &Path, target_mb: u64) -> Option<PathBuf> {
        let probe = self.probe(path).await;
        let duration = probe.duration_secs.filter(|d| *d > 0.0)?;

        let target_bits = target_mb * 1024 * 1024 * 8;
        let audio_bits = AUDIO_BITRATE_KBPS * 1000;
        let video_bitrate_kbps =
            (((target_bits - audio_bits.min(target_bits)) as f64 / duration * 0.9) / 1000.0) as u64;
        let video_bitrate_kbps = video_bitrate_kbps.max(MIN_VIDEO_BITRATE_KBPS);

        let out_path = sibling_with_suffix(path, "compressed");
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            path.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-b:v".to_string(),
            format!("{video_bitrate_kbps}k"),
            "-maxrate".to_string(),
            format!("{video_bitrate_kbps}k"),
            "-bufsize".to_string(),
            format!("{}k", video_bitrate_kbps * 2),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{AUDIO_BITRATE_KBPS}k"),
            "-movflags".to_string(),
            "+faststart".to_string(),
            out_path.to_string_lossy().to_string(),
        ];

        run_ffmpeg(&args, NICE_HEAVY_REENCODE, self.hard_timeout).await.then_some(out_path)
    }

    /// Extract a frame at `offset`, scale to fit within 320x320, JPEG
    /// quality 2; re-encode at quality 5 if still over 200 KB; reject if
    /// still too large.
    pub async fn thumbnail(&self, path: &Path, offset: Duration) -> Option<PathBuf> {
        let out_path = sibling_with_suffix(path, "thumb").with_extension("jpg");

        for quality in [2, 5] {
            let args = vec![
                "-y".to_string(),
                "-ss".to_string(),
                offset.as_secs_f64().to_string(),
                "-i".to_string(),
                path.to_string_lossy().to_string(),
                "-frames:v".to_string(),
                "1".to_string(),
                "-vf".to_string(),
                "scale='min(320,iw)':'min(320,ih)':force_original_aspect_ratio=decrease".to_string(),
                "-q:v".to_string(),
                quality.to_string(),
                out_path.to_string_lossy().to_string(),
            ];

            if run_ffmpeg(&args, NICE_CONVERSION, self.hard_timeout).await {
                if let Ok(meta) = tokio::fs::metadata(&out_path).await {
                    if meta.len() <= 200 * 1024 {
                        return Some(out_path);
                    }
                }
            }
        }
        None
    }

    /// 16kHz mono 16-bit PCM WAV with a high-pass filter at `high_pass_hz`
    /// and peak normalization, for feeding a transcription oracle.
    pub async fn to_mono_wav_for_transcription(&self, path: &Path, high_pass_hz: u32) -> Option<PathBuf> {
        let out_path = sibling_with_suffix(path, "stt").with_extension("wav");
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            path.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-af".to_string(),
            format!("highpass=f={high_pass_hz},dynaudnorm=p=1.0:m=1.0"),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            out_path.to_string_lossy().to_string(),
        ];
        run_ffmpeg(&args, NICE_CONVERSION, self.hard_timeout).await.then_some(out_path)
    }

    /// MP3 via audio-stream remux at best VBR quality.
    pub async fn to_mp3(&self, path: &Path) -> Option<PathBuf> {
        let out_path = sibling_with_suffix(path, "audio").with_extension("mp3");
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            path.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-q:a".to_string(),
            "0".to_string(),
            out_path.to_string_lossy().to_string(),
        ];
        run_ffmpeg(&args, NICE_CONVERSION, self.hard_timeout).await.then_some(out_path)
    }

    /// OGG Opus mono 32 kbit/s, `voip` application profile.
    pub async fn to_voice(&self, path: &Path) -> Option<PathBuf> {
        let out_path = sibling_with_suffix(path, "voice").with_extension("ogg");
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            path.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "libopus".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-b:a".to_string(),
            "32k".to_string(),
            "-application".to_string(),
            "voip".to_string(),
            out_path.to_string_lossy().to_string(),
        ];
        run_ffmpeg(&args, NICE_CONVERSION, self.hard_timeout).await.then_some(out_path)
    }

    /// 640x640 square MP4 clipped to 60s. For audio-only inputs, a still
    /// background image is synthesized first and muxed with the
    /// duration-limited audio.
    pub async fn to_video_note(&self, path: &Path, cover: Option<&Path>, is_audio_only: bool) -> Option<PathBuf> {
        let out_path = sibling_with_suffix(path, "note").with_extension("mp4");

        let args = if is_audio_only {
            let cover = cover?;
            vec![
                "-y".to_string(),
                "-loop".to_string(),
                "1".to_string(),
                "-i".to_string(),
                cover.to_string_lossy().to_string(),
                "-i".to_string(),
                path.to_string_lossy().to_string(),
                "-t".to_string(),
                "60".to_string(),
                "-vf".to_string(),
                "scale=640:640:force_original_aspect_ratio=increase,crop=640:640".to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-tune".to_string(),
                "stillimage".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                format!("{AUDIO_BITRATE_KBPS}k"),
                "-shortest".to_string(),
                out_path.to_string_lossy().to_string(),
            ]
        } else {
            vec![
                "-y".to_string(),
                "-i".to_string(),
                path.to_string_lossy().to_string(),
                "-t".to_string(),
                "60".to_string(),
                "-vf".to_string(),
                "scale=640:640:force_original_aspect_ratio=increase,crop=640:640".to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "superfast".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                format!("{AUDIO_BITRATE_KBPS}k"),
                out_path.to_string_lossy().to_string(),
            ]
        };

        run_ffmpeg(&args, NICE_HEAVY_REENCODE, self.hard_timeout).await.then_some(out_path)
    }
}

async fn run_ffmpeg(args: &[String], nice_level: i32, hard_timeout: Duration) -> bool {
    matches!(process::run_niced("ffmpeg", args, nice_level, hard_timeout).await, Ok(out) if out.status.success())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
    path.with_file_name(format!("{stem}_{suffix}.{ext}"))
}

#[derive(Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    sample_aspect_ratio: Option<String>,
    display_aspect_ratio: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_with_suffix_preserves_extension() {
        let out = sibling_with_suffix(Path::new("/tmp/abc.mp4"), "optimized");
        assert_eq!(out, PathBuf::from("/tmp/abc_optimized.mp4"));
    }

    #[tokio::test]
    async fn needs_optimization_is_conservative_on_probe_failure() {
        let transcoder = Transcoder::new(Duration::from_secs(1));
        let (needs, reason) = transcoder.needs_transport_optimization(Path::new("/nonexistent/file.mp4"), 10).await;
        assert!(needs);
        assert_eq!(reason, Some(OptimizationReason::ProbeFailed));
    }

    #[tokio::test]
    async fn needs_optimization_fires_on_size_alone() {
        let transcoder = Transcoder::new(Duration::from_secs(1));
        let (needs, reason) =
            transcoder.needs_transport_optimization(Path::new("/nonexistent/file.mp4"), 49 * 1024 * 1024).await;
        assert!(needs);
        assert_eq!(reason, Some(OptimizationReason::OverSizeThreshold));
    }
}
