//! SRT parsing and chunking.

use crate::error::{PipelineError, PipelineResult};

/// One subtitle cue.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubtitleCue {
    pub index: u32,
    /// Seconds into the video.
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A window of consecutive cues sized for one language model call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubtitleChunk {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Parse SRT text into cues. Tolerates CRLF line endings, a UTF-8 BOM and
/// blank runs between blocks; rejects files with no parseable cue.
pub fn parse_srt(content: &str) -> PipelineResult<Vec<SubtitleCue>> {
    let content = content.trim_start_matches('\u{feff}');
    let mut cues = Vec::new();

    for block in content.split("\n\n").map(str::trim) {
        let block = block.replace('\r', "");
        if block.is_empty() {
            continue;
        }
        let mut lines = block.lines();

        let Some(index_line) = lines.next() else { continue };
        let Ok(index) = index_line.trim().parse::<u32>() else {
            continue;
        };

        let Some(timing) = lines.next() else { continue };
        let Some((start, end)) = parse_timing(timing) else {
            continue;
        };

        let text = lines.collect::<Vec<_>>().join("\n");
        if text.is_empty() {
            continue;
        }

        cues.push(SubtitleCue {
            index,
            start,
            end,
            text,
        });
    }

    if cues.is_empty() {
        return Err(PipelineError::unrecoverable("no parseable cues in subtitle file"));
    }

    cues.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(cues)
}

/// `00:01:02,345 --> 00:01:04,000`
fn parse_timing(line: &str) -> Option<(f64, f64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end.trim())?))
}

fn parse_timestamp(ts: &str) -> Option<f64> {
    let (hms, millis) = ts.split_once(',').or_else(|| ts.split_once('.'))?;
    let mut parts = hms.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let millis: f64 = millis.trim().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + millis / 1000.0)
}

/// Group cues into windows of at most `chunk_seconds`. A cue longer than the
/// window gets a chunk of its own rather than being split.
pub fn chunk_cues(cues: &[SubtitleCue], chunk_seconds: u32) -> Vec<SubtitleChunk> {
    let window = chunk_seconds.max(1) as f64;
    let mut chunks: Vec<SubtitleChunk> = Vec::new();
    let mut current: Option<SubtitleChunk> = None;

    for cue in cues {
        match current.as_mut() {
            Some(chunk) if cue.end - chunk.start <= window => {
                chunk.end = chunk.end.max(cue.end);
                chunk.text.push('\n');
                chunk.text.push_str(&format!("[{:.1}-{:.1}] {}", cue.start, cue.end, cue.text));
            }
            _ => {
                if let Some(done) = current.take() {
                    chunks.push(done);
                }
                current = Some(SubtitleChunk {
                    index: chunks.len() as u32,
                    start: cue.start,
                    end: cue.end,
                    text: format!("[{:.1}-{:.1}] {}", cue.start, cue.end, cue.text),
                });
            }
        }
    }
    if let Some(done) = current.take() {
        chunks.push(done);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
1
00:00:00,000 --> 00:00:04,500
Welcome to the show.

2
00:00:04,500 --> 00:00:09,000
Today we talk about compilers.

3
00:00:09,000 --> 00:00:14,000
First, parsing.
";

    #[test]
    fn parses_basic_srt() {
        let cues = parse_srt(SAMPLE).unwrap();
        assert_eq!(cues.len(), 3);
        assert_eq!(cues[0].start, 0.0);
        assert_eq!(cues[1].end, 9.0);
        assert_eq!(cues[2].text, "First, parsing.");
    }

    #[test]
    fn tolerates_crlf_and_bom() {
        let crlf = format!("\u{feff}{}", SAMPLE.replace('\n', "\r\n"));
        let cues = parse_srt(&crlf).unwrap();
        assert_eq!(cues.len(), 3);
    }

    #[test]
    fn rejects_empty_input() {
        assert!(parse_srt("").is_err());
        assert!(parse_srt("not an srt file").is_err());
    }

    #[test]
    fn chunking_respects_window() {
        let cues = parse_srt(SAMPLE).unwrap();
        let chunks = chunk_cues(&cues, 9);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start, 0.0);
        assert_eq!(chunks[0].end, 9.0);
        assert_eq!(chunks[1].index, 1);
        assert_eq!(chunks[1].end, 14.0);

        // A window wider than the whole file yields one chunk.
        let chunks = chunk_cues(&cues, 600);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn timestamp_formats() {
        assert_eq!(parse_timestamp("00:00:01,500"), Some(1.5));
        assert_eq!(parse_timestamp("01:02:03,000"), Some(3723.0));
        assert_eq!(parse_timestamp("00:00:01.500"), Some(1.5));
        assert_eq!(parse_timestamp("junk"), None);
    }
}
