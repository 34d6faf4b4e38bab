use std::io::Write;
use std::sync::Arc;

use super::drain::drain_into;
use crate::models::diagnostics::PipeStats;
use crate::models::error::CaptureError;
use crate::models::format::{AudioFormat, WaveFormat};
use crate::models::frame::AudioSample;
use crate::processing::cancellation::CancellationToken;
use crate::processing::media_queue::{MediaQueue, QueueReader};
use crate::traits::pipe_source::{PipeSource, StreamRole};

/// Raw 16-bit little-endian PCM stream over the audio queue.
pub struct AudioPipeSource {
    queue: Arc<MediaQueue<AudioSample>>,
    format: WaveFormat,
}

impl AudioPipeSource {
    pub fn new(queue: Arc<MediaQueue<AudioSample>>, format: WaveFormat) -> Self {
        Self { queue, format }
    }

    pub fn format(&self) -> WaveFormat {
        self.format
    }
}

impl PipeSource for AudioPipeSource {
    fn role(&self) -> StreamRole {
        StreamRole::Audio
    }

    fn input_arguments(&self) -> Vec<String> {
        vec![
            "-f".into(),
            AudioFormat::Pcm16.raw_demuxer().into(),
            "-ar".into(),
            self.format.sample_rate.to_string(),
            "-ac".into(),
            self.format.channels.to_string(),
        ]
    }

    fn write_to(&mut self, sink: &mut dyn Write, cancel: &CancellationToken) -> Result<PipeStats, CaptureError> {
        let samples = QueueReader::new(Arc::clone(&self.queue), cancel.clone());
        drain_into(StreamRole::Audio, samples, sink, cancel, |sample| sample.data())
    }
}
