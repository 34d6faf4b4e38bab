use std::io::Write;
use std::sync::Arc;

use super::drain::drain_into;
use crate::models::diagnostics::PipeStats;
use crate::models::error::CaptureError;
use crate::models::frame::{PixelFormat, VideoFrame};
use crate::processing::cancellation::CancellationToken;
use crate::processing::media_queue::{MediaQueue, QueueReader};
use crate::traits::pipe_source::{PipeSource, StreamRole};

/// Raw BGRA video stream over the paced capture queue.
///
/// Width, height and frame rate are fixed when the source is built; each item
/// written is one full frame.
pub struct VideoPipeSource {
    queue: Arc<MediaQueue<VideoFrame>>,
    width: u32,
    height: u32,
    frame_rate: f64,
}

impl VideoPipeSource {
    pub fn new(queue: Arc<MediaQueue<VideoFrame>>, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            queue,
            width,
            height,
            frame_rate,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * PixelFormat::Bgra32.bytes_per_pixel()
    }
}

impl PipeSource for VideoPipeSource {
    fn role(&self) -> StreamRole {
        StreamRole::Video
    }

    fn input_arguments(&self) -> Vec<String> {
        vec![
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            PixelFormat::Bgra32.encoder_name().into(),
            "-video_size".into(),
            format!("{}x{}", self.width, self.height),
            "-framerate".into(),
            format_rate(self.frame_rate),
        ]
    }

    fn write_to(&mut self, sink: &mut dyn Write, cancel: &CancellationToken) -> Result<PipeStats, CaptureError> {
        let (width, height) = (self.width, self.height);
        // A frame of another size would corrupt the raw stream for every later frame.
        let frames = QueueReader::new(Arc::clone(&self.queue), cancel.clone()).filter(|frame| {
            let matches = frame.width() == width && frame.height() == height;
            if !matches {
                log::warn!(
                    "Skipping {}x{} frame on a {}x{} stream",
                    frame.width(),
                    frame.height(),
                    width,
                    height
                );
            }
            matches
        });
        drain_into(StreamRole::Video, frames, sink, cancel, |frame| frame.data())
    }
}

/// Frame rates print without a fractional part when whole (`60`, `29.97`).
pub fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{}", rate as u64)
    } else {
        format!("{}", rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::frame::MediaTimestamp;
    use std::thread;
    use std::time::Duration;

    fn frame(width: u32, height: u32, fill: u8) -> VideoFrame {
        VideoFrame::new(width, height, vec![fill; (width * height * 4) as usize], MediaTimestamp::ZERO).unwrap()
    }

    #[test]
    fn input_arguments_describe_raw_bgra() {
        let source = VideoPipeSource::new(Arc::new(MediaQueue::bounded(4)), 1920, 1080, 60.0);
        assert_eq!(
            source.input_arguments(),
            vec!["-f", "rawvideo", "-pix_fmt", "bgra", "-video_size", "1920x1080", "-framerate", "60"]
        );
        assert_eq!(source.frame_size(), 1920 * 1080 * 4);
    }

    #[test]
    fn yields_exactly_what_was_produced_then_ends() {
        let queue = Arc::new(MediaQueue::bounded(120));
        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for i in 0..10u8 {
                producer_queue.try_push(frame(2, 2, i));
                thread::sleep(Duration::from_millis(2));
            }
            producer_queue.close();
        });

        let mut source = VideoPipeSource::new(Arc::clone(&queue), 2, 2, 30.0);
        let mut sink = Vec::new();
        let stats = source.write_to(&mut sink, &CancellationToken::new()).unwrap();
        producer.join().unwrap();

        assert_eq!(stats.items, 10);
        assert_eq!(sink.len(), 10 * 16);
        for (i, chunk) in sink.chunks(16).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn skips_frames_of_wrong_size() {
        let queue = Arc::new(MediaQueue::bounded(8));
        queue.try_push(frame(2, 2, 1));
        queue.try_push(frame(4, 4, 2));
        queue.try_push(frame(2, 2, 3));
        queue.close();

        let mut sink = Vec::new();
        let stats = VideoPipeSource::new(queue, 2, 2, 30.0)
            .write_to(&mut sink, &CancellationToken::new())
            .unwrap();
        assert_eq!(stats.items, 2);
        assert_eq!(sink.len(), 32);
    }

    #[test]
    fn cancellation_stops_an_idle_stream() {
        let queue = Arc::new(MediaQueue::bounded(8));
        queue.try_push(frame(2, 2, 7));
        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let mut sink = Vec::new();
        let stats = VideoPipeSource::new(queue, 2, 2, 30.0).write_to(&mut sink, &cancel).unwrap();
        canceller.join().unwrap();
        assert_eq!(stats.items, 1);
    }

    #[test]
    fn fractional_rates_keep_precision() {
        assert_eq!(format_rate(30.0), "30");
        assert_eq!(format_rate(29.97), "29.97");
    }
}
