use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use model::{DataRow, Pose};
use tracing::{debug, info, warn};

use crate::{ChannelSample, PoseSource, RowFormat, TrackerConfig};
use model::TrialLabels;

/// State shared between the sampling thread and the owning recorder. The
/// `recording` flag is the only start/stop signal; the join in
/// `stop_recording` provides the happens-before edge for the buffer handoff.
#[derive(Default)]
pub(crate) struct SamplerShared {
    pub recording: AtomicBool,
    /// Teardown signal, polled every tick in addition to `recording`.
    pub cancel: AtomicBool,
    pub sample_count: AtomicU64,
    /// Rolling ticks-per-second gauge, diagnostic only.
    pub updates_per_second: AtomicU32,
}

/// Buffer handed from the joined sampling thread to the persistence thread.
pub(crate) struct SamplerOutput {
    /// Rows in sampling order; ticks append their channels in channel order,
    /// so elapsed time is non-decreasing across the whole buffer.
    pub rows: Vec<DataRow>,
    pub per_channel_samples: Vec<u64>,
    pub per_channel_repeats: Vec<u64>,
}

pub(crate) struct Sampler {
    pub config: TrackerConfig,
    pub format: Arc<dyn RowFormat>,
    pub source: Arc<dyn PoseSource>,
    pub labels: TrialLabels,
    pub shared: Arc<SamplerShared>,
}

impl Sampler {
    /// Sampling loop body, run on its own thread while recording.
    pub fn run(self) -> SamplerOutput {
        let n = self.config.channels.len();
        let interval = self.config.tick_interval();
        let started = Instant::now();

        let mut rows: Vec<DataRow> = Vec::new();
        let mut previous: Vec<Option<Pose>> = vec![None; n];
        let mut samples = vec![0u64; n];
        let mut repeats = vec![0u64; n];

        let mut window_ticks = 0u32;
        let mut window_started = Instant::now();

        loop {
            if !self.shared.recording.load(Ordering::SeqCst)
                || self.shared.cancel.load(Ordering::SeqCst)
            {
                if rows.is_empty() {
                    warn!("sampling thread ended with no rows");
                } else {
                    for (i, label) in self.config.channel_labels.iter().enumerate() {
                        info!(
                            channel = %label,
                            samples = samples[i],
                            repeats = repeats[i],
                            "channel finished sampling"
                        );
                    }
                }
                return SamplerOutput {
                    rows,
                    per_channel_samples: samples,
                    per_channel_repeats: repeats,
                };
            }

            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            // Query every channel up front so the derived metric sees one
            // coherent tick. A failed lookup degrades to a default pose.
            let mut poses: Vec<Pose> = Vec::with_capacity(n);
            for channel in &self.config.channels {
                match self.source.query_channel(channel) {
                    Ok(pose) => poses.push(pose),
                    Err(err) => {
                        debug!(%channel, %err, "channel unavailable, substituting default pose");
                        poses.push(Pose::default());
                    }
                }
            }

            let derived = match self.config.derived_pair {
                Some((a, b)) => match (poses.get(a), poses.get(b)) {
                    (Some(pa), Some(pb)) => pa.position.distance(pb.position),
                    _ => {
                        debug!("derived-metric channel index out of range, reporting 0");
                        0.0
                    }
                },
                None => 0.0,
            };

            for (i, channel) in self.config.channels.iter().enumerate() {
                let pose = &poses[i];
                // Only record samples that differ from the previous tick.
                if previous[i].as_ref() == Some(pose) {
                    repeats[i] += 1;
                    continue;
                }
                let in_pair =
                    matches!(self.config.derived_pair, Some((a, b)) if i == a || i == b);
                let sample = ChannelSample {
                    labels: &self.labels,
                    channel,
                    channel_label: &self.config.channel_labels[i],
                    pose,
                    derived: if in_pair { derived } else { 0.0 },
                    elapsed_ms,
                };
                rows.push(self.format.format_row(&sample));
                samples[i] += 1;
            }

            for (slot, pose) in previous.iter_mut().zip(&poses) {
                *slot = Some(*pose);
            }

            self.shared.sample_count.fetch_add(1, Ordering::Relaxed);
            window_ticks += 1;
            if window_started.elapsed() >= Duration::from_secs(1) {
                self.shared
                    .updates_per_second
                    .store(window_ticks, Ordering::Relaxed);
                window_ticks = 0;
                window_started = Instant::now();
            }

            thread::sleep(interval);
        }
    }
}
