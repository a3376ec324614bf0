use std::time::Duration;

use crate::ChannelId;

/// Sampling configuration for one tracker instance. Fixed for the duration
/// of a recording session.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Target sampling rate in Hz. 200 matches the PPT/SteamVR setups the
    /// recorder was built for.
    pub target_rate_hz: u32,
    /// Ordered channel set sampled every tick.
    pub channels: Vec<ChannelId>,
    /// Labels written into each channel's rows, parallel to `channels`.
    pub channel_labels: Vec<String>,
    /// Indices into `channels` of the two points a distance-style metric is
    /// computed between. Out-of-range indices yield a metric of zero.
    pub derived_pair: Option<(usize, usize)>,
}

impl TrackerConfig {
    pub fn new(channels: Vec<ChannelId>) -> Self {
        let channel_labels = channels.iter().map(|c| c.to_string()).collect();
        Self {
            target_rate_hz: 200,
            channels,
            channel_labels,
            derived_pair: None,
        }
    }

    pub fn with_rate(mut self, hz: u32) -> Self {
        self.target_rate_hz = hz.max(1);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.channel_labels = labels;
        // keep the parallel arrays the same length
        while self.channel_labels.len() < self.channels.len() {
            let i = self.channel_labels.len();
            self.channel_labels.push(self.channels[i].to_string());
        }
        self.channel_labels.truncate(self.channels.len());
        self
    }

    pub fn with_derived_pair(mut self, a: usize, b: usize) -> Self {
        self.derived_pair = Some((a, b));
        self
    }

    /// Fixed sleep between ticks, `1000 / target_rate_hz` ms. Not
    /// drift-corrected: long sessions run slightly under the nominal rate.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis((1000 / self.target_rate_hz.max(1)).max(1) as u64)
    }
}
