//! VRPN-style multi-channel tracker: samples several sensors of one VRPN
//! device per tick, deduplicates per channel, and records an aperture
//! (distance) metric between two configured sensors.

use std::sync::Arc;
use std::time::Duration;

use mocap_tracker_core::{
    ChannelId, ChannelSample, PersistHandle, PoseSource, Recorder, RowFormat, RowSink,
    TrackerConfig, TrialContext,
};
use model::{DataRow, Header};
use tracing::{info, warn};

mod client;

pub use client::{parse_pos_quat, SensorReport, VrpnClient, VrpnClientConfig, VrpnPoseSource};

#[derive(Clone, Debug)]
pub struct VrpnTrackerConfig {
    /// Sensor ids sampled every tick (IR light id - 1 for PPT).
    pub channels: Vec<u32>,
    /// Labels written into each channel's `tracked` column, parallel to
    /// `channels`.
    pub tracked: Vec<String>,
    /// Sensor ids (not indices) the aperture is computed between. Ids
    /// missing from `channels` yield an aperture of zero.
    pub aperture_sensors: Option<(u32, u32)>,
    pub record_rate_hz: u32,
}

impl Default for VrpnTrackerConfig {
    fn default() -> Self {
        Self {
            channels: vec![0],
            tracked: vec![],
            aperture_sensors: None,
            record_rate_hz: 200,
        }
    }
}

impl VrpnTrackerConfig {
    /// Positions of the aperture sensors within the channel set. Either id
    /// missing means no pair, which the sampler reports as zero.
    fn aperture_pair_indices(&self) -> Option<(usize, usize)> {
        let (a, b) = self.aperture_sensors?;
        let ia = self.channels.iter().position(|&c| c == a)?;
        let ib = self.channels.iter().position(|&c| c == b)?;
        Some((ia, ib))
    }
}

/// Row layout for VRPN movement tables.
pub struct VrpnRowFormat;

impl RowFormat for VrpnRowFormat {
    fn descriptor(&self) -> &str {
        "movement"
    }

    fn header(&self) -> Header {
        Header::new([
            "participant",
            "block",
            "trial",
            "tracked",
            "pos_x",
            "pos_y",
            "pos_z",
            "aperture",
            "time_ms",
            "phase",
        ])
    }

    fn format_row(&self, s: &ChannelSample<'_>) -> DataRow {
        let mut row = DataRow::new();
        row.push("participant", &s.labels.participant);
        row.push("block", s.labels.block.to_string());
        row.push("trial", s.labels.trial.to_string());
        row.push("tracked", s.channel_label);
        row.push("pos_x", format!("{:.4}", s.pose.position.x));
        row.push("pos_y", format!("{:.4}", s.pose.position.y));
        row.push("pos_z", format!("{:.4}", s.pose.position.z));
        row.push("aperture", format!("{:.4}", s.derived));
        row.push("time_ms", format!("{:.4}", s.elapsed_ms));
        row.push("phase", &s.labels.phase);
        row
    }
}

/// Multi-channel tracker over a VRPN pose source. Each configured sensor
/// contributes rows independently; a sensor with no change on a tick is
/// counted as a repeat for that channel only.
pub struct VrpnTracker {
    config: VrpnTrackerConfig,
    address: String,
    recorder: Recorder,
}

impl VrpnTracker {
    pub fn new(
        config: VrpnTrackerConfig,
        address: String,
        source: Arc<dyn PoseSource>,
        context: Arc<dyn TrialContext>,
        sink: Arc<dyn RowSink>,
    ) -> Self {
        let channels: Vec<ChannelId> =
            config.channels.iter().map(|&c| ChannelId::Index(c)).collect();
        let mut tracker_cfg = TrackerConfig::new(channels)
            .with_rate(config.record_rate_hz)
            .with_labels(config.tracked.clone());
        if let Some((a, b)) = config.aperture_pair_indices() {
            tracker_cfg = tracker_cfg.with_derived_pair(a, b);
        } else if config.aperture_sensors.is_some() {
            warn!("aperture sensors are not in the channel set, aperture will be zero");
        }

        let recorder = Recorder::new(
            tracker_cfg,
            Arc::new(VrpnRowFormat),
            source,
            context,
            sink,
        );
        Self {
            config,
            address,
            recorder,
        }
    }

    /// Convenience constructor wiring the tracker to a [`VrpnClient`]'s
    /// latest-report view.
    pub fn with_client(
        config: VrpnTrackerConfig,
        client: &VrpnClient,
        context: Arc<dyn TrialContext>,
        sink: Arc<dyn RowSink>,
    ) -> Self {
        let address = client.address();
        Self::new(config, address, Arc::new(client.source()), context, sink)
    }

    /// Full tracker address, `device@host`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn recording(&self) -> bool {
        self.recorder.recording()
    }

    pub fn sample_count(&self) -> u64 {
        self.recorder.sample_count()
    }

    pub fn updates_per_second(&self) -> u32 {
        self.recorder.updates_per_second()
    }

    pub fn last_session(&self) -> Option<&mocap_tracker_core::SessionCounters> {
        self.recorder.last_session()
    }

    pub fn start_recording(&mut self) {
        if self.config.channels.is_empty() {
            warn!(address = %self.address, "no VRPN channels configured, not recording");
            return;
        }
        info!(
            address = %self.address,
            channels = self.config.channels.len(),
            "starting VRPN tracker recording"
        );
        self.recorder.start_recording();
    }

    pub fn stop_recording(&mut self) -> PersistHandle {
        self.recorder.stop_recording()
    }

    /// Defensive teardown for disable/quit paths.
    pub fn shutdown(&mut self, timeout: Duration) {
        self.recorder.shutdown(timeout);
    }
}
