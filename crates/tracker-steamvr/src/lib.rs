//! SteamVR-style tracker: binds to one tracked device by serial number and
//! records its pose (quaternion orientation plus a scalar velocity) at a
//! fixed rate on the shared sampling core.

use std::sync::Arc;
use std::time::Duration;

use mocap_tracker_core::{
    resolve_device_index, ChannelId, ChannelSample, DeviceDirectory, PersistHandle, PoseSource,
    Recorder, RowFormat, RowSink, TrackerConfig, TrialContext,
};
use model::{DataRow, Header, Vec3};
use tracing::{info, warn};

/// Tracking runtime the tracker binds against: pose lookup by device index
/// plus device enumeration. Initialization is lazy and idempotent.
pub trait SteamVrRuntime: PoseSource + DeviceDirectory {
    fn ensure_initialized(&self) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub struct SteamVrTrackerConfig {
    /// Serial number of the tracked device, e.g. "LHR-0B12C3D4".
    pub serial_number: String,
    /// Object label used in output naming.
    pub object_name: String,
    pub record_rate_hz: u32,
}

impl Default for SteamVrTrackerConfig {
    fn default() -> Self {
        Self {
            serial_number: String::new(),
            object_name: "tracker".into(),
            record_rate_hz: 200,
        }
    }
}

/// Row layout for SteamVR movement tables.
pub struct SteamVrRowFormat;

impl RowFormat for SteamVrRowFormat {
    fn descriptor(&self) -> &str {
        "movement_steamvr"
    }

    fn header(&self) -> Header {
        Header::new([
            "participant",
            "block",
            "trial",
            "pos_x",
            "pos_y",
            "pos_z",
            "rot_w",
            "rot_x",
            "rot_y",
            "rot_z",
            "velocity",
            "time_ms",
            "phase",
        ])
    }

    fn format_row(&self, s: &ChannelSample<'_>) -> DataRow {
        let velocity = s.pose.velocity.map(Vec3::abs_sum).unwrap_or(0.0);
        let mut row = DataRow::new();
        row.push("participant", &s.labels.participant);
        row.push("block", s.labels.block.to_string());
        row.push("trial", s.labels.trial.to_string());
        row.push("pos_x", format!("{:.4}", s.pose.position.x));
        row.push("pos_y", format!("{:.4}", s.pose.position.y));
        row.push("pos_z", format!("{:.4}", s.pose.position.z));
        row.push("rot_w", format!("{:.4}", s.pose.orientation.w));
        row.push("rot_x", format!("{:.4}", s.pose.orientation.x));
        row.push("rot_y", format!("{:.4}", s.pose.orientation.y));
        row.push("rot_z", format!("{:.4}", s.pose.orientation.z));
        row.push("velocity", format!("{:.4}", velocity));
        row.push("time_ms", format!("{:.4}", s.elapsed_ms));
        row.push("phase", &s.labels.phase);
        row
    }
}

/// Single-channel tracker bound to a SteamVR device by serial number. Stays
/// inert (start is a warned no-op) until the runtime initializes and the
/// serial resolves to a device slot.
pub struct SteamVrTracker<R: SteamVrRuntime + 'static> {
    config: SteamVrTrackerConfig,
    runtime: Arc<R>,
    context: Arc<dyn TrialContext>,
    sink: Arc<dyn RowSink>,
    bound_index: Option<u32>,
    recorder: Option<Recorder>,
}

impl<R: SteamVrRuntime + 'static> SteamVrTracker<R> {
    pub fn new(
        config: SteamVrTrackerConfig,
        runtime: Arc<R>,
        context: Arc<dyn TrialContext>,
        sink: Arc<dyn RowSink>,
    ) -> Self {
        Self {
            config,
            runtime,
            context,
            sink,
            bound_index: None,
            recorder: None,
        }
    }

    pub fn bound_index(&self) -> Option<u32> {
        self.bound_index
    }

    pub fn recording(&self) -> bool {
        self.recorder.as_ref().is_some_and(Recorder::recording)
    }

    /// Resolves the configured serial to a device slot. Idempotent: a bound
    /// tracker does not re-scan.
    pub fn bind(&mut self) {
        if self.bound_index.is_some() {
            return;
        }
        if let Err(err) = self.runtime.ensure_initialized() {
            warn!(%err, "tracking runtime failed to initialize, tracker stays inert");
            return;
        }
        self.bound_index =
            resolve_device_index(self.runtime.as_ref(), &self.config.serial_number);
    }

    pub fn start_recording(&mut self) {
        self.bind();
        let Some(index) = self.bound_index else {
            warn!(
                serial = %self.config.serial_number,
                "tracker is not bound to a device, not recording"
            );
            return;
        };

        if self.recorder.is_none() {
            let cfg = TrackerConfig::new(vec![ChannelId::Index(index)])
                .with_rate(self.config.record_rate_hz)
                .with_labels(vec![self.config.object_name.clone()]);
            self.recorder = Some(Recorder::new(
                cfg,
                Arc::new(SteamVrRowFormat),
                Arc::clone(&self.runtime) as Arc<dyn PoseSource>,
                Arc::clone(&self.context),
                Arc::clone(&self.sink),
            ));
        }
        info!(index, "starting SteamVR tracker recording");
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.start_recording();
        }
    }

    pub fn stop_recording(&mut self) -> PersistHandle {
        match self.recorder.as_mut() {
            Some(recorder) => recorder.stop_recording(),
            None => {
                warn!("stop_recording on an unbound SteamVR tracker, ignoring");
                PersistHandle::finished()
            }
        }
    }

    /// Defensive teardown for disable/quit paths.
    pub fn shutdown(&mut self, timeout: Duration) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.shutdown(timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocap_tracker_core::SourceError;
    use model::{DataCategory, DataTable, Pose, Quat, TrialLabels};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    /// Two devices; the pose of slot 1 advances on every query.
    struct FakeRuntime {
        init_ok: bool,
        queries: AtomicU32,
    }

    impl FakeRuntime {
        fn new(init_ok: bool) -> Self {
            Self { init_ok, queries: AtomicU32::new(0) }
        }
    }

    impl DeviceDirectory for FakeRuntime {
        fn device_count(&self) -> u32 {
            3
        }

        fn serial_number(&self, index: u32) -> Option<String> {
            match index {
                0 => Some("LHR-OTHER".into()),
                1 => Some("LHR-TARGET".into()),
                _ => None,
            }
        }
    }

    impl PoseSource for FakeRuntime {
        fn query_channel(&self, channel: &ChannelId) -> Result<Pose, SourceError> {
            if *channel != ChannelId::Index(1) {
                return Err(SourceError::Unavailable(channel.clone()));
            }
            let t = self.queries.fetch_add(1, Ordering::SeqCst) as f32;
            Ok(Pose {
                position: Vec3::new(t * 0.001, 0.0, 0.0),
                orientation: Quat::IDENTITY,
                velocity: Some(Vec3::new(0.5, -0.25, 0.25)),
            })
        }
    }

    impl SteamVrRuntime for FakeRuntime {
        fn ensure_initialized(&self) -> anyhow::Result<()> {
            if !self.init_ok {
                anyhow::bail!("no HMD present");
            }
            Ok(())
        }
    }

    struct StaticContext;

    impl TrialContext for StaticContext {
        fn current_labels(&self) -> TrialLabels {
            TrialLabels {
                participant: "p02".into(),
                block: 2,
                trial: 7,
                phase: "hold".into(),
                task: "reach".into(),
                object_name: "right_hand".into(),
            }
        }
    }

    #[derive(Default)]
    struct CaptureSink {
        saved: Mutex<Vec<(DataTable, String, DataCategory)>>,
    }

    impl RowSink for CaptureSink {
        fn save(
            &self,
            table: DataTable,
            name: &str,
            category: DataCategory,
        ) -> anyhow::Result<()> {
            self.saved.lock().unwrap().push((table, name.into(), category));
            Ok(())
        }
    }

    fn tracker(
        init_ok: bool,
        serial: &str,
        sink: Arc<CaptureSink>,
    ) -> SteamVrTracker<FakeRuntime> {
        let config = SteamVrTrackerConfig {
            serial_number: serial.into(),
            object_name: "right_hand".into(),
            record_rate_hz: 500,
        };
        SteamVrTracker::new(
            config,
            Arc::new(FakeRuntime::new(init_ok)),
            Arc::new(StaticContext),
            sink,
        )
    }

    #[test]
    fn binds_to_matching_serial() {
        let mut t = tracker(true, "LHR-TARGET", Arc::new(CaptureSink::default()));
        t.bind();
        assert_eq!(t.bound_index(), Some(1));
    }

    #[test]
    fn failed_runtime_init_leaves_tracker_inert() {
        let sink = Arc::new(CaptureSink::default());
        let mut t = tracker(false, "LHR-TARGET", Arc::clone(&sink));
        t.start_recording();
        assert!(!t.recording());
        t.stop_recording().wait();
        assert!(sink.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_serial_leaves_tracker_inert() {
        let mut t = tracker(true, "LHR-NOPE", Arc::new(CaptureSink::default()));
        t.start_recording();
        assert!(!t.recording());
        assert_eq!(t.bound_index(), None);
    }

    #[test]
    fn records_and_persists_movement_table() {
        let sink = Arc::new(CaptureSink::default());
        let mut t = tracker(true, "LHR-TARGET", Arc::clone(&sink));

        t.start_recording();
        assert!(t.recording());
        let deadline = Instant::now() + Duration::from_secs(5);
        while sampled_ticks(&t) < 10 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        t.stop_recording().wait();
        assert!(!t.recording());

        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        let (table, name, category) = &saved[0];
        assert_eq!(name, "reach_right_hand_movement_steamvr");
        assert_eq!(*category, DataCategory::Trackers);
        assert!(table.row_count() >= 10);

        let first = &table.rows()[0];
        assert_eq!(first.get("participant"), Some("p02"));
        assert_eq!(first.get("block"), Some("2"));
        assert_eq!(first.get("rot_w"), Some("1.0000"));
        // |0.5| + |-0.25| + |0.25|
        assert_eq!(first.get("velocity"), Some("1.0000"));
    }

    fn sampled_ticks(t: &SteamVrTracker<FakeRuntime>) -> u64 {
        t.recorder.as_ref().map(Recorder::sample_count).unwrap_or(0)
    }
}
