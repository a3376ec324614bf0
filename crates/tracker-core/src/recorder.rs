use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::persist::persist_rows;
use crate::sampler::{Sampler, SamplerShared};
use crate::{PoseSource, RowFormat, RowSink, TrackerConfig, TrialContext};

/// Observable lifecycle state. `StoppingJoin` is transient inside
/// [`Recorder::stop_recording`] and never observable from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Persisting,
}

/// Per-channel accounting for the most recently completed session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionCounters {
    pub samples: Vec<u64>,
    pub repeats: Vec<u64>,
}

/// Handle on the persistence thread spawned by [`Recorder::stop_recording`].
/// Dropping it detaches the thread (fire-and-forget); hosts that need to
/// order against persistence completion call [`PersistHandle::wait`].
pub struct PersistHandle {
    done: Option<crossbeam_channel::Receiver<()>>,
}

impl PersistHandle {
    /// Handle that is already complete, returned on no-op stop paths.
    pub fn finished() -> Self {
        Self { done: None }
    }

    pub fn is_finished(&self) -> bool {
        match &self.done {
            // the sender lives on the persistence thread, disconnect = done
            Some(rx) => matches!(
                rx.try_recv(),
                Err(crossbeam_channel::TryRecvError::Disconnected)
            ),
            None => true,
        }
    }

    pub fn wait(self) {
        if let Some(rx) = self.done {
            let _ = rx.recv();
        }
    }
}

/// Owns one tracker's recording lifecycle: Idle -> Recording -> (join) ->
/// Persisting -> Idle. Start spawns the sampling thread, stop joins it and
/// hands its buffer to a persistence thread.
pub struct Recorder {
    config: TrackerConfig,
    format: Arc<dyn RowFormat>,
    source: Arc<dyn PoseSource>,
    context: Arc<dyn TrialContext>,
    sink: Arc<dyn RowSink>,
    shared: Arc<SamplerShared>,
    sampler: Option<JoinHandle<crate::sampler::SamplerOutput>>,
    persisting: Option<JoinHandle<()>>,
    last_session: Option<SessionCounters>,
}

impl Recorder {
    pub fn new(
        config: TrackerConfig,
        format: Arc<dyn RowFormat>,
        source: Arc<dyn PoseSource>,
        context: Arc<dyn TrialContext>,
        sink: Arc<dyn RowSink>,
    ) -> Self {
        Self {
            config,
            format,
            source,
            context,
            sink,
            shared: Arc::new(SamplerShared::default()),
            sampler: None,
            persisting: None,
            last_session: None,
        }
    }

    pub fn recording(&self) -> bool {
        self.shared.recording.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RecorderState {
        if self.recording() {
            RecorderState::Recording
        } else if self
            .persisting
            .as_ref()
            .is_some_and(|h| !h.is_finished())
        {
            RecorderState::Persisting
        } else {
            RecorderState::Idle
        }
    }

    /// Ticks taken so far in the current session.
    pub fn sample_count(&self) -> u64 {
        self.shared.sample_count.load(Ordering::Relaxed)
    }

    /// Measured ticks per second over the last full second, diagnostic only.
    pub fn updates_per_second(&self) -> u32 {
        self.shared.updates_per_second.load(Ordering::Relaxed)
    }

    /// Counters from the most recently completed session.
    pub fn last_session(&self) -> Option<&SessionCounters> {
        self.last_session.as_ref()
    }

    /// Begins a session: resets counters, rebuilds the header, spawns the
    /// sampling thread. Calling while already recording is a warned no-op.
    pub fn start_recording(&mut self) {
        if self.recording() {
            warn!("start_recording called while already recording, ignoring");
            return;
        }
        if self.config.channels.is_empty() {
            warn!("no channels configured, tracker stays inert");
            return;
        }

        let labels = self.context.current_labels();
        self.shared.sample_count.store(0, Ordering::SeqCst);
        self.shared.updates_per_second.store(0, Ordering::SeqCst);
        self.shared.cancel.store(false, Ordering::SeqCst);
        self.shared.recording.store(true, Ordering::SeqCst);

        let sampler = Sampler {
            config: self.config.clone(),
            format: Arc::clone(&self.format),
            source: Arc::clone(&self.source),
            labels,
            shared: Arc::clone(&self.shared),
        };
        match thread::Builder::new()
            .name("pose-sampler".into())
            .spawn(move || sampler.run())
        {
            Ok(handle) => {
                self.sampler = Some(handle);
                info!(
                    rate_hz = self.config.target_rate_hz,
                    channels = self.config.channels.len(),
                    "recording started"
                );
            }
            Err(err) => {
                self.shared.recording.store(false, Ordering::SeqCst);
                warn!(%err, "failed to spawn sampling thread, tracker stays idle");
            }
        }
    }

    /// Ends the session: signals the sampling thread, blocks until it is
    /// joined (no row is appended after this returns), then spawns the
    /// persistence thread. Calling while not recording is a warned no-op.
    pub fn stop_recording(&mut self) -> PersistHandle {
        if !self.shared.recording.swap(false, Ordering::SeqCst) {
            warn!("stop_recording called while not recording, ignoring");
            return PersistHandle::finished();
        }

        let output = match self.sampler.take() {
            Some(handle) => match handle.join() {
                Ok(output) => output,
                Err(_) => {
                    warn!("sampling thread panicked, nothing to persist");
                    return PersistHandle::finished();
                }
            },
            None => {
                warn!("no sampling thread to join");
                return PersistHandle::finished();
            }
        };

        self.shared.sample_count.store(0, Ordering::SeqCst);
        self.last_session = Some(SessionCounters {
            samples: output.per_channel_samples.clone(),
            repeats: output.per_channel_repeats.clone(),
        });

        let format = Arc::clone(&self.format);
        let context = Arc::clone(&self.context);
        let sink = Arc::clone(&self.sink);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        match thread::Builder::new().name("pose-persist".into()).spawn(move || {
            persist_rows(output, format.as_ref(), context.as_ref(), sink.as_ref());
            drop(done_tx);
        }) {
            Ok(handle) => {
                self.persisting = Some(handle);
                PersistHandle { done: Some(done_rx) }
            }
            Err(err) => {
                warn!(%err, "failed to spawn persistence thread, session data dropped");
                PersistHandle::finished()
            }
        }
    }

    /// Defensive teardown for disable/quit paths. Signals cancellation, waits
    /// up to `timeout` for the sampling thread and any in-flight persistence
    /// thread, then abandons whichever did not stop. A missing or
    /// already-stopped thread is a no-op. No new persistence runs here.
    pub fn shutdown(&mut self, timeout: Duration) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.shared.recording.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + timeout;
        drain_thread(self.sampler.take(), deadline, "sampling");
        drain_thread(self.persisting.take(), deadline, "persistence");
    }
}

fn drain_thread<T>(handle: Option<JoinHandle<T>>, deadline: Instant, what: &str) {
    let Some(handle) = handle else { return };
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    if handle.is_finished() {
        let _ = handle.join();
    } else {
        warn!("{what} thread did not stop within timeout, abandoning");
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.sampler.is_some() || self.persisting.is_some() {
            self.shutdown(Duration::from_millis(250));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelId, ChannelSample, SourceError};
    use model::{DataCategory, DataRow, DataTable, Header, Pose, TrialLabels, Vec3};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    struct MovementFormat;

    impl RowFormat for MovementFormat {
        fn descriptor(&self) -> &str {
            "movement"
        }

        fn header(&self) -> Header {
            Header::new(["participant", "tracked", "pos_x", "time_ms", "phase"])
        }

        fn format_row(&self, s: &ChannelSample<'_>) -> DataRow {
            let mut row = DataRow::new();
            row.push("participant", &s.labels.participant);
            row.push("tracked", s.channel_label);
            row.push("pos_x", format!("{:.4}", s.pose.position.x));
            row.push("time_ms", format!("{:.4}", s.elapsed_ms));
            row.push("phase", &s.labels.phase);
            row
        }
    }

    /// Channel 0 moves every query; channel 1 never moves.
    struct SplitSource {
        ticks: AtomicU32,
    }

    impl SplitSource {
        fn new() -> Self {
            Self { ticks: AtomicU32::new(0) }
        }
    }

    impl PoseSource for SplitSource {
        fn query_channel(&self, channel: &ChannelId) -> Result<Pose, SourceError> {
            match channel {
                ChannelId::Index(0) => {
                    let t = self.ticks.fetch_add(1, Ordering::SeqCst);
                    Ok(Pose::from_position(Vec3::new(t as f32, 0.0, 0.0)))
                }
                _ => Ok(Pose::from_position(Vec3::new(5.0, 5.0, 5.0))),
            }
        }
    }

    struct StaticContext;

    impl TrialContext for StaticContext {
        fn current_labels(&self) -> TrialLabels {
            TrialLabels {
                participant: "p01".into(),
                block: 1,
                trial: 3,
                phase: "reach".into(),
                task: "grasp".into(),
                object_name: "thumb".into(),
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

    fn recorder_with(config: TrackerConfig, sink: Arc<CaptureSink>) -> Recorder {
        Recorder::new(
            config,
            Arc::new(MovementFormat),
            Arc::new(SplitSource::new()),
            Arc::new(StaticContext),
            sink,
        )
    }

    fn record_for(recorder: &mut Recorder, min_ticks: u64) -> PersistHandle {
        recorder.start_recording();
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.sample_count() < min_ticks && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        recorder.stop_recording()
    }

    #[test]
    fn full_cycle_persists_moving_channel_rows() {
        let sink = Arc::new(CaptureSink::default());
        let cfg = TrackerConfig::new(vec![ChannelId::Index(0)]).with_rate(500);
        let mut recorder = recorder_with(cfg, Arc::clone(&sink));

        let started = Instant::now();
        record_for(&mut recorder, 25).wait();
        let wall_ms = started.elapsed().as_secs_f64() * 1000.0;

        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        let (table, name, category) = &saved[0];
        assert_eq!(name, "grasp_thumb_movement");
        assert_eq!(*category, DataCategory::Trackers);

        // strictly increasing source: a row per tick, zero repeats
        let counters = recorder.last_session().unwrap();
        assert_eq!(counters.repeats, vec![0]);
        assert_eq!(table.row_count() as u64, counters.samples[0]);
        assert!(table.row_count() >= 25);

        // no row is stamped after stop returned
        for row in table.rows() {
            let t: f64 = row.get("time_ms").unwrap().parse().unwrap();
            assert!(t <= wall_ms);
        }
    }

    #[test]
    fn static_second_channel_contributes_one_row() {
        let sink = Arc::new(CaptureSink::default());
        let cfg =
            TrackerConfig::new(vec![ChannelId::Index(0), ChannelId::Index(1)]).with_rate(500);
        let mut recorder = recorder_with(cfg, Arc::clone(&sink));

        record_for(&mut recorder, 20).wait();

        let counters = recorder.last_session().unwrap().clone();
        assert_eq!(counters.samples[1], 1);
        assert!(counters.repeats[1] >= 19);
        assert_eq!(counters.repeats[0], 0);

        let saved = sink.saved.lock().unwrap();
        let table = &saved[0].0;
        assert_eq!(
            table.row_count() as u64,
            counters.samples[0] + counters.samples[1]
        );
        assert_eq!(
            table.rows().iter().filter(|r| r.get("tracked") == Some("1")).count(),
            1
        );
    }

    #[test]
    fn rows_carry_trial_labels_and_ordered_times() {
        let sink = Arc::new(CaptureSink::default());
        let cfg = TrackerConfig::new(vec![ChannelId::Index(0)]).with_rate(500);
        let mut recorder = recorder_with(cfg, Arc::clone(&sink));

        record_for(&mut recorder, 10).wait();

        let saved = sink.saved.lock().unwrap();
        let table = &saved[0].0;
        let times: Vec<f64> = table
            .rows()
            .iter()
            .map(|r| r.get("time_ms").unwrap().parse().unwrap())
            .collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert!(table
            .rows()
            .iter()
            .all(|r| r.get("participant") == Some("p01") && r.get("phase") == Some("reach")));
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let sink = Arc::new(CaptureSink::default());
        let cfg = TrackerConfig::new(vec![ChannelId::Index(0)]).with_rate(500);
        let mut recorder = recorder_with(cfg, Arc::clone(&sink));

        recorder.stop_recording().wait();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(sink.saved.lock().unwrap().is_empty());

        // a completed session is not altered by a stray stop
        record_for(&mut recorder, 5).wait();
        let rows_before = sink.saved.lock().unwrap()[0].0.row_count();
        recorder.stop_recording().wait();
        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0.row_count(), rows_before);
    }

    #[test]
    fn start_while_recording_is_a_noop() {
        let sink = Arc::new(CaptureSink::default());
        let cfg = TrackerConfig::new(vec![ChannelId::Index(0)]).with_rate(500);
        let mut recorder = recorder_with(cfg, Arc::clone(&sink));

        recorder.start_recording();
        assert!(recorder.recording());
        recorder.start_recording();
        assert!(recorder.recording());
        recorder.stop_recording().wait();
        assert_eq!(sink.saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn no_channels_leaves_recorder_inert() {
        let sink = Arc::new(CaptureSink::default());
        let cfg = TrackerConfig::new(vec![]);
        let mut recorder = recorder_with(cfg, Arc::clone(&sink));

        recorder.start_recording();
        assert!(!recorder.recording());
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn empty_session_persists_header_only_table() {
        struct NeverMoves;
        impl PoseSource for NeverMoves {
            fn query_channel(&self, _: &ChannelId) -> Result<Pose, SourceError> {
                Err(SourceError::Disconnected)
            }
        }

        // stop before the first tick can happen is racy; instead verify the
        // degenerate path with a source whose rows all dedup away after one
        let sink = Arc::new(CaptureSink::default());
        let cfg = TrackerConfig::new(vec![ChannelId::Index(0)]).with_rate(500);
        let mut recorder = Recorder::new(
            cfg,
            Arc::new(MovementFormat),
            Arc::new(NeverMoves),
            Arc::new(StaticContext),
            Arc::clone(&sink) as Arc<dyn RowSink>,
        );

        record_for(&mut recorder, 10).wait();

        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        let table = &saved[0].0;
        assert_eq!(table.header().len(), 5);
        assert_eq!(table.row_count(), 1); // single default-pose row, rest dedup
    }

    #[test]
    fn shutdown_is_safe_with_and_without_thread() {
        let sink = Arc::new(CaptureSink::default());
        let cfg = TrackerConfig::new(vec![ChannelId::Index(0)]).with_rate(500);
        let mut recorder = recorder_with(cfg, Arc::clone(&sink));

        // nothing running
        recorder.shutdown(Duration::from_millis(50));

        recorder.start_recording();
        thread::sleep(Duration::from_millis(10));
        recorder.shutdown(Duration::from_millis(500));
        assert!(!recorder.recording());
        // teardown path persists nothing
        assert!(sink.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn shutdown_waits_for_in_flight_persistence() {
        struct SlowSink {
            saved: Mutex<usize>,
        }
        impl RowSink for SlowSink {
            fn save(
                &self,
                _table: DataTable,
                _name: &str,
                _category: DataCategory,
            ) -> anyhow::Result<()> {
                thread::sleep(Duration::from_millis(50));
                *self.saved.lock().unwrap() += 1;
                Ok(())
            }
        }

        let sink = Arc::new(SlowSink { saved: Mutex::new(0) });
        let cfg = TrackerConfig::new(vec![ChannelId::Index(0)]).with_rate(500);
        let mut recorder = Recorder::new(
            cfg,
            Arc::new(MovementFormat),
            Arc::new(SplitSource::new()),
            Arc::new(StaticContext),
            Arc::clone(&sink) as Arc<dyn RowSink>,
        );

        recorder.start_recording();
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.sample_count() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        let handle = recorder.stop_recording();
        assert!(!handle.is_finished());

        // teardown during Persisting waits the thread out instead of dropping it
        recorder.shutdown(Duration::from_secs(2));
        assert_eq!(*sink.saved.lock().unwrap(), 1);
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(handle.is_finished());
    }

    #[test]
    fn updates_per_second_reads_nonzero_mid_recording() {
        let sink = Arc::new(CaptureSink::default());
        let cfg = TrackerConfig::new(vec![ChannelId::Index(0)]).with_rate(500);
        let mut recorder = recorder_with(cfg, Arc::clone(&sink));

        recorder.start_recording();
        // the gauge publishes after its first full one-second window
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.updates_per_second() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(recorder.recording());
        assert!(recorder.updates_per_second() > 0);
        recorder.stop_recording().wait();
    }
}
