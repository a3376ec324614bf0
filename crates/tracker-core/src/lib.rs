//! Core tracker lifecycle and high-rate sampling used by the device crates.
//!
//! A [`Recorder`] owns one recording session at a time: starting spawns a
//! dedicated sampling thread that polls a [`PoseSource`] at a fixed target
//! rate, stopping joins that thread and hands the collected rows to a
//! persistence thread which drains them into a table for the [`RowSink`].

use model::{DataCategory, DataRow, DataTable, Header, Pose, TrialLabels};

mod config;
mod persist;
mod recorder;
mod resolve;
mod sampler;

pub use config::TrackerConfig;
pub use recorder::{PersistHandle, Recorder, RecorderState, SessionCounters};
pub use resolve::{resolve_device_index, DeviceDirectory};

/// One physical tracked point within a tracker's configured set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChannelId {
    Index(u32),
    Name(String),
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Index(i) => write!(f, "{i}"),
            ChannelId::Name(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("channel {0} unavailable")]
    Unavailable(ChannelId),
    #[error("device not connected")]
    Disconnected,
}

/// Pull-based pose provider. Implementations return the latest known pose for
/// a channel and never block on the device; a transient failure is reported
/// as an error the sampler substitutes a default pose for.
pub trait PoseSource: Send + Sync {
    fn query_channel(&self, channel: &ChannelId) -> Result<Pose, SourceError>;
}

/// Long-running connector that keeps a latest-pose store fed from a network
/// or IPC backend. Hosts spawn this on their async runtime and query the
/// paired [`PoseSource`] from the sampling thread.
#[async_trait::async_trait]
pub trait PoseFeed: Send + Sync {
    async fn run(&self) -> Result<(), SourceError>;
}

/// Experiment bookkeeping the host supplies. Queried once when a session
/// starts and once more when its table is named for persistence.
pub trait TrialContext: Send + Sync {
    fn current_labels(&self) -> TrialLabels;
}

/// Persistence backend for completed session tables.
pub trait RowSink: Send + Sync {
    fn save(&self, table: DataTable, name: &str, category: DataCategory) -> anyhow::Result<()>;
}

/// Context handed to a [`RowFormat`] for one sampled channel on one tick.
pub struct ChannelSample<'a> {
    pub labels: &'a TrialLabels,
    pub channel: &'a ChannelId,
    pub channel_label: &'a str,
    pub pose: &'a Pose,
    /// Derived two-channel metric for this tick; zero for channels outside
    /// the configured pair.
    pub derived: f32,
    pub elapsed_ms: f64,
}

/// Per-tracker row layout: the column header, a measurement descriptor used
/// in output naming, and the rendering of one channel sample into a row.
pub trait RowFormat: Send + Sync {
    fn descriptor(&self) -> &str;
    fn header(&self) -> Header;
    fn format_row(&self, sample: &ChannelSample<'_>) -> DataRow;
}

/// Output name for one session's table: `task_object_descriptor`.
pub fn data_name(labels: &TrialLabels, descriptor: &str) -> String {
    [labels.task.as_str(), labels.object_name.as_str(), descriptor].join("_")
}
