//! Minimal VRPN tracker client: receives `Tracker_Pos_Quat` reports over UDP
//! and keeps the latest pose per sensor for pull-based sampling.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use mocap_tracker_core::{ChannelId, PoseFeed, PoseSource, SourceError};
use model::{Pose, Quat, Vec3};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// VRPN message header: length, timeval seconds/microseconds, sender id,
/// type id, padded to an 8-byte boundary. All fields network byte order.
const HEADER_LEN: usize = 24;
/// Body of a Tracker_Pos_Quat report: sensor id (padded) + 3 f64 position
/// + 4 f64 quaternion.
const POS_QUAT_BODY_LEN: usize = 8 + 3 * 8 + 4 * 8;

/// One decoded sensor report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReport {
    pub sensor: u32,
    pub pose: Pose,
}

/// Decodes one Tracker_Pos_Quat datagram. Returns `None` for anything too
/// short or malformed; callers skip and keep receiving.
pub fn parse_pos_quat(datagram: &[u8]) -> Option<SensorReport> {
    if datagram.len() < HEADER_LEN + POS_QUAT_BODY_LEN {
        return None;
    }
    let mut c = Cursor::new(&datagram[..HEADER_LEN]);
    let length = c.read_u32::<BigEndian>().ok()?;
    if (length as usize) < HEADER_LEN + POS_QUAT_BODY_LEN {
        return None;
    }
    let _sec = c.read_u32::<BigEndian>().ok()?;
    let _usec = c.read_u32::<BigEndian>().ok()?;
    let _sender = c.read_i32::<BigEndian>().ok()?;
    let _message_type = c.read_i32::<BigEndian>().ok()?;

    let mut b = Cursor::new(&datagram[HEADER_LEN..]);
    let sensor = b.read_i32::<BigEndian>().ok()?;
    if sensor < 0 {
        return None;
    }
    let _pad = b.read_i32::<BigEndian>().ok()?;
    let px = b.read_f64::<BigEndian>().ok()?;
    let py = b.read_f64::<BigEndian>().ok()?;
    let pz = b.read_f64::<BigEndian>().ok()?;
    let qx = b.read_f64::<BigEndian>().ok()?;
    let qy = b.read_f64::<BigEndian>().ok()?;
    let qz = b.read_f64::<BigEndian>().ok()?;
    let qw = b.read_f64::<BigEndian>().ok()?;

    Some(SensorReport {
        sensor: sensor as u32,
        pose: Pose {
            position: Vec3::new(px as f32, py as f32, pz as f32),
            orientation: Quat::new(qw as f32, qx as f32, qy as f32, qz as f32),
            velocity: None,
        },
    })
}

#[derive(Clone, Debug)]
pub struct VrpnClientConfig {
    /// Tracker device name, e.g. "PPT0".
    pub device: String,
    /// Server host, combined with the device as `device@host`.
    pub host: String,
    /// Server port, VRPN default 3883.
    pub port: u16,
}

impl Default for VrpnClientConfig {
    fn default() -> Self {
        Self {
            device: "PPT0".into(),
            host: "localhost".into(),
            port: 3883,
        }
    }
}

impl VrpnClientConfig {
    /// Full tracker address, `device@host`.
    pub fn address(&self) -> String {
        format!("{}@{}", self.device, self.host)
    }
}

/// Connector that feeds a shared latest-pose map from the VRPN server. The
/// paired [`PoseSource`] view is queried from the sampling thread and always
/// returns the most recent report per sensor.
pub struct VrpnClient {
    config: VrpnClientConfig,
    latest: Arc<RwLock<HashMap<u32, Pose>>>,
}

impl VrpnClient {
    pub fn new(config: VrpnClientConfig) -> Self {
        Self {
            config,
            latest: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Pull-based view over the latest reports, shared with this client.
    pub fn source(&self) -> VrpnPoseSource {
        VrpnPoseSource {
            latest: Arc::clone(&self.latest),
        }
    }

    #[cfg(test)]
    fn inject(&self, report: SensorReport) {
        self.latest.write().insert(report.sensor, report.pose);
    }
}

#[async_trait::async_trait]
impl PoseFeed for VrpnClient {
    async fn run(&self) -> Result<(), SourceError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|_| SourceError::Disconnected)?;
        socket
            .connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|_| SourceError::Disconnected)?;
        info!(address = %self.config.address(), "connected to VRPN server");

        // keepalive so the server keeps streaming reports to this endpoint
        let mut keepalive = time::interval(Duration::from_millis(800));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buf = vec![0u8; 1024];
        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    let _ = socket.send(self.config.device.as_bytes()).await;
                }
                recv = socket.recv(&mut buf) => {
                    let len = recv.map_err(|_| SourceError::Disconnected)?;
                    match parse_pos_quat(&buf[..len]) {
                        Some(report) => {
                            self.latest.write().insert(report.sensor, report.pose);
                        }
                        None => debug!(len, "skipping undecodable VRPN datagram"),
                    }
                }
            }
        }
    }
}

/// Pull-based pose lookup over a [`VrpnClient`]'s latest-report map.
pub struct VrpnPoseSource {
    latest: Arc<RwLock<HashMap<u32, Pose>>>,
}

impl PoseSource for VrpnPoseSource {
    fn query_channel(&self, channel: &ChannelId) -> Result<Pose, SourceError> {
        let ChannelId::Index(sensor) = channel else {
            warn!(%channel, "VRPN channels are sensor indices");
            return Err(SourceError::Unavailable(channel.clone()));
        };
        self.latest
            .read()
            .get(sensor)
            .copied()
            .ok_or_else(|| SourceError::Unavailable(channel.clone()))
    }
}
