//! Real-time sample acquisition from a two-socket MEG front end, plus the
//! sensor-to-surface projection used by downstream estimation.
//!
//! The device exposes a command socket (metadata and control) and a data
//! socket (raw sample blocks). Decoded blocks move through a bounded ring
//! buffer into a consumer loop that writes the raw session file and fans
//! samples out to whoever subscribed. The geometry module is independent of
//! all of that: it maps sensor coordinates onto the nearest vertices of a
//! dense scalp mesh, split across the machine's cores.

pub mod acquire;
pub mod args;
pub mod client;
pub mod error;
pub mod exfil;
pub mod geometry;
pub mod protocol;
pub mod ring;

pub use acquire::{Acquisition, AcquisitionConfig};
pub use error::{Error, Result};
pub use protocol::{DeviceInfo, SampleBlock};

/// Default device data-socket port.
pub const DATA_PORT: u16 = 6340;
/// Default device command-socket port.
pub const COMMAND_PORT: u16 = 6341;
