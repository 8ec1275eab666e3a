//! Raw-sample exfil to disk.
//!
//! The session file is a flat header followed by sample instants in arrival
//! order, widened to the sink's double-precision storage, plus a trailer
//! written at finalize so a reader can tell a clean stop from a crash.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byte_slice_cast::AsByteSlice;
use chrono::{DateTime, Datelike, Timelike, Utc};
use ndarray::Axis;
use tracing::info;

use crate::error::Result;
use crate::protocol::{DeviceInfo, SampleBlock};

pub const FILE_MAGIC: [u8; 4] = *b"MEGD";
pub const FILE_VERSION: u16 = 1;

/// Timestamp string recorded in the session header.
fn session_timestamp(time: &DateTime<Utc>) -> String {
    format!(
        "{}-{:02}-{:02}-{:02}:{:02}:{:02}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// Sequential writer for one acquisition session. Owned exclusively by the
/// consumer loop; nothing else touches the file.
pub struct RawWriter {
    out: BufWriter<File>,
    samples_written: u32,
}

impl RawWriter {
    /// Create the output file and write the session header up front.
    pub fn create(path: &Path, device: &DeviceInfo) -> Result<Self> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&FILE_MAGIC)?;
        out.write_all(&FILE_VERSION.to_be_bytes())?;
        out.write_all(&(device.nchan as u32).to_be_bytes())?;
        out.write_all(&(device.block_len as u32).to_be_bytes())?;
        out.write_all(&device.sfreq.to_be_bytes())?;
        let stamp = session_timestamp(&Utc::now());
        out.write_all(&(stamp.len() as u32).to_be_bytes())?;
        out.write_all(stamp.as_bytes())?;
        for cal in &device.cals {
            out.write_all(&cal.to_be_bytes())?;
        }
        info!(path = %path.display(), "opened raw output");
        Ok(Self {
            out,
            samples_written: 0,
        })
    }

    /// Append one block, one sample instant at a time.
    pub fn write_block(&mut self, block: &SampleBlock) -> Result<()> {
        for col in block.axis_iter(Axis(1)) {
            let widened: Vec<f64> = col.iter().map(|&v| f64::from(v)).collect();
            self.out.write_all(widened.as_byte_slice())?;
            self.samples_written += 1;
        }
        Ok(())
    }

    pub fn samples_written(&self) -> u32 {
        self.samples_written
    }

    /// Write the trailer and flush. Call exactly once, at session stop.
    pub fn finish(mut self) -> Result<()> {
        self.out.write_all(&self.samples_written.to_be_bytes())?;
        self.out.flush()?;
        info!(samples = self.samples_written, "raw output finalized");
        Ok(())
    }
}
