//! Binary wire protocol for the two device sockets.
//!
//! The command socket speaks tagged, length-prefixed frames; the data socket
//! streams format-tagged sample blocks. Length prefixes and header fields are
//! big-endian. Sample values arrive in the device's byte order, which is the
//! opposite of ours, so every value gets swapped on decode.

use std::io::Read;

use ndarray::{Array2, ShapeBuilder};

use crate::error::{Error, Result};

/// Magic prefix on outbound command frames.
pub const COMMAND_MAGIC: [u8; 4] = *b"COMS";
/// Reply tag carrying device metadata.
pub const INFO_TAG: [u8; 4] = *b"INFO";
/// Byte width of single-precision samples, the only format we accept.
pub const FLOAT_WIDTH: usize = 4;
/// Upper bound on a sane reply payload; anything bigger kills the connection.
pub const MAX_REPLY_LEN: usize = 1 << 20;

/// One decoded matrix of samples, channels x block length. Column-major, so
/// one column is a single sample instant across all channels.
pub type SampleBlock = Array2<f32>;

/// Session metadata from the INFO handshake. Written once per negotiation,
/// read-only from then on.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub nchan: usize,
    pub block_len: usize,
    pub sfreq: f32,
    /// Per-channel calibration factors, recorded in the output header.
    pub cals: Vec<f32>,
}

impl DeviceInfo {
    /// Size in bytes of one complete data-socket message.
    pub fn data_frame_len(&self) -> usize {
        1 + FLOAT_WIDTH * self.nchan * self.block_len
    }

    /// Parse an INFO reply payload: u32 channel count, u32 block length,
    /// f32 sampling rate, then one f32 calibration factor per channel.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let expected_head = 12;
        if payload.len() < expected_head {
            return Err(Error::TruncatedFrame {
                expected: expected_head,
                got: payload.len(),
            });
        }
        let nchan = u32::from_be_bytes(payload[0..4].try_into().unwrap()) as usize;
        let block_len = u32::from_be_bytes(payload[4..8].try_into().unwrap()) as usize;
        let sfreq = f32::from_be_bytes(payload[8..12].try_into().unwrap());
        let expected = expected_head + FLOAT_WIDTH * nchan;
        if payload.len() < expected {
            return Err(Error::TruncatedFrame {
                expected,
                got: payload.len(),
            });
        }
        let cals = payload[expected_head..expected]
            .chunks_exact(FLOAT_WIDTH)
            .map(|b| f32::from_be_bytes(b.try_into().unwrap()))
            .collect();
        Ok(Self {
            nchan,
            block_len,
            sfreq,
            cals,
        })
    }
}

/// Frame a command for the command socket: magic, big-endian length, text.
pub fn encode_command(cmd: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + cmd.len());
    frame.extend_from_slice(&COMMAND_MAGIC);
    frame.extend_from_slice(&(cmd.len() as u32).to_be_bytes());
    frame.extend_from_slice(cmd.as_bytes());
    frame
}

/// One inbound command-socket frame: 4-byte ASCII tag, length, payload.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    pub tag: [u8; 4],
    pub payload: Vec<u8>,
}

impl ReplyFrame {
    /// Read one complete frame, blocking across partial reads.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut head = [0u8; 8];
        reader.read_exact(&mut head)?;
        let tag = head[0..4].try_into().unwrap();
        let len = u32::from_be_bytes(head[4..8].try_into().unwrap()) as usize;
        if len > MAX_REPLY_LEN {
            return Err(Error::OversizedFrame(len));
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        Ok(Self { tag, payload })
    }
}

/// Correct a device-order value into host byte order. Involutive for every
/// bit pattern, NaN payloads included.
pub fn swap_f32(v: f32) -> f32 {
    f32::from_bits(v.to_bits().swap_bytes())
}

/// Decode one data-socket message (format byte plus sample bytes) into a
/// sample block. Fails without touching any state when the sample bytes
/// don't divide into whole `nchan`-channel instants.
pub fn decode_samples(msg: &[u8], nchan: usize) -> Result<SampleBlock> {
    let (&format, body) = msg.split_first().ok_or(Error::TruncatedFrame {
        expected: 1,
        got: 0,
    })?;
    if format as usize != FLOAT_WIDTH {
        return Err(Error::UnsupportedFormat(format));
    }
    if nchan == 0 || body.len() % (FLOAT_WIDTH * nchan) != 0 {
        return Err(Error::RaggedBlock {
            bytes: body.len(),
            width: FLOAT_WIDTH,
            nchan,
        });
    }
    let cols = body.len() / (FLOAT_WIDTH * nchan);
    let values: Vec<f32> = body
        .chunks_exact(FLOAT_WIDTH)
        .map(|b| swap_f32(f32::from_ne_bytes(b.try_into().unwrap())))
        .collect();
    // Consecutive wire values walk down the channels of one sample instant
    Array2::from_shape_vec((nchan, cols).f(), values).map_err(|_| Error::RaggedBlock {
        bytes: body.len(),
        width: FLOAT_WIDTH,
        nchan,
    })
}
