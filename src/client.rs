//! TCP clients for the two device sockets.
//!
//! One client per channel, each with a blocking read loop on its own thread.
//! Decoded traffic is forwarded as [`ClientEvent`]s over a shared channel.
//! Neither client retries on its own; reconnection is an explicit
//! `connect()` from the caller.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{self, DeviceInfo, ReplyFrame, SampleBlock};

/// Which of the two device sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Command,
    Data,
}

/// Decoded traffic out of the read loops.
#[derive(Debug)]
pub enum ClientEvent {
    /// INFO handshake completed on the command socket. Fires once per
    /// negotiation; repeat INFO replies are dropped at the client.
    Info(DeviceInfo),
    /// Reply to some other command, surfaced as-is.
    CommandReply(ReplyFrame),
    /// One decoded sample block off the data socket.
    Data(SampleBlock),
    /// A read loop observed EOF or a socket error.
    Disconnected(Channel),
}

/// Client for the command socket: sends framed commands, parses replies.
pub struct ControlClient {
    host: String,
    port: u16,
    events: Sender<ClientEvent>,
    info: Arc<RwLock<Option<DeviceInfo>>>,
    stream: Option<TcpStream>,
    connected: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl ControlClient {
    pub fn new(
        host: &str,
        port: u16,
        events: Sender<ClientEvent>,
        info: Arc<RwLock<Option<DeviceInfo>>>,
    ) -> Self {
        Self {
            host: host.to_owned(),
            port,
            events,
            info,
            stream: None,
            connected: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the socket and start the read loop. No-op when already up.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.reap_reader();
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        let reader_stream = stream.try_clone()?;
        self.connected.store(true, Ordering::Release);
        info!(host = %self.host, port = self.port, "command socket up");

        let events = self.events.clone();
        let info = Arc::clone(&self.info);
        let connected = Arc::clone(&self.connected);
        self.reader = Some(thread::spawn(move || {
            command_read_loop(reader_stream, events, info, connected);
        }));
        self.stream = Some(stream);
        Ok(())
    }

    /// Frame and write a command. Returns once the bytes are handed to the
    /// socket; the reply arrives later through the event channel.
    pub fn send_command(&mut self, cmd: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(&protocol::encode_command(cmd))?;
        debug!(cmd, "command sent");
        Ok(())
    }

    /// Shut the socket down and wait for the read loop to exit.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected.store(false, Ordering::Release);
        self.reap_reader();
    }

    fn reap_reader(&mut self) {
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

fn command_read_loop(
    mut stream: TcpStream,
    events: Sender<ClientEvent>,
    info: Arc<RwLock<Option<DeviceInfo>>>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match ReplyFrame::read_from(&mut stream) {
            Ok(frame) if frame.tag == protocol::INFO_TAG => {
                match DeviceInfo::parse(&frame.payload) {
                    Ok(parsed) => {
                        let mut slot = info.write().unwrap();
                        if slot.is_some() {
                            warn!("repeat INFO reply ignored, metadata already negotiated");
                        } else {
                            *slot = Some(parsed.clone());
                            drop(slot);
                            let _ = events.send(ClientEvent::Info(parsed));
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed INFO reply"),
                }
            }
            Ok(frame) => {
                let _ = events.send(ClientEvent::CommandReply(frame));
            }
            Err(e) => {
                debug!(error = %e, "command read loop ending");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
    let _ = events.send(ClientEvent::Disconnected(Channel::Command));
}

/// Client for the data socket: frames fixed-size sample messages using the
/// negotiated metadata and emits decoded blocks.
pub struct DataClient {
    host: String,
    port: u16,
    events: Sender<ClientEvent>,
    info: Arc<RwLock<Option<DeviceInfo>>>,
    stream: Option<TcpStream>,
    connected: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl DataClient {
    pub fn new(
        host: &str,
        port: u16,
        events: Sender<ClientEvent>,
        info: Arc<RwLock<Option<DeviceInfo>>>,
    ) -> Self {
        Self {
            host: host.to_owned(),
            port,
            events,
            info,
            stream: None,
            connected: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the socket and start the read loop. No-op when already up.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.reap_reader();
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        let reader_stream = stream.try_clone()?;
        self.connected.store(true, Ordering::Release);
        info!(host = %self.host, port = self.port, "data socket up");

        let events = self.events.clone();
        let info = Arc::clone(&self.info);
        let connected = Arc::clone(&self.connected);
        self.reader = Some(thread::spawn(move || {
            data_read_loop(reader_stream, events, info, connected);
        }));
        self.stream = Some(stream);
        Ok(())
    }

    /// Shut the socket down and wait for the read loop to exit.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected.store(false, Ordering::Release);
        self.reap_reader();
    }

    fn reap_reader(&mut self) {
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

fn data_read_loop(
    mut stream: TcpStream,
    events: Sender<ClientEvent>,
    info: Arc<RwLock<Option<DeviceInfo>>>,
    connected: Arc<AtomicBool>,
) {
    // Until the metadata lands we can't frame the stream; anything read is
    // noise and gets dropped.
    let device = loop {
        if let Some(device) = info.read().unwrap().clone() {
            break device;
        }
        let mut scratch = [0u8; 4096];
        match stream.read(&mut scratch) {
            Ok(0) | Err(_) => {
                connected.store(false, Ordering::Release);
                let _ = events.send(ClientEvent::Disconnected(Channel::Data));
                return;
            }
            Ok(n) => debug!(bytes = n, "dropping data ahead of INFO handshake"),
        }
    };

    // Metadata is immutable from here on, so frame size and channel count
    // are read exactly once, not per message.
    let frame_len = device.data_frame_len();
    let mut msg = vec![0u8; frame_len];
    loop {
        // read_exact rides out partial socket reads
        if let Err(e) = stream.read_exact(&mut msg) {
            debug!(error = %e, "data read loop ending");
            break;
        }
        match protocol::decode_samples(&msg, device.nchan) {
            Ok(block) => {
                let _ = events.send(ClientEvent::Data(block));
            }
            Err(e) => warn!(error = %e, "dropping undecodable sample message"),
        }
    }
    connected.store(false, Ordering::Release);
    let _ = events.send(ClientEvent::Disconnected(Channel::Data));
}
