//! Session lifecycle: wiring decoded device traffic through the ring buffer
//! into the raw file and out to downstream consumers.
//!
//! One [`Acquisition`] owns both sockets, the negotiated metadata, and at
//! most one running session at a time. The event pump routes decoded blocks
//! into the session ring while running, or straight out to raw-frame
//! subscribers while idle. The consumer loop drains the ring in push order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use ndarray::Axis;
use tracing::{debug, info, warn};

use crate::client::{ClientEvent, ControlClient, DataClient};
use crate::error::{Error, Result};
use crate::exfil::RawWriter;
use crate::protocol::{DeviceInfo, ReplyFrame, SampleBlock};
use crate::ring::RingBuffer;

/// Slots in the session ring. Absorbs consumer stalls around a second long
/// at typical block rates before the producer starts blocking.
pub const RING_SLOTS: usize = 40;
/// Depth of each fan-out channel; laggards drop data, they never stall
/// acquisition.
const FANOUT_DEPTH: usize = 1024;

/// Asks the surrounding application whether clobbering `path` is ok.
pub trait OverwritePrompt: Send + Sync {
    fn confirm_overwrite(&self, path: &Path) -> bool;
}

/// Refuses every overwrite. The safe default with no UI attached.
pub struct NeverOverwrite;

impl OverwritePrompt for NeverOverwrite {
    fn confirm_overwrite(&self, _path: &Path) -> bool {
        false
    }
}

/// For runs that were told up front they may clobber.
pub struct AlwaysOverwrite;

impl OverwritePrompt for AlwaysOverwrite {
    fn confirm_overwrite(&self, _path: &Path) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub host: String,
    pub command_port: u16,
    pub data_port: u16,
    pub output_path: PathBuf,
    /// With this off no sink is opened and the overwrite check is skipped;
    /// fan-out still happens.
    pub write_to_file: bool,
}

/// Downstream subscriber registries. All sends are try_send; a full or gone
/// receiver is that receiver's problem.
struct Fanout {
    samples: Mutex<Vec<Sender<Vec<f32>>>>,
    raw_frames: Mutex<Vec<Sender<SampleBlock>>>,
    device_info: Mutex<Vec<Sender<DeviceInfo>>>,
    replies: Mutex<Vec<Sender<ReplyFrame>>>,
}

impl Fanout {
    fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            raw_frames: Mutex::new(Vec::new()),
            device_info: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
        }
    }

    fn send_columns(&self, block: &SampleBlock) {
        let senders = self.samples.lock().unwrap();
        if senders.is_empty() {
            return;
        }
        for col in block.axis_iter(Axis(1)) {
            let values = col.to_vec();
            for tx in senders.iter() {
                let _ = tx.try_send(values.clone());
            }
        }
    }

    fn send_raw_frame(&self, block: SampleBlock) {
        for tx in self.raw_frames.lock().unwrap().iter() {
            let _ = tx.try_send(block.clone());
        }
    }

    fn send_device_info(&self, device: &DeviceInfo) {
        for tx in self.device_info.lock().unwrap().iter() {
            let _ = tx.try_send(device.clone());
        }
    }

    fn send_reply(&self, frame: &ReplyFrame) {
        for tx in self.replies.lock().unwrap().iter() {
            let _ = tx.try_send(frame.clone());
        }
    }
}

/// Acquisition front end: sockets, session lifecycle, fan-out.
pub struct Acquisition {
    config: AcquisitionConfig,
    prompt: Box<dyn OverwritePrompt>,
    info: Arc<RwLock<Option<DeviceInfo>>>,
    running: Arc<AtomicBool>,
    ring: Arc<Mutex<Option<Arc<RingBuffer<SampleBlock>>>>>,
    fanout: Arc<Fanout>,
    command: ControlClient,
    data: DataClient,
    consumer: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Acquisition {
    pub fn new(config: AcquisitionConfig, prompt: Box<dyn OverwritePrompt>) -> Self {
        let (events_tx, events_rx) = unbounded();
        let info = Arc::new(RwLock::new(None));
        let running = Arc::new(AtomicBool::new(false));
        let ring = Arc::new(Mutex::new(None));
        let fanout = Arc::new(Fanout::new());

        let command = ControlClient::new(
            &config.host,
            config.command_port,
            events_tx.clone(),
            Arc::clone(&info),
        );
        let data = DataClient::new(
            &config.host,
            config.data_port,
            events_tx,
            Arc::clone(&info),
        );

        let pump = {
            let running = Arc::clone(&running);
            let ring = Arc::clone(&ring);
            let fanout = Arc::clone(&fanout);
            thread::spawn(move || pump_loop(events_rx, running, ring, fanout))
        };

        Self {
            config,
            prompt,
            info,
            running,
            ring,
            fanout,
            command,
            data,
            consumer: None,
            pump: Some(pump),
        }
    }

    /// Bring up the command socket and kick off the INFO handshake.
    pub fn connect(&mut self) -> Result<()> {
        self.command.connect()?;
        self.command.send_command("INFO")
    }

    /// Pass an arbitrary command through to the device. The reply, if any,
    /// surfaces via [`Acquisition::subscribe_replies`].
    pub fn send_command(&mut self, cmd: &str) -> Result<()> {
        self.command.send_command(cmd)
    }

    /// Negotiated metadata, if the handshake has completed.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.info.read().unwrap().clone()
    }

    /// Forget the negotiated metadata so the next connect re-negotiates.
    /// Only sensible between sessions.
    pub fn clear(&mut self) {
        *self.info.write().unwrap() = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Per-sample fan-out: one `Vec<f32>` per sample instant, push order.
    pub fn subscribe_samples(&self) -> Receiver<Vec<f32>> {
        let (tx, rx) = bounded(FANOUT_DEPTH);
        self.fanout.samples.lock().unwrap().push(tx);
        rx
    }

    /// Whole decoded blocks that arrive while no session is running.
    pub fn subscribe_raw_frames(&self) -> Receiver<SampleBlock> {
        let (tx, rx) = bounded(FANOUT_DEPTH);
        self.fanout.raw_frames.lock().unwrap().push(tx);
        rx
    }

    /// Fires when the INFO handshake completes.
    pub fn subscribe_device_info(&self) -> Receiver<DeviceInfo> {
        let (tx, rx) = bounded(FANOUT_DEPTH);
        self.fanout.device_info.lock().unwrap().push(tx);
        rx
    }

    /// Non-INFO command replies, verbatim.
    pub fn subscribe_replies(&self) -> Receiver<ReplyFrame> {
        let (tx, rx) = bounded(FANOUT_DEPTH);
        self.fanout.replies.lock().unwrap().push(tx);
        rx
    }

    /// Start a session: check quiescence, settle the output question, open
    /// the sink, mark running, connect the data socket, spawn the consumer.
    pub fn start(&mut self) -> Result<()> {
        if let Some(handle) = &self.consumer {
            if !handle.is_finished() {
                if self.is_running() {
                    return Err(Error::AlreadyRunning);
                }
                // A stop is signalled but the consumer hasn't wound down yet
                return Err(Error::StopPending);
            }
            self.reap_consumer();
        }

        let device = self.device_info().ok_or(Error::InfoMissing)?;

        let writer = if self.config.write_to_file {
            let path = &self.config.output_path;
            if path.exists() && !self.prompt.confirm_overwrite(path) {
                return Err(Error::OverwriteDeclined(path.clone()));
            }
            Some(RawWriter::create(path, &device)?)
        } else {
            None
        };

        // Fresh ring per session; a released ring stays cancelled
        let ring = Arc::new(RingBuffer::new(RING_SLOTS));
        *self.ring.lock().unwrap() = Some(Arc::clone(&ring));

        self.running.store(true, Ordering::Release);

        if let Err(e) = self.data.connect() {
            // Unwind so a failed start leaves no session state behind
            self.running.store(false, Ordering::Release);
            *self.ring.lock().unwrap() = None;
            drop(writer);
            if self.config.write_to_file {
                let _ = std::fs::remove_file(&self.config.output_path);
            }
            return Err(e);
        }

        let running = Arc::clone(&self.running);
        let fanout = Arc::clone(&self.fanout);
        self.consumer = Some(thread::spawn(move || {
            consumer_loop(ring, writer, running, fanout);
        }));
        info!("acquisition started");
        Ok(())
    }

    /// Signal the session to stop. Disconnects the data socket, clears the
    /// running flag, and releases the ring so a consumer stuck in `pop()`
    /// exits in bounded time. Does not wait for the consumer; `start()`
    /// refuses until it has wound down (see [`Acquisition::wait_quiescent`]).
    pub fn stop(&mut self) {
        self.data.disconnect();
        self.running.store(false, Ordering::Release);
        if let Some(ring) = self.ring.lock().unwrap().take() {
            ring.release();
            ring.clear();
        }
        info!("acquisition stopping");
    }

    /// Block until the consumer from the last session has exited.
    pub fn wait_quiescent(&mut self) {
        self.reap_consumer();
    }

    /// Tear the whole front end down: stop any session, drop both sockets,
    /// wait for every thread.
    pub fn shutdown(mut self) {
        if self.is_running() {
            self.stop();
        }
        self.reap_consumer();
        self.command.disconnect();
        self.data.disconnect();
        let Self { command, data, pump, .. } = self;
        // The pump exits once both clients (and their event senders) are gone
        drop(command);
        drop(data);
        if let Some(handle) = pump {
            let _ = handle.join();
        }
    }

    fn reap_consumer(&mut self) {
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
    }
}

fn pump_loop(
    events: Receiver<ClientEvent>,
    running: Arc<AtomicBool>,
    ring: Arc<Mutex<Option<Arc<RingBuffer<SampleBlock>>>>>,
    fanout: Arc<Fanout>,
) {
    for event in events {
        match event {
            ClientEvent::Info(device) => {
                info!(
                    nchan = device.nchan,
                    block_len = device.block_len,
                    sfreq = device.sfreq,
                    "device metadata negotiated"
                );
                fanout.send_device_info(&device);
            }
            ClientEvent::Data(block) => {
                if running.load(Ordering::Acquire) {
                    let session_ring = ring.lock().unwrap().clone();
                    if let Some(session_ring) = session_ring {
                        session_ring.push(block);
                    }
                } else {
                    // No session: surface the frame directly
                    fanout.send_raw_frame(block);
                }
            }
            ClientEvent::CommandReply(frame) => {
                debug!(tag = ?frame.tag, bytes = frame.payload.len(), "command reply");
                fanout.send_reply(&frame);
            }
            ClientEvent::Disconnected(channel) => {
                info!(?channel, "device connection closed");
            }
        }
    }
    debug!("event pump exited");
}

fn consumer_loop(
    ring: Arc<RingBuffer<SampleBlock>>,
    mut writer: Option<RawWriter>,
    running: Arc<AtomicBool>,
    fanout: Arc<Fanout>,
) {
    loop {
        // None is the release sentinel: the session is over
        let Some(block) = ring.pop() else { break };
        if !running.load(Ordering::Acquire) {
            break;
        }
        let mut write_failed = false;
        if let Some(w) = writer.as_mut() {
            if let Err(e) = w.write_block(&block) {
                warn!(error = %e, "raw write failed, closing sink");
                write_failed = true;
            }
        }
        if write_failed {
            writer = None;
        }
        fanout.send_columns(&block);
    }
    if let Some(w) = writer.take() {
        if let Err(e) = w.finish() {
            warn!(error = %e, "finalizing raw output failed");
        }
    }
    debug!("consumer loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, INFO_TAG};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    const RECV_WAIT: Duration = Duration::from_secs(5);

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("meg_daq_acq_{}_{}", std::process::id(), name))
    }

    fn info_frame(nchan: u32, block_len: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&nchan.to_be_bytes());
        payload.extend_from_slice(&block_len.to_be_bytes());
        payload.extend_from_slice(&600.0f32.to_be_bytes());
        for _ in 0..nchan {
            payload.extend_from_slice(&1.0f32.to_be_bytes());
        }
        let mut frame = Vec::new();
        frame.extend_from_slice(&INFO_TAG);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    fn data_frame(nchan: usize, cols: usize, base: f32) -> Vec<u8> {
        let mut frame = vec![4u8];
        for i in 0..nchan * cols {
            frame.extend_from_slice(&protocol::swap_f32(base + i as f32).to_ne_bytes());
        }
        frame
    }

    /// Command socket side of a fake device: answer INFO, keep the socket up.
    fn fake_command_server(listener: TcpListener, nchan: u32, block_len: u32) -> JoinHandle<TcpStream> {
        thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut cmd = vec![0u8; 12];
            sock.read_exact(&mut cmd).unwrap();
            sock.write_all(&info_frame(nchan, block_len)).unwrap();
            sock
        })
    }

    fn test_acquisition(
        output: PathBuf,
        write_to_file: bool,
    ) -> (Acquisition, JoinHandle<TcpStream>, TcpListener) {
        let command_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let data_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = AcquisitionConfig {
            host: "127.0.0.1".to_owned(),
            command_port: command_listener.local_addr().unwrap().port(),
            data_port: data_listener.local_addr().unwrap().port(),
            output_path: output,
            write_to_file,
        };
        let command_server = fake_command_server(command_listener, 2, 3);
        (
            Acquisition::new(config, Box::new(NeverOverwrite)),
            command_server,
            data_listener,
        )
    }

    #[test]
    fn full_session_round_trip() {
        let output = scratch_path("session.raw");
        let _ = std::fs::remove_file(&output);
        let (mut daq, command_server, data_listener) = test_acquisition(output.clone(), true);

        let info_rx = daq.subscribe_device_info();
        let samples_rx = daq.subscribe_samples();
        daq.connect().unwrap();
        let device = info_rx.recv_timeout(RECV_WAIT).unwrap();
        assert_eq!(device.nchan, 2);

        let data_server = thread::spawn(move || {
            let (mut sock, _) = data_listener.accept().unwrap();
            sock.write_all(&data_frame(2, 3, 0.0)).unwrap();
            sock.write_all(&data_frame(2, 3, 100.0)).unwrap();
            sock
        });

        daq.start().unwrap();
        assert!(daq.is_running());

        // Six sample instants, in push order, channel-major within each
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(samples_rx.recv_timeout(RECV_WAIT).unwrap());
        }
        assert_eq!(seen[0], vec![0.0, 1.0]);
        assert_eq!(seen[2], vec![4.0, 5.0]);
        assert_eq!(seen[3], vec![100.0, 101.0]);
        assert_eq!(seen[5], vec![104.0, 105.0]);

        daq.stop();
        daq.wait_quiescent();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(&bytes[0..4], b"MEGD");
        let trailer = u32::from_be_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(trailer, 6);

        let sock = data_server.join().unwrap();
        drop(sock);
        drop(command_server.join().unwrap());
        daq.shutdown();
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn start_without_info_is_refused() {
        let (mut daq, command_server, _data_listener) =
            test_acquisition(scratch_path("noinfo.raw"), true);
        assert!(matches!(daq.start(), Err(Error::InfoMissing)));
        // Never connected, so the fake server is still waiting; connect to
        // let it run to completion before teardown
        daq.connect().unwrap();
        drop(command_server.join().unwrap());
        daq.shutdown();
    }

    #[test]
    fn overwrite_declined_aborts_start_cleanly() {
        let output = scratch_path("exists.raw");
        std::fs::write(&output, b"precious").unwrap();
        let (mut daq, command_server, _data_listener) = test_acquisition(output.clone(), true);

        let info_rx = daq.subscribe_device_info();
        daq.connect().unwrap();
        info_rx.recv_timeout(RECV_WAIT).unwrap();

        assert!(matches!(daq.start(), Err(Error::OverwriteDeclined(_))));
        assert!(!daq.is_running());
        // The refused start must not have touched the file
        assert_eq!(std::fs::read(&output).unwrap(), b"precious");

        drop(command_server.join().unwrap());
        daq.shutdown();
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn double_start_is_refused_and_stop_unblocks_consumer() {
        let (mut daq, command_server, data_listener) =
            test_acquisition(scratch_path("double.raw"), false);

        let info_rx = daq.subscribe_device_info();
        daq.connect().unwrap();
        info_rx.recv_timeout(RECV_WAIT).unwrap();

        // One accept per session
        let data_server = thread::spawn(move || {
            let first = data_listener.accept().unwrap().0;
            let second = data_listener.accept().unwrap().0;
            (first, second)
        });

        daq.start().unwrap();
        // No data flowing: the consumer is parked in pop(). A second start
        // must fail without disturbing the live session.
        assert!(matches!(daq.start(), Err(Error::AlreadyRunning)));
        assert!(daq.is_running());

        // stop() releases the ring; the consumer must exit in bounded time
        // (wait_quiescent would hang the test otherwise)
        daq.stop();
        daq.wait_quiescent();

        // Full quiescence reached, so a restart goes through
        daq.start().unwrap();
        daq.stop();
        daq.wait_quiescent();

        let (first, second) = data_server.join().unwrap();
        drop((first, second));
        drop(command_server.join().unwrap());
        daq.shutdown();
    }

    #[test]
    fn idle_frames_surface_as_raw_fallback() {
        let output = scratch_path("fallback.raw");
        let (mut daq, command_server, data_listener) = test_acquisition(output, true);

        let info_rx = daq.subscribe_device_info();
        let raw_rx = daq.subscribe_raw_frames();
        daq.connect().unwrap();
        info_rx.recv_timeout(RECV_WAIT).unwrap();

        // Connect the data socket by hand without starting a session
        let data_server = thread::spawn(move || {
            let (mut sock, _) = data_listener.accept().unwrap();
            sock.write_all(&data_frame(2, 3, 7.0)).unwrap();
            sock
        });
        daq.data.connect().unwrap();

        let block = raw_rx.recv_timeout(RECV_WAIT).unwrap();
        assert_eq!(block.dim(), (2, 3));
        assert_eq!(block[[0, 0]], 7.0);

        drop(data_server.join().unwrap());
        drop(command_server.join().unwrap());
        daq.shutdown();
    }
}
