//! OpenBCI Cyton driver over USB serial
//!
//! The Cyton streams fixed 33-byte packets through an FTDI dongle:
//!
//! ```text
//! 0      0xA0 header
//! 1      sample number
//! 2..26  8 channels, 24-bit big-endian two's complement
//! 26..32 aux data (ignored)
//! 32     0xC0..=0xC6 footer
//! ```
//!
//! With a Daisy module attached the board interleaves packets: odd sample
//! numbers carry the Cyton's channels 1-8 and the following even sample
//! carries the Daisy's channels 9-16. One 16-channel sample is emitted per
//! pair, which halves the effective rate to 125 Hz.

use crate::config::PollingConfig;
use crate::error::{DeviceError, Result};
use crate::types::{unix_time, ConnectionHints, NO_EVENT};
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortType};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::board::{BoardData, BoardDriver, BoardLayout, BoardStats, SampleRing};

/// FTDI vendor id of the OpenBCI USB dongle
pub const DONGLE_VID: u16 = 0x0403;
/// FTDI product id of the OpenBCI USB dongle
pub const DONGLE_PID: u16 = 0x6015;

const BAUD_RATE: u32 = 115_200;
const PACKET_LEN: usize = 33;
const HEADER: u8 = 0xA0;
const CHANNELS_PER_PACKET: usize = 8;

/// Microvolts per count at the default gain of 24
pub const SCALE_UV: f64 = 4.5 / 24.0 / 8_388_607.0 * 1_000_000.0;

/// One decoded Cyton packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CytonPacket {
    pub sample_number: u8,
    /// Raw 24-bit counts, sign extended
    pub counts: [i32; CHANNELS_PER_PACKET],
    pub footer: u8,
}

impl CytonPacket {
    /// Channel values in microvolts
    pub fn microvolts(&self) -> [f64; CHANNELS_PER_PACKET] {
        self.counts.map(|c| f64::from(c) * SCALE_UV)
    }

    fn parse(frame: &[u8]) -> Self {
        let mut counts = [0i32; CHANNELS_PER_PACKET];
        for (ch, count) in counts.iter_mut().enumerate() {
            let base = 2 + ch * 3;
            *count = i32::from_be_bytes([frame[base], frame[base + 1], frame[base + 2], 0]) >> 8;
        }
        Self {
            sample_number: frame[1],
            counts,
            footer: frame[PACKET_LEN - 1],
        }
    }
}

/// Incremental packet decoder with resynchronisation
///
/// Bytes that do not start a well-framed packet are skipped one at a time
/// until the stream lines up again.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    buffer: Vec<u8>,
    rejected: u64,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete packet
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<CytonPacket> {
        self.buffer.extend_from_slice(bytes);
        let mut packets = Vec::new();
        let mut pos = 0;

        while self.buffer.len() - pos >= PACKET_LEN {
            let frame = &self.buffer[pos..pos + PACKET_LEN];
            if frame[0] == HEADER && (0xC0..=0xC6).contains(&frame[PACKET_LEN - 1]) {
                packets.push(CytonPacket::parse(frame));
                pos += PACKET_LEN;
            } else {
                self.rejected += 1;
                pos += 1;
            }
        }

        self.buffer.drain(..pos);
        packets
    }

    /// Bytes discarded while resynchronising
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

/// Combines interleaved Cyton/Daisy packets into 16-channel samples
#[derive(Debug, Default)]
pub struct DaisyPairer {
    board: Option<CytonPacket>,
}

impl DaisyPairer {
    /// Returns a full sample once a board packet is followed by its daisy packet
    pub fn push(&mut self, packet: CytonPacket) -> Option<(u8, Vec<f64>)> {
        if packet.sample_number % 2 == 1 {
            self.board = Some(packet);
            return None;
        }
        let board = self.board.take()?;
        let mut values = board.microvolts().to_vec();
        values.extend_from_slice(&packet.microvolts());
        Some((board.sample_number, values))
    }
}

/// Locate the OpenBCI dongle by its USB ids
pub fn find_dongle_port() -> Result<String> {
    let ports = serialport::available_ports()?;
    ports
        .into_iter()
        .find_map(|p| match p.port_type {
            SerialPortType::UsbPort(info) if info.vid == DONGLE_VID && info.pid == DONGLE_PID => {
                Some(p.port_name)
            }
            _ => None,
        })
        .ok_or_else(|| {
            DeviceError::Connection(format!(
                "No OpenBCI dongle found ({:04x}:{:04x})",
                DONGLE_VID, DONGLE_PID
            ))
        })
}

/// State shared with the reader thread
#[derive(Debug)]
struct Shared {
    ring: Mutex<SampleRing>,
    markers: Mutex<VecDeque<f64>>,
    stats: Mutex<BoardStats>,
    /// Why the reader gave up, once it has
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn new(layout: &BoardLayout) -> Self {
        Self {
            ring: Mutex::new(SampleRing::new(layout.num_rows, 1)),
            markers: Mutex::new(VecDeque::new()),
            stats: Mutex::new(BoardStats::default()),
            failure: Mutex::new(None),
        }
    }
}

/// Send a single-byte board command, reporting failures as a lost connection
fn send_command<W: Write + ?Sized>(port: &mut W, command: &[u8]) -> Result<()> {
    port.write_all(command).map_err(|e| {
        DeviceError::Connection(format!(
            "Failed to send '{}' to the board: {}",
            String::from_utf8_lossy(command),
            e
        ))
    })
}

/// OpenBCI Cyton (optionally with Daisy) board driver
pub struct CytonBoard {
    daisy: bool,
    layout: BoardLayout,
    config: PollingConfig,
    port: Option<Box<dyn SerialPort>>,
    port_name: Option<String>,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl CytonBoard {
    /// Cyton with 8 channels at 250 Hz
    pub fn new(config: PollingConfig) -> Self {
        Self::build(false, config)
    }

    /// Cyton + Daisy with 16 channels at 125 Hz
    pub fn daisy(config: PollingConfig) -> Self {
        Self::build(true, config)
    }

    fn build(daisy: bool, config: PollingConfig) -> Self {
        let layout = if daisy {
            BoardLayout::standard(2 * CHANNELS_PER_PACKET, 125.0)
        } else {
            BoardLayout::standard(CHANNELS_PER_PACKET, 250.0)
        };
        let shared = Arc::new(Shared::new(&layout));

        Self {
            daisy,
            layout,
            config,
            port: None,
            port_name: None,
            shared,
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    /// Name of the opened serial port, if any
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Fails once the reader thread has lost the serial link
    fn check_link(&self) -> Result<()> {
        match self.shared.failure.lock().as_ref() {
            Some(reason) => Err(DeviceError::Connection(format!(
                "Serial link to {} lost: {}",
                self.port_name.as_deref().unwrap_or("the Cyton dongle"),
                reason
            ))),
            None => Ok(()),
        }
    }

    /// Place markers the reader never consumed onto the final samples
    fn flush_markers(&self) {
        let mut markers = self.shared.markers.lock();
        if markers.is_empty() {
            return;
        }
        let attached = self.shared.ring.lock().attach_markers(
            self.layout.marker_channel,
            &mut markers,
            f64::from(NO_EVENT),
        );
        if !markers.is_empty() {
            tracing::warn!(
                "{} markers arrived after the last sample and were dropped",
                markers.len()
            );
            self.shared.stats.lock().record_dropped_markers(markers.len());
            markers.clear();
        }
        tracing::debug!("Attached {} late markers to final samples", attached);
    }

    /// Soft reset and wait for the `$$$` prompt
    fn handshake(port: &mut dyn SerialPort, timeout: std::time::Duration) -> Result<()> {
        send_command(port, b"v")?;
        let deadline = Instant::now() + timeout;
        let mut reply = Vec::new();
        let mut chunk = [0u8; 64];

        while Instant::now() < deadline {
            match port.read(&mut chunk) {
                Ok(n) => {
                    reply.extend_from_slice(&chunk[..n]);
                    if reply.windows(3).any(|w| w == b"$$$") {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => return Err(DeviceError::Connection(e.to_string())),
            }
        }

        Err(DeviceError::Connection(
            "Board did not answer the reset command".to_string(),
        ))
    }

    fn reader_loop<R: Read>(
        mut port: R,
        shared: Arc<Shared>,
        running: Arc<AtomicBool>,
        layout: BoardLayout,
        daisy: bool,
    ) {
        let mut decoder = PacketDecoder::new();
        let mut pairer = DaisyPairer::default();
        let mut chunk = [0u8; 512];
        let mut rejected = 0;

        while running.load(Ordering::SeqCst) {
            let n = match port.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => {
                    tracing::error!("Cyton serial read failed: {}", e);
                    *shared.failure.lock() = Some(e.to_string());
                    break;
                }
            };

            for packet in decoder.feed(&chunk[..n]) {
                let sample = if daisy {
                    pairer.push(packet)
                } else {
                    Some((packet.sample_number, packet.microvolts().to_vec()))
                };
                let Some((number, eeg)) = sample else {
                    continue;
                };

                let timestamp = unix_time();
                let marker = shared
                    .markers
                    .lock()
                    .pop_front()
                    .unwrap_or(f64::from(NO_EVENT));
                let row = layout.row(f64::from(number), &eeg, timestamp, marker);
                let dropped = shared.ring.lock().push(row);
                shared.stats.lock().record_sample(timestamp, dropped);
            }

            let total = decoder.rejected();
            if total > rejected {
                let mut stats = shared.stats.lock();
                for _ in rejected..total {
                    stats.record_rejected_packet();
                }
                rejected = total;
            }
        }

        tracing::debug!("Cyton reader stopped");
    }
}

impl BoardDriver for CytonBoard {
    fn prepare_session(&mut self, hints: &ConnectionHints) -> Result<()> {
        let name = match &hints.serial_port {
            Some(port) => port.clone(),
            None => find_dongle_port()?,
        };

        let mut port = serialport::new(&name, BAUD_RATE)
            .timeout(self.config.serial_timeout())
            .open()
            .map_err(|e| DeviceError::Connection(format!("Failed to open {}: {}", name, e)))?;

        Self::handshake(port.as_mut(), self.config.handshake_timeout())?;
        // Select 16 or 8 channel mode explicitly
        send_command(port.as_mut(), if self.daisy { b"C" } else { b"c" })?;

        tracing::info!("Cyton session prepared on {}", name);
        self.port = Some(port);
        self.port_name = Some(name);
        Ok(())
    }

    fn release_session(&mut self) {
        if self.reader.is_some() {
            let _ = self.stop_stream();
        }
        if self.port.take().is_some() {
            tracing::info!("Cyton session released");
        }
        self.port_name = None;
    }

    fn is_prepared(&self) -> bool {
        self.port.is_some()
    }

    fn start_stream(&mut self, buffer_size: usize) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| DeviceError::Board("Cyton session is not prepared".to_string()))?;

        *self.shared.ring.lock() = SampleRing::new(self.layout.num_rows, buffer_size);
        self.shared.markers.lock().clear();
        self.shared.stats.lock().reset();
        *self.shared.failure.lock() = None;

        let reader_port = port.try_clone()?;
        send_command(port.as_mut(), b"b")?;
        self.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let layout = self.layout.clone();
        let daisy = self.daisy;
        let handle = std::thread::Builder::new()
            .name("cyton-reader".to_string())
            .spawn(move || Self::reader_loop(reader_port, shared, running, layout, daisy))
            .map_err(|e| DeviceError::Board(format!("Failed to spawn reader: {}", e)))?;
        self.reader = Some(handle);
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(port) = self.port.as_mut() {
            if let Err(e) = port.write_all(b"s") {
                tracing::warn!("Failed to send stop command: {}", e);
            }
        }
        let Some(handle) = self.reader.take() else {
            return Ok(());
        };
        let joined = handle.join();
        self.flush_markers();
        if joined.is_err() {
            return Err(DeviceError::Board("Cyton reader panicked".to_string()));
        }
        Ok(())
    }

    fn insert_marker(&mut self, value: f64) -> Result<()> {
        if self.reader.is_none() {
            return Err(DeviceError::Board(
                "Cannot insert a marker while the stream is stopped".to_string(),
            ));
        }
        self.check_link()?;
        self.shared.markers.lock().push_back(value);
        self.shared.stats.lock().record_marker();
        Ok(())
    }

    fn current_board_data(&mut self, n: usize) -> Result<BoardData> {
        self.check_link()?;
        Ok(self.shared.ring.lock().latest(n))
    }

    fn board_data(&mut self) -> Result<BoardData> {
        Ok(self.shared.ring.lock().drain())
    }

    fn layout(&self) -> BoardLayout {
        self.layout.clone()
    }

    fn stats(&self) -> BoardStats {
        self.shared.stats.lock().clone()
    }
}

impl Drop for CytonBoard {
    fn drop(&mut self) {
        self.release_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(sample_number: u8, counts: [i32; 8]) -> Vec<u8> {
        let mut bytes = vec![HEADER, sample_number];
        for count in counts {
            let be = count.to_be_bytes();
            bytes.extend_from_slice(&be[1..]);
        }
        bytes.extend_from_slice(&[0; 6]);
        bytes.push(0xC0);
        bytes
    }

    #[test]
    fn test_decode_single_packet() {
        let mut decoder = PacketDecoder::new();
        let packets = decoder.feed(&packet(5, [1, -1, 8_388_607, -8_388_608, 0, 2, 3, 4]));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].sample_number, 5);
        assert_eq!(packets[0].counts, [1, -1, 8_388_607, -8_388_608, 0, 2, 3, 4]);
        assert!((packets[0].microvolts()[2] - 187_500.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_split_and_resync() {
        let mut decoder = PacketDecoder::new();
        let mut stream = vec![0x00, 0x42, HEADER];
        stream.extend(packet(1, [10; 8]));
        stream.extend(packet(2, [20; 8]));

        let (a, b) = stream.split_at(20);
        let mut packets = decoder.feed(a);
        packets.extend(decoder.feed(b));

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].counts, [10; 8]);
        assert_eq!(packets[1].sample_number, 2);
        assert_eq!(decoder.rejected(), 3);
    }

    #[test]
    fn test_bad_footer_is_rejected() {
        let mut decoder = PacketDecoder::new();
        let mut bad = packet(1, [0; 8]);
        bad[PACKET_LEN - 1] = 0x00;
        assert!(decoder.feed(&bad).is_empty());
    }

    #[test]
    fn test_daisy_pairing() {
        let mut pairer = DaisyPairer::default();
        let mut decoder = PacketDecoder::new();
        let mut stream = packet(2, [9; 8]);
        stream.extend(packet(3, [1; 8]));
        stream.extend(packet(4, [2; 8]));

        let samples: Vec<_> = decoder
            .feed(&stream)
            .into_iter()
            .filter_map(|p| pairer.push(p))
            .collect();

        // The leading even packet has no board half and is skipped
        assert_eq!(samples.len(), 1);
        let (number, values) = &samples[0];
        assert_eq!(*number, 3);
        assert_eq!(values.len(), 16);
        assert!((values[0] - SCALE_UV).abs() < 1e-12);
        assert!((values[8] - 2.0 * SCALE_UV).abs() < 1e-12);
    }

    #[test]
    fn test_unprepared_board_rejects_stream() {
        let mut board = CytonBoard::new(PollingConfig::default());
        assert!(!board.is_prepared());
        assert!(board.start_stream(100).is_err());
        assert!(board.insert_marker(1.0).is_err());
        assert_eq!(board.layout().eeg_channels.len(), 8);
        assert_eq!(CytonBoard::daisy(PollingConfig::default()).layout().sample_rate, 125.0);
    }

    /// Serves its bytes once, then fails like an unplugged dongle
    struct UnpluggedPort(Vec<u8>);

    impl Read for UnpluggedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                return Err(std::io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
            }
            let n = self.0.len().min(buf.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }
    }

    struct ClosedWriter;

    impl Write for ClosedWriter {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "port closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn board_with_reader(shared: &Arc<Shared>) -> CytonBoard {
        let mut board = CytonBoard::new(PollingConfig::default());
        board.shared = Arc::clone(shared);
        board.reader = Some(std::thread::spawn(|| {}));
        board
    }

    #[test]
    fn test_reader_failure_is_reported() {
        let layout = BoardLayout::standard(CHANNELS_PER_PACKET, 250.0);
        let shared = Arc::new(Shared::new(&layout));
        *shared.ring.lock() = SampleRing::new(layout.num_rows, 100);
        let running = Arc::new(AtomicBool::new(true));

        CytonBoard::reader_loop(
            UnpluggedPort(packet(1, [4; 8])),
            Arc::clone(&shared),
            running,
            layout,
            false,
        );
        assert_eq!(shared.ring.lock().len(), 1);
        assert!(shared.failure.lock().is_some());

        let mut board = board_with_reader(&shared);
        let err = board.insert_marker(7.0).unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
        assert!(err.to_string().contains("device unplugged"));
        assert!(matches!(
            board.current_board_data(10),
            Err(DeviceError::Connection(_))
        ));
        assert_eq!(board.stats().markers_inserted, 0);
    }

    #[test]
    fn test_stop_attaches_late_markers() {
        let layout = BoardLayout::standard(CHANNELS_PER_PACKET, 250.0);
        let shared = Arc::new(Shared::new(&layout));
        {
            let mut ring = shared.ring.lock();
            *ring = SampleRing::new(layout.num_rows, 100);
            for i in 0..2 {
                ring.push(layout.row(i as f64, &[0.0; 8], 100.0 + i as f64, 0.0));
            }
        }
        let mut board = board_with_reader(&shared);
        for _ in 0..3 {
            board.insert_marker(7.0).unwrap();
        }
        board.stop_stream().unwrap();

        let data = board.board_data().unwrap();
        assert_eq!(data.row(layout.marker_channel), &[7.0, 7.0]);
        let stats = board.stats();
        assert_eq!(stats.markers_inserted, 3);
        assert_eq!(stats.markers_dropped, 1);
    }

    #[test]
    fn test_failed_command_write_is_connection_error() {
        let err = send_command(&mut ClosedWriter, b"v").unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
        assert!(err.is_recoverable());
        assert!(send_command(&mut Vec::new(), b"b").is_ok());
    }

    #[test]
    fn test_missing_port_is_connection_error() {
        let mut board = CytonBoard::new(PollingConfig::default());
        let err = board
            .prepare_session(&ConnectionHints::serial("/dev/does-not-exist-eegbridge"))
            .unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
    }
}
