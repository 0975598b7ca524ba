use std::collections::VecDeque;
use std::convert::TryFrom;
use std::io::{self, BufRead, BufReader, Write};
use std::mem;
use std::time::Duration;

use serialport::prelude::*;
use serialport::SerialPortType;
use tracing::{info, trace, warn};

pub mod buffer;
pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod loradev;
pub mod runner;
pub mod session;
pub mod testing;
pub mod transceiver;

pub use bus::Bus;
pub use config::{LinkConfig, RadioConfiguration};
pub use error::{
    AcquireError, ConfigError, ConfigFileError, DeviceError, ReceiveError, SendError, StartError,
    TransmitError,
};
pub use loradev::{LoRaChannels, LoraDevice, ModemConfig, RxPacket, Status};
pub use runner::{run, CancelToken, PresentationShell, ShellCommand};
pub use session::{LinkSession, LinkStats, SessionSnapshot};
pub use transceiver::{RadioTransceiver, TransceiverState};

use loradev::RF95_MAX_PAYLOAD;

// Convert byte slice into a hex string
fn hexify(buf: &[u8]) -> String {
    let mut hexstr = String::with_capacity(buf.len() * 2);
    for &b in buf {
        hexstr.push_str(&format!("{:02x}", b));
    }
    hexstr
}

// Convert a hex string into a byte vector
fn unhexify(s: &str) -> Result<Vec<u8>, &'static str> {
    if s.len() % 2 != 0 {
        return Err("odd number of hex digits");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or("invalid hex digit")
        })
        .collect()
}

/// rf95modem firmware reached over a serial port.
///
/// The firmware only knows four modulation presets, so bandwidth and
/// spreading factor are remembered and sent as one `AT+MODE` once the
/// coding rate is set.
pub struct RF95modem {
    settings: SerialPortSettings,
    device: String,
    serial_fd: Option<Box<dyn SerialPort>>,
    reader: Option<BufReader<Box<dyn SerialPort>>>,
    max_pkt_size: usize,
    bandwidth_hz: Option<f64>,
    spreading_factor: Option<u8>,
    // +RX lines seen while waiting for other replies
    rx_queue: VecDeque<RxPacket>,
    // start of a line whose newline has not arrived yet
    partial: String,
}

impl LoraDevice for RF95modem {
    /// Explicitly open serial device and read the firmware status.
    fn open(&mut self) -> Result<(), DeviceError> {
        let fd = serialport::open_with_settings(&self.device, &self.settings)?;
        self.reader = Some(BufReader::new(fd.try_clone()?));
        self.serial_fd = Some(fd);
        self.rx_queue.clear();
        self.partial.clear();

        match self.status() {
            Ok(status) => {
                if status.max_pkt_size > 0 {
                    self.max_pkt_size = status.max_pkt_size;
                }
                info!(
                    device = %self.device,
                    firmware = %status.version,
                    max_pkt_size = self.max_pkt_size,
                    "rf95modem opened"
                );
            }
            Err(e) => warn!(device = %self.device, error = %e, "could not query modem status"),
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.serial_fd.take().is_some() {
            trace!(device = %self.device, "serial device closed");
        }
        self.reader = None;
        self.partial.clear();
        self.bandwidth_hz = None;
        self.spreading_factor = None;
    }

    /// Set frequency on rf95modem.
    fn set_frequency(&mut self, hz: f64) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let cmd_str = format!("AT+FREQ={}\n", hz / 1e6);
        self.raw_write(&cmd_str)?;
        self.expect("+FREQ")?;
        Ok(())
    }

    fn set_bandwidth(&mut self, hz: f64) -> Result<(), DeviceError> {
        if !ModemConfig::supports_bandwidth(hz) {
            return Err(DeviceError::rejected(
                "bandwidth",
                "no rf95modem preset uses this bandwidth",
            ));
        }
        self.bandwidth_hz = Some(hz);
        Ok(())
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), DeviceError> {
        if !ModemConfig::supports_spreading_factor(sf) {
            return Err(DeviceError::rejected(
                "spreading factor",
                "no rf95modem preset uses this spreading factor",
            ));
        }
        self.spreading_factor = Some(sf);
        Ok(())
    }

    /// Resolve the staged modulation to a preset and apply it.
    fn set_coding_rate(&mut self, cr: u8) -> Result<(), DeviceError> {
        let (bw, sf) = match (self.bandwidth_hz, self.spreading_factor) {
            (Some(bw), Some(sf)) => (bw, sf),
            _ => {
                return Err(DeviceError::rejected(
                    "coding rate",
                    "bandwidth and spreading factor must be set first",
                ))
            }
        };
        let mode = ModemConfig::from_params(bw, sf, cr).ok_or_else(|| {
            DeviceError::rejected(
                "coding rate",
                format!("no rf95modem preset for BW{} SF{} CR4/{}", bw / 1e3, sf, cr),
            )
        })?;
        self.set_mode(mode)
    }

    fn max_payload(&self) -> usize {
        self.max_pkt_size
    }

    /// Send data via configured serial device.
    fn send_packet(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let cmd_str = format!("AT+TX={}\n", hexify(data));
        self.raw_write(&cmd_str)?;
        let result = self.read_reply()?;
        let fields: Vec<&str> = result.split_ascii_whitespace().collect();
        if result.starts_with("+SENT ") && fields.len() == 3 {
            let bytes_sent: usize = fields[1]
                .parse()
                .map_err(|_| DeviceError::Protocol(result.trim().to_string()))?;
            if bytes_sent == data.len() {
                Ok(())
            } else {
                Err(DeviceError::Protocol(
                    "Number of bytes sent not matching input length.".to_string(),
                ))
            }
        } else {
            Err(DeviceError::Protocol(format!(
                "unexpected response while sending: {}",
                result.trim()
            )))
        }
    }

    /// Only consumes bytes the port already holds. A `+RX` line still on
    /// the wire stays buffered and is reported on a later call.
    fn packet_available(&mut self) -> Result<bool, DeviceError> {
        self.drain_input()?;
        Ok(!self.rx_queue.is_empty())
    }

    /// Read a packet from the modem.
    fn read_packet(&mut self) -> Result<Option<RxPacket>, DeviceError> {
        self.drain_input()?;
        Ok(self.rx_queue.pop_front())
    }
}

impl RF95modem {
    /// Create a new RF95modem at specified device path and baud rate.
    ///
    /// The device is not opened automatically!
    ///
    /// Receive timeout is configured to 1 second.
    pub fn new(device: &str, baud_rate: u32) -> Self {
        let mut settings: SerialPortSettings = Default::default();
        settings.timeout = Duration::from_secs(1);
        settings.baud_rate = baud_rate;
        RF95modem {
            settings,
            device: device.to_string(),
            serial_fd: None,
            reader: None,
            max_pkt_size: RF95_MAX_PAYLOAD,
            bandwidth_hz: None,
            spreading_factor: None,
            rx_queue: VecDeque::new(),
            partial: String::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn ensure_open(&mut self) -> Result<(), DeviceError> {
        if self.serial_fd.is_none() {
            self.open()?;
        }
        Ok(())
    }

    /// Get current configuration of modem firmware.
    pub fn status(&mut self) -> Result<Status, DeviceError> {
        self.ensure_open()?;
        self.raw_write("AT+INFO\n")?;
        let mut status = Status::new();
        loop {
            let line = self.read_reply()?;
            if let Some(res) = self.match_split(&line, "firmware") {
                status.version = res;
            }
            if let Some(res) = self.match_split(&line, "max pkt size") {
                status.max_pkt_size = res.parse().unwrap_or(status.max_pkt_size);
            }
            if let Some(res) = self.match_split(&line, "frequency") {
                status.frequency = res.parse().unwrap_or(status.frequency);
            }
            if let Some(res) = self.match_split(&line, "rx listener") {
                status.rx_listener = res == "1";
            }
            if let Some(res) = self.match_split(&line, "rx bad") {
                status.rx_bad = res.parse().unwrap_or(0);
            }
            if let Some(res) = self.match_split(&line, "rx good") {
                status.rx_good = res.parse().unwrap_or(0);
            }
            if let Some(res) = self.match_split(&line, "tx good") {
                status.tx_good = res.parse().unwrap_or(0);
            }
            if let Some(res) = self.match_split(&line, "modem config") {
                let mode = res
                    .split('|')
                    .next()
                    .and_then(|code| code.trim().parse::<usize>().ok())
                    .and_then(|code| ModemConfig::try_from(code).ok());
                if let Some(mode) = mode {
                    status.config = mode;
                }
            }
            if line.starts_with("+OK") {
                break;
            }
        }
        Ok(status)
    }

    /// Set config mode on rf95modem.
    pub fn set_mode(&mut self, mode: ModemConfig) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let cmd_str = format!("AT+MODE={}\n", mode as isize);
        self.raw_write(&cmd_str)?;
        self.expect("+OK")?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, DeviceError> {
        self.ensure_open()?;
        let mut serial_str = mem::take(&mut self.partial);
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| DeviceError::Protocol("serial device not open".to_string()))?;

        match reader.read_line(&mut serial_str) {
            Ok(0) => {
                return Err(DeviceError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial device closed",
                )))
            }
            Ok(_) => {}
            Err(e) => {
                // keep what arrived before the timeout for the next read
                self.partial = serial_str;
                return Err(e.into());
            }
        }
        trace!(line = serial_str.trim_end(), "modem");
        Ok(serial_str)
    }

    /// Next line that is not an unsolicited `+RX`.
    fn read_reply(&mut self) -> Result<String, DeviceError> {
        loop {
            let line = self.read_line()?;
            if line.starts_with("+RX ") {
                self.stash_rx(&line);
            } else {
                return Ok(line);
            }
        }
    }

    fn stash_rx(&mut self, line: &str) {
        match RxPacket::try_from(line) {
            Ok(pkt) => self.rx_queue.push_back(pkt),
            Err(e) => warn!(error = e, "dropping malformed +RX line"),
        }
    }

    fn input_pending(&self) -> Result<bool, DeviceError> {
        match &self.reader {
            Some(reader) => {
                Ok(!reader.buffer().is_empty() || reader.get_ref().bytes_to_read()? > 0)
            }
            None => Ok(false),
        }
    }

    /// Consume whatever the modem has already sent without waiting for more.
    fn drain_input(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        while self.input_pending()? {
            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => break,
            };
            let chunk = reader.fill_buf()?;
            let n = chunk.len();
            if n == 0 {
                break;
            }
            let lines = split_lines(&mut self.partial, chunk);
            reader.consume(n);
            for line in lines {
                if line.starts_with("+RX ") {
                    self.stash_rx(&line);
                } else if !line.trim().is_empty() {
                    trace!(line = line.trim(), "ignoring modem output");
                }
            }
        }
        Ok(())
    }

    fn expect(&mut self, starts_with: &str) -> Result<String, DeviceError> {
        let result = self.read_reply()?;
        if result.starts_with(starts_with) {
            Ok(result)
        } else {
            Err(DeviceError::Protocol(format!(
                "expected {} but modem said {}",
                starts_with,
                result.trim()
            )))
        }
    }

    fn match_split(&self, input: &str, key: &str) -> Option<String> {
        if input.starts_with(key) {
            Some(input.split(':').nth(1)?.trim().into())
        } else {
            None
        }
    }

    /// Write directly to modem via serial interface.
    ///
    /// Device must be opened first!
    pub fn raw_write(&mut self, buf: &str) -> Result<(), DeviceError> {
        let fd = self
            .serial_fd
            .as_mut()
            .ok_or_else(|| DeviceError::Protocol("serial device not open".to_string()))?;
        fd.write_all(buf.as_bytes())?;
        trace!(cmd = buf.trim_end(), "modem");
        Ok(())
    }
}

// Append `chunk` to `pending` and take out every completed line.
fn split_lines(pending: &mut String, chunk: &[u8]) -> Vec<String> {
    pending.push_str(&String::from_utf8_lossy(chunk));
    let mut lines = Vec::new();
    while let Some(end) = pending.find('\n') {
        lines.push(pending.drain(..=end).collect());
    }
    lines
}

/// Returns a default usb serial device for macos or unix.
/// It might not be present or called otherwise depending on
/// the system configuration.
pub fn get_default_usb_serial() -> String {
    if cfg!(target_os = "macos") {
        String::from("/dev/tty.SLAB_USBtoUART")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

/// A little helper function that logs information about
/// all available serial ports on the system.
pub fn dump_all_serial_ports() {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!(error = %e, "error listing serial ports");
            return;
        }
    };
    info!(count = ports.len(), "serial ports found");
    for p in ports {
        match p.port_type {
            SerialPortType::UsbPort(usb) => info!(
                port = %p.port_name,
                vid = usb.vid,
                pid = usb.pid,
                serial_number = usb.serial_number.as_deref().unwrap_or(""),
                manufacturer = usb.manufacturer.as_deref().unwrap_or(""),
                product = usb.product.as_deref().unwrap_or(""),
                "USB serial port"
            ),
            SerialPortType::BluetoothPort => info!(port = %p.port_name, "Bluetooth serial port"),
            SerialPortType::PciPort => info!(port = %p.port_name, "PCI serial port"),
            SerialPortType::Unknown => info!(port = %p.port_name, "serial port of unknown type"),
        }
    }
}
