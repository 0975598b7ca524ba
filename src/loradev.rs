use std::convert::TryFrom;

use crate::error::DeviceError;

/// Largest payload the rf95modem firmware accepts (RadioHead `RH_RF95_MAX_MESSAGE_LEN`).
pub const RF95_MAX_PAYLOAD: usize = 251;

/// Predefined LoRa channels and frequencies
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoRaChannels {
    // 868MHz EU TTN Channels 1-9
    Ch01_868 = 86810,
    Ch02_868 = 86830,
    Ch03_868 = 86850,
    Ch04_868 = 86710,
    Ch05_868 = 86730,
    Ch06_868 = 86750,
    Ch07_868 = 86770,
    Ch08_868 = 86790,
    Ch09_868 = 86880,
    // Further 868MHz EU channels 10-17 from https://www.rfwireless-world.com/Tutorials/LoRa-channels-list.html
    Ch10_868 = 86520,
    Ch11_868 = 86550,
    Ch12_868 = 86580,
    Ch13_868 = 86610,
    Ch14_868 = 86640,
    Ch15_868 = 86670,
    Ch16_868 = 86700,
    Ch17_868 = 86800,

    // 915MHz US channels 0-12 https://www.rfwireless-world.com/Tutorials/LoRa-channels-list.html
    Ch00_900 = 90308,
    Ch01_900 = 90524,
    Ch02_900 = 90740,
    Ch03_900 = 90956,
    Ch04_900 = 91172,
    Ch05_900 = 91388,
    Ch06_900 = 91604,
    Ch07_900 = 91820,
    Ch08_900 = 92036,
    Ch09_900 = 92252,
    Ch10_900 = 92468,
    Ch11_900 = 92684,
    Ch12_900 = 91500,
}

impl LoRaChannels {
    /// Channel center frequency in Hz.
    pub fn frequency_hz(self) -> f64 {
        // discriminants are in units of 10 kHz
        f64::from(self as i32) * 1e4
    }
}

/// A LoRa packet received from the modem
#[derive(Debug, Clone, PartialEq)]
pub struct RxPacket {
    /// Signal strength
    pub rssi: i16,
    /// Signal-to-Noise ratio
    pub snr: i16,
    /// Received binary data
    pub data: Vec<u8>,
}

impl RxPacket {
    pub fn new(data: Vec<u8>) -> Self {
        RxPacket {
            rssi: 0,
            snr: 0,
            data,
        }
    }
}

impl TryFrom<&str> for RxPacket {
    type Error = &'static str;

    /// Parse a `+RX <len>,<hex>,<rssi>,<snr>` line.
    fn try_from(item: &str) -> Result<Self, Self::Error> {
        let item_payload = item.strip_prefix("+RX ").unwrap_or(item);
        let fields: Vec<&str> = item_payload.trim().split(',').collect();
        if fields.len() != 4 {
            return Err("+RX output from modem has unexpected length!");
        }
        let len: usize = fields[0]
            .trim()
            .parse()
            .map_err(|_| "+RX length field is not a number!")?;
        let data = crate::unhexify(fields[1].trim()).map_err(|_| "+RX payload is not hex!")?;
        if data.len() != len {
            return Err("+RX payload length not matching actual payload!");
        }
        let rssi: i16 = fields[2]
            .trim()
            .parse()
            .map_err(|_| "+RX rssi field is not a number!")?;
        let snr: i16 = fields[3]
            .trim()
            .parse()
            .map_err(|_| "+RX snr field is not a number!")?;

        Ok(RxPacket { rssi, snr, data })
    }
}

/// Default LoRa modem configs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModemConfig {
    /// Medium Range (Default)
    MediumBw125Cr45Sf128Crc = 0,
    /// Fast transmission, short range
    FastShortBw500Cr45Sf128Crc = 1,
    /// Slow transmission, long range
    SlowLongBw3125Cr48Sf512Crc = 2,
    /// Slow transmission, long range
    SlowLongBw125Cr48Sf4096Crc = 3,
}

const MODEM_CONFIGS: [ModemConfig; 4] = [
    ModemConfig::MediumBw125Cr45Sf128Crc,
    ModemConfig::FastShortBw500Cr45Sf128Crc,
    ModemConfig::SlowLongBw3125Cr48Sf512Crc,
    ModemConfig::SlowLongBw125Cr48Sf4096Crc,
];

impl ModemConfig {
    /// Bandwidth (Hz), spreading factor and coding rate denominator of this preset.
    pub fn params(self) -> (f64, u8, u8) {
        match self {
            ModemConfig::MediumBw125Cr45Sf128Crc => (125e3, 7, 5),
            ModemConfig::FastShortBw500Cr45Sf128Crc => (500e3, 7, 5),
            ModemConfig::SlowLongBw3125Cr48Sf512Crc => (31.25e3, 9, 8),
            ModemConfig::SlowLongBw125Cr48Sf4096Crc => (125e3, 12, 8),
        }
    }

    /// Preset matching the given modulation, if the firmware has one.
    pub fn from_params(bandwidth_hz: f64, spreading_factor: u8, coding_rate: u8) -> Option<Self> {
        MODEM_CONFIGS.iter().copied().find(|m| {
            let (bw, sf, cr) = m.params();
            (bw - bandwidth_hz).abs() < 1.0 && sf == spreading_factor && cr == coding_rate
        })
    }

    pub fn supports_bandwidth(bandwidth_hz: f64) -> bool {
        MODEM_CONFIGS
            .iter()
            .any(|m| (m.params().0 - bandwidth_hz).abs() < 1.0)
    }

    pub fn supports_spreading_factor(spreading_factor: u8) -> bool {
        MODEM_CONFIGS.iter().any(|m| m.params().1 == spreading_factor)
    }
}

impl TryFrom<usize> for ModemConfig {
    type Error = &'static str;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        MODEM_CONFIGS
            .get(value)
            .copied()
            .ok_or("Unknown modem config code!")
    }
}

/// Current rf95modem status
#[derive(Debug, Clone)]
pub struct Status {
    /// firmware version running on modem
    pub version: String,
    /// current LoRa config settings
    pub config: ModemConfig,
    /// maximum packet size supported
    pub max_pkt_size: usize,
    /// current frequency configured on modem
    pub frequency: f32,
    /// receiving of incoming packets activated
    pub rx_listener: bool,

    /// number of receive errors
    pub rx_bad: usize,
    /// number of successfully received packets
    pub rx_good: usize,
    /// number of successfully transmitted packets
    pub tx_good: usize,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Status {
            version: "0.0".to_string(),
            config: ModemConfig::MediumBw125Cr45Sf128Crc,
            max_pkt_size: 0,
            frequency: 0.0,
            rx_listener: false,
            rx_bad: 0,
            rx_good: 0,
            tx_good: 0,
        }
    }
}

/// Physical layer of a LoRa radio.
///
/// Every method is one bus transaction. Implementations do not track
/// whether they were configured; that is the job of
/// [`RadioTransceiver`](crate::transceiver::RadioTransceiver).
pub trait LoraDevice {
    /// Open the underlying transport.
    fn open(&mut self) -> Result<(), DeviceError>;
    /// Close the underlying transport. Must be safe to call twice.
    fn close(&mut self);
    /// Set carrier frequency in Hz.
    fn set_frequency(&mut self, hz: f64) -> Result<(), DeviceError>;
    /// Set carrier frequency from a predefined channel.
    fn set_channel(&mut self, channel: LoRaChannels) -> Result<(), DeviceError> {
        self.set_frequency(channel.frequency_hz())
    }
    /// Set signal bandwidth in Hz.
    fn set_bandwidth(&mut self, hz: f64) -> Result<(), DeviceError>;
    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), DeviceError>;
    /// Set coding rate 4/`cr`.
    fn set_coding_rate(&mut self, cr: u8) -> Result<(), DeviceError>;
    /// Largest payload a single packet may carry.
    fn max_payload(&self) -> usize;
    /// Send one packet.
    fn send_packet(&mut self, data: &[u8]) -> Result<(), DeviceError>;
    /// Check for a received packet without blocking or consuming it.
    fn packet_available(&mut self) -> Result<bool, DeviceError>;
    /// Take the oldest received packet, if any.
    fn read_packet(&mut self) -> Result<Option<RxPacket>, DeviceError>;
}
