//! Radio transceiver: bus ownership, configuration state and packet I/O.
//!
//! Lifecycle:
//!
//! ```text
//! Unacquired --acquire--> Unconfigured --configure--> Configured
//!                              ^   |                       |
//!                              +---+ (step failed)         |
//!     Released <-------------------- release --------------+
//! ```
//!
//! Transmit and receive are refused with `NotConfigured` until a
//! configuration has been applied completely.

use std::cmp;

use tracing::{debug, info, warn};

use crate::bus::{Bus, BusClaim};
use crate::config::{
    check_bandwidth, check_coding_rate, check_frequency, check_spreading_factor,
    RadioConfiguration,
};
use crate::error::{AcquireError, ConfigError, DeviceError, ReceiveError, TransmitError};
use crate::loradev::LoraDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverState {
    Unacquired,
    Unconfigured,
    Configured,
    Released,
}

/// Metadata of the last packet consumed by [`RadioTransceiver::receive_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxInfo {
    /// Length of the packet as received over the air
    pub len: usize,
    /// Bytes actually copied to the caller
    pub copied: usize,
    pub rssi: i16,
    pub snr: i16,
}

impl RxInfo {
    pub fn truncated(&self) -> bool {
        self.copied < self.len
    }
}

pub struct RadioTransceiver<D: LoraDevice> {
    bus: Bus,
    claim: Option<BusClaim>,
    device: D,
    state: TransceiverState,
    config: Option<RadioConfiguration>,
    last_rx: Option<RxInfo>,
}

impl<D: LoraDevice> RadioTransceiver<D> {
    /// Wrap a device. Nothing is claimed or opened yet.
    pub fn new(bus: Bus, device: D) -> Self {
        RadioTransceiver {
            bus,
            claim: None,
            device,
            state: TransceiverState::Unacquired,
            config: None,
            last_rx: None,
        }
    }

    pub fn state(&self) -> TransceiverState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.state == TransceiverState::Configured
    }

    /// Configuration that was applied completely, if any.
    pub fn configuration(&self) -> Option<&RadioConfiguration> {
        self.config.as_ref()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn last_rx(&self) -> Option<RxInfo> {
        self.last_rx
    }

    /// Claim the bus and open the device.
    ///
    /// Fails with `BusUnavailable` when the bus is held, including by
    /// this transceiver itself.
    pub fn acquire(&mut self) -> Result<(), AcquireError> {
        let claim = self.bus.try_claim()?;
        // the claim is dropped, and so released, if the device does not open
        self.device.open().map_err(AcquireError::Open)?;
        self.claim = Some(claim);
        self.state = TransceiverState::Unconfigured;
        self.config = None;
        info!(bus = %self.bus.name(), "radio acquired");
        Ok(())
    }

    /// Apply frequency, bandwidth, spreading factor and coding rate, in that order.
    ///
    /// The first failing step aborts the rest and leaves the transceiver
    /// unconfigured.
    pub fn configure(&mut self, config: &RadioConfiguration) -> Result<(), ConfigError> {
        match self.state {
            TransceiverState::Unconfigured | TransceiverState::Configured => {}
            TransceiverState::Unacquired | TransceiverState::Released => {
                return Err(ConfigError::NotAcquired)
            }
        }
        self.state = TransceiverState::Unconfigured;
        self.config = None;

        let hz = config.frequency_hz;
        check_frequency(hz)?;
        self.device
            .set_frequency(hz)
            .map_err(|e| step_error(e, |reason| ConfigError::InvalidFrequency { hz, reason }))?;
        debug!(hz, "frequency set");

        let hz = config.bandwidth_hz;
        check_bandwidth(hz)?;
        self.device
            .set_bandwidth(hz)
            .map_err(|e| step_error(e, |reason| ConfigError::InvalidBandwidth { hz, reason }))?;
        debug!(hz, "bandwidth set");

        let sf = config.spreading_factor;
        check_spreading_factor(sf)?;
        self.device.set_spreading_factor(sf).map_err(|e| {
            step_error(e, |reason| ConfigError::InvalidSpreadingFactor { sf, reason })
        })?;
        debug!(sf, "spreading factor set");

        let cr = config.coding_rate;
        check_coding_rate(cr)?;
        self.device
            .set_coding_rate(cr)
            .map_err(|e| step_error(e, |reason| ConfigError::InvalidCodingRate { cr, reason }))?;
        debug!(cr, "coding rate set");

        self.state = TransceiverState::Configured;
        self.config = Some(*config);
        info!(config = %config, "radio configured");
        Ok(())
    }

    /// Send `bytes` as one packet. An empty slice sends nothing.
    pub fn transmit(&mut self, bytes: &[u8]) -> Result<(), TransmitError> {
        if !self.is_configured() {
            return Err(TransmitError::NotConfigured);
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let max = self.device.max_payload();
        if bytes.len() > max {
            return Err(TransmitError::PacketTooLarge {
                len: bytes.len(),
                max,
            });
        }
        self.device
            .send_packet(bytes)
            .map_err(TransmitError::BusFault)?;
        debug!(len = bytes.len(), "packet sent");
        Ok(())
    }

    /// Whether a received packet is waiting. Never blocks, never consumes.
    pub fn poll_available(&mut self) -> bool {
        if !self.is_configured() {
            return false;
        }
        match self.device.packet_available() {
            Ok(available) => available,
            Err(e) => {
                warn!(error = %e, "checking for packets failed");
                false
            }
        }
    }

    /// Consume one pending packet into `buffer` and return the copied length.
    ///
    /// Packets longer than `buffer` are cut to fit without an error; the
    /// original length is kept in [`last_rx`](Self::last_rx).
    pub fn receive_into(&mut self, buffer: &mut [u8]) -> Result<usize, ReceiveError> {
        if !self.is_configured() {
            return Err(ReceiveError::NotConfigured);
        }
        let packet = self
            .device
            .read_packet()
            .map_err(ReceiveError::BusFault)?
            .ok_or(ReceiveError::NoPacketPending)?;

        let copied = cmp::min(packet.data.len(), buffer.len());
        buffer[..copied].copy_from_slice(&packet.data[..copied]);
        let info = RxInfo {
            len: packet.data.len(),
            copied,
            rssi: packet.rssi,
            snr: packet.snr,
        };
        if info.truncated() {
            warn!(len = info.len, kept = copied, "received packet truncated");
        } else {
            debug!(len = copied, rssi = info.rssi, snr = info.snr, "packet received");
        }
        self.last_rx = Some(info);
        Ok(copied)
    }

    /// Close the device and give the bus back. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut claim) = self.claim.take() {
            self.device.close();
            claim.release();
            info!(bus = %self.bus.name(), "radio released");
        }
        if self.state != TransceiverState::Unacquired {
            self.state = TransceiverState::Released;
        }
        self.config = None;
    }
}

impl<D: LoraDevice> Drop for RadioTransceiver<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Map a device failure during a configuration step. Transport failures
/// stay bus faults, refusals become the step's own error.
fn step_error<F>(err: DeviceError, invalid: F) -> ConfigError
where
    F: FnOnce(String) -> ConfigError,
{
    match err {
        DeviceError::Rejected { reason, .. } => invalid(reason),
        other => ConfigError::BusFault(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FailAt, FakeRadio};

    fn configured(fake: &FakeRadio) -> RadioTransceiver<FakeRadio> {
        let mut radio = RadioTransceiver::new(Bus::new("test"), fake.clone());
        radio.acquire().unwrap();
        radio.configure(&RadioConfiguration::default()).unwrap();
        radio
    }

    #[test]
    fn configuration_is_applied_in_order() {
        let fake = FakeRadio::new();
        let radio = configured(&fake);
        assert_eq!(radio.state(), TransceiverState::Configured);
        assert_eq!(
            fake.config_calls(),
            vec![
                Call::SetFrequency(868e6),
                Call::SetBandwidth(125e3),
                Call::SetSpreadingFactor(7),
                Call::SetCodingRate(5),
            ]
        );
    }

    #[test]
    fn failing_step_stops_configuration() {
        let steps = [
            FailAt::Frequency,
            FailAt::Bandwidth,
            FailAt::SpreadingFactor,
            FailAt::CodingRate,
        ];
        for (k, step) in steps.iter().enumerate() {
            let fake = FakeRadio::new();
            fake.fail_at(*step);
            let mut radio = RadioTransceiver::new(Bus::new("test"), fake.clone());
            radio.acquire().unwrap();
            let err = radio.configure(&RadioConfiguration::default()).unwrap_err();
            match (step, &err) {
                (FailAt::Frequency, ConfigError::InvalidFrequency { .. })
                | (FailAt::Bandwidth, ConfigError::InvalidBandwidth { .. })
                | (FailAt::SpreadingFactor, ConfigError::InvalidSpreadingFactor { .. })
                | (FailAt::CodingRate, ConfigError::InvalidCodingRate { .. }) => {}
                _ => panic!("step {:?} produced {:?}", step, err),
            }
            // steps before k plus the failing one, nothing after
            assert_eq!(fake.config_calls().len(), k + 1);
            assert_eq!(radio.state(), TransceiverState::Unconfigured);
            assert!(matches!(
                radio.transmit(b"x"),
                Err(TransmitError::NotConfigured)
            ));
        }
    }

    #[test]
    fn locally_invalid_value_never_reaches_device() {
        let fake = FakeRadio::new();
        let mut radio = RadioTransceiver::new(Bus::new("test"), fake.clone());
        radio.acquire().unwrap();
        let err = radio
            .configure(&RadioConfiguration::new(868e6, 125e3, 13, 5))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSpreadingFactor { sf: 13, .. }));
        assert_eq!(
            fake.config_calls(),
            vec![Call::SetFrequency(868e6), Call::SetBandwidth(125e3)]
        );
    }

    #[test]
    fn reconfigure_after_failure() {
        let fake = FakeRadio::new();
        fake.fail_at(FailAt::Bandwidth);
        let mut radio = RadioTransceiver::new(Bus::new("test"), fake.clone());
        radio.acquire().unwrap();
        assert!(radio.configure(&RadioConfiguration::default()).is_err());
        fake.clear_failures();
        radio.configure(&RadioConfiguration::default()).unwrap();
        assert!(radio.is_configured());
    }

    #[test]
    fn operations_before_configuration_fail() {
        let fake = FakeRadio::new();
        let mut radio = RadioTransceiver::new(Bus::new("test"), fake.clone());
        assert!(matches!(
            radio.configure(&RadioConfiguration::default()),
            Err(ConfigError::NotAcquired)
        ));
        radio.acquire().unwrap();
        fake.push_packet(b"hi");
        assert!(!radio.poll_available());
        let mut buf = [0u8; 8];
        assert!(matches!(
            radio.receive_into(&mut buf),
            Err(ReceiveError::NotConfigured)
        ));
        assert!(fake.transmitted().is_empty());
    }

    #[test]
    fn second_acquire_fails() {
        let bus = Bus::new("test");
        let mut radio = RadioTransceiver::new(bus.clone(), FakeRadio::new());
        radio.acquire().unwrap();
        assert!(matches!(radio.acquire(), Err(AcquireError::BusUnavailable)));

        let mut other = RadioTransceiver::new(bus.clone(), FakeRadio::new());
        assert!(matches!(other.acquire(), Err(AcquireError::BusUnavailable)));

        radio.release();
        other.acquire().unwrap();
    }

    #[test]
    fn failed_open_releases_bus() {
        let bus = Bus::new("test");
        let fake = FakeRadio::new();
        fake.fail_at(FailAt::Open);
        let mut radio = RadioTransceiver::new(bus.clone(), fake);
        assert!(matches!(radio.acquire(), Err(AcquireError::Open(_))));
        assert!(!bus.is_claimed());
        assert_eq!(radio.state(), TransceiverState::Unacquired);
    }

    #[test]
    fn release_is_idempotent() {
        let bus = Bus::new("test");
        let fake = FakeRadio::new();
        let mut radio = RadioTransceiver::new(bus.clone(), fake.clone());
        radio.acquire().unwrap();
        radio.release();
        radio.release();
        assert!(!bus.is_claimed());
        assert_eq!(radio.state(), TransceiverState::Released);
        assert_eq!(
            fake.calls().iter().filter(|c| **c == Call::Close).count(),
            1
        );
    }

    #[test]
    fn drop_releases_bus() {
        let bus = Bus::new("test");
        {
            let fake = FakeRadio::new();
            let _radio = configured_on(&bus, &fake);
            assert!(bus.is_claimed());
        }
        assert!(!bus.is_claimed());
    }

    fn configured_on(bus: &Bus, fake: &FakeRadio) -> RadioTransceiver<FakeRadio> {
        let mut radio = RadioTransceiver::new(bus.clone(), fake.clone());
        radio.acquire().unwrap();
        radio.configure(&RadioConfiguration::default()).unwrap();
        radio
    }

    #[test]
    fn transmit_empty_is_noop() {
        let fake = FakeRadio::new();
        let mut radio = configured(&fake);
        radio.transmit(&[]).unwrap();
        assert!(fake.transmitted().is_empty());
    }

    #[test]
    fn transmit_checks_payload_size() {
        let fake = FakeRadio::new().with_max_payload(4);
        let mut radio = configured(&fake);
        assert!(matches!(
            radio.transmit(b"hello"),
            Err(TransmitError::PacketTooLarge { len: 5, max: 4 })
        ));
        radio.transmit(b"hell").unwrap();
        assert_eq!(fake.transmitted(), vec![b"hell".to_vec()]);
    }

    #[test]
    fn transmit_bus_fault() {
        let fake = FakeRadio::new();
        let mut radio = configured(&fake);
        fake.fail_at(FailAt::Send);
        assert!(matches!(
            radio.transmit(b"x"),
            Err(TransmitError::BusFault(_))
        ));
    }

    #[test]
    fn receive_copies_and_truncates() {
        let fake = FakeRadio::new();
        let mut radio = configured(&fake);
        let mut buf = [0u8; 4];

        assert!(matches!(
            radio.receive_into(&mut buf),
            Err(ReceiveError::NoPacketPending)
        ));

        fake.push_packet(b"abc");
        assert!(radio.poll_available());
        assert!(radio.poll_available());
        assert_eq!(radio.receive_into(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert!(!radio.poll_available());

        fake.push_packet(b"abcdefgh");
        assert_eq!(radio.receive_into(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        let info = radio.last_rx().unwrap();
        assert_eq!(info.len, 8);
        assert!(info.truncated());
    }

    #[test]
    fn poll_fault_reads_as_nothing_pending() {
        let fake = FakeRadio::new();
        let mut radio = configured(&fake);
        fake.push_packet(b"abc");
        fake.fail_at(FailAt::Available);
        assert!(!radio.poll_available());
        fake.clear_failures();
        assert!(radio.poll_available());
    }
}
