//! Half-duplex link session over one radio transceiver.

use tracing::{debug, error, info, warn};

use crate::buffer::{ReceiveBuffer, RX_BUFFER_CAPACITY};
use crate::bus::Bus;
use crate::config::{RadioConfiguration, DEFAULT_PAYLOAD};
use crate::error::{SendError, StartError};
use crate::loradev::LoraDevice;
use crate::transceiver::RadioTransceiver;

/// Packet counters kept by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
}

/// Everything a presentation layer needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub configuration_summary: String,
    /// Last received packet, lossily decoded as UTF-8
    pub latest_message: Option<String>,
    pub unread: bool,
    pub truncated: bool,
    pub rssi: Option<i16>,
    pub snr: Option<i16>,
    pub stats: LinkStats,
}

/// A configured radio plus the single-slot receive buffer.
///
/// Sends and polls are issued one after the other from the owning thread,
/// so the radio never transmits and receives at the same time.
pub struct LinkSession<D: LoraDevice> {
    radio: RadioTransceiver<D>,
    config: RadioConfiguration,
    rx: ReceiveBuffer,
    payload: String,
    stats: LinkStats,
}

impl<D: LoraDevice> LinkSession<D> {
    /// Claim `bus` for `device` and apply `config`.
    ///
    /// Whatever was acquired is released again if any step fails.
    pub fn start(bus: &Bus, device: D, config: RadioConfiguration) -> Result<Self, StartError> {
        let mut radio = RadioTransceiver::new(bus.clone(), device);
        if let Err(e) = radio.acquire() {
            error!(bus = %bus.name(), error = %e, "could not acquire radio");
            return Err(e.into());
        }
        if let Err(e) = radio.configure(&config) {
            error!(error = %e, "could not configure radio");
            radio.release();
            return Err(e.into());
        }
        info!(config = %config, "link session started");
        Ok(LinkSession {
            radio,
            config,
            rx: ReceiveBuffer::new(),
            payload: DEFAULT_PAYLOAD.to_string(),
            stats: LinkStats::default(),
        })
    }

    /// Replace the text sent by [`user_requested_send`](Self::user_requested_send).
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn configuration(&self) -> &RadioConfiguration {
        &self.config
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn radio(&self) -> &RadioTransceiver<D> {
        &self.radio
    }

    /// Transmit `message` as one packet. Empty messages are not sent.
    pub fn send_text(&mut self, message: &str) -> Result<(), SendError> {
        if message.is_empty() {
            debug!("ignoring empty message");
            return Ok(());
        }
        match self.radio.transmit(message.as_bytes()) {
            Ok(()) => {
                self.stats.tx_packets += 1;
                info!(len = message.len(), "message sent");
                Ok(())
            }
            Err(e) => {
                self.stats.tx_errors += 1;
                Err(e.into())
            }
        }
    }

    /// Send the configured payload on behalf of the user.
    pub fn user_requested_send(&mut self) -> Result<(), SendError> {
        let payload = self.payload.clone();
        self.send_text(&payload)
    }

    /// Move at most one pending packet into the receive slot.
    ///
    /// Never blocks. Transceiver errors skip this poll and leave the slot
    /// untouched.
    pub fn poll_receive(&mut self) {
        if !self.radio.poll_available() {
            return;
        }
        // receive off to the side so the slot is never half written
        let mut scratch = [0u8; RX_BUFFER_CAPACITY];
        match self.radio.receive_into(&mut scratch) {
            Ok(len) => {
                self.rx.store(&scratch[..len], self.radio.last_rx());
                self.stats.rx_packets += 1;
            }
            Err(e) => {
                self.stats.rx_errors += 1;
                warn!(error = %e, "receive skipped");
            }
        }
    }

    /// Bytes of the last received packet.
    pub fn latest_message(&self) -> Option<&[u8]> {
        self.rx.message()
    }

    pub fn has_unread(&self) -> bool {
        self.rx.has_unread()
    }

    pub fn receive_buffer(&self) -> &ReceiveBuffer {
        &self.rx
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let info = self.rx.info();
        SessionSnapshot {
            configuration_summary: self.config.summary(),
            latest_message: self
                .rx
                .message()
                .map(|m| String::from_utf8_lossy(m).into_owned()),
            unread: self.rx.has_unread(),
            truncated: self.rx.is_truncated(),
            rssi: info.map(|i| i.rssi),
            snr: info.map(|i| i.snr),
            stats: self.stats,
        }
    }

    /// Release the radio. Dropping the session does the same.
    pub fn shutdown(mut self) {
        self.radio.release();
        info!(
            tx = self.stats.tx_packets,
            rx = self.stats.rx_packets,
            "link session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AcquireError, ConfigError, TransmitError};
    use crate::loradev::RxPacket;
    use crate::testing::{FailAt, FakeRadio};

    fn session(fake: &FakeRadio) -> LinkSession<FakeRadio> {
        LinkSession::start(&Bus::new("test"), fake.clone(), RadioConfiguration::default())
            .unwrap()
    }

    #[test]
    fn empty_text_is_not_sent() {
        let fake = FakeRadio::new();
        let mut s = session(&fake);
        s.send_text("").unwrap();
        assert!(fake.transmitted().is_empty());
        assert_eq!(s.stats().tx_packets, 0);
    }

    #[test]
    fn text_is_sent_once_as_utf8() {
        let fake = FakeRadio::new();
        let mut s = session(&fake);
        s.send_text("Test Message").unwrap();
        assert_eq!(fake.transmitted(), vec![b"Test Message".to_vec()]);
        assert_eq!(s.stats().tx_packets, 1);
    }

    #[test]
    fn user_send_uses_payload() {
        let fake = FakeRadio::new();
        let mut s = session(&fake).with_payload("ping");
        s.user_requested_send().unwrap();
        assert_eq!(fake.transmitted(), vec![b"ping".to_vec()]);

        let fake = FakeRadio::new();
        let mut s = session(&fake);
        s.user_requested_send().unwrap();
        assert_eq!(fake.transmitted(), vec![b"Test Message".to_vec()]);
    }

    #[test]
    fn oversized_text_is_reported() {
        let fake = FakeRadio::new().with_max_payload(8);
        let mut s = session(&fake);
        let err = s.send_text("Test Message").unwrap_err();
        assert!(matches!(
            err,
            SendError::Transmit(TransmitError::PacketTooLarge { len: 12, max: 8 })
        ));
        assert!(err.is_recoverable());
        assert_eq!(s.stats().tx_errors, 1);
    }

    #[test]
    fn poll_without_packet_changes_nothing() {
        let fake = FakeRadio::new();
        let mut s = session(&fake);
        s.poll_receive();
        assert_eq!(s.latest_message(), None);

        fake.push_packet(b"hello");
        s.poll_receive();
        s.poll_receive();
        assert_eq!(s.latest_message(), Some(&b"hello"[..]));
    }

    #[test]
    fn poll_consumes_one_packet_per_call() {
        let fake = FakeRadio::new();
        let mut s = session(&fake);
        fake.push_packet(b"first");
        fake.push_packet(b"2nd");
        s.poll_receive();
        assert_eq!(s.latest_message(), Some(&b"first"[..]));
        assert_eq!(fake.pending(), 1);
        s.poll_receive();
        assert_eq!(s.latest_message(), Some(&b"2nd"[..]));
        assert_eq!(s.stats().rx_packets, 2);
    }

    #[test]
    fn oversized_packet_is_truncated_silently() {
        let fake = FakeRadio::new();
        let mut s = session(&fake);
        let big: Vec<u8> = (0..100u8).collect();
        fake.push_packet(&big);
        s.poll_receive();
        assert_eq!(s.latest_message(), Some(&big[..RX_BUFFER_CAPACITY]));
        assert!(s.snapshot().truncated);
        assert_eq!(s.stats().rx_errors, 0);
    }

    #[test]
    fn empty_packet_replaces_previous_message() {
        let fake = FakeRadio::new();
        let mut s = session(&fake);
        fake.push_packet(b"hello");
        s.poll_receive();
        fake.push_packet(b"");
        s.poll_receive();

        assert_eq!(s.latest_message(), Some(&b""[..]));
        assert_eq!(s.stats().rx_packets, 2);
        let snap = s.snapshot();
        assert_eq!(snap.latest_message.as_deref(), Some(""));
        assert!(!snap.unread);
    }

    #[test]
    fn read_fault_leaves_buffer_alone() {
        let fake = FakeRadio::new();
        let mut s = session(&fake);
        fake.push_packet(b"keep");
        s.poll_receive();

        fake.push_packet(b"lost?");
        fake.fail_at(FailAt::Read);
        s.poll_receive();
        assert_eq!(s.latest_message(), Some(&b"keep"[..]));
        assert_eq!(s.stats().rx_errors, 1);

        // the packet is still there for the next tick
        fake.clear_failures();
        s.poll_receive();
        assert_eq!(s.latest_message(), Some(&b"lost?"[..]));
    }

    #[test]
    fn snapshot_reflects_state() {
        let fake = FakeRadio::new();
        let mut s = session(&fake);
        let snap = s.snapshot();
        assert_eq!(snap.configuration_summary, "868.000 MHz BW125 SF7 CR4/5");
        assert_eq!(snap.latest_message, None);
        assert!(!snap.unread);

        fake.push_rx(RxPacket {
            rssi: -71,
            snr: 8,
            data: b"hi there".to_vec(),
        });
        s.poll_receive();
        let snap = s.snapshot();
        assert_eq!(snap.latest_message.as_deref(), Some("hi there"));
        assert!(snap.unread);
        assert_eq!(snap.rssi, Some(-71));
        assert_eq!(snap.snr, Some(8));
        assert_eq!(snap.stats.rx_packets, 1);

        // reading the snapshot does not consume the message
        assert!(s.snapshot().unread);
    }

    #[test]
    fn start_fails_when_bus_is_taken() {
        let bus = Bus::new("test");
        let _held = bus.try_claim().unwrap();
        let fake = FakeRadio::new();
        let err = LinkSession::start(&bus, fake.clone(), RadioConfiguration::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StartError::Acquire(AcquireError::BusUnavailable)
        ));
        assert!(!err.is_recoverable());
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn start_releases_bus_on_config_failure() {
        let bus = Bus::new("test");
        let fake = FakeRadio::new();
        fake.fail_at(FailAt::SpreadingFactor);
        let err = LinkSession::start(&bus, fake.clone(), RadioConfiguration::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StartError::Configure(ConfigError::InvalidSpreadingFactor { sf: 7, .. })
        ));
        assert!(!bus.is_claimed());
        assert!(!fake.is_open());
    }

    #[test]
    fn shutdown_releases_bus() {
        let bus = Bus::new("test");
        let fake = FakeRadio::new();
        let s = LinkSession::start(&bus, fake.clone(), RadioConfiguration::default()).unwrap();
        assert!(bus.is_claimed());
        s.shutdown();
        assert!(!bus.is_claimed());
        assert!(!fake.is_open());
    }
}
