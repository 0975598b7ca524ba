//! Error types for the radio transceiver and the link session.

use std::io;
use thiserror::Error;

/// Errors reported by a [`LoraDevice`](crate::loradev::LoraDevice) implementation.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device refused a parameter value.
    #[error("device rejected {what}: {reason}")]
    Rejected { what: &'static str, reason: String },

    /// The serial link failed.
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// Plain I/O failure on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The modem answered with something we did not expect.
    #[error("unexpected modem response: {0}")]
    Protocol(String),
}

impl DeviceError {
    pub(crate) fn rejected(what: &'static str, reason: impl Into<String>) -> Self {
        DeviceError::Rejected {
            what,
            reason: reason.into(),
        }
    }

    /// A refused value fails again on retry; transport faults may clear.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DeviceError::Rejected { .. })
    }
}

/// Failure to claim the radio bus.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("radio bus is already claimed by another owner")]
    BusUnavailable,

    #[error("radio bus was claimed but the device could not be opened: {0}")]
    Open(#[source] DeviceError),
}

/// Failure while applying a [`RadioConfiguration`](crate::config::RadioConfiguration).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid frequency {hz} Hz: {reason}")]
    InvalidFrequency { hz: f64, reason: String },

    #[error("invalid bandwidth {hz} Hz: {reason}")]
    InvalidBandwidth { hz: f64, reason: String },

    #[error("invalid spreading factor {sf}: {reason}")]
    InvalidSpreadingFactor { sf: u8, reason: String },

    #[error("invalid coding rate 4/{cr}: {reason}")]
    InvalidCodingRate { cr: u8, reason: String },

    #[error("transceiver has not acquired the bus")]
    NotAcquired,

    #[error("bus fault while configuring: {0}")]
    BusFault(#[source] DeviceError),
}

/// Failure to hand a packet to the physical layer.
#[derive(Error, Debug)]
pub enum TransmitError {
    #[error("packet of {len} bytes exceeds maximum payload of {max} bytes")]
    PacketTooLarge { len: usize, max: usize },

    #[error("bus fault while transmitting: {0}")]
    BusFault(#[source] DeviceError),

    #[error("transceiver is not configured")]
    NotConfigured,
}

/// Failure to consume an inbound packet.
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("no packet pending")]
    NoPacketPending,

    #[error("bus fault while receiving: {0}")]
    BusFault(#[source] DeviceError),

    #[error("transceiver is not configured")]
    NotConfigured,
}

/// Startup failure of a [`LinkSession`](crate::session::LinkSession).
#[derive(Error, Debug)]
pub enum StartError {
    #[error("failed to acquire radio: {0}")]
    Acquire(#[from] AcquireError),

    #[error("failed to configure radio: {0}")]
    Configure(#[from] ConfigError),
}

/// Failure of [`LinkSession::send_text`](crate::session::LinkSession::send_text).
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Transmit(#[from] TransmitError),
}

/// Failure to load a [`LinkConfig`](crate::config::LinkConfig) file.
#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("failed to read config file: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid radio settings: {0}")]
    Invalid(#[from] ConfigError),
}

impl AcquireError {
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

impl ConfigError {
    /// Configuration only happens at startup, so every failure is fatal.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

impl ConfigFileError {
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

impl TransmitError {
    /// Transmit errors never end the poll loop.
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

impl ReceiveError {
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

impl SendError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            SendError::Transmit(e) => e.is_recoverable(),
        }
    }
}

impl StartError {
    /// Startup errors are always fatal.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_errors_are_fatal() {
        assert!(!AcquireError::BusUnavailable.is_recoverable());
        assert!(!AcquireError::Open(DeviceError::Protocol("?".into())).is_recoverable());
        assert!(!ConfigError::NotAcquired.is_recoverable());
        assert!(!ConfigError::InvalidSpreadingFactor {
            sf: 5,
            reason: "out of range".into()
        }
        .is_recoverable());
        assert!(!StartError::from(ConfigError::NotAcquired).is_recoverable());
        assert!(!ConfigFileError::Invalid(ConfigError::NotAcquired).is_recoverable());
    }

    #[test]
    fn runtime_errors_are_recoverable() {
        let fault = || DeviceError::Io(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
        assert!(TransmitError::BusFault(fault()).is_recoverable());
        assert!(ReceiveError::BusFault(fault()).is_recoverable());
        assert!(SendError::from(TransmitError::PacketTooLarge { len: 300, max: 251 })
            .is_recoverable());
    }

    #[test]
    fn device_refusal_is_not_worth_retrying() {
        assert!(!DeviceError::rejected("bandwidth", "no preset").is_recoverable());
        assert!(DeviceError::Protocol("+FAIL".into()).is_recoverable());
    }
}
