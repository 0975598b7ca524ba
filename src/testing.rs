//! Scripted in-memory [`LoraDevice`] for tests.
//!
//! [`FakeRadio`] is a handle: clones share the same state, so a test can
//! keep one clone while the session owns the other and inspect every
//! call the session made.
//!
//! ```rust,ignore
//! let fake = FakeRadio::new();
//! let mut session = LinkSession::start(&bus, fake.clone(), config)?;
//! session.send_text("hi")?;
//! assert_eq!(fake.transmitted(), vec![b"hi".to_vec()]);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use crate::error::DeviceError;
use crate::loradev::{LoraDevice, RxPacket, RF95_MAX_PAYLOAD};

/// One recorded device transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    Close,
    SetFrequency(f64),
    SetBandwidth(f64),
    SetSpreadingFactor(u8),
    SetCodingRate(u8),
    Send(Vec<u8>),
    Available,
    Read,
}

impl Call {
    fn is_config(&self) -> bool {
        matches!(
            self,
            Call::SetFrequency(_)
                | Call::SetBandwidth(_)
                | Call::SetSpreadingFactor(_)
                | Call::SetCodingRate(_)
        )
    }
}

/// Transaction to fail on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Open,
    Frequency,
    Bandwidth,
    SpreadingFactor,
    CodingRate,
    Send,
    Available,
    Read,
}

#[derive(Debug)]
struct FakeState {
    calls: Vec<Call>,
    pending: VecDeque<RxPacket>,
    failures: Vec<FailAt>,
    max_payload: usize,
    open: bool,
}

#[derive(Debug, Clone)]
pub struct FakeRadio {
    state: Rc<RefCell<FakeState>>,
}

impl Default for FakeRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRadio {
    pub fn new() -> Self {
        FakeRadio {
            state: Rc::new(RefCell::new(FakeState {
                calls: Vec::new(),
                pending: VecDeque::new(),
                failures: Vec::new(),
                max_payload: RF95_MAX_PAYLOAD,
                open: false,
            })),
        }
    }

    pub fn with_max_payload(self, max_payload: usize) -> Self {
        self.state.borrow_mut().max_payload = max_payload;
        self
    }

    /// Make every future `step` transaction fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_at(&self, step: FailAt) {
        self.state.borrow_mut().failures.push(step);
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Queue an inbound packet.
    pub fn push_packet(&self, data: &[u8]) {
        self.push_rx(RxPacket::new(data.to_vec()));
    }

    pub fn push_rx(&self, packet: RxPacket) {
        self.state.borrow_mut().pending.push_back(packet);
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Only the four configuration transactions, in call order.
    pub fn config_calls(&self) -> Vec<Call> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.is_config())
            .cloned()
            .collect()
    }

    /// Payloads of every successful or attempted send.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Send(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call, step: FailAt) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        if !state.failures.contains(&step) {
            return Ok(());
        }
        match step {
            FailAt::Frequency => Err(DeviceError::rejected("frequency", "injected")),
            FailAt::Bandwidth => Err(DeviceError::rejected("bandwidth", "injected")),
            FailAt::SpreadingFactor => Err(DeviceError::rejected("spreading factor", "injected")),
            FailAt::CodingRate => Err(DeviceError::rejected("coding rate", "injected")),
            _ => Err(DeviceError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected bus fault",
            ))),
        }
    }
}

impl LoraDevice for FakeRadio {
    fn open(&mut self) -> Result<(), DeviceError> {
        self.record(Call::Open, FailAt::Open)?;
        self.state.borrow_mut().open = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Close);
        state.open = false;
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), DeviceError> {
        self.record(Call::SetFrequency(hz), FailAt::Frequency)
    }

    fn set_bandwidth(&mut self, hz: f64) -> Result<(), DeviceError> {
        self.record(Call::SetBandwidth(hz), FailAt::Bandwidth)
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), DeviceError> {
        self.record(Call::SetSpreadingFactor(sf), FailAt::SpreadingFactor)
    }

    fn set_coding_rate(&mut self, cr: u8) -> Result<(), DeviceError> {
        self.record(Call::SetCodingRate(cr), FailAt::CodingRate)
    }

    fn max_payload(&self) -> usize {
        self.state.borrow().max_payload
    }

    fn send_packet(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.record(Call::Send(data.to_vec()), FailAt::Send)
    }

    fn packet_available(&mut self) -> Result<bool, DeviceError> {
        self.record(Call::Available, FailAt::Available)?;
        Ok(!self.state.borrow().pending.is_empty())
    }

    fn read_packet(&mut self) -> Result<Option<RxPacket>, DeviceError> {
        self.record(Call::Read, FailAt::Read)?;
        Ok(self.state.borrow_mut().pending.pop_front())
    }
}
