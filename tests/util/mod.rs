#![allow(dead_code)]

use bytes::Bytes;
use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    lock::Mutex,
    StreamExt,
};
use rand::prelude::*;
use rand_xoshiro::Xoshiro128StarStar;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io::{Error, ErrorKind, Result},
    sync::Once,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cdc_serial::{
    device::{
        AlternateSetting, ConfigurationDescriptor, ControlRequest, Direction, EndpointDescriptor, InTransfer,
        InterfaceDescriptor, OutTransfer, TransferStatus, UsbDeviceFilter,
    },
    UsbDevice, UsbHost,
};

pub const VID: u16 = 0x2341;
pub const PID: u16 = 0x0043;

pub const CONTROL_INTERFACE: u8 = 0;
pub const DATA_INTERFACE: u8 = 1;
pub const EP_OUT: u8 = 1;
pub const EP_IN: u8 = 2;
pub const PACKET_SIZE: usize = 64;

pub const SET_LINE_CODING: u8 = 0x20;
pub const GET_LINE_CODING: u8 = 0x21;
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;
pub const SEND_BREAK: u8 = 0x23;

pub fn init_log() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();
        tracing_log::LogTracer::init().unwrap();
    });
}

/// Operation performed on a [`FakeDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    SelectConfiguration(u8),
    ClaimInterface(u8),
    ControlOut { request: u8, value: u16, index: u16, data: Vec<u8> },
    ControlIn { request: u8, value: u16, index: u16, length: u16 },
    TransferIn { endpoint: u8, length: usize },
    TransferOut { endpoint: u8, data: Vec<u8> },
    Close,
    Forget,
}

/// Feeds IN transfer results to a [`FakeDevice`].
pub type InFeed = UnboundedSender<Result<InTransfer>>;

/// Scripted USB device.
///
/// IN transfers wait for results sent through the [`InFeed`]. Other operations
/// succeed unless a failure has been scripted.
pub struct FakeDevice {
    configs: Vec<ConfigurationDescriptor>,
    opened: Cell<bool>,
    configuration: Cell<Option<u8>>,
    calls: RefCell<Vec<Call>>,
    in_rx: Mutex<UnboundedReceiver<Result<InTransfer>>>,
    control_out: RefCell<VecDeque<Result<TransferStatus>>>,
    control_in: RefCell<VecDeque<Result<InTransfer>>>,
    transfer_out: RefCell<VecDeque<Result<OutTransfer>>>,
    out_gate: Mutex<Option<UnboundedReceiver<()>>>,
    fail_claim: Cell<Option<u8>>,
    fail_open: Cell<bool>,
    fail_close: Cell<bool>,
}

pub fn endpoint(endpoint_number: u8, direction: Direction) -> EndpointDescriptor {
    EndpointDescriptor { endpoint_number, direction, packet_size: PACKET_SIZE }
}

pub fn interface(interface_number: u8, class: u8, endpoints: Vec<EndpointDescriptor>) -> InterfaceDescriptor {
    InterfaceDescriptor {
        interface_number,
        alternates: vec![AlternateSetting {
            alternate_setting: 0,
            interface_class: class,
            interface_subclass: 0,
            interface_protocol: 0,
            endpoints,
        }],
    }
}

/// Interfaces of a typical CDC-ACM adapter.
pub fn cdc_interfaces() -> Vec<InterfaceDescriptor> {
    vec![
        interface(CONTROL_INTERFACE, 2, vec![endpoint(3, Direction::In)]),
        interface(DATA_INTERFACE, 10, vec![endpoint(EP_OUT, Direction::Out), endpoint(EP_IN, Direction::In)]),
    ]
}

impl FakeDevice {
    pub fn new(interfaces: Vec<InterfaceDescriptor>) -> (Self, InFeed) {
        let (tx, rx) = unbounded();
        let dev = Self {
            configs: vec![ConfigurationDescriptor { configuration_value: 1, interfaces }],
            opened: Cell::new(false),
            configuration: Cell::new(None),
            calls: RefCell::new(Vec::new()),
            in_rx: Mutex::new(rx),
            control_out: RefCell::new(VecDeque::new()),
            control_in: RefCell::new(VecDeque::new()),
            transfer_out: RefCell::new(VecDeque::new()),
            out_gate: Mutex::new(None),
            fail_claim: Cell::new(None),
            fail_open: Cell::new(false),
            fail_close: Cell::new(false),
        };
        (dev, tx)
    }

    pub fn cdc() -> (Self, InFeed) {
        Self::new(cdc_interfaces())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Control OUT transfers with the specified request code as `(value, data)`.
    pub fn control_out_calls(&self, req: u8) -> Vec<(u16, Vec<u8>)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::ControlOut { request, value, data, .. } if *request == req => Some((*value, data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn transfer_in_lengths(&self) -> Vec<usize> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::TransferIn { length, .. } => Some(*length),
                _ => None,
            })
            .collect()
    }

    pub fn transfer_out_data(&self) -> Vec<Vec<u8>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::TransferOut { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Result of the next control OUT transfer.
    pub fn script_control_out(&self, res: Result<TransferStatus>) {
        self.control_out.borrow_mut().push_back(res);
    }

    /// Result of the next control IN transfer.
    pub fn script_control_in(&self, res: Result<InTransfer>) {
        self.control_in.borrow_mut().push_back(res);
    }

    /// Result of the next bulk OUT transfer.
    pub fn script_transfer_out(&self, res: Result<OutTransfer>) {
        self.transfer_out.borrow_mut().push_back(res);
    }

    pub fn fail_claim(&self, interface: u8) {
        self.fail_claim.set(Some(interface));
    }

    pub fn fail_open(&self) {
        self.fail_open.set(true);
    }

    /// Closing fails and leaves the device open.
    pub fn fail_close(&self) {
        self.fail_close.set(true);
    }

    /// Holds back bulk OUT transfers; each message on the returned sender completes one.
    pub fn gate_transfer_out(&self) -> UnboundedSender<()> {
        let (tx, rx) = unbounded();
        *self.out_gate.try_lock().expect("gate is in use") = Some(rx);
        tx
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn check_open(&self) -> Result<()> {
        if self.opened.get() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NotConnected, "device is not open"))
        }
    }
}

impl UsbDevice for FakeDevice {
    fn vendor_id(&self) -> u16 {
        VID
    }

    fn product_id(&self) -> u16 {
        PID
    }

    fn configurations(&self) -> &[ConfigurationDescriptor] {
        &self.configs
    }

    fn configuration(&self) -> Option<u8> {
        self.configuration.get()
    }

    fn opened(&self) -> bool {
        self.opened.get()
    }

    async fn open(&self) -> Result<()> {
        self.record(Call::Open);
        if self.fail_open.get() {
            return Err(Error::new(ErrorKind::PermissionDenied, "access denied"));
        }
        self.opened.set(true);
        Ok(())
    }

    async fn select_configuration(&self, value: u8) -> Result<()> {
        self.record(Call::SelectConfiguration(value));
        self.check_open()?;
        self.configuration.set(Some(value));
        Ok(())
    }

    async fn claim_interface(&self, interface: u8) -> Result<()> {
        self.record(Call::ClaimInterface(interface));
        self.check_open()?;
        if self.fail_claim.get() == Some(interface) {
            return Err(Error::new(ErrorKind::ResourceBusy, "interface is claimed by another driver"));
        }
        Ok(())
    }

    async fn control_transfer_out(&self, request: &ControlRequest, data: &[u8]) -> Result<OutTransfer> {
        self.record(Call::ControlOut {
            request: request.request,
            value: request.value,
            index: request.index,
            data: data.to_vec(),
        });
        self.check_open()?;
        let status = self.control_out.borrow_mut().pop_front().unwrap_or(Ok(TransferStatus::Ok))?;
        Ok(OutTransfer { status, bytes_written: if status == TransferStatus::Ok { data.len() } else { 0 } })
    }

    async fn control_transfer_in(&self, request: &ControlRequest, length: u16) -> Result<InTransfer> {
        self.record(Call::ControlIn { request: request.request, value: request.value, index: request.index, length });
        self.check_open()?;
        self.control_in.borrow_mut().pop_front().unwrap_or_else(|| Ok(InTransfer::failed(TransferStatus::Stall)))
    }

    async fn transfer_in(&self, endpoint: u8, length: usize) -> Result<InTransfer> {
        self.record(Call::TransferIn { endpoint, length });
        self.check_open()?;
        let mut rx = self.in_rx.lock().await;
        match rx.next().await {
            Some(Ok(mut res)) => {
                res.data.truncate(length);
                Ok(res)
            }
            Some(Err(err)) => Err(err),
            None => Err(Error::new(ErrorKind::BrokenPipe, "device disconnected")),
        }
    }

    async fn transfer_out(&self, endpoint: u8, data: &[u8]) -> Result<OutTransfer> {
        self.record(Call::TransferOut { endpoint, data: data.to_vec() });
        self.check_open()?;
        if let Some(gate) = self.out_gate.lock().await.as_mut() {
            gate.next().await;
        }
        self.transfer_out.borrow_mut().pop_front().unwrap_or(Ok(OutTransfer::ok(data.len())))
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        if self.fail_close.get() {
            return Err(Error::new(ErrorKind::TimedOut, "device did not respond"));
        }
        self.opened.set(false);
        Ok(())
    }

    async fn forget(&self) -> Result<()> {
        self.record(Call::Forget);
        Ok(())
    }
}

/// Scripted USB host handing out fake devices.
pub struct FakeHost {
    devices: RefCell<Vec<FakeDevice>>,
    requests: RefCell<Vec<Vec<UsbDeviceFilter>>>,
}

impl FakeHost {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        Self { devices: RefCell::new(devices), requests: RefCell::new(Vec::new()) }
    }

    /// Filters passed to each device request.
    pub fn requests(&self) -> Vec<Vec<UsbDeviceFilter>> {
        self.requests.borrow().clone()
    }
}

impl UsbHost for FakeHost {
    type Device = FakeDevice;

    async fn request_device(&self, filters: &[UsbDeviceFilter]) -> Result<FakeDevice> {
        self.requests.borrow_mut().push(filters.to_vec());
        let mut devices = self.devices.borrow_mut();
        if devices.is_empty() {
            return Err(Error::new(ErrorKind::NotFound, "no device selected"));
        }
        Ok(devices.remove(0))
    }

    async fn devices(&self) -> Result<Vec<FakeDevice>> {
        Ok(self.devices.borrow_mut().drain(..).collect())
    }
}

/// Sends a received packet through the feed.
pub fn feed(tx: &InFeed, data: &[u8]) {
    tx.unbounded_send(Ok(InTransfer::ok(Bytes::copy_from_slice(data)))).unwrap();
}

pub struct TestData {
    rng: Xoshiro128StarStar,
    max_length: usize,
    pre_lengths: VecDeque<usize>,
}

impl TestData {
    pub fn new(seed: u64, max_length: usize) -> Self {
        Self {
            rng: Xoshiro128StarStar::seed_from_u64(seed),
            max_length,
            pre_lengths: [1, 2, 63, 64, 65, 127, 128, 129, 255, 256].into(),
        }
    }

    pub fn generate(&mut self) -> Vec<u8> {
        let len = match self.pre_lengths.pop_front() {
            Some(len) => len,
            None => self.rng.random_range(1..self.max_length),
        };
        let mut data = vec![0; len];
        self.rng.fill_bytes(&mut data);
        data
    }
}
