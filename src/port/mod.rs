//! Serial port over a CDC-ACM device.

use futures::join;
use std::{fmt, rc::Rc};

use crate::{
    device::{ControlRequest, Direction, EndpointDescriptor, TransferStatus, UsbDevice},
    find_endpoint, find_interface,
    signals::send_signals,
    Error, LineCoding, OutputSignals, PortConfig, ReconfigureOptions, Result, SerialOptions, SignalUpdate,
    LINE_CODING_SIZE, REQ_GET_LINE_CODING, REQ_SET_LINE_CODING,
};

mod stream;
pub use stream::{SerialReader, SerialWriter};
use stream::{ReadSource, WriteSink};

/// Lifecycle state of a serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
    /// Interfaces and endpoints have been located; no I/O has happened yet.
    Located,
    /// Device is claimed and configured.
    Opened,
    /// Device is open and a reader or writer has been created.
    Active,
    /// Port has been closed and should be discarded.
    Closed,
}

/// Identification of the USB device behind a serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialPortInfo {
    pub usb_vendor_id: u16,
    pub usb_product_id: u16,
}

/// Serial port of a CDC-ACM device.
///
/// The port shares the device with the readers and writers it hands out.
/// All operations must be performed on a single thread.
pub struct SerialPort<D> {
    dev: Rc<D>,
    control_interface: u8,
    transfer_interface: u8,
    in_endpoint: EndpointDescriptor,
    out_endpoint: EndpointDescriptor,
    options: SerialOptions,
    signals: OutputSignals,
    readable: Option<Rc<ReadSource<D>>>,
    writable: Option<Rc<WriteSink<D>>>,
    state: PortState,
}

impl<D> fmt::Debug for SerialPort<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SerialPort")
            .field("control_interface", &self.control_interface)
            .field("transfer_interface", &self.transfer_interface)
            .field("state", &self.state)
            .finish()
    }
}

impl<D> SerialPort<D>
where
    D: UsbDevice + 'static,
{
    /// Creates a serial port for the specified device.
    ///
    /// Fails if the device does not expose the control and data interfaces
    /// described by `config` or if the data interface lacks bulk endpoints.
    pub fn new(dev: Rc<D>, config: &PortConfig) -> Result<Self> {
        let (control_interface, transfer_interface, in_endpoint, out_endpoint) = {
            let cfgs = dev.configurations();
            let control = find_interface(cfgs, config.control_interface_class)?;
            let transfer = find_interface(cfgs, config.transfer_interface_class)?;
            let in_endpoint = find_endpoint(transfer, Direction::In)?;
            let out_endpoint = find_endpoint(transfer, Direction::Out)?;
            (control.interface_number, transfer.interface_number, in_endpoint, out_endpoint)
        };

        tracing::debug!(
            "located control interface {control_interface}, transfer interface {transfer_interface} \
             with endpoints IN {} and OUT {}",
            in_endpoint.endpoint_number,
            out_endpoint.endpoint_number
        );

        Ok(Self {
            dev,
            control_interface,
            transfer_interface,
            in_endpoint,
            out_endpoint,
            options: SerialOptions::new(0),
            signals: OutputSignals::default(),
            readable: None,
            writable: None,
            state: PortState::Located,
        })
    }

    /// The underlying device.
    pub fn device(&self) -> &Rc<D> {
        &self.dev
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PortState {
        match self.state {
            PortState::Opened if self.readable.is_some() || self.writable.is_some() => PortState::Active,
            state => state,
        }
    }

    /// Options the port was opened or last reconfigured with.
    pub fn options(&self) -> &SerialOptions {
        &self.options
    }

    /// Last requested state of the output signals.
    ///
    /// This is the requested state; if sending a signal failed, the device may differ.
    pub fn signals(&self) -> OutputSignals {
        self.signals
    }

    /// USB identification of the device.
    pub fn info(&self) -> SerialPortInfo {
        SerialPortInfo { usb_vendor_id: self.dev.vendor_id(), usb_product_id: self.dev.product_id() }
    }

    /// Opens the port.
    ///
    /// Invalid options are rejected before the device is touched.
    /// If setting up the device fails, it is closed again and [`Error::Setup`] is returned.
    pub async fn open(&mut self, options: SerialOptions) -> Result<()> {
        options.validate()?;
        self.options = options;

        tracing::debug!("opening serial port with {options}");
        if let Err(err) = self.setup().await {
            tracing::warn!("setting up device failed: {err}");
            if self.dev.opened() {
                if let Err(err) = self.dev.close().await {
                    tracing::warn!("closing device failed: {err}");
                }
            }
            return Err(Error::setup(err));
        }

        self.state = PortState::Opened;
        tracing::debug!("serial port is open");
        Ok(())
    }

    async fn setup(&mut self) -> Result<()> {
        if !self.dev.opened() {
            self.dev.open().await?;
        }
        if self.dev.configuration().is_none() {
            self.dev.select_configuration(1).await?;
        }

        self.dev.claim_interface(self.control_interface).await?;
        if self.transfer_interface != self.control_interface {
            self.dev.claim_interface(self.transfer_interface).await?;
        }

        self.set_line_coding().await?;
        self.set_signals(SignalUpdate::default().with_data_terminal_ready(true)).await
    }

    async fn set_line_coding(&self) -> Result<()> {
        tracing::debug!("setting line coding {}", self.options);
        let coding = LineCoding::from(&self.options);
        let req = ControlRequest::class_interface(REQ_SET_LINE_CODING, 0, self.control_interface);
        match self.dev.control_transfer_out(&req, &coding.encode()).await?.status {
            TransferStatus::Ok => Ok(()),
            status => Err(Error::Transfer(status)),
        }
    }

    /// Reads the line coding currently configured in the device.
    pub async fn line_coding(&self) -> Result<LineCoding> {
        let req = ControlRequest::class_interface(REQ_GET_LINE_CODING, 0, self.control_interface);
        let res = self.dev.control_transfer_in(&req, LINE_CODING_SIZE as u16).await?;
        if res.status != TransferStatus::Ok {
            return Err(Error::Transfer(res.status));
        }
        LineCoding::try_from(&res.data[..])
    }

    /// Changes the options of the open port.
    ///
    /// Fields not set in `update` keep their value. Existing readers and writers
    /// are unaffected; a changed buffer size applies to readers created afterwards.
    pub async fn reconfigure(&mut self, update: &ReconfigureOptions) -> Result<()> {
        let options = self.options.merge(update);
        options.validate()?;
        if !self.dev.opened() {
            return Err(Error::NotOpen);
        }

        self.options = options;
        self.set_line_coding().await
    }

    /// Sets the output control signals.
    ///
    /// The requested state is remembered before the device has confirmed it.
    /// If a transfer fails, [`signals`](Self::signals) no longer reflects the device.
    pub async fn set_signals(&mut self, update: SignalUpdate) -> Result<()> {
        send_signals(&*self.dev, self.control_interface, &mut self.signals, &update).await
    }

    /// Whether streams may be created: the device is open and the port has not been closed since.
    fn is_usable(&self) -> bool {
        self.state != PortState::Closed && self.dev.opened()
    }

    /// Reader for received data.
    ///
    /// The reader is created on first access while the device is open and shared
    /// by later calls. A reader that has failed is replaced by a new one.
    /// Returns `None` if the device is not open or the port has been closed.
    pub fn readable(&mut self) -> Option<SerialReader<D>> {
        if self.readable.as_ref().is_some_and(|source| source.is_errored()) {
            tracing::debug!("discarding failed reader");
            self.readable = None;
        }

        if self.readable.is_none() && self.is_usable() {
            tracing::debug!("creating reader on endpoint {}", self.in_endpoint.endpoint_number);
            self.readable =
                Some(Rc::new(ReadSource::new(self.dev.clone(), self.in_endpoint, self.options.buffer_size)));
        }

        self.readable.clone().map(SerialReader::new)
    }

    /// Writer for data to send.
    ///
    /// The writer is created on first access while the device is open and shared
    /// by later calls. A writer that has failed is replaced by a new one.
    /// Returns `None` if the device is not open or the port has been closed.
    pub fn writable(&mut self) -> Option<SerialWriter<D>> {
        if self.writable.as_ref().is_some_and(|sink| sink.is_errored()) {
            tracing::debug!("discarding failed writer");
            self.writable = None;
        }

        if self.writable.is_none() && self.is_usable() {
            tracing::debug!("creating writer on endpoint {}", self.out_endpoint.endpoint_number);
            self.writable = Some(Rc::new(WriteSink::new(self.dev.clone(), self.out_endpoint)));
        }

        self.writable.clone().map(SerialWriter::new)
    }

    /// Closes the port.
    ///
    /// Ends the reader and aborts the writer, waiting for their transfers in flight.
    /// Then deasserts DTR and RTS and closes the device.
    pub async fn close(&mut self) -> Result<()> {
        tracing::debug!("closing serial port");

        let readable = self.readable.take();
        let writable = self.writable.take();
        join!(
            async {
                if let Some(source) = &readable {
                    source.cancel().await;
                }
            },
            async {
                if let Some(sink) = &writable {
                    sink.abort().await;
                }
            }
        );
        self.state = PortState::Closed;

        if self.dev.opened() {
            let res = self
                .set_signals(SignalUpdate::default().with_data_terminal_ready(false).with_request_to_send(false))
                .await;
            self.dev.close().await?;
            res?;
        }

        tracing::debug!("serial port is closed");
        Ok(())
    }

    /// Revokes the permission to access the device.
    pub async fn forget(&self) -> Result<()> {
        Ok(self.dev.forget().await?)
    }
}

impl<D> Drop for SerialPort<D> {
    fn drop(&mut self) {
        if matches!(self.state, PortState::Opened | PortState::Active) {
            tracing::warn!("serial port dropped without being closed");
        }
    }
}
