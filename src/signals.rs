//! Control line signals.

use crate::{
    device::{ControlRequest, TransferStatus, UsbDevice},
    Error, Result, REQ_SEND_BREAK, REQ_SET_CONTROL_LINE_STATE,
};

const DTR: u16 = 1 << 0;
const RTS: u16 = 1 << 1;

const BREAK_ON: u16 = 0xffff;
const BREAK_OFF: u16 = 0x0000;

/// Requested state of the output control lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OutputSignals {
    pub data_terminal_ready: bool,
    pub request_to_send: bool,
    pub break_signal: bool,
}

impl OutputSignals {
    /// Applies the fields set in `update`.
    pub fn merge(&mut self, update: &SignalUpdate) {
        if let Some(dtr) = update.data_terminal_ready {
            self.data_terminal_ready = dtr;
        }
        if let Some(rts) = update.request_to_send {
            self.request_to_send = rts;
        }
        if let Some(brk) = update.break_signal {
            self.break_signal = brk;
        }
    }

    /// Value of the Set Control Line State request.
    pub fn line_state(&self) -> u16 {
        let mut value = 0;
        if self.data_terminal_ready {
            value |= DTR;
        }
        if self.request_to_send {
            value |= RTS;
        }
        value
    }

    /// Value of the Send Break request.
    pub fn break_value(&self) -> u16 {
        if self.break_signal {
            BREAK_ON
        } else {
            BREAK_OFF
        }
    }
}

/// Changes to the output control lines.
///
/// Fields left as `None` are not sent to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SignalUpdate {
    pub data_terminal_ready: Option<bool>,
    pub request_to_send: Option<bool>,
    pub break_signal: Option<bool>,
}

impl SignalUpdate {
    /// Sets data terminal ready.
    pub const fn with_data_terminal_ready(mut self, dtr: bool) -> Self {
        self.data_terminal_ready = Some(dtr);
        self
    }

    /// Sets request to send.
    pub const fn with_request_to_send(mut self, rts: bool) -> Self {
        self.request_to_send = Some(rts);
        self
    }

    /// Asserts or releases break.
    pub const fn with_break(mut self, brk: bool) -> Self {
        self.break_signal = Some(brk);
        self
    }

    fn changes_line_state(&self) -> bool {
        self.data_terminal_ready.is_some() || self.request_to_send.is_some()
    }
}

/// Sends the changed signals to the control interface.
///
/// `signals` is updated before the transfers are issued. If a transfer
/// fails, it keeps the requested state, which then no longer matches the
/// device.
pub(crate) async fn send_signals<D: UsbDevice>(
    dev: &D, interface: u8, signals: &mut OutputSignals, update: &SignalUpdate,
) -> Result<()> {
    signals.merge(update);

    if update.changes_line_state() {
        let value = signals.line_state();
        tracing::debug!("setting control line state {value:#04x}");
        let req = ControlRequest::class_interface(REQ_SET_CONTROL_LINE_STATE, value, interface);
        check(dev.control_transfer_out(&req, &[]).await?.status)?;
    }

    if update.break_signal.is_some() {
        let value = signals.break_value();
        tracing::debug!("sending break {value:#06x}");
        let req = ControlRequest::class_interface(REQ_SEND_BREAK, value, interface);
        check(dev.control_transfer_out(&req, &[]).await?.status)?;
    }

    Ok(())
}

fn check(status: TransferStatus) -> Result<()> {
    match status {
        TransferStatus::Ok => Ok(()),
        status => {
            tracing::warn!("control transfer failed: {status}");
            Err(Error::Transfer(status))
        }
    }
}
