//! Byte streams over bulk endpoints.
//!
//! A [`SerialReader`] issues one IN transfer per pull and a [`SerialWriter`] one OUT transfer
//! per chunk. All handles obtained from a port share the same adapter, including the transfer
//! that is currently in flight, so that closing the port can wait for it to complete.

use bytes::Bytes;
use futures::{
    future::{poll_fn, LocalBoxFuture},
    ready, FutureExt, Sink, SinkExt, Stream,
};
use std::{
    cell::RefCell,
    fmt, io,
    mem::take,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{
    device::{EndpointDescriptor, InTransfer, OutTransfer, TransferStatus, UsbDevice},
    Error, Result,
};

/// Length of the IN transfer for a pull of `desired` bytes.
///
/// The desired size is rounded up to whole packets; without one, a single packet is requested.
pub(crate) fn transfer_size(desired: Option<usize>, packet_size: usize) -> usize {
    let packet_size = packet_size.max(1);
    match desired {
        Some(desired) if desired > 0 => desired.div_ceil(packet_size) * packet_size,
        _ => packet_size,
    }
}

/// Transfer in flight, polled by whoever is waiting for it.
struct InFlight<T> {
    fut: Option<LocalBoxFuture<'static, io::Result<T>>>,
    waiters: Vec<Waker>,
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self { fut: None, waiters: Vec::new() }
    }
}

impl<T> InFlight<T> {
    fn is_idle(&self) -> bool {
        self.fut.is_none()
    }

    fn start(&mut self, fut: LocalBoxFuture<'static, io::Result<T>>) {
        debug_assert!(self.fut.is_none(), "transfer already in flight");
        self.fut = Some(fut);
    }

    /// Polls the transfer; `None` when idle.
    ///
    /// On completion all other waiters are woken, since only the last poller
    /// is registered with the transfer itself.
    fn poll(&mut self, cx: &mut Context) -> Poll<Option<io::Result<T>>> {
        let Some(fut) = self.fut.as_mut() else { return Poll::Ready(None) };

        match fut.poll_unpin(cx) {
            Poll::Ready(res) => {
                self.fut = None;
                for waker in self.waiters.drain(..) {
                    waker.wake();
                }
                Poll::Ready(Some(res))
            }
            Poll::Pending => {
                if !self.waiters.iter().any(|w| w.will_wake(cx.waker())) {
                    self.waiters.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

#[derive(Default)]
struct SourceState {
    transfer: InFlight<InTransfer>,
    /// Received bytes that did not fit into the caller's buffer.
    surplus: Bytes,
    cancelled: bool,
    errored: bool,
}

/// Pull-based source reading from an IN endpoint.
pub(crate) struct ReadSource<D> {
    dev: Rc<D>,
    endpoint: EndpointDescriptor,
    buffer_size: usize,
    state: RefCell<SourceState>,
}

impl<D> ReadSource<D>
where
    D: UsbDevice + 'static,
{
    pub(crate) fn new(dev: Rc<D>, endpoint: EndpointDescriptor, buffer_size: usize) -> Self {
        Self { dev, endpoint, buffer_size, state: RefCell::default() }
    }

    pub(crate) fn is_errored(&self) -> bool {
        self.state.borrow().errored
    }

    /// Pulls the next non-empty chunk; `None` once cancelled.
    fn poll_pull(&self, cx: &mut Context, desired: Option<usize>) -> Poll<Result<Option<Bytes>>> {
        let mut state = self.state.borrow_mut();

        if !state.surplus.is_empty() {
            return Poll::Ready(Ok(Some(take(&mut state.surplus))));
        }

        loop {
            if state.transfer.is_idle() {
                // Cancellation is checked before every new transfer.
                if state.cancelled {
                    return Poll::Ready(Ok(None));
                }
                if state.errored {
                    return Poll::Ready(Err(Error::StreamErrored));
                }

                let dev = self.dev.clone();
                let ep = self.endpoint.endpoint_number;
                let len = transfer_size(desired, self.endpoint.packet_size);
                state.transfer.start(async move { dev.transfer_in(ep, len).await }.boxed_local());
            }

            let Some(res) = ready!(state.transfer.poll(cx)) else { continue };

            // The port was closed while the transfer was in flight.
            if state.cancelled {
                return Poll::Ready(Ok(None));
            }

            match res {
                Ok(InTransfer { status: TransferStatus::Ok, data }) => {
                    #[cfg(feature = "trace-packets")]
                    tracing::trace!("Received packet of {} bytes", data.len());
                    if !data.is_empty() {
                        return Poll::Ready(Ok(Some(data)));
                    }
                }
                Ok(InTransfer { status, .. }) => {
                    tracing::warn!("receiving failed: {status}");
                    state.errored = true;
                    return Poll::Ready(Err(Error::Transfer(status)));
                }
                Err(err) => {
                    tracing::warn!("receiving failed: {err}");
                    state.errored = true;
                    return Poll::Ready(Err(Error::Transport(err)));
                }
            }
        }
    }

    fn unread(&self, data: Bytes) {
        let mut state = self.state.borrow_mut();
        debug_assert!(state.surplus.is_empty());
        state.surplus = data;
    }

    /// Cancels the source and waits for the transfer in flight to complete.
    pub(crate) async fn cancel(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.cancelled = true;
            state.surplus = Bytes::new();
        }

        poll_fn(|cx| {
            let mut state = self.state.borrow_mut();
            if let Some(Err(err)) = ready!(state.transfer.poll(cx)) {
                tracing::debug!("transfer in flight during cancel failed: {err}");
            }
            Poll::Ready(())
        })
        .await
    }
}

/// Reads data from a serial port.
///
/// Data is available as a [`Stream`] of chunks, through [`read_chunk`](Self::read_chunk)
/// and through [`AsyncRead`]. The reader ends when the port is closed.
///
/// After an error, the reader stays failed; obtain a new one from
/// [`SerialPort::readable`](super::SerialPort::readable).
pub struct SerialReader<D> {
    source: Rc<ReadSource<D>>,
}

impl<D> Clone for SerialReader<D> {
    fn clone(&self) -> Self {
        Self { source: self.source.clone() }
    }
}

impl<D> fmt::Debug for SerialReader<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SerialReader").field(&self.source.endpoint.endpoint_number).finish()
    }
}

impl<D> SerialReader<D>
where
    D: UsbDevice + 'static,
{
    pub(crate) fn new(source: Rc<ReadSource<D>>) -> Self {
        Self { source }
    }

    /// Reads the next chunk of data.
    ///
    /// When `desired` is specified, it is rounded up to a multiple of the packet size
    /// and used as transfer length; otherwise a single packet is requested.
    /// The returned chunk may be shorter. Returns `None` when the port has been closed.
    ///
    /// ## Cancel safety
    /// If canceled, the transfer stays in flight and its data is returned by the next read.
    pub async fn read_chunk(&mut self, desired: Option<usize>) -> Result<Option<Bytes>> {
        poll_fn(|cx| self.source.poll_pull(cx, desired)).await
    }

    /// Whether the reader has failed.
    pub fn is_errored(&self) -> bool {
        self.source.is_errored()
    }

    /// Whether both readers share the same underlying stream.
    pub fn same_stream(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.source, &other.source)
    }
}

impl<D> Stream for SerialReader<D>
where
    D: UsbDevice + 'static,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let source = &self.source;
        match ready!(source.poll_pull(cx, Some(source.buffer_size))) {
            Ok(Some(data)) => Poll::Ready(Some(Ok(data))),
            Ok(None) | Err(Error::StreamErrored) => Poll::Ready(None),
            Err(err) => Poll::Ready(Some(Err(err))),
        }
    }
}

impl<D> AsyncRead for SerialReader<D>
where
    D: UsbDevice + 'static,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context, buf: &mut ReadBuf) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let source = &self.source;
        match ready!(source.poll_pull(cx, Some(buf.remaining()))) {
            Ok(Some(mut data)) => {
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data.split_to(n));
                if !data.is_empty() {
                    source.unread(data);
                }
                Poll::Ready(Ok(()))
            }
            Ok(None) => Poll::Ready(Ok(())),
            Err(err) => Poll::Ready(Err(err.into())),
        }
    }
}

#[derive(Default)]
struct SinkState {
    transfer: InFlight<OutTransfer>,
    /// Buffer of the transfer in flight if it was started by `AsyncWrite`.
    write_buf: Option<Bytes>,
    aborted: bool,
    errored: bool,
}

/// Push-based sink writing to an OUT endpoint.
pub(crate) struct WriteSink<D> {
    dev: Rc<D>,
    endpoint: EndpointDescriptor,
    state: RefCell<SinkState>,
}

impl<D> WriteSink<D>
where
    D: UsbDevice + 'static,
{
    pub(crate) fn new(dev: Rc<D>, endpoint: EndpointDescriptor) -> Self {
        Self { dev, endpoint, state: RefCell::default() }
    }

    pub(crate) fn is_errored(&self) -> bool {
        self.state.borrow().errored
    }

    fn is_busy(&self) -> bool {
        !self.state.borrow().transfer.is_idle()
    }

    /// Starts the transfer of a chunk; the previous one must have completed.
    fn start(&self, data: Bytes) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.aborted {
            return Err(Error::Aborted);
        }
        if state.errored {
            return Err(Error::StreamErrored);
        }

        let dev = self.dev.clone();
        let ep = self.endpoint.endpoint_number;
        state.write_buf = None;
        state.transfer.start(async move { dev.transfer_out(ep, &data).await }.boxed_local());
        Ok(())
    }

    /// Starts the transfer of a buffer passed to `AsyncWrite`.
    fn start_write(&self, buf: &[u8]) -> Result<()> {
        let data = Bytes::copy_from_slice(buf);
        self.start(data.clone())?;
        self.state.borrow_mut().write_buf = Some(data);
        Ok(())
    }

    /// Whether the transfer in flight was started by `AsyncWrite` for `buf`.
    fn is_writing(&self, buf: &[u8]) -> bool {
        self.state.borrow().write_buf.as_deref() == Some(buf)
    }

    /// Waits for the transfer in flight; `None` when idle.
    fn poll_complete(&self, cx: &mut Context) -> Poll<Result<Option<usize>>> {
        let mut state = self.state.borrow_mut();
        let Some(res) = ready!(state.transfer.poll(cx)) else {
            // A transfer awaited by abort has been settled there.
            return Poll::Ready(if state.aborted { Err(Error::Aborted) } else { Ok(None) });
        };
        state.write_buf = None;

        if state.aborted {
            return Poll::Ready(Err(Error::Aborted));
        }

        match res {
            Ok(OutTransfer { status: TransferStatus::Ok, bytes_written }) => {
                #[cfg(feature = "trace-packets")]
                tracing::trace!("Sent packet of {bytes_written} bytes");
                Poll::Ready(Ok(Some(bytes_written)))
            }
            Ok(OutTransfer { status, .. }) => {
                tracing::warn!("sending failed: {status}");
                state.errored = true;
                Poll::Ready(Err(Error::Transfer(status)))
            }
            Err(err) => {
                tracing::warn!("sending failed: {err}");
                state.errored = true;
                Poll::Ready(Err(Error::Transport(err)))
            }
        }
    }

    fn poll_ready(&self, cx: &mut Context) -> Poll<Result<()>> {
        ready!(self.poll_complete(cx))?;

        let state = self.state.borrow();
        if state.aborted {
            Poll::Ready(Err(Error::Aborted))
        } else if state.errored {
            Poll::Ready(Err(Error::StreamErrored))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    /// Aborts the sink and waits for the transfer in flight to complete.
    pub(crate) async fn abort(&self) {
        self.state.borrow_mut().aborted = true;

        poll_fn(|cx| {
            let mut state = self.state.borrow_mut();
            if let Some(Err(err)) = ready!(state.transfer.poll(cx)) {
                tracing::debug!("transfer in flight during abort failed: {err}");
            }
            state.write_buf = None;
            Poll::Ready(())
        })
        .await
    }
}

/// Writes data to a serial port.
///
/// Chunks are accepted through the [`Sink`] implementation, [`send`](Self::send)
/// and through [`AsyncWrite`]. Each chunk is sent as one transfer and the next chunk
/// is accepted only after the previous transfer has completed.
///
/// After an error, the writer stays failed; obtain a new one from
/// [`SerialPort::writable`](super::SerialPort::writable).
pub struct SerialWriter<D> {
    sink: Rc<WriteSink<D>>,
}

impl<D> Clone for SerialWriter<D> {
    fn clone(&self) -> Self {
        Self { sink: self.sink.clone() }
    }
}

impl<D> fmt::Debug for SerialWriter<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SerialWriter").field(&self.sink.endpoint.endpoint_number).finish()
    }
}

impl<D> SerialWriter<D>
where
    D: UsbDevice + 'static,
{
    pub(crate) fn new(sink: Rc<WriteSink<D>>) -> Self {
        Self { sink }
    }

    /// Sends a chunk and waits until its transfer has completed.
    pub async fn send(&mut self, data: Bytes) -> Result<()> {
        SinkExt::send(self, data).await
    }

    /// Whether the writer has failed.
    pub fn is_errored(&self) -> bool {
        self.sink.is_errored()
    }

    /// Whether both writers share the same underlying stream.
    pub fn same_stream(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.sink, &other.sink)
    }
}

impl<D> Sink<Bytes> for SerialWriter<D>
where
    D: UsbDevice + 'static,
{
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        self.sink.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<()> {
        self.sink.start(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        ready!(self.sink.poll_complete(cx))?;
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        Sink::poll_flush(self, cx)
    }
}

/// Dropping a pending write does not cancel its transfer; the data is still sent.
/// Retrying with the same buffer resumes that transfer, while a different buffer
/// is sent after it has completed.
impl<D> AsyncWrite for SerialWriter<D>
where
    D: UsbDevice + 'static,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        loop {
            if !self.sink.is_busy() {
                self.sink.start_write(buf)?;
            }

            let own = self.sink.is_writing(buf);
            match ready!(self.sink.poll_complete(cx)) {
                Ok(n) if own => return Poll::Ready(Ok(n.unwrap_or_default().min(buf.len()))),
                Ok(n) => tracing::debug!("earlier chunk completed with {n:?} bytes before write"),
                Err(err) => return Poll::Ready(Err(err.into())),
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        ready!(self.sink.poll_complete(cx))?;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(self, cx)
    }
}
