//! Connection state machine
//!
//! A [`Connection`] owns at most one opened port. It moves through
//! `Closed -> Opening -> Open -> Closing -> Closed`; every operation takes
//! `&self`, so a connection can be shared between a reader thread and a
//! writer thread.
//!
//! The state lock is never held across USB I/O. Configuration requests take
//! a clone of the handle together with an in-flight ticket while the
//! connection is `Open`, and writes are queued to the port's writer thread.
//! Close drains the writer and waits for the tickets before releasing the
//! interface.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::address::DeviceAddress;
use crate::backend::{DeviceSource, UsbHandle};
use crate::configurator::LineConfigurator;
use crate::device::RusbSource;
use crate::error::{Result, SerialError};
use crate::locator::DeviceLocator;
use crate::settings::PortSettings;
use crate::stream::PortStream;
use crate::structures::{Direction, LineConfig, OpenOptions, PortInfo, SetOptions};
use crate::transfer::{
    spawn_read, Backlog, InFlight, PendingRead, PendingWrite, ReadWorker, TransferRequest,
    Writer,
};

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

/// Resources of an open port
struct Link<H> {
    handle: Arc<H>,
    control: Arc<Mutex<()>>,
    writer: Writer,
    inflight: Arc<InFlight>,
    reader: Option<ReadWorker>,
    address: DeviceAddress,
    line: LineConfig,
}

struct Inner<H> {
    state: ConnectionState,
    link: Option<Link<H>>,
}

/// A serial port on a BLP device
pub struct Connection<S: DeviceSource = RusbSource> {
    locator: DeviceLocator<S>,
    settings: PortSettings,
    inner: Mutex<Inner<S::Handle>>,
    backlog: Backlog,
}

impl Connection<RusbSource> {
    /// Create a closed connection using libusb
    pub fn new() -> Self {
        Self::with_source(RusbSource::new())
    }
}

impl Default for Connection<RusbSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DeviceSource> Connection<S> {
    pub fn with_source(source: S) -> Self {
        Self::with_settings(source, PortSettings::default())
    }

    pub fn with_settings(source: S, settings: PortSettings) -> Self {
        Self {
            locator: DeviceLocator::new(source),
            settings,
            inner: Mutex::new(Inner {
                state: ConnectionState::Closed,
                link: None,
            }),
            backlog: Backlog::default(),
        }
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    pub fn locator(&self) -> &DeviceLocator<S> {
        &self.locator
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Address of the open port
    pub fn address(&self) -> Option<DeviceAddress> {
        self.lock().link.as_ref().map(|link| link.address)
    }

    /// Line coding last applied to the open port
    pub fn line_config(&self) -> Option<LineConfig> {
        self.lock().link.as_ref().map(|link| link.line)
    }

    /// List the ports this connection could open
    pub fn list(&self) -> Result<Vec<PortInfo>> {
        self.locator.list()
    }

    /// Open the port at `address` and apply `config`
    ///
    /// On any failure the connection is back in `Closed` and the device
    /// handle has been released.
    pub fn open(&self, address: &DeviceAddress, config: LineConfig) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Closed {
                return Err(SerialError::AlreadyOpen);
            }
            inner.state = ConnectionState::Opening;
        }
        debug!("Opening {} ({})", address, config);

        match self.establish(address, config) {
            Ok(link) => {
                self.backlog_lock().clear();
                let mut inner = self.lock();
                inner.link = Some(link);
                inner.state = ConnectionState::Open;
                info!("Opened {} at {}", address, config);
                Ok(())
            }
            Err(e) => {
                self.lock().state = ConnectionState::Closed;
                warn!("Failed to open {}: {}", address, e);
                Err(e)
            }
        }
    }

    /// Open a port from its textual address and loosely typed options
    pub fn open_with(&self, path: &str, options: &OpenOptions) -> Result<()> {
        options.validate()?;
        let address: DeviceAddress = path.parse()?;
        self.open(&address, options.line_config())
    }

    fn establish(&self, address: &DeviceAddress, config: LineConfig) -> Result<Link<S::Handle>> {
        let candidate = self.locator.resolve(address)?;
        let mut handle = self
            .locator
            .source()
            .open(&candidate.device)
            .map_err(|status| SerialError::Open { status })?;

        let interface = self.settings.interface;
        if self.settings.detach_kernel_driver
            && handle.kernel_driver_active(interface).unwrap_or(false)
        {
            debug!("Detaching kernel driver from interface {}", interface);
            handle
                .detach_kernel_driver(interface)
                .map_err(SerialError::DetachKernelDriver)?;
        }

        handle
            .claim_interface(interface)
            .map_err(|status| SerialError::Claim { status })?;

        let control = Arc::new(Mutex::new(()));
        let applied = LineConfigurator::new(&handle, &control, self.settings.control_timeout)
            .set_line_coding(&config);
        if let Err(e) = applied {
            release_quietly(&mut handle, interface);
            return Err(e);
        }

        let handle = Arc::new(handle);
        let writer = match Writer::spawn(handle.clone()) {
            Ok(writer) => writer,
            Err(e) => {
                if let Ok(mut handle) = Arc::try_unwrap(handle) {
                    release_quietly(&mut handle, interface);
                }
                return Err(e);
            }
        };

        Ok(Link {
            handle,
            control,
            writer,
            inflight: Arc::new(InFlight::default()),
            reader: None,
            address: *address,
            line: config,
        })
    }

    /// Start a read of up to `length` bytes
    ///
    /// Bytes left over from an earlier read are returned without polling.
    /// Only one read may be outstanding at a time.
    pub fn start_read(&self, length: usize) -> Result<PendingRead> {
        let mut inner = self.lock();
        let link = open_link(&mut *inner)?;

        if link.reader.as_ref().is_some_and(|reader| !reader.is_finished()) {
            return Err(SerialError::ReadInProgress);
        }
        link.reader = None;

        if length == 0 {
            return Ok(PendingRead::ready(Vec::new(), self.backlog.clone()));
        }

        {
            let mut backlog = self.backlog_lock();
            if !backlog.is_empty() {
                let take = length.min(backlog.len());
                let data: Vec<u8> = backlog.drain(..take).collect();
                debug!("Read served {} bytes from backlog", data.len());
                return Ok(PendingRead::ready(data, self.backlog.clone()));
            }
        }

        let request = TransferRequest {
            direction: Direction::In,
            endpoint: self.settings.endpoint_in,
            length,
            timeout: self.settings.read_poll_timeout,
        };
        let (worker, pending) = spawn_read(link.handle.clone(), self.backlog.clone(), request)?;
        link.reader = Some(worker);
        Ok(pending)
    }

    /// Read into `buf[offset..offset + length]`, blocking until data arrives
    ///
    /// Returns the number of bytes stored, which is 0 when the read was
    /// cancelled by close.
    pub fn read(&self, buf: &mut [u8], offset: usize, length: usize) -> Result<usize> {
        if offset.checked_add(length).map_or(true, |end| end > buf.len()) {
            return Err(SerialError::InvalidRange {
                offset,
                length,
                buffer_len: buf.len(),
            });
        }
        self.start_read(length)?.wait_into(buf, offset)
    }

    /// Start a write of the whole buffer in a single bulk transfer
    ///
    /// Writes reach the device in the order they were started.
    pub fn start_write(&self, data: Vec<u8>) -> Result<PendingWrite> {
        let mut inner = self.lock();
        let link = open_link(&mut *inner)?;

        let request = TransferRequest {
            direction: Direction::Out,
            endpoint: self.settings.endpoint_out,
            length: data.len(),
            timeout: self.settings.write_timeout,
        };
        link.writer.submit(data, request)
    }

    /// Write `data`, returning the number of bytes the device accepted
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.start_write(data.to_vec())?.wait()
    }

    /// Update break, DTR and RTS; absent fields are left untouched
    pub fn set(&self, options: &SetOptions) -> Result<()> {
        self.with_configurator(|configurator| configurator.apply(options))
    }

    /// Change the line coding of the open port
    pub fn set_line_config(&self, config: LineConfig) -> Result<()> {
        self.with_configurator(|configurator| configurator.set_line_coding(&config))?;
        if let Some(link) = self.lock().link.as_mut() {
            link.line = config;
        }
        Ok(())
    }

    fn with_configurator<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&LineConfigurator<'_, S::Handle>) -> Result<()>,
    {
        let (ticket, handle, control) = {
            let mut inner = self.lock();
            let link = open_link(&mut *inner)?;
            (link.inflight.enter(), link.handle.clone(), link.control.clone())
        };

        let result = f(&LineConfigurator::new(
            &*handle,
            &control,
            self.settings.control_timeout,
        ));
        drop(handle);
        drop(ticket);
        result
    }

    /// Close the port
    ///
    /// An outstanding read is cancelled and must stop within the close
    /// deadline, otherwise `CancelTimeout` is returned and the port stays
    /// open. In-flight writes are waited for. The connection ends up
    /// `Closed` even when releasing the interface fails; that failure is
    /// still returned.
    pub fn close(&self) -> Result<()> {
        let reader = {
            let mut inner = self.lock();
            let link = open_link(&mut *inner)?;
            let reader = link.reader.clone();
            inner.state = ConnectionState::Closing;
            reader
        };
        debug!("Closing");

        if let Some(reader) = reader {
            reader.cancel();
            let deadline = self.settings.close_deadline();
            if !reader.wait_stopped(deadline) {
                self.lock().state = ConnectionState::Open;
                warn!("Read worker still running after {:?}", deadline);
                return Err(SerialError::CancelTimeout { waited: deadline });
            }
        }

        let link = self.lock().link.take();
        let result = match link {
            Some(link) => self.teardown(link),
            None => Ok(()),
        };

        self.lock().state = ConnectionState::Closed;
        match &result {
            Ok(()) => info!("Closed"),
            Err(e) => warn!("Closed with error: {}", e),
        }
        result
    }

    fn teardown(&self, link: Link<S::Handle>) -> Result<()> {
        let Link {
            handle,
            writer,
            inflight,
            reader,
            ..
        } = link;
        drop(reader);
        writer.shutdown();
        inflight.wait_idle();

        let mut handle = Arc::try_unwrap(handle).map_err(|_| SerialError::Release {
            status: rusb::Error::Busy,
        })?;

        let interface = self.settings.interface;
        let released = handle
            .release_interface(interface)
            .map_err(|status| SerialError::Release { status });
        drop(handle);
        released
    }

    /// Blocking `std::io` adapter over this connection
    pub fn stream(&self) -> PortStream<'_, S> {
        PortStream::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S::Handle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backlog_lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn release_quietly<H: UsbHandle>(handle: &mut H, interface: u8) {
    if let Err(status) = handle.release_interface(interface) {
        warn!("Failed to release interface {}: {}", interface, status);
    }
}

fn open_link<H>(inner: &mut Inner<H>) -> Result<&mut Link<H>> {
    match (inner.state, inner.link.as_mut()) {
        (ConnectionState::Open, Some(link)) => Ok(link),
        _ => Err(SerialError::NotOpen),
    }
}

impl<S: DeviceSource> Drop for Connection<S> {
    fn drop(&mut self) {
        if self.state() == ConnectionState::Open {
            if let Err(e) = self.close() {
                debug!("Close on drop failed: {}", e);
            }
        }
    }
}
