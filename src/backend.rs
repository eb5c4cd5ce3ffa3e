//! Device descriptor source abstraction
//!
//! The locator and connection never talk to libusb directly. They go through
//! [`DeviceSource`] to enumerate and open devices, and through [`UsbHandle`]
//! for the control and bulk transfers of an opened device. The production
//! implementation lives in [`crate::device`].

use std::time::Duration;

use crate::error::Result;

/// A device as reported by enumeration, before it has been opened
#[derive(Debug, Clone)]
pub struct Candidate<D> {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Device release number (bcdDevice)
    pub bcd_device: u16,
    pub manufacturer_index: Option<u8>,
    pub serial_number_index: Option<u8>,
    pub product_index: Option<u8>,
    /// Opaque platform reference used to open the device
    pub device: D,
}

/// Source of candidate devices
pub trait DeviceSource: Send + Sync {
    /// Platform reference to an enumerated device
    type Device: Send;
    /// Open handle to a device
    type Handle: UsbHandle;

    /// Snapshot every attached device, in discovery order
    fn enumerate(&self) -> Result<Vec<Candidate<Self::Device>>>;

    /// Open a device for transfers
    fn open(&self, device: &Self::Device) -> rusb::Result<Self::Handle>;
}

/// Transfers on an opened device
///
/// Bulk and control transfers take `&self` so one handle can be shared by the
/// read worker, the write worker and the configurator at the same time.
pub trait UsbHandle: Send + Sync + 'static {
    /// Read an ASCII string descriptor
    fn read_string(&self, index: u8) -> rusb::Result<String>;

    fn kernel_driver_active(&self, _interface: u8) -> rusb::Result<bool> {
        Ok(false)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> rusb::Result<()> {
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;

    /// Control OUT transfer, returns the number of bytes sent
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Bulk IN transfer, returns the number of bytes received
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    /// Bulk OUT transfer, returns the number of bytes accepted
    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory devices for unit tests

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Candidate, DeviceSource, UsbHandle};
    use crate::error::Result;

    /// A control transfer as seen by the device
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ControlRecord {
        pub request_type: u8,
        pub request: u8,
        pub value: u16,
        pub index: u16,
        pub data: Vec<u8>,
    }

    /// One scripted answer to a bulk IN poll
    #[derive(Debug, Clone)]
    pub enum Poll {
        Data(Vec<u8>),
        Fail(rusb::Error),
        /// Block for this long, then time out
        Stall(Duration),
    }

    #[derive(Debug, Default)]
    pub struct MockState {
        pub controls: Vec<ControlRecord>,
        pub writes: Vec<Vec<u8>>,
        pub polls: VecDeque<Poll>,
        pub claimed: Vec<u8>,
        pub released: Vec<u8>,
        pub fail_control: Option<rusb::Error>,
        pub fail_write: Option<rusb::Error>,
        pub fail_claim: Option<rusb::Error>,
        pub fail_release: Option<rusb::Error>,
        /// Bytes the device accepts per write, if capped
        pub write_limit: Option<usize>,
        /// How long each write blocks before completing
        pub write_delay: Option<Duration>,
    }

    /// Simulated device shared between the test and the handle it hands out
    #[derive(Debug, Clone)]
    pub struct MockDevice {
        pub vendor_id: u16,
        pub product_id: u16,
        pub bcd_device: u16,
        pub manufacturer: Option<String>,
        pub serial_number: Option<String>,
        pub product: Option<String>,
        pub openable: bool,
        pub state: Arc<Mutex<MockState>>,
        pub poll_count: Arc<AtomicUsize>,
        pub open_handles: Arc<AtomicUsize>,
    }

    impl MockDevice {
        pub fn new(vendor_id: u16, product_id: u16) -> Self {
            Self {
                vendor_id,
                product_id,
                bcd_device: 0x0100,
                manufacturer: None,
                serial_number: None,
                product: None,
                openable: true,
                state: Arc::default(),
                poll_count: Arc::default(),
                open_handles: Arc::default(),
            }
        }

        pub fn strings(mut self, manufacturer: &str, serial: &str, product: &str) -> Self {
            self.manufacturer = Some(manufacturer.to_string());
            self.serial_number = Some(serial.to_string());
            self.product = Some(product.to_string());
            self
        }

        pub fn unopenable(mut self) -> Self {
            self.openable = false;
            self
        }

        pub fn push_poll(&self, poll: Poll) {
            self.state.lock().unwrap().polls.push_back(poll);
        }

        pub fn controls(&self) -> Vec<ControlRecord> {
            self.state.lock().unwrap().controls.clone()
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().writes.clone()
        }

        pub fn polls(&self) -> usize {
            self.poll_count.load(Ordering::SeqCst)
        }

        pub fn handles(&self) -> usize {
            self.open_handles.load(Ordering::SeqCst)
        }
    }

    /// Source over a fixed list of simulated devices
    #[derive(Debug, Default, Clone)]
    pub struct MockSource {
        pub devices: Vec<MockDevice>,
        pub enumerations: Arc<AtomicUsize>,
    }

    impl MockSource {
        pub fn new(devices: Vec<MockDevice>) -> Self {
            Self {
                devices,
                enumerations: Arc::default(),
            }
        }
    }

    impl DeviceSource for MockSource {
        type Device = MockDevice;
        type Handle = MockHandle;

        fn enumerate(&self) -> Result<Vec<Candidate<MockDevice>>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .devices
                .iter()
                .map(|dev| Candidate {
                    vendor_id: dev.vendor_id,
                    product_id: dev.product_id,
                    bcd_device: dev.bcd_device,
                    manufacturer_index: dev.manufacturer.as_ref().map(|_| 1),
                    serial_number_index: dev.serial_number.as_ref().map(|_| 2),
                    product_index: dev.product.as_ref().map(|_| 3),
                    device: dev.clone(),
                })
                .collect())
        }

        fn open(&self, device: &MockDevice) -> rusb::Result<MockHandle> {
            if !device.openable {
                return Err(rusb::Error::NotSupported);
            }
            device.open_handles.fetch_add(1, Ordering::SeqCst);
            Ok(MockHandle {
                device: device.clone(),
            })
        }
    }

    pub struct MockHandle {
        pub device: MockDevice,
    }

    impl Drop for MockHandle {
        fn drop(&mut self) {
            self.device.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl UsbHandle for MockHandle {
        fn read_string(&self, index: u8) -> rusb::Result<String> {
            let found = match index {
                1 => self.device.manufacturer.clone(),
                2 => self.device.serial_number.clone(),
                3 => self.device.product.clone(),
                _ => None,
            };
            found.ok_or(rusb::Error::InvalidParam)
        }

        fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
            let mut state = self.device.state.lock().unwrap();
            if let Some(err) = state.fail_claim {
                return Err(err);
            }
            state.claimed.push(interface);
            Ok(())
        }

        fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
            let mut state = self.device.state.lock().unwrap();
            state.released.push(interface);
            match state.fail_release {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn write_control(
            &self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            data: &[u8],
            _timeout: Duration,
        ) -> rusb::Result<usize> {
            let mut state = self.device.state.lock().unwrap();
            if let Some(err) = state.fail_control {
                return Err(err);
            }
            state.controls.push(ControlRecord {
                request_type,
                request,
                value,
                index,
                data: data.to_vec(),
            });
            Ok(data.len())
        }

        fn read_bulk(
            &self,
            _endpoint: u8,
            buf: &mut [u8],
            timeout: Duration,
        ) -> rusb::Result<usize> {
            self.device.poll_count.fetch_add(1, Ordering::SeqCst);
            let next = self.device.state.lock().unwrap().polls.pop_front();
            match next {
                Some(Poll::Data(data)) => {
                    if data.len() > buf.len() {
                        return Err(rusb::Error::Overflow);
                    }
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Poll::Fail(err)) => Err(err),
                Some(Poll::Stall(delay)) => {
                    std::thread::sleep(delay);
                    Err(rusb::Error::Timeout)
                }
                None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(5)));
                    Err(rusb::Error::Timeout)
                }
            }
        }

        fn write_bulk(&self, _endpoint: u8, buf: &[u8], _timeout: Duration) -> rusb::Result<usize> {
            let delay = self.device.state.lock().unwrap().write_delay;
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            let mut state = self.device.state.lock().unwrap();
            if let Some(err) = state.fail_write {
                return Err(err);
            }
            let accepted = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
            state.writes.push(buf[..accepted].to_vec());
            Ok(accepted)
        }
    }
}
