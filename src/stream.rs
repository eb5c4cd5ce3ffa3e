//! `std::io` adapter over an open connection

use std::io;

use crate::backend::DeviceSource;
use crate::connection::Connection;

/// Blocking byte stream over a [`Connection`]
///
/// Each `read` is one single-shot read, so it returns as soon as the device
/// sends anything. A read cancelled by `close` returns `Ok(0)`.
pub struct PortStream<'a, S: DeviceSource> {
    connection: &'a Connection<S>,
}

impl<'a, S: DeviceSource> PortStream<'a, S> {
    pub fn new(connection: &'a Connection<S>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &'a Connection<S> {
        self.connection
    }
}

impl<S: DeviceSource> io::Read for PortStream<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let length = buf.len();
        Ok(self.connection.read(buf, 0, length)?)
    }
}

impl<S: DeviceSource> io::Write for PortStream<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.connection.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use crate::address::DeviceAddress;
    use crate::backend::mock::{MockDevice, MockSource, Poll};
    use crate::connection::Connection;
    use crate::constants::BLP_VENDOR_ID;
    use crate::structures::LineConfig;

    #[test]
    fn test_stream_round_trip() {
        let dev = MockDevice::new(BLP_VENDOR_ID, 0x2aaf);
        let conn = Connection::with_source(MockSource::new(vec![dev.clone()]));
        conn.open(&DeviceAddress::new(BLP_VENDOR_ID, 0x2aaf, 0), LineConfig::default())
            .unwrap();

        let mut stream = conn.stream();
        stream.write_all(b"ping\n").unwrap();
        stream.flush().unwrap();
        assert_eq!(dev.writes(), vec![b"ping\n".to_vec()]);

        dev.push_poll(Poll::Data(b"pong\n".to_vec()));
        let mut buf = [0u8; 32];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong\n");
    }

    #[test]
    fn test_stream_maps_errors() {
        let dev = MockDevice::new(BLP_VENDOR_ID, 0x2aaf);
        let conn = Connection::with_source(MockSource::new(vec![dev]));

        let err = conn.stream().write(b"x").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    }
}
