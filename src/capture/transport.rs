use std::{
    io::{ErrorKind, Read},
    time::Duration,
};

use tracing::debug;

use crate::TransportError;

/// Handle for a submitted read, redeemed with [Transport::wait_completion].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    /// Slot of the buffer the read is for.
    pub slot: usize,
    /// Requested length in bytes.
    pub len: usize,
}

impl Ticket {
    #[must_use]
    pub fn new(slot: usize, len: usize) -> Self {
        Ticket { slot, len }
    }
}

/// Device side of a bulk-in capture.
///
/// Reads are submitted per buffer slot and completed in submission order. The data
/// is delivered into the caller's buffer when the read is waited on, so the engine
/// keeps ownership of every buffer at all times.
pub trait Transport: Send {
    /// # Errors
    /// If the device cannot be opened.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Set the size of each transfer and the per-transfer timeout.
    ///
    /// # Errors
    /// If the device rejects the configuration.
    fn configure(&mut self, transfer_size: usize, timeout: Duration) -> Result<(), TransportError>;

    /// Queue a read of `len` bytes for `slot`.
    ///
    /// # Errors
    /// If the read cannot be queued.
    fn submit_read(&mut self, slot: usize, len: usize) -> Result<Ticket, TransportError>;

    /// Wait up to `timeout` for the read identified by `ticket`, copying the data into
    /// `buf`. Returns the number of bytes transferred, which may be 0.
    ///
    /// # Errors
    /// [TransportError::Timeout] if the read did not complete in time, otherwise any
    /// transfer failure.
    fn wait_completion(
        &mut self,
        ticket: &Ticket,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Cancel all outstanding reads.
    ///
    /// # Errors
    /// If the device refuses the request.
    fn abort(&mut self) -> Result<(), TransportError>;

    /// Reset the device endpoint.
    ///
    /// # Errors
    /// If the device refuses the request.
    fn reset(&mut self) -> Result<(), TransportError>;

    /// # Errors
    /// If the device could not be released cleanly.
    fn close(&mut self) -> Result<(), TransportError>;

    /// True if no more data will ever be delivered. Devices never run dry, only
    /// finite sources such as [ReaderTransport] do.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// [Transport] replaying bytes from any reader, such as a previously recorded raw
/// capture. Once the reader is exhausted every read completes with 0 bytes.
#[derive(Debug)]
pub struct ReaderTransport<R> {
    reader: R,
    open: bool,
    exhausted: bool,
    transfer_size: usize,
}

impl<R: Read + Send> ReaderTransport<R> {
    pub fn new(reader: R) -> Self {
        ReaderTransport {
            reader,
            open: false,
            exhausted: false,
            transfer_size: 0,
        }
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Device("transport is not open".into()))
        }
    }
}

impl<R: Read + Send> Transport for ReaderTransport<R> {
    fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        Ok(())
    }

    fn configure(&mut self, transfer_size: usize, _timeout: Duration) -> Result<(), TransportError> {
        self.check_open()?;
        self.transfer_size = transfer_size;
        Ok(())
    }

    fn submit_read(&mut self, slot: usize, len: usize) -> Result<Ticket, TransportError> {
        self.check_open()?;
        let len = if self.transfer_size > 0 {
            len.min(self.transfer_size)
        } else {
            len
        };
        Ok(Ticket::new(slot, len))
    }

    fn wait_completion(
        &mut self,
        ticket: &Ticket,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.check_open()?;
        if self.exhausted {
            return Ok(0);
        }

        let want = ticket.len.min(buf.len());
        let mut got = 0;
        while got < want {
            match self.reader.read(&mut buf[got..want]) {
                Ok(0) => {
                    debug!(slot = ticket.slot, got, "end of replay input");
                    self.exhausted = true;
                    break;
                }
                Ok(n) => got += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Transfer(err.to_string())),
            }
        }
        Ok(got)
    }

    fn abort(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.check_open()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn replays_in_transfer_sized_reads() {
        let dat: Vec<u8> = (0..10).collect();
        let mut transport = ReaderTransport::new(&dat[..]);
        transport.open().unwrap();
        transport.configure(4, TIMEOUT).unwrap();

        let mut buf = [0u8; 8];
        let ticket = transport.submit_read(0, buf.len()).unwrap();
        assert_eq!(ticket.len, 4);
        assert_eq!(transport.wait_completion(&ticket, &mut buf, TIMEOUT), Ok(4));
        assert_eq!(&buf[..4], &[0, 1, 2, 3]);

        let ticket = transport.submit_read(1, 8).unwrap();
        assert_eq!(transport.wait_completion(&ticket, &mut buf, TIMEOUT), Ok(4));
        let ticket = transport.submit_read(2, 8).unwrap();
        assert_eq!(transport.wait_completion(&ticket, &mut buf, TIMEOUT), Ok(2));
        assert_eq!(&buf[..2], &[8, 9]);
        assert!(transport.is_exhausted());

        let ticket = transport.submit_read(0, 8).unwrap();
        assert_eq!(transport.wait_completion(&ticket, &mut buf, TIMEOUT), Ok(0));
    }

    #[test]
    fn requires_open() {
        let mut transport = ReaderTransport::new(&[0u8; 4][..]);
        let err = transport.submit_read(0, 4).unwrap_err();
        assert!(!err.is_transient());

        transport.open().unwrap();
        transport.close().unwrap();
        assert!(transport.reset().is_err());
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "pipe stalled"))
        }
    }

    #[test]
    fn read_errors_are_transient() {
        let mut transport = ReaderTransport::new(Broken);
        transport.open().unwrap();
        let ticket = transport.submit_read(0, 4).unwrap();
        let err = transport
            .wait_completion(&ticket, &mut [0u8; 4], TIMEOUT)
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("pipe stalled"));
    }
}
