//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read whatever is buffered on the port without waiting for more.
    ///
    /// Returns an empty buffer when nothing is pending.
    async fn read_available(&mut self) -> io::Result<Vec<u8>>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        AsyncWriteExt::write_all(&mut self.port, data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        AsyncWriteExt::flush(&mut self.port).await
    }

    async fn read_available(&mut self) -> io::Result<Vec<u8>> {
        use tokio::io::AsyncReadExt;
        use tokio_serial::SerialPort;

        let pending = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        AsyncReadExt::read_exact(&mut self.port, &mut buf).await?;
        Ok(buf)
    }
}
