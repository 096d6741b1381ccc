//! Blocking GDB remote-serial-protocol transport over a plain TCP socket.
//!
//! The teacher's `tcp.rs` wrapped a `tokio::net::TcpStream` so the GDB session could run
//! alongside the TUI's async event loop. That concurrency is gone along with the TUI (see
//! DESIGN.md), so this wraps `std::net::TcpStream` instead: `write`/`write_all`/`flush` are
//! genuinely blocking now, and `peek` (used by [`crate::gdb::EventLoop::wait_for_stop_reason`]
//! to poll for an incoming Ctrl-C between simulation steps) relies on a short read timeout rather
//! than nonblocking mode, so a stalled connection can never wedge the simulation loop.

use std::io::{self, Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::time::Duration;

use gdbstub::conn::{Connection, ConnectionExt};

/// How long [`TcpStream::peek`] blocks waiting for a byte before giving up and letting the
/// simulation loop take another step. Small enough that Ctrl-C feels instant, large enough that
/// polling doesn't dominate the run loop.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct TcpStream(pub StdTcpStream);

impl TcpStream {
    pub fn new(inner: StdTcpStream) -> Self {
        Self(inner)
    }
}

impl Connection for TcpStream {
    type Error = io::Error;

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.0.write_all(&[byte])
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.0.write_all(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush()
    }

    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        self.0.set_nodelay(true)?;
        self.0.set_read_timeout(Some(POLL_INTERVAL))
    }
}

impl ConnectionExt for TcpStream {
    fn read(&mut self) -> Result<u8, Self::Error> {
        let mut buf = [0u8; 1];
        self.0.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        let mut buf = [0u8; 1];
        match self.0.peek(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
