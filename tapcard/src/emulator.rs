//! Transport for the card emulator listening on a Unix socket.
//!
//! The emulator speaks bare CBOR, so command frames are unwrapped before being
//! sent and answers are given a success status word.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::frame;
use crate::transport::Transport;
use crate::Error;

pub const DEFAULT_SOCKET: &str = "/tmp/ecard-pipe";

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESPONSE: usize = 4096;

pub struct EmulatorTransport {
    path: PathBuf,
    stream: Option<UnixStream>,
}

impl EmulatorTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: None,
        }
    }
}

impl Default for EmulatorTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET)
    }
}

impl Transport for EmulatorTransport {
    fn connect(&mut self) -> Result<(), Error> {
        let stream = UnixStream::connect(&self.path)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        #[cfg(feature = "log")]
        log::debug!("connected to emulator at {}", self.path.display());
        self.stream = Some(stream);
        Ok(())
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, Error> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        stream.write_all(frame::payload(command)?)?;

        let mut response = Vec::new();
        let mut chunk = [0; 512];
        while !is_complete(&response) {
            if response.len() >= MAX_RESPONSE {
                return Err(Error::Transport(format!(
                    "emulator response exceeds {MAX_RESPONSE} bytes"
                )));
            }
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::Transport("emulator closed the connection".to_owned()));
            }
            response.extend_from_slice(&chunk[..n]);
        }

        Ok(frame::response(&response))
    }

    fn disconnect(&mut self) {
        self.stream = None;
    }
}

/// Whether `buf` holds at least one whole CBOR item.
///
/// Malformed input counts as complete so the decoder gets to report it.
fn is_complete(buf: &[u8]) -> bool {
    !buf.is_empty()
        && !matches!(
            ciborium::de::from_reader::<ciborium::Value, _>(buf),
            Err(ciborium::de::Error::Io(_))
        )
}
