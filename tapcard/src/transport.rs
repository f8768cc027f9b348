//! Byte pipes between the engine and a card.

use crate::Error;

/// Moves framed commands to a card and framed responses back.
pub trait Transport {
    fn connect(&mut self) -> Result<(), Error>;

    /// Sends one command frame and returns the response frame, status word included.
    fn transmit(&mut self, frame: &[u8]) -> Result<Vec<u8>, Error>;

    fn disconnect(&mut self);

    /// Whether the applet has to be selected before the first command.
    fn requires_select(&self) -> bool {
        false
    }
}

/// A connected transport, disconnected when dropped.
pub(crate) struct Connection<'a, T: Transport + ?Sized>(&'a mut T);

impl<'a, T: Transport + ?Sized> Connection<'a, T> {
    pub fn open(transport: &'a mut T) -> Result<Self, Error> {
        transport.connect()?;
        Ok(Self(transport))
    }

    pub fn transmit(&mut self, frame: &[u8]) -> Result<Vec<u8>, Error> {
        self.0.transmit(frame)
    }

    pub fn requires_select(&self) -> bool {
        self.0.requires_select()
    }
}

impl<'a, T: Transport + ?Sized> Drop for Connection<'a, T> {
    fn drop(&mut self) {
        self.0.disconnect();
    }
}
