//! Transport for NFC readers through PC/SC.

use std::ffi::CString;

use crate::transport::Transport;
use crate::Error;

pub struct PcscTransport {
    context: pcsc::Context,
    reader: Option<String>,
    card: Option<pcsc::Card>,
}

impl PcscTransport {
    /// Uses the reader whose name contains `reader`, or the first one present.
    pub fn new(reader: Option<&str>) -> Result<Self, Error> {
        let context = pcsc::Context::establish(pcsc::Scope::User)?;
        Ok(Self {
            context,
            reader: reader.map(str::to_owned),
            card: None,
        })
    }

    fn pick_reader(&self) -> Result<CString, Error> {
        let readers = self.context.list_readers_owned()?;

        #[cfg(feature = "log")]
        log::debug!("readers: {readers:?}");

        readers
            .into_iter()
            .find(|name| match &self.reader {
                Some(wanted) => name.to_string_lossy().contains(wanted.as_str()),
                None => true,
            })
            .ok_or_else(|| Error::Transport("no matching reader".to_owned()))
    }
}

impl Transport for PcscTransport {
    fn connect(&mut self) -> Result<(), Error> {
        let reader = self.pick_reader()?;
        let card = self
            .context
            .connect(&reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)?;
        self.card = Some(card);
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<Vec<u8>, Error> {
        let card = self.card.as_ref().ok_or(Error::NotConnected)?;
        let mut buf = [0; pcsc::MAX_BUFFER_SIZE];
        let response = card.transmit(frame, &mut buf)?;
        Ok(response.to_vec())
    }

    fn disconnect(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(pcsc::Disposition::LeaveCard);
        }
    }

    fn requires_select(&self) -> bool {
        true
    }
}

impl From<pcsc::Error> for Error {
    fn from(error: pcsc::Error) -> Self {
        Error::Transport(error.to_string())
    }
}
