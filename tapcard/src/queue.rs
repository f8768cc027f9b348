//! FIFO of commands still owed to the card for the current operation.

use std::collections::VecDeque;

use crate::protocol::{CommandName, Cvc};
use crate::Error;

/// Pending commands plus the CVC they need, if any.
///
/// The CVC lives exactly as long as the operation that brought it.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<CommandName>,
    cvc: Option<Cvc>,
}

impl CommandQueue {
    pub fn enqueue(&mut self, command: CommandName) {
        #[cfg(feature = "log")]
        log::debug!("enqueue {command}");
        self.commands.push_back(command);
    }

    /// Next command to send, left in place.
    pub fn peek(&self) -> Option<CommandName> {
        self.commands.front().copied()
    }

    pub fn dequeue(&mut self) -> Result<CommandName, Error> {
        let command = self.commands.pop_front().ok_or(Error::QueueEmpty)?;
        #[cfg(feature = "log")]
        log::debug!("dequeue {command}");
        Ok(command)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = CommandName> + '_ {
        self.commands.iter().copied()
    }

    pub(crate) fn stash_cvc(&mut self, cvc: Cvc) {
        self.cvc = Some(cvc);
    }

    pub(crate) fn cvc(&self) -> Option<&Cvc> {
        self.cvc.as_ref()
    }

    pub fn has_cvc(&self) -> bool {
        self.cvc.is_some()
    }

    pub(crate) fn forget_cvc(&mut self) {
        self.cvc = None;
    }

    /// Abandons the operation.
    pub(crate) fn clear(&mut self) {
        self.commands.clear();
        self.cvc = None;
    }
}
