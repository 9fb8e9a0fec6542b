//! Chunked flash programming

use std::io::{ErrorKind, Read};

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::MAX_CHUNK;
use crate::{Error, Programmer, SerialPort};

/// Progress of a single programming pass
#[derive(Clone, PartialEq, Debug)]
pub struct Transfer {
    total: u32,
    written: u32,
    address: u32,
}

impl Transfer {
    pub fn new(base: u32, total: u32) -> Self {
        Self {
            total,
            written: 0,
            address: base,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    /// Address of the next block
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Stream `source` into flash one write memory command at a time
    ///
    /// At most `total` bytes are pulled from the source. `on_progress` is
    /// called with the running byte count after every acknowledged block.
    pub fn run<P, D, E, R, F>(
        &mut self,
        programmer: &mut Programmer<P, D, E>,
        mut source: R,
        mut on_progress: F,
    ) -> Result<(), Error<E>>
    where
        P: SerialPort<E>,
        D: DelayMs<u32>,
        E: core::fmt::Debug,
        R: Read,
        F: FnMut(u32),
    {
        if self.total == 0 {
            debug!("Empty image, nothing to program");
            return Ok(());
        }

        let mut buff = [0u8; MAX_CHUNK];

        loop {
            let remaining = (self.total - self.written) as usize;
            let want = remaining.min(MAX_CHUNK);

            let n = match source.read(&mut buff[..want]) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e.kind())),
            };

            if n == 0 {
                break;
            }

            programmer.write_memory(self.address, &buff[..n])?;

            self.address += n as u32;
            self.written += n as u32;

            on_progress(self.written);
        }

        if self.written != self.total {
            error!(
                "Image ended after {} of {} bytes",
                self.written, self.total
            );
            return Err(Error::Io(ErrorKind::UnexpectedEof));
        }

        Ok(())
    }
}

/// Reports each 10% step of a transfer exactly once
#[derive(Clone, PartialEq, Debug)]
pub struct Milestones {
    total: u32,
    next: u32,
}

impl Milestones {
    const STEP: u32 = 10;

    pub fn new(total: u32) -> Self {
        Self {
            total,
            next: Self::STEP,
        }
    }

    /// Percentages newly reached at `written` bytes, in ascending order
    pub fn advance(&mut self, written: u32) -> Vec<u32> {
        let mut reached = vec![];

        if self.total == 0 {
            return reached;
        }

        let percent = (written as u64 * 100 / self.total as u64).min(100) as u32;

        while self.next <= percent {
            reached.push(self.next);
            self.next += Self::STEP;
        }

        reached
    }
}
