//! Scripted serial port for exercising the protocol without hardware

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::protocol::{UART_ACK, UART_NACK};
use crate::SerialPort;

/// A scripted reply from the device
#[derive(Clone, Debug, PartialEq)]
pub enum Rx {
    Byte(u8),
    /// Stay silent until the host writes again
    Silence,
    /// Fail the read with an I/O error
    Fault,
}

pub fn ack() -> Rx {
    Rx::Byte(UART_ACK)
}

pub fn nack() -> Rx {
    Rx::Byte(UART_NACK)
}

/// Reply to Get: ACK, N, version, commands, ACK
pub fn get_reply(version: u8, commands: &[u8]) -> Vec<Rx> {
    let mut r = vec![ack(), Rx::Byte(commands.len() as u8), Rx::Byte(version)];
    r.extend(commands.iter().map(|c| Rx::Byte(*c)));
    r.push(ack());
    r
}

/// Reply to GetId: ACK, N = 1, PID MSB first, ACK
pub fn get_id_reply(pid: u16) -> Vec<Rx> {
    let [hi, lo] = pid.to_be_bytes();
    vec![ack(), Rx::Byte(1), Rx::Byte(hi), Rx::Byte(lo), ack()]
}

#[derive(Default)]
struct Inner {
    rx: VecDeque<Rx>,
    muted: bool,
    written: Vec<u8>,
    resets: usize,
}

#[derive(Clone, Default)]
pub struct MockPort {
    inner: Rc<RefCell<Inner>>,
}

impl MockPort {
    pub fn new(rx: Vec<Rx>) -> Self {
        let p = Self::default();
        p.push(rx);
        p
    }

    pub fn push(&self, rx: Vec<Rx>) {
        self.inner.borrow_mut().rx.extend(rx);
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.borrow().written.clone()
    }

    pub fn clear_written(&self) {
        self.inner.borrow_mut().written.clear();
    }

    pub fn resets(&self) -> usize {
        self.inner.borrow().resets
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().rx.len()
    }
}

impl Read<u8> for MockPort {
    type Error = ErrorKind;

    fn read(&mut self) -> nb::Result<u8, ErrorKind> {
        let mut i = self.inner.borrow_mut();
        if i.muted {
            return Err(nb::Error::WouldBlock);
        }

        match i.rx.pop_front() {
            Some(Rx::Byte(b)) => Ok(b),
            Some(Rx::Silence) => {
                i.muted = true;
                Err(nb::Error::WouldBlock)
            }
            Some(Rx::Fault) => Err(nb::Error::Other(ErrorKind::BrokenPipe)),
            None => Err(nb::Error::WouldBlock),
        }
    }
}

impl Write<u8> for MockPort {
    type Error = ErrorKind;

    fn write(&mut self, word: u8) -> nb::Result<(), ErrorKind> {
        let mut i = self.inner.borrow_mut();
        i.muted = false;
        i.written.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), ErrorKind> {
        Ok(())
    }
}

impl SerialPort<ErrorKind> for MockPort {
    fn set_rts(&mut self, _level: bool) -> Result<(), ErrorKind> {
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), ErrorKind> {
        if level {
            self.inner.borrow_mut().resets += 1;
        }
        Ok(())
    }
}

/// Delay that only accumulates the requested time
#[derive(Clone, Default)]
pub struct MockDelay {
    elapsed: Rc<Cell<u32>>,
    calls: Rc<RefCell<Vec<u32>>>,
}

impl MockDelay {
    pub fn elapsed(&self) -> u32 {
        self.elapsed.get()
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.borrow().clone()
    }
}

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.elapsed.set(self.elapsed.get() + ms);
        self.calls.borrow_mut().push(ms);
    }
}
