//! Byte level access to the bootloader UART

use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::Error;

/// Serial port with modem control lines, used to reset into the bootloader
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    fn set_rts(&mut self, level: bool) -> Result<(), E>;
    fn set_dtr(&mut self, level: bool) -> Result<(), E>;
}

/// Exclusive owner of the serial link and the delay provider
pub struct Transport<P, D, E> {
    port: P,
    delay: D,
    poll_delay_ms: u32,
    _err: PhantomData<E>,
}

impl<P, D, E> Transport<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(port: P, delay: D, poll_delay_ms: u32) -> Self {
        Self {
            port,
            delay,
            poll_delay_ms: poll_delay_ms.max(1),
            _err: PhantomData,
        }
    }

    /// Pulse DTR / RTS to reset the target, then wait for the bootloader to start
    pub fn reset(&mut self, init_delay_ms: u32) -> Result<(), Error<E>> {
        debug!("Resetting device");

        self.port.set_dtr(true)?;
        self.port.set_rts(true)?;

        self.delay.delay_ms(100u32);

        self.port.set_dtr(false)?;
        self.port.set_rts(false)?;

        self.delay.delay_ms(init_delay_ms);

        Ok(())
    }

    pub fn send_bytes(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        trace!("=> {:02x?}", data);

        for b in data {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        Ok(())
    }

    /// Wait up to `timeout_ms` for a single byte
    pub fn recv_byte(&mut self, timeout_ms: u32) -> Result<u8, Error<E>> {
        let mut t = 0;

        loop {
            match self.port.read() {
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(e.into()),
                Ok(v) => {
                    trace!("<= {:02x}", v);
                    return Ok(v);
                }
            };

            // Wait for delay period
            self.delay.delay_ms(self.poll_delay_ms);
            t += self.poll_delay_ms;

            if t > timeout_ms {
                return Err(Error::ResponseTimeout);
            }
        }
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms)
    }

    /// Release the underlying port and delay
    pub fn free(self) -> (P, D) {
        (self.port, self.delay)
    }
}
