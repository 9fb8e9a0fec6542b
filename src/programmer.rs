//! Bootloader command set
//!
//! Each call is a complete command / response exchange. Nothing is retried
//! here: a NACK or timeout part way through a multi-byte command leaves the
//! bootloader parser in an unknown position, so failures go straight back to
//! the caller.

use core::fmt;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::{self, Command, Response, MAX_CHUNK};
use crate::{Error, Options, SerialPort, Transport};

/// Bootloader protocol version
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Decode the BCD style version byte (0x31 is v3.1)
    pub fn from_byte(v: u8) -> Self {
        Self {
            major: v >> 4,
            minor: v & 0x0F,
        }
    }

    /// Comparable version number, `major * 256 + minor`
    pub fn code(&self) -> u16 {
        (self.major as u16) * 256 + self.minor as u16
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub struct Programmer<P, D, E> {
    options: Options,
    transport: Transport<P, D, E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        let transport = Transport::new(port, delay, options.poll_delay_ms);
        Self { options, transport }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn transport(&mut self) -> &mut Transport<P, D, E> {
        &mut self.transport
    }

    /// Reset the device through the modem control lines, unless disabled
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        if self.options.no_reset {
            return Ok(());
        }
        self.transport.reset(self.options.init_delay_ms)
    }

    /// Send the sync character once and wait for the bootloader to ACK it
    pub fn sync(&mut self) -> Result<(), Error<E>> {
        debug!("Sending discovery character");

        self.transport.send_bytes(&[protocol::UART_DISC])?;
        self.await_ack(self.options.response_timeout_ms)
    }

    /// Fetch the bootloader version and the list of supported commands
    pub fn get(&mut self) -> Result<(Version, Vec<u8>), Error<E>> {
        self.send_command(Command::Get)?;

        let n = self.read_byte()?;
        let version = Version::from_byte(self.read_byte()?);

        let mut commands = Vec::with_capacity(n as usize);
        for _ in 0..n {
            commands.push(self.read_byte()?);
        }

        self.await_ack(self.options.response_timeout_ms)?;

        debug!("Bootloader v{} commands: {:02x?}", version, commands);

        Ok((version, commands))
    }

    /// Fetch the product ID of the device
    pub fn get_id(&mut self) -> Result<u16, Error<E>> {
        self.send_command(Command::GetId)?;

        // Number of bytes to follow minus one, always a two byte PID on STM32
        let n = self.read_byte()?;
        if n != 1 {
            error!("Unexpected chip ID length: {}", n as usize + 1);
            return Err(Error::MalformedPayload);
        }

        let hi = self.read_byte()?;
        let lo = self.read_byte()?;

        self.await_ack(self.options.response_timeout_ms)?;

        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Disable write protection for all sectors
    ///
    /// The bootloader resets the device once this completes, so the link
    /// needs to be synced again before the next command.
    pub fn write_unprotect(&mut self) -> Result<(), Error<E>> {
        self.send_command(Command::WriteUnprotect)?;
        self.await_ack(self.options.erase_timeout_ms)
    }

    /// Global erase with the standard erase command
    pub fn erase_all(&mut self) -> Result<(), Error<E>> {
        self.send_command(Command::Erase)?;

        // 0xFF selects every page, its complement stands in for the checksum
        self.transport
            .send_bytes(&[protocol::ERASE_ALL, !protocol::ERASE_ALL])?;
        self.await_ack(self.options.erase_timeout_ms)
    }

    /// Mass erase with the two byte addressed extended erase command
    pub fn extended_erase_all(&mut self) -> Result<(), Error<E>> {
        self.send_command(Command::ExtendedErase)?;

        let frame = protocol::encode_payload(&protocol::EXTENDED_ERASE_ALL);
        self.transport.send_bytes(&frame)?;
        self.await_ack(self.options.erase_timeout_ms)
    }

    /// Write up to 256 bytes at `address`
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), Error<E>> {
        if data.is_empty() || data.len() > MAX_CHUNK {
            return Err(Error::InvalidLength(data.len()));
        }

        debug!("Writing {} bytes at 0x{:08x}", data.len(), address);

        self.send_command(Command::WriteMemory)?;

        self.transport.send_bytes(&protocol::encode_address(address))?;
        self.await_ack(self.options.response_timeout_ms)?;

        self.transport.send_bytes(&protocol::encode_data(data))?;
        self.await_ack(self.options.response_timeout_ms)
    }

    /// Jump to the application at `address`
    pub fn go(&mut self, address: u32) -> Result<(), Error<E>> {
        self.send_command(Command::Go)?;

        self.transport.send_bytes(&protocol::encode_address(address))?;
        self.await_ack(self.options.response_timeout_ms)
    }

    /// Write a command frame and wait for it to be accepted
    fn send_command(&mut self, command: Command) -> Result<(), Error<E>> {
        debug!("Command: {:?}", command);

        self.transport.send_bytes(&protocol::encode_command(command))?;
        self.await_ack(self.options.response_timeout_ms)
    }

    fn read_byte(&mut self) -> Result<u8, Error<E>> {
        self.transport.recv_byte(self.options.response_timeout_ms)
    }

    fn await_ack(&mut self, timeout_ms: u32) -> Result<(), Error<E>> {
        let v = match self.transport.recv_byte(timeout_ms) {
            Ok(v) => v,
            Err(Error::ResponseTimeout) => {
                error!("Receive timeout");
                return Err(Error::ResponseTimeout);
            }
            Err(e) => return Err(e),
        };

        match protocol::decode_ack(v) {
            Response::Ack => {
                debug!("Received bootloader ack");
                Ok(())
            }
            Response::Nack => {
                debug!("Received bootloader nack");
                Err(Error::Nack)
            }
            Response::Unexpected(v) => {
                debug!("Received unexpected value: 0x{:x}", v);
                Err(Error::InvalidResponse(v))
            }
        }
    }

    /// Release the underlying port and delay
    pub fn free(self) -> (P, D) {
        self.transport.free()
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;
    use crate::mock::{ack, get_id_reply, get_reply, nack, MockDelay, MockPort, Rx};

    fn programmer(rx: Vec<Rx>) -> (MockPort, Programmer<MockPort, MockDelay, ErrorKind>) {
        let port = MockPort::new(rx);
        let p = Programmer::new(port.clone(), MockDelay::default(), Options::default());
        (port, p)
    }

    #[test]
    fn version_decoding() {
        let v = Version::from_byte(0x31);
        assert_eq!(v, Version::new(3, 1));
        assert_eq!(v.code(), 0x0301);
        assert_eq!(v.to_string(), "3.1");
    }

    #[test]
    fn sync_sends_discovery() {
        let (port, mut p) = programmer(vec![ack()]);

        p.sync().unwrap();
        assert_eq!(port.written(), vec![0x7F]);
    }

    #[test]
    fn sync_reports_nack() {
        let (_port, mut p) = programmer(vec![nack()]);
        assert_eq!(p.sync(), Err(Error::Nack));
    }

    #[test]
    fn get_reads_version_and_commands() {
        let (port, mut p) = programmer(get_reply(0x22, &[0x00, 0x01, 0x02, 0x31]));

        let (version, commands) = p.get().unwrap();
        assert_eq!(version, Version::new(2, 2));
        assert_eq!(commands, vec![0x00, 0x01, 0x02, 0x31]);
        assert_eq!(port.written(), vec![0x00, 0xFF]);
        assert_eq!(port.pending(), 0);
    }

    #[test]
    fn get_id_reads_pid() {
        let (port, mut p) = programmer(get_id_reply(0x0414));

        assert_eq!(p.get_id(), Ok(0x0414));
        assert_eq!(port.written(), vec![0x02, 0xFD]);
    }

    #[test]
    fn get_id_rejects_unexpected_length() {
        let (_port, mut p) = programmer(vec![ack(), Rx::Byte(2)]);
        assert_eq!(p.get_id(), Err(Error::MalformedPayload));
    }

    #[test]
    fn write_unprotect_needs_two_acks() {
        let (port, mut p) = programmer(vec![ack(), ack()]);

        p.write_unprotect().unwrap();
        assert_eq!(port.written(), vec![0x73, 0x8C]);

        let (_port, mut p) = programmer(vec![ack(), nack()]);
        assert_eq!(p.write_unprotect(), Err(Error::Nack));
    }

    #[test]
    fn erase_all_frames() {
        let (port, mut p) = programmer(vec![ack(), ack()]);

        p.erase_all().unwrap();
        assert_eq!(port.written(), vec![0x43, 0xBC, 0xFF, 0x00]);
    }

    #[test]
    fn extended_erase_all_frames() {
        let (port, mut p) = programmer(vec![ack(), ack()]);

        p.extended_erase_all().unwrap();
        assert_eq!(port.written(), vec![0x44, 0xBB, 0xFF, 0xFF, 0x00]);
    }

    #[test]
    fn write_memory_frames() {
        let (port, mut p) = programmer(vec![ack(), ack(), ack()]);

        p.write_memory(0x0800_0000, &[0xDE, 0xAD]).unwrap();
        assert_eq!(
            port.written(),
            vec![0x31, 0xCE, 0x08, 0x00, 0x00, 0x00, 0x08, 0x01, 0xDE, 0xAD, 0x72]
        );
    }

    #[test]
    fn write_memory_stops_on_address_nack() {
        let (port, mut p) = programmer(vec![ack(), nack()]);

        assert_eq!(p.write_memory(0x0800_0000, &[0x00]), Err(Error::Nack));
        // The data block is never sent after a rejected address
        assert_eq!(port.written().len(), 7);
    }

    #[test]
    fn write_memory_checks_length() {
        let (port, mut p) = programmer(vec![]);

        assert_eq!(p.write_memory(0, &[]), Err(Error::InvalidLength(0)));
        assert_eq!(
            p.write_memory(0, &[0u8; MAX_CHUNK + 1]),
            Err(Error::InvalidLength(MAX_CHUNK + 1))
        );
        assert!(port.written().is_empty());
    }

    #[test]
    fn go_frames() {
        let (port, mut p) = programmer(vec![ack(), ack()]);

        p.go(0x0800_0000).unwrap();
        assert_eq!(port.written(), vec![0x21, 0xDE, 0x08, 0x00, 0x00, 0x00, 0x08]);
    }

    #[test]
    fn command_timeout() {
        let (_port, mut p) = programmer(vec![Rx::Silence]);
        assert_eq!(p.get_id(), Err(Error::ResponseTimeout));
    }

    #[test]
    fn unexpected_response() {
        let (_port, mut p) = programmer(vec![Rx::Byte(0x55)]);
        assert_eq!(p.go(0), Err(Error::InvalidResponse(0x55)));
    }

    #[test]
    fn no_reset_skips_control_lines() {
        let port = MockPort::new(vec![]);
        let options = Options {
            no_reset: true,
            ..Options::default()
        };
        let mut p = Programmer::new(port.clone(), MockDelay::default(), options);

        p.reset().unwrap();
        assert_eq!(port.resets(), 0);
    }
}
