//! STM32 Serial Bootloader.
//!
//! Base on AN3155

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
extern crate serial_core;

#[cfg(feature = "linux")]
pub mod linux;

pub mod flash;
pub mod programmer;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod mock;

pub use flash::{Milestones, Transfer};
pub use programmer::Programmer;
pub use protocol::{Command, Response};
pub use session::{
    DeviceIdentity, EraseStrategy, Image, RetryPolicy, Session, SessionError, State, Step,
    SupportedChips, Version,
};
pub use transport::{SerialPort, Transport};

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: core::fmt::Debug> {
    #[error("serial port error: {0:?}")]
    Serial(SerialError),

    #[error("bootloader returned NACK")]
    Nack,

    #[error("timeout waiting for bootloader response")]
    ResponseTimeout,

    #[error("unexpected response byte 0x{0:02x}")]
    InvalidResponse(u8),

    #[error("malformed response payload")]
    MalformedPayload,

    #[error("invalid block length {0}")]
    InvalidLength(usize),

    #[error("data source error: {0:?}")]
    Io(std::io::ErrorKind),
}

impl<SerialError: core::fmt::Debug> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Do not reset the device on connection
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_reset: bool,

    /// Timeout to wait for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "500"))]
    pub response_timeout_ms: u32,

    /// Timeout to wait for an erase to complete
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "30000"))]
    pub erase_timeout_ms: u32,

    /// Period to poll for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Period to wait for bootloader init before sending init character
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub init_delay_ms: u32,

    /// Number of sync attempts before giving up on the bootloader
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "60"))]
    pub sync_attempts: u32,

    /// Delay between sync attempts
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1000"))]
    pub sync_retry_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            no_reset: false,
            response_timeout_ms: 500,
            erase_timeout_ms: 30_000,
            poll_delay_ms: 1,
            init_delay_ms: 1,
            sync_attempts: 60,
            sync_retry_ms: 1000,
        }
    }
}
