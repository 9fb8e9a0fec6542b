//! Connection handshake and the erase / program / go sequence

use core::fmt;
use std::io::Read;

use embedded_hal::blocking::delay::DelayMs;

use crate::flash::Transfer;
use crate::protocol::FLASH_BASE;
use crate::{Error, Options, Programmer, SerialPort};

pub use crate::programmer::Version;

/// Oldest bootloader protocol the sequence below is known to work with
pub const MIN_VERSION: Version = Version::new(2, 1);

/// Product IDs of the parts this tool has been used with
pub const SUPPORTED_CHIP_IDS: [u16; 4] = [0x0410, 0x0414, 0x0413, 0x0440];

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Disconnected,
    Connected,
    VersionKnown,
    Identified,
    Unprotected,
    Erased,
    Programmed,
    Executing,
}

/// Session operation, used to report where a failure happened
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Step {
    Reset,
    Sync,
    GetVersion,
    GetId,
    WriteUnprotect,
    Erase,
    ExtendedErase,
    Program,
    Go,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Reset => "reset",
            Step::Sync => "sync",
            Step::GetVersion => "get version",
            Step::GetId => "get chip ID",
            Step::WriteUnprotect => "write unprotect",
            Step::Erase => "erase",
            Step::ExtendedErase => "extended erase",
            Step::Program => "program",
            Step::Go => "go",
        };
        f.write_str(s)
    }
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum SessionError<E: core::fmt::Debug> {
    #[error("no response from bootloader after {attempts} sync attempts")]
    HandshakeTimeout { attempts: u32 },

    #[error("unsupported bootloader version {0} (minimum {min})", min = MIN_VERSION)]
    VersionUnsupported(Version),

    #[error("unsupported chip ID 0x{0:04X}")]
    ChipUnsupported(u16),

    #[error("{step} is not allowed in state {state:?}")]
    OutOfSequence { step: Step, state: State },

    #[error("{step} failed: {error}")]
    Command { step: Step, error: Error<E> },
}

fn failed<E: core::fmt::Debug>(step: Step) -> impl FnOnce(Error<E>) -> SessionError<E> {
    move |error| SessionError::Command { step, error }
}

/// Device details gathered during identification
#[derive(Clone, PartialEq, Debug)]
pub struct DeviceIdentity {
    pub version: Version,
    /// Opcodes the bootloader reports as supported
    pub commands: Vec<u8>,
    pub chip_id: u16,
}

pub fn version_supported(version: Version) -> bool {
    version.code() >= MIN_VERSION.code()
}

#[derive(Clone, PartialEq, Debug)]
pub struct SupportedChips {
    ids: Vec<u16>,
}

impl SupportedChips {
    pub fn new(ids: &[u16]) -> Self {
        Self { ids: ids.to_vec() }
    }

    /// Add an ID to the set
    pub fn with(mut self, id: u16) -> Self {
        if !self.contains(id) {
            self.ids.push(id);
        }
        self
    }

    pub fn contains(&self, id: u16) -> bool {
        self.ids.contains(&id)
    }
}

impl Default for SupportedChips {
    fn default() -> Self {
        Self::new(&SUPPORTED_CHIP_IDS)
    }
}

/// Erase command to use for a bootloader
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum EraseStrategy {
    Standard,
    Extended,
}

impl EraseStrategy {
    /// v3.x bootloaders only implement extended erase
    pub fn for_major(major: u8) -> Self {
        if major == 3 {
            EraseStrategy::Extended
        } else {
            EraseStrategy::Standard
        }
    }
}

/// Sync retry policy, bounds the time spent waiting for the bootloader
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u32,
}

impl RetryPolicy {
    pub fn from_options(o: &Options) -> Self {
        Self {
            attempts: o.sync_attempts,
            delay_ms: o.sync_retry_ms,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&Options::default())
    }
}

/// Firmware to program
pub struct Image<R> {
    pub source: R,
    /// Number of bytes `source` will yield
    pub size: u32,
}

impl<R: Read> Image<R> {
    pub fn new(source: R, size: u32) -> Self {
        Self { source, size }
    }
}

pub struct Session<P, D, E> {
    programmer: Programmer<P, D, E>,
    policy: RetryPolicy,
    chips: SupportedChips,
    state: State,
    identity: Option<DeviceIdentity>,
}

impl<P, D, E> Session<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(programmer: Programmer<P, D, E>) -> Self {
        let policy = RetryPolicy::from_options(programmer.options());

        Self {
            programmer,
            policy,
            chips: SupportedChips::default(),
            state: State::Disconnected,
            identity: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_chips(mut self, chips: SupportedChips) -> Self {
        self.chips = chips;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Execute the full sequence
    ///
    /// Connects and identifies the device, then erases and programs `image`
    /// if one is provided, and finally jumps to it when `go` is set.
    pub fn run<R, F>(
        &mut self,
        image: Option<Image<R>>,
        go: bool,
        on_progress: F,
    ) -> Result<DeviceIdentity, SessionError<E>>
    where
        R: Read,
        F: FnMut(u32),
    {
        self.connect()?;
        let identity = self.identify()?;

        match image {
            Some(image) => {
                self.unprotect()?;
                self.erase()?;
                self.program(image, on_progress)?;
            }
            None => info!("Skipping programming"),
        }

        if go {
            self.go()?;
        }

        Ok(identity)
    }

    /// Reset the device and sync with the bootloader
    pub fn connect(&mut self) -> Result<(), SessionError<E>> {
        self.programmer.reset().map_err(failed(Step::Reset))?;
        self.handshake()
    }

    fn handshake(&mut self) -> Result<(), SessionError<E>> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.programmer.sync() {
                Ok(()) => {
                    info!("Bootloader connected");
                    self.state = State::Connected;
                    return Ok(());
                }
                Err(e @ Error::Serial(_)) => return Err(failed(Step::Sync)(e)),
                Err(e) => warn!("No ACK to sync ({}), attempt {}/{}", e, attempt, attempts),
            }

            if attempt >= attempts {
                error!("Unable to connect to bootloader");
                return Err(SessionError::HandshakeTimeout { attempts: attempt });
            }

            self.programmer.transport().delay_ms(self.policy.delay_ms);
        }
    }

    /// Read and check the bootloader version and chip ID
    pub fn identify(&mut self) -> Result<DeviceIdentity, SessionError<E>> {
        self.expect(Step::GetVersion, &[State::Connected])?;

        let (version, commands) = self.programmer.get().map_err(failed(Step::GetVersion))?;
        info!("Found bootloader version: {}", version);
        self.state = State::VersionKnown;

        if !version_supported(version) {
            return Err(SessionError::VersionUnsupported(version));
        }

        let chip_id = self.programmer.get_id().map_err(failed(Step::GetId))?;
        info!("Chip ID: {:04X}", chip_id);

        if !self.chips.contains(chip_id) {
            return Err(SessionError::ChipUnsupported(chip_id));
        }

        let identity = DeviceIdentity {
            version,
            commands,
            chip_id,
        };
        self.identity = Some(identity.clone());
        self.state = State::Identified;

        Ok(identity)
    }

    /// Clear write protection, then sync again as the device resets
    pub fn unprotect(&mut self) -> Result<(), SessionError<E>> {
        self.expect(Step::WriteUnprotect, &[State::Identified])?;

        self.programmer
            .write_unprotect()
            .map_err(failed(Step::WriteUnprotect))?;
        info!("Cleared write protection");

        self.handshake()?;
        self.state = State::Unprotected;

        Ok(())
    }

    /// Erase all of flash with the command the bootloader supports
    pub fn erase(&mut self) -> Result<(), SessionError<E>> {
        self.expect(Step::Erase, &[State::Identified, State::Unprotected])?;

        let major = match &self.identity {
            Some(i) => i.version.major,
            None => {
                return Err(SessionError::OutOfSequence {
                    step: Step::Erase,
                    state: self.state,
                })
            }
        };

        match EraseStrategy::for_major(major) {
            EraseStrategy::Extended => {
                info!("Starting extended erase, this may take some time");
                self.programmer
                    .extended_erase_all()
                    .map_err(failed(Step::ExtendedErase))?;
            }
            EraseStrategy::Standard => {
                info!("Starting erase");
                self.programmer
                    .erase_all()
                    .map_err(failed(Step::Erase))?;
            }
        }

        info!("Erased flash memory");
        self.state = State::Erased;

        Ok(())
    }

    /// Write `image` to flash starting at the flash base address
    pub fn program<R, F>(&mut self, image: Image<R>, on_progress: F) -> Result<(), SessionError<E>>
    where
        R: Read,
        F: FnMut(u32),
    {
        self.expect(Step::Program, &[State::Erased])?;

        info!("Programming {} bytes", image.size);

        let mut transfer = Transfer::new(FLASH_BASE, image.size);
        transfer
            .run(&mut self.programmer, image.source, on_progress)
            .map_err(failed(Step::Program))?;

        self.state = State::Programmed;

        Ok(())
    }

    /// Start the application in flash
    pub fn go(&mut self) -> Result<(), SessionError<E>> {
        self.expect(Step::Go, &[State::Identified, State::Programmed])?;

        info!("Sending go command");
        self.programmer.go(FLASH_BASE).map_err(failed(Step::Go))?;
        self.state = State::Executing;

        Ok(())
    }

    fn expect(&self, step: Step, allowed: &[State]) -> Result<(), SessionError<E>> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::OutOfSequence {
                step,
                state: self.state,
            })
        }
    }

    /// Consume the session, returning the programmer
    pub fn into_inner(self) -> Programmer<P, D, E> {
        self.programmer
    }
}
