//! Bootloader wire format (AN3155)

/// Sync / auto-baud character
pub const UART_DISC: u8 = 0x7F;

pub const UART_ACK: u8 = 0x79;
pub const UART_NACK: u8 = 0x1F;

/// Maximum payload of a single write memory command
pub const MAX_CHUNK: usize = 256;

/// Start of main flash on all supported parts
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Global erase page selector for the standard erase command
pub const ERASE_ALL: u8 = 0xFF;

/// Mass erase selector for the extended erase command
pub const EXTENDED_ERASE_ALL: [u8; 2] = [0xFF, 0xFF];

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Command {
    /// Fetch bootloader version and allowed commands
    Get = 0x00,

    /// Gets the chip ID
    GetId = 0x02,

    /// Jumps to user application code located in the internal Flash memory or in the SRAM.
    Go = 0x21,

    /// Writes up to 256 bytes to the RAM or Flash memory starting from an address specified by the application.
    WriteMemory = 0x31,

    /// Erases from one to all the Flash memory pages.
    Erase = 0x43,

    /// Erases from one to all the Flash memory pages using two byte addressing mode (available only for v3.0 USART bootloader versions and above).
    ExtendedErase = 0x44,

    /// Disables the write protection for all Flash memory sectors
    WriteUnprotect = 0x73,
}

impl Command {
    pub fn opcode(self) -> u8 {
        self as u8
    }
}

/// Single byte response to a frame
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Response {
    Ack,
    Nack,
    Unexpected(u8),
}

/// XOR of all bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Command byte followed by its complement
pub fn encode_command(command: Command) -> [u8; 2] {
    let c = command.opcode();
    [c, !c]
}

/// Big-endian address followed by its checksum
pub fn encode_address(address: u32) -> [u8; 5] {
    let a = address.to_be_bytes();
    [a[0], a[1], a[2], a[3], checksum(&a)]
}

/// Data block for write memory: `N-1`, the data, then a checksum covering both.
///
/// `data` must hold between 1 and [`MAX_CHUNK`] bytes.
pub fn encode_data(data: &[u8]) -> Vec<u8> {
    debug_assert!(!data.is_empty() && data.len() <= MAX_CHUNK);

    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.push((data.len() - 1) as u8);
    frame.extend_from_slice(data);
    frame.push(checksum(&frame));

    frame
}

/// Arbitrary parameter block followed by its checksum
pub fn encode_payload(payload: &[u8]) -> Vec<u8> {
    let mut frame = payload.to_vec();
    frame.push(checksum(payload));
    frame
}

pub fn decode_ack(b: u8) -> Response {
    match b {
        UART_ACK => Response::Ack,
        UART_NACK => Response::Nack,
        v => Response::Unexpected(v),
    }
}
