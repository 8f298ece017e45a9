//! Deep packet inspection: structural validation that a parsed frame is a
//! plausible Modbus request. Never mutates frames; each failure is a
//! distinct `FirewallError::Structural` reason surfaced to the logger as
//! an ERROR record.

use crate::error::FirewallError;
use crate::frame::ModbusFrame;

const READ_CODES: [u8; 4] = [0x01, 0x02, 0x03, 0x04];
const WRITE_SINGLE_CODES: [u8; 2] = [0x05, 0x06];
const WRITE_MULTIPLE_CODES: [u8; 2] = [0x0F, 0x10];
const RECOGNIZED_CODES: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10];
const KNOWN_BUT_UNCHECKED_CODES: [u8; 2] = [0x17, 0x2B];

const MAX_READ_COILS: u16 = 2000;
const MAX_READ_REGISTERS: u16 = 125;
const MAX_WRITE_COILS: u16 = 2000;
const MAX_WRITE_REGISTERS: u16 = 123;

/// Validate the structural shape of a request frame's PDU.
///
/// Returns `Err(FirewallError::Structural(reason))` on the first violated
/// invariant; `Ok(())` if the frame is structurally plausible (including
/// recognized-but-unchecked and classified-unknown function codes, which the
/// policy engine handles).
pub fn validate(frame: &ModbusFrame) -> Result<(), FirewallError> {
    let fc = frame.function_code;

    if !RECOGNIZED_CODES.contains(&fc) && !KNOWN_BUT_UNCHECKED_CODES.contains(&fc) {
        // Unknown function codes are structurally fine; policy decides.
        return Ok(());
    }

    if READ_CODES.contains(&fc) {
        if frame.data.len() != 4 {
            return Err(FirewallError::Structural(format!(
                "read function 0x{fc:02X} requires 4 data bytes, got {}",
                frame.data.len()
            )));
        }
        let quantity = u16::from_be_bytes([frame.data[2], frame.data[3]]);
        let limit = if fc == 0x01 || fc == 0x02 {
            MAX_READ_COILS
        } else {
            MAX_READ_REGISTERS
        };
        if quantity == 0 || quantity > limit {
            return Err(FirewallError::Structural(format!(
                "read quantity {quantity} out of range (max {limit})"
            )));
        }
        return Ok(());
    }

    if WRITE_SINGLE_CODES.contains(&fc) {
        if frame.data.len() != 4 {
            return Err(FirewallError::Structural(format!(
                "write-single function 0x{fc:02X} requires 4 data bytes, got {}",
                frame.data.len()
            )));
        }
        return Ok(());
    }

    if WRITE_MULTIPLE_CODES.contains(&fc) {
        if frame.data.len() < 5 {
            return Err(FirewallError::Structural(format!(
                "write-multiple function 0x{fc:02X} requires at least 5 data bytes, got {}",
                frame.data.len()
            )));
        }
        let quantity = u16::from_be_bytes([frame.data[2], frame.data[3]]);
        let byte_count = frame.data[4] as usize;
        if byte_count != frame.data.len() - 5 {
            return Err(FirewallError::Structural(format!(
                "byte count {byte_count} does not match remaining payload {}",
                frame.data.len() - 5
            )));
        }
        if fc == 0x0F && (quantity == 0 || quantity > MAX_WRITE_COILS) {
            return Err(FirewallError::Structural(format!(
                "write coil quantity {quantity} out of range (max {MAX_WRITE_COILS})"
            )));
        }
        if fc == 0x10 && (quantity == 0 || quantity > MAX_WRITE_REGISTERS) {
            return Err(FirewallError::Structural(format!(
                "write register quantity {quantity} out of range (max {MAX_WRITE_REGISTERS})"
            )));
        }
        return Ok(());
    }

    Ok(())
}
