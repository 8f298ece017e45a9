//! MBAP + PDU framing for Modbus/TCP.
//!
//! Parses the 7-byte MBAP header plus function code and retains the exact
//! bytes received so allowed frames can be forwarded byte-for-byte.

use crate::error::{FirewallError, Result};

/// Bytes preceding the length-counted portion of an MBAP frame:
/// transaction id (2) + protocol id (2) + length (2).
const MBAP_PREFIX_LEN: usize = 6;

/// Minimum ADU size: prefix (6) + unit id (1) + function code (1).
const MIN_ADU_LEN: usize = 8;

/// Maximum ADU size per the Modbus/TCP specification.
pub const MAX_ADU_LEN: usize = 260;

pub const ILLEGAL_FUNCTION: u8 = 0x01;

/// Parsed view of one Modbus/TCP ADU.
#[derive(Debug, Clone)]
pub struct ModbusFrame {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub data: Vec<u8>,
    /// The exact bytes as received, retained for verbatim forwarding.
    pub raw: Vec<u8>,
}

impl ModbusFrame {
    /// Parse an MBAP + PDU byte sequence.
    ///
    /// `length` is validated against the standard MBAP accounting: it counts
    /// everything from `unit_id` onward, so `len(bytes) == 6 + length`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_ADU_LEN {
            return Err(FirewallError::TooShort(bytes.len()));
        }
        if bytes.len() > MAX_ADU_LEN {
            return Err(FirewallError::LengthMismatch {
                declared: u16::from_be_bytes([bytes[4], bytes[5]]),
                actual: bytes.len(),
            });
        }

        let transaction_id = u16::from_be_bytes([bytes[0], bytes[1]]);
        let protocol_id = u16::from_be_bytes([bytes[2], bytes[3]]);
        let length = u16::from_be_bytes([bytes[4], bytes[5]]);
        let unit_id = bytes[6];

        if protocol_id != 0 {
            return Err(FirewallError::InvalidProtocolId(protocol_id));
        }

        let actual_remainder = bytes.len() - MBAP_PREFIX_LEN;
        if length as usize != actual_remainder || length < 2 {
            return Err(FirewallError::LengthMismatch {
                declared: length,
                actual: actual_remainder,
            });
        }

        let function_code = bytes[7];
        let data = bytes[8..].to_vec();

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
            function_code,
            data,
            raw: bytes.to_vec(),
        })
    }

    /// Build a 9-byte Modbus exception reply for this frame: function code
    /// with the high bit set, the given exception code, and the original
    /// transaction id / unit id echoed back.
    pub fn build_exception(&self, exception_code: u8) -> Vec<u8> {
        let mut reply = Vec::with_capacity(9);
        reply.extend_from_slice(&self.transaction_id.to_be_bytes());
        reply.extend_from_slice(&0u16.to_be_bytes()); // protocol_id
        reply.extend_from_slice(&3u16.to_be_bytes()); // length = unit_id + fc + exc
        reply.push(self.unit_id);
        reply.push(0x80 | self.function_code);
        reply.push(exception_code);
        reply
    }
}

/// Human-readable function name for log records, matching the common
/// Modbus function code table.
pub fn function_name(fc: u8) -> &'static str {
    match fc & 0x7F {
        0x01 => "ReadCoils",
        0x02 => "ReadDiscreteInputs",
        0x03 => "ReadHoldingRegisters",
        0x04 => "ReadInputRegisters",
        0x05 => "WriteSingleCoil",
        0x06 => "WriteSingleRegister",
        0x0F => "WriteMultipleCoils",
        0x10 => "WriteMultipleRegisters",
        0x16 => "MaskWriteRegister",
        0x17 => "ReadWriteMultipleRegisters",
        0x2B => "EncapsulatedInterfaceTransport",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s1_bytes() -> Vec<u8> {
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]
    }

    #[test]
    fn parses_read_holding_registers() {
        let frame = ModbusFrame::parse(&s1_bytes()).unwrap();
        assert_eq!(frame.transaction_id, 1);
        assert_eq!(frame.protocol_id, 0);
        assert_eq!(frame.length, 6);
        assert_eq!(frame.unit_id, 1);
        assert_eq!(frame.function_code, 0x03);
        assert_eq!(frame.data, vec![0x00, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn round_trip_retains_raw_bytes() {
        let bytes = s1_bytes();
        let frame = ModbusFrame::parse(&bytes).unwrap();
        assert_eq!(frame.raw, bytes);
    }

    #[test]
    fn rejects_too_short() {
        let err = ModbusFrame::parse(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01]).unwrap_err();
        assert!(matches!(err, FirewallError::TooShort(7)));
    }

    #[test]
    fn rejects_nonzero_protocol_id() {
        let bytes = vec![0x00, 0x03, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let err = ModbusFrame::parse(&bytes).unwrap_err();
        assert!(matches!(err, FirewallError::InvalidProtocolId(1)));
    }

    #[test]
    fn rejects_length_mismatch() {
        let bytes = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let err = ModbusFrame::parse(&bytes).unwrap_err();
        assert!(matches!(err, FirewallError::LengthMismatch { .. }));
    }

    #[test]
    fn rejects_length_below_minimum() {
        // length == 1 would mean no room for a function code.
        let bytes = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01];
        let err = ModbusFrame::parse(&bytes).unwrap_err();
        assert!(matches!(err, FirewallError::TooShort(7)));
    }

    #[test]
    fn rejects_oversized_adu() {
        let mut bytes = vec![0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x03];
        bytes.extend(std::iter::repeat(0u8).take(300));
        let err = ModbusFrame::parse(&bytes).unwrap_err();
        assert!(matches!(err, FirewallError::LengthMismatch { .. }));
    }

    #[test]
    fn exception_reply_is_well_formed() {
        let frame = ModbusFrame::parse(&s1_bytes()).unwrap();
        let reply = frame.build_exception(ILLEGAL_FUNCTION);
        assert_eq!(reply.len(), 9);
        assert_eq!(&reply[0..2], &frame.transaction_id.to_be_bytes());
        assert_eq!(&reply[2..4], &[0x00, 0x00]);
        assert_eq!(&reply[4..6], &[0x00, 0x03]);
        assert_eq!(reply[6], frame.unit_id);
        assert_eq!(reply[7], 0x80 | frame.function_code);
        assert_eq!(reply[8], ILLEGAL_FUNCTION);
    }

    #[test]
    fn s2_write_single_register_exception_matches_spec() {
        let bytes = vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x00, 0x03, 0xE7];
        let frame = ModbusFrame::parse(&bytes).unwrap();
        let reply = frame.build_exception(ILLEGAL_FUNCTION);
        assert_eq!(
            reply,
            vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x86, 0x01]
        );
    }

    #[test]
    fn function_name_table_covers_read_and_write_codes() {
        assert_eq!(function_name(0x03), "ReadHoldingRegisters");
        assert_eq!(function_name(0x06), "WriteSingleRegister");
        assert_eq!(function_name(0x86), "WriteSingleRegister"); // exception bit ignored
        assert_eq!(function_name(0x99), "Unknown");
    }
}
