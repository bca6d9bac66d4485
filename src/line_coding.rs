//! CDC line coding structure.

use crate::{Error, Parity, SerialOptions, StopBits, LINE_CODING_SIZE};

/// Stop bits by their wire code.
const STOP_BITS: [StopBits; 3] = [StopBits::One, StopBits::OnePointFive, StopBits::Two];

/// Parity modes by their wire code.
const PARITY: [Parity; 5] = [Parity::None, Parity::Odd, Parity::Even, Parity::Mark, Parity::Space];

/// Line coding as exchanged with the device by the Set/Get Line Coding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineCoding {
    pub baud_rate: u32,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub data_bits: u8,
}

impl LineCoding {
    /// Encodes into the 7-byte wire format.
    pub fn encode(&self) -> [u8; LINE_CODING_SIZE] {
        let mut buf = [0; LINE_CODING_SIZE];
        buf[0..4].copy_from_slice(&self.baud_rate.to_le_bytes());
        buf[4] = code(&STOP_BITS, self.stop_bits);
        buf[5] = code(&PARITY, self.parity);
        buf[6] = self.data_bits;
        buf
    }

    /// Decodes from the 7-byte wire format.
    ///
    /// Unknown stop bit and parity codes decode to 1 stop bit and no parity.
    pub fn decode(buf: &[u8; LINE_CODING_SIZE]) -> Self {
        let [b0, b1, b2, b3, stop_bits, parity, data_bits] = *buf;
        Self {
            baud_rate: u32::from_le_bytes([b0, b1, b2, b3]),
            stop_bits: STOP_BITS.get(usize::from(stop_bits)).copied().unwrap_or_default(),
            parity: PARITY.get(usize::from(parity)).copied().unwrap_or_default(),
            data_bits,
        }
    }
}

fn code<T: PartialEq>(table: &[T], value: T) -> u8 {
    // Both tables cover every variant of their enum.
    table.iter().position(|v| *v == value).unwrap_or_default() as u8
}

impl TryFrom<&[u8]> for LineCoding {
    type Error = Error;

    /// Decodes a line coding read from the device; trailing bytes are ignored.
    fn try_from(data: &[u8]) -> Result<Self, Error> {
        let buf: &[u8; LINE_CODING_SIZE] = data
            .get(..LINE_CODING_SIZE)
            .and_then(|buf| buf.try_into().ok())
            .ok_or(Error::ShortLineCoding(data.len()))?;
        Ok(Self::decode(buf))
    }
}

impl From<&SerialOptions> for LineCoding {
    fn from(options: &SerialOptions) -> Self {
        Self {
            baud_rate: options.baud_rate,
            stop_bits: options.stop_bits,
            parity: options.parity,
            data_bits: options.data_bits,
        }
    }
}

impl From<LineCoding> for SerialOptions {
    fn from(coding: LineCoding) -> Self {
        SerialOptions::new(coding.baud_rate)
            .with_data_bits(coding.data_bits)
            .with_stop_bits(coding.stop_bits)
            .with_parity(coding.parity)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_9600_8n1() {
        let coding = LineCoding::from(&SerialOptions::new(9600));
        assert_eq!(coding.encode(), [0x80, 0x25, 0, 0, 0, 0, 8]);
    }

    #[test]
    fn encode_codes() {
        let coding =
            LineCoding { baud_rate: 0x0001_c200, stop_bits: StopBits::Two, parity: Parity::Space, data_bits: 16 };
        assert_eq!(coding.encode(), [0x00, 0xc2, 0x01, 0x00, 2, 4, 16]);
    }

    #[test]
    fn roundtrip_all_table_values() {
        for stop_bits in STOP_BITS {
            for parity in PARITY {
                for (baud_rate, data_bits) in [(0, 5), (300, 6), (9600, 7), (115_200, 8), (u32::MAX, 16)] {
                    let coding = LineCoding { baud_rate, stop_bits, parity, data_bits };
                    assert_eq!(LineCoding::decode(&coding.encode()), coding);
                }
            }
        }
    }

    #[test]
    fn unknown_codes_decode_to_defaults() {
        for code in [3, 4, 0x7f, 0xff] {
            let coding = LineCoding::decode(&[0x80, 0x25, 0, 0, code, 0, 8]);
            assert_eq!(coding.stop_bits, StopBits::One);
        }
        for code in [5, 6, 0xff] {
            let coding = LineCoding::decode(&[0x80, 0x25, 0, 0, 0, code, 8]);
            assert_eq!(coding.parity, Parity::None);
        }
    }

    #[test]
    fn data_bits_are_verbatim() {
        assert_eq!(LineCoding::decode(&[0, 0, 0, 0, 0, 0, 42]).data_bits, 42);
    }

    #[test]
    fn decode_from_slice() {
        let coding = LineCoding::try_from(&[0x00, 0xc2, 0x01, 0x00, 1, 3, 7, 0xaa][..]).unwrap();
        assert_eq!(
            coding,
            LineCoding { baud_rate: 115_200, stop_bits: StopBits::OnePointFive, parity: Parity::Mark, data_bits: 7 }
        );
        assert!(matches!(LineCoding::try_from(&[0x80, 0x25][..]), Err(Error::ShortLineCoding(2))));
    }
}
