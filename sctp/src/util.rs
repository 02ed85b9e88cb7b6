use bytes::Bytes;
use crc::{Crc, CRC_32_ISCSI};

pub(crate) const PADDING_MULTIPLE: usize = 4;

pub(crate) fn get_padding_size(len: usize) -> usize {
    (PADDING_MULTIPLE - (len % PADDING_MULTIPLE)) % PADDING_MULTIPLE
}

pub(crate) const ISCSI_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

static FOUR_ZEROES: [u8; 4] = [0, 0, 0, 0];

/// CRC32-C over the packet with the checksum field treated as zero,
/// without copying the input.
pub(crate) fn generate_packet_checksum(raw: &Bytes) -> u32 {
    let mut digest = ISCSI_CRC.digest();
    digest.update(&raw[0..8]);
    digest.update(&FOUR_ZEROES);
    digest.update(&raw[12..]);
    digest.finalize()
}

/// Serial Number Arithmetic (RFC 1982) over the 32-bit TSN space.
#[inline]
pub(crate) fn sna32lt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && i2 - i1 < 1 << 31) || (i1 > i2 && i1 - i2 > 1 << 31)
}

#[inline]
pub(crate) fn sna32lte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32lt(i1, i2)
}

#[inline]
pub(crate) fn sna32gt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && (i2 - i1) >= 1 << 31) || (i1 > i2 && (i1 - i2) <= 1 << 31)
}

#[inline]
pub(crate) fn sna32gte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32gt(i1, i2)
}

/// Serial Number Arithmetic over the 16-bit SSN space.
#[inline]
pub(crate) fn sna16lt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && i2 - i1 < 1 << 15) || (i1 > i2 && i1 - i2 > 1 << 15)
}

#[inline]
pub(crate) fn sna16lte(i1: u16, i2: u16) -> bool {
    i1 == i2 || sna16lt(i1, i2)
}

#[inline]
pub(crate) fn sna16gt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && (i2 - i1) >= 1 << 15) || (i1 > i2 && (i1 - i2) <= 1 << 15)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_padding_size() {
        assert_eq!(get_padding_size(0), 0);
        assert_eq!(get_padding_size(1), 3);
        assert_eq!(get_padding_size(2), 2);
        assert_eq!(get_padding_size(3), 1);
        assert_eq!(get_padding_size(4), 0);
        assert_eq!(get_padding_size(7), 1);
    }

    #[test]
    fn test_serial_number_arithmetic_32bit() {
        // straddles the wrap point
        assert!(sna32lt(u32::MAX, 0));
        assert!(sna32gt(0, u32::MAX));
        assert!(sna32lt(u32::MAX - 1, 2));
        assert!(!sna32lt(2, u32::MAX - 1));

        // ordinary ordering
        assert!(sna32lt(5, 6));
        assert!(!sna32lt(6, 5));
        assert!(sna32gt(6, 5));
        assert!(sna32lte(5, 5));
        assert!(sna32gte(5, 5));

        // half-space boundary
        assert!(sna32lt(0, (1 << 31) - 1));
        assert!(!sna32lt(0, 1 << 31));
    }

    #[test]
    fn test_serial_number_arithmetic_16bit() {
        assert!(sna16lt(u16::MAX, 0));
        assert!(sna16gt(0, u16::MAX));
        assert!(sna16lt(5, 6));
        assert!(sna16lte(5, 5));
        assert!(sna16gt(6, 5));
        assert!(sna16lt(0, (1 << 15) - 1));
        assert!(!sna16lt(0, 1 << 15));
    }
}
