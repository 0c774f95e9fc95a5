use crc::Crc;

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Standard CRC-32 (polynomial 0xEDB88320, reflected) over a byte buffer.
///
/// Used as the integrity footer of the word transcoding and as part of the
/// seed for fragment selection, so it has to match the common "CRC-32"
/// convention exactly.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}
