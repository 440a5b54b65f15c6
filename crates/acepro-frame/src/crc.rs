/// CRC16 used by ACE Pro frames.
///
/// Register starts at `0xFFFF`. Each byte is folded into the low byte, nibble
/// mixed, and combined with the shifted register. The result is sent little-endian.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        let mut mixed = byte ^ (crc & 0x00FF) as u8;
        mixed ^= (mixed & 0x0F) << 4;
        let mixed = u16::from(mixed);
        crc = ((mixed << 8) | (crc >> 8)) ^ (mixed >> 4) ^ (mixed << 3);
    }
    crc
}
