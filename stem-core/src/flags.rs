use bitflags::bitflags;

bitflags! {
    /// Bits of the message flag byte that are not the message type.
    ///
    /// The type occupies bits 1..=3 and is extracted separately.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u8 {
        /// Route is a 2-byte dictionary code instead of a length-prefixed string.
        const ROUTE_COMPRESSED = 0x01;
        /// Body is zlib/gzip compressed.
        const COMPRESSED_BODY = 0x10;
        /// Message carries an error payload.
        const ERROR = 0x20;
    }
}

pub const TYPE_SHIFT: u8 = 1;
pub const TYPE_MASK: u8 = 0x07;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_do_not_overlap_type_bits() {
        let type_bits = TYPE_MASK << TYPE_SHIFT;
        assert_eq!(MessageFlags::all().bits() & type_bits, 0);
    }

    #[test]
    fn truncate_drops_type_bits() {
        let byte = (2 << TYPE_SHIFT) | 0x21;
        let flags = MessageFlags::from_bits_truncate(byte);
        assert!(flags.contains(MessageFlags::ERROR));
        assert!(flags.contains(MessageFlags::ROUTE_COMPRESSED));
        assert!(!flags.contains(MessageFlags::COMPRESSED_BODY));
    }
}
