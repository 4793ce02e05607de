use thiserror::Error;

/// Faults raised by the codec and by protocol-level validation.
///
/// Framing and opcode errors are fatal to the session that produced them:
/// the wire format has no resynchronization point, so a single bad frame
/// invalidates the rest of the byte stream. Field-encoding errors surface
/// to the caller that built the packet instead, since they indicate input
/// that should have been rejected upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer length does not match the fixed size implied by the opcode.
    #[error("framing error: opcode {opcode:#04x} expects {expected} bytes, got {actual}")]
    Framing {
        opcode: u8,
        expected: usize,
        actual: usize,
    },

    /// The first byte of a frame does not map to a known opcode.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// An identity string exceeds its fixed field width. Unlike display
    /// text, identity fields are never silently truncated.
    #[error("field `{field}` exceeds the {limit}-byte wire limit")]
    FieldEncoding { field: &'static str, limit: usize },

    /// A structurally valid packet arrived where the protocol does not
    /// allow it, e.g. anything before the handshake.
    #[error("protocol order violation: {0}")]
    ProtocolOrder(&'static str),
}
