//! Protocol constants

/// Current protocol version. Every accepted envelope carries this value.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (1 MiB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;
