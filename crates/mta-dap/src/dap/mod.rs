pub mod codec;
pub mod messages;
pub mod sender;

/// Maximum allowed DAP message payload size (in bytes).
///
/// Caps the incoming `Content-Length` header so a malformed client cannot make the adapter
/// allocate an arbitrarily large buffer before the body is read.
pub const MAX_DAP_MESSAGE_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

/// Maximum allowed size of a single DAP header line (in bytes).
pub const MAX_DAP_HEADER_LINE_BYTES: usize = 8 * 1024; // 8 KiB
