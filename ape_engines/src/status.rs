//! Engine status codes, numbered as Monkey's Audio numbers them.

use ape_core::StatusCode;

// ── file and I/O errors (1000s) ────────────────────────────────────────────

pub const ERROR_IO_READ: StatusCode = StatusCode::known(1000);
pub const ERROR_IO_WRITE: StatusCode = StatusCode::known(1001);
pub const ERROR_INVALID_INPUT_FILE: StatusCode = StatusCode::known(1002);
pub const ERROR_INVALID_OUTPUT_FILE: StatusCode = StatusCode::known(1003);
pub const ERROR_INPUT_FILE_UNSUPPORTED_BIT_DEPTH: StatusCode = StatusCode::known(1005);
pub const ERROR_INPUT_FILE_UNSUPPORTED_CHANNEL_COUNT: StatusCode = StatusCode::known(1007);
pub const ERROR_INVALID_CHECKSUM: StatusCode = StatusCode::known(1009);
pub const ERROR_DECOMPRESSING_FRAME: StatusCode = StatusCode::known(1010);
pub const ERROR_INVALID_FUNCTION_PARAMETER: StatusCode = StatusCode::known(1012);
pub const ERROR_UNSUPPORTED_FILE_VERSION: StatusCode = StatusCode::known(1014);

// ── programmer errors (5000s) ──────────────────────────────────────────────

pub const ERROR_BAD_PARAMETER: StatusCode = StatusCode::known(5000);

// ── compressor errors (6000s) ──────────────────────────────────────────────

pub const ERROR_APE_COMPRESS_TOO_MUCH_DATA: StatusCode = StatusCode::known(6000);

pub const ERROR_UNDEFINED: StatusCode = StatusCode::known(-1);
