//! Bind error translation.
//!
//! Joiners receive a numeric code instead of an error object so the ack can
//! cross a process boundary. Codes are negative and fixed regardless of host
//! platform: the well-known kinds map to their Linux errno values, anything
//! else falls back to the OS error when there is one.

use std::io;

pub const EACCES: i32 = -13;
pub const EINVAL: i32 = -22;
pub const EADDRINUSE: i32 = -98;
pub const EADDRNOTAVAIL: i32 = -99;
pub const ENOENT: i32 = -2;
pub const EEXIST: i32 = -17;
pub const ETIMEDOUT: i32 = -110;
/// Error with no kind mapping and no OS code.
pub const UNKNOWN: i32 = -4094;

/// Translate a failed bind into the code sent to every pending joiner.
pub fn bind_error_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::AddrInUse => EADDRINUSE,
        io::ErrorKind::AddrNotAvailable => EADDRNOTAVAIL,
        io::ErrorKind::PermissionDenied => EACCES,
        io::ErrorKind::InvalidInput => EINVAL,
        io::ErrorKind::NotFound => ENOENT,
        io::ErrorKind::AlreadyExists => EEXIST,
        io::ErrorKind::TimedOut => ETIMEDOUT,
        _ => match err.raw_os_error() {
            Some(code) if code > 0 => -code,
            _ => UNKNOWN,
        },
    }
}

/// Short symbolic name for logs.
pub fn code_name(code: i32) -> &'static str {
    match code {
        EACCES => "EACCES",
        EINVAL => "EINVAL",
        EADDRINUSE => "EADDRINUSE",
        EADDRNOTAVAIL => "EADDRNOTAVAIL",
        ENOENT => "ENOENT",
        EEXIST => "EEXIST",
        ETIMEDOUT => "ETIMEDOUT",
        _ => "UNKNOWN",
    }
}
