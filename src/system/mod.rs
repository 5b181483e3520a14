use std::ffi::{CStr, CString};

pub(crate) mod term;

/// Send a message to syslog. Interior NUL bytes are replaced, since syslog
/// would silently cut the message at the first one.
pub fn syslog(priority: libc::c_int, facility: libc::c_int, message: &str) {
    const MSG: *const libc::c_char = match CStr::from_bytes_until_nul(b"%s\0") {
        Ok(cstr) => cstr.as_ptr(),
        Err(_) => panic!("syslog formatting string is not null-terminated"),
    };

    let message = match CString::new(message) {
        Ok(message) => message,
        Err(err) => {
            let mut bytes = err.into_vec();
            bytes.iter_mut().filter(|b| **b == 0).for_each(|b| *b = b'?');
            // every NUL byte was just replaced
            CString::new(bytes).unwrap_or_default()
        }
    };

    // SAFETY: the format string consumes exactly one NUL-terminated string argument
    unsafe {
        libc::syslog(priority | facility, MSG, message.as_ptr());
    }
}
