use std::{
    ffi::CStr,
    os::fd::{AsRawFd, BorrowedFd},
};

pub fn cerr<Int: Copy + TryInto<libc::c_long>>(res: Int) -> std::io::Result<Int> {
    match res.try_into() {
        Ok(-1) => Err(std::io::Error::last_os_error()),
        _ => Ok(res),
    }
}

/// Create a Rust string copy from a C string pointer
/// WARNING: This uses `to_string_lossy` so should not be used for data where
/// information loss is unacceptable
///
/// # Safety
/// This function assumes that the pointer is either a null pointer or that
/// it points to a valid NUL-terminated C string.
pub unsafe fn string_from_ptr(ptr: *const libc::c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        // SAFETY: see the function contract
        let cstr = unsafe { CStr::from_ptr(ptr) };
        cstr.to_string_lossy().to_string()
    }
}

/// Rust's standard library IsTerminal just directly calls isatty, which
/// we don't want since this performs IOCTL calls on them and file descriptors are under
/// the control of the user; so this checks if they are a character device first.
pub fn safe_isatty(fildes: BorrowedFd) -> bool {
    let fildes = fildes.as_raw_fd();
    // The Rust standard library doesn't have FileTypeExt on Std{in,out,err}, so we
    // can't just use FileTypeExt::is_char_device and have to resort to libc::fstat.
    let mut maybe_stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: `maybe_stat` is valid memory for a `stat` struct
    if unsafe { libc::fstat(fildes, maybe_stat.as_mut_ptr()) } == 0 {
        // SAFETY: fstat succeeded, so it initialized the struct
        let mode = unsafe { maybe_stat.assume_init() }.st_mode;

        // To complicate matters further, the S_ISCHR macro isn't in libc as well.
        let is_char_device = (mode & libc::S_IFMT) == libc::S_IFCHR;

        // SAFETY: isatty only inspects the descriptor
        is_char_device && unsafe { libc::isatty(fildes) != 0 }
    } else {
        false
    }
}

#[cfg(test)]
mod test {
    use std::os::fd::AsFd;

    use super::{cerr, safe_isatty, string_from_ptr};

    #[test]
    fn miri_test_str_to_ptr() {
        let strp = |ptr| unsafe { string_from_ptr(ptr) };
        assert_eq!(strp(std::ptr::null()), "");
        assert_eq!(strp("\0".as_ptr() as *const libc::c_char), "");
        assert_eq!(strp("hello\0".as_ptr() as *const libc::c_char), "hello");
    }

    #[test]
    fn cerr_maps_minus_one_only() {
        assert_eq!(cerr(0).unwrap(), 0);
        assert_eq!(cerr(42i64).unwrap(), 42);
        assert!(cerr(-1).is_err());
    }

    #[test]
    fn test_tty() {
        let file = std::fs::File::open("/bin/sh").unwrap();
        assert!(!safe_isatty(file.as_fd()));

        let (leader, follower) = crate::system::term::open_pty();
        assert!(safe_isatty(leader.as_fd()));
        assert!(safe_isatty(follower.as_fd()));
    }
}
