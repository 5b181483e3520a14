use std::{
    ffi::c_void,
    io, mem,
    os::fd::{AsRawFd, BorrowedFd},
};

use libc::{tcsetattr, termios, ECHO, TCSANOW};

use crate::cutils::cerr;

/// A snapshot of the attributes of a terminal.
#[derive(Clone, Copy)]
pub(crate) struct TerminalMode {
    attrs: termios,
}

impl TerminalMode {
    /// Read the current attributes of the terminal behind `tty`.
    pub(crate) fn capture(tty: BorrowedFd) -> io::Result<Self> {
        let mut attrs = mem::MaybeUninit::<termios>::uninit();
        // SAFETY: we are passing tcgetattr a pointer to valid memory
        cerr(unsafe { libc::tcgetattr(tty.as_raw_fd(), attrs.as_mut_ptr()) })?;
        Ok(TerminalMode {
            // SAFETY: if the previous call was a success, `tcgetattr` has initialized `attrs`
            attrs: unsafe { attrs.assume_init() },
        })
    }

    /// Make these the attributes of `tty`, effective immediately. Input that
    /// was already typed stays queued.
    pub(crate) fn apply(&self, tty: BorrowedFd) -> io::Result<()> {
        // SAFETY: we are passing tcsetattr a valid file descriptor and pointer-to-struct
        cerr(unsafe { tcsetattr(tty.as_raw_fd(), TCSANOW, &self.attrs) })?;
        Ok(())
    }

    pub(crate) fn echo(&self) -> bool {
        self.attrs.c_lflag & ECHO != 0
    }

    /// The same attributes, with echoing of typed characters switched off.
    pub(crate) fn without_echo(&self) -> Self {
        let mut attrs = self.attrs;
        attrs.c_lflag &= !ECHO;
        TerminalMode { attrs }
    }
}

/// Unbuffered reads straight from a file descriptor we do not own.
pub(crate) struct FdReader<'a> {
    fd: BorrowedFd<'a>,
}

impl<'a> FdReader<'a> {
    pub(crate) fn new(fd: BorrowedFd<'a>) -> Self {
        FdReader { fd }
    }
}

impl io::Read for FdReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is initialized and its length matches
        let ret = cerr(unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
            )
        })?;

        Ok(ret as usize)
    }
}

/// Get the path of the terminal behind `tty`
#[cfg(feature = "libpam")]
pub(crate) fn ttyname(tty: BorrowedFd) -> io::Result<std::ffi::OsString> {
    use std::ffi::{CStr, OsStr};
    use std::os::unix::ffi::OsStrExt;

    let mut buf: [libc::c_char; 1024] = [0; 1024];

    // ttyname_r returns the error number instead of setting errno
    // SAFETY: buf is valid for writes of its full length
    match unsafe { libc::ttyname_r(tty.as_raw_fd(), buf.as_mut_ptr(), buf.len()) } {
        0 => {}
        errno => return Err(io::Error::from_raw_os_error(errno)),
    }
    // SAFETY: on success ttyname_r stored a NUL-terminated string in buf
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(OsStr::from_bytes(name.to_bytes()).to_owned())
}

/// Open a fresh pseudoterminal pair, returned as (leader, follower).
#[cfg(test)]
pub(crate) fn open_pty() -> (std::os::fd::OwnedFd, std::os::fd::OwnedFd) {
    use std::os::fd::{FromRawFd, OwnedFd};

    let (mut leader, mut follower) = (0, 0);
    // SAFETY: openpty only writes the two descriptors; name and settings are optional
    cerr(unsafe {
        libc::openpty(
            &mut leader,
            &mut follower,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    })
    .expect("could not allocate a pseudoterminal");

    // SAFETY: openpty just handed us these descriptors
    unsafe { (OwnedFd::from_raw_fd(leader), OwnedFd::from_raw_fd(follower)) }
}
