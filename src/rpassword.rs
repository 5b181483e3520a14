//! Reading secrets from a terminal with echo switched off.
//!
//! The guard that puts the terminal back and the idea of a buffer that wipes
//! itself go back to Conrad Kleinespel's rpassword crate
//! (<https://docs.rs/rpassword/latest/rpassword/>); the rest is our own.

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use crate::cutils::safe_isatty;
use crate::pam::{PamBuffer, PamError, PamResult};
use crate::system::term::{FdReader, TerminalMode};

/// Keeps echo switched off until [`EchoGuard::restore`] is called or the guard
/// is dropped, whichever comes first.
struct EchoGuard<'a> {
    tty: BorrowedFd<'a>,
    original: TerminalMode,
    restored: bool,
}

impl<'a> EchoGuard<'a> {
    fn hide(tty: BorrowedFd<'a>, original: TerminalMode) -> io::Result<Self> {
        original.without_echo().apply(tty)?;
        Ok(EchoGuard {
            tty,
            original,
            restored: false,
        })
    }

    fn restore(mut self) -> io::Result<()> {
        self.restored = true;
        self.original.apply(self.tty)
    }
}

impl Drop for EchoGuard<'_> {
    fn drop(&mut self) {
        // only reached without an explicit restore, i.e. while unwinding
        if !self.restored {
            let _ = self.original.apply(self.tty);
        }
    }
}

/// Read one line from standard input with echo switched off.
pub fn read_secret() -> PamResult<PamBuffer> {
    read_secret_from(io::stdin().as_fd())
}

/// Read one line from the terminal `tty` with echo switched off.
///
/// The terminal settings are restored before returning; failing to do so is
/// reported as [`PamError::TerminalRestore`], even when the secret itself was
/// read without problems.
pub fn read_secret_from(tty: BorrowedFd) -> PamResult<PamBuffer> {
    let original = TerminalMode::capture(tty).map_err(PamError::TerminalQuery)?;
    let guard = EchoGuard::hide(tty, original).map_err(PamError::TerminalMode)?;

    let secret = read_line(&mut FdReader::new(tty));

    guard.restore().map_err(PamError::TerminalRestore)?;
    secret
}

/// Read bytes up to a line terminator, one at a time so that nothing after it
/// is consumed. The terminator (`\n`, or `\r\n`) is not part of the result.
/// Input that ends without a terminator is returned as is. A NUL byte is
/// refused, since the secret would silently end there.
fn read_line(source: &mut dyn Read) -> PamResult<PamBuffer> {
    let mut secret = PamBuffer::try_new()?;
    let mut len = 0;
    let mut terminated = false;
    let mut byte = [0u8; 1];

    let outcome = loop {
        match source.read(&mut byte) {
            Ok(0) if len == 0 => {
                break Err(PamError::ReadFailure(ErrorKind::UnexpectedEof.into()))
            }
            Ok(0) => break Ok(()),
            Ok(_) if byte[0] == b'\n' => {
                terminated = true;
                break Ok(());
            }
            Ok(_) if byte[0] == 0 => {
                break Err(PamError::ReadFailure(io::Error::new(
                    ErrorKind::InvalidData,
                    "NUL byte in input",
                )))
            }
            Ok(_) => match secret.get_mut(len) {
                Some(dest) => {
                    *dest = byte[0];
                    len += 1;
                }
                None => break Err(PamError::SecretTooLong),
            },
            Err(err) => break Err(PamError::ReadFailure(err)),
        }
    };
    crate::pam::wipe_memory(&mut byte);
    outcome?;

    if terminated && len > 0 && secret[len - 1] == b'\r' {
        secret[len - 1] = 0;
    }

    Ok(secret)
}

/// Write something and immediately flush
fn write_unbuffered(sink: &mut dyn Write, text: &[u8]) -> io::Result<()> {
    sink.write_all(text)?;
    sink.flush()
}

fn read_from(source: BorrowedFd, sink: &mut dyn Write, hidden: bool) -> PamResult<PamBuffer> {
    if hidden && safe_isatty(source) {
        let secret = read_secret_from(source);
        // the user's enter key was not echoed either
        let _ = write_unbuffered(sink, b"\n");
        secret
    } else {
        read_line(&mut FdReader::new(source))
    }
}

/// Either /dev/tty or stdin+stderr, used to talk to the user.
pub enum Terminal {
    Tty(fs::File),
    StdIE(io::StdinLock<'static>, io::StderrLock<'static>),
}

impl Terminal {
    /// Open the current TTY for user communication
    pub fn open_tty() -> PamResult<Self> {
        // control ourselves that we are really talking to a TTY
        // mitigates: https://marc.info/?l=oss-security&m=168164424404224
        Ok(Terminal::Tty(
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/tty")
                .map_err(|_| PamError::TtyRequired)?,
        ))
    }

    /// Open standard input and standard error for user communication
    pub fn open_stdie() -> Self {
        Terminal::StdIE(io::stdin().lock(), io::stderr().lock())
    }

    /// Show `prompt` and read a line. Hidden input is read with echo off when
    /// the input side is a terminal; otherwise it is read like any other line.
    pub fn read_input(&mut self, prompt: &str, hidden: bool) -> PamResult<PamBuffer> {
        write_unbuffered(self.sink(), prompt.as_bytes())?;

        match self {
            Terminal::StdIE(stdin, stderr) => read_from(stdin.as_fd(), stderr, hidden),
            Terminal::Tty(file) => read_from(file.as_fd(), &mut &*file, hidden),
        }
    }

    /// Display information
    pub fn prompt(&mut self, text: &str) -> io::Result<()> {
        write_unbuffered(self.sink(), text.as_bytes())
    }

    /// Ring the bell
    pub fn bell(&mut self) -> io::Result<()> {
        const BELL: &[u8; 1] = b"\x07";
        write_unbuffered(self.sink(), BELL)
    }

    fn sink(&mut self) -> &mut dyn Write {
        match self {
            Terminal::StdIE(_, x) => x,
            Terminal::Tty(x) => x,
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs::File;
    use std::os::fd::AsFd;

    use super::*;
    use crate::system::term::open_pty;

    fn text(buf: &PamBuffer) -> &str {
        std::str::from_utf8(buf.as_bytes()).unwrap()
    }

    #[test]
    fn miri_test_read() {
        let mut data = "password123\nhello world".as_bytes();
        let buf = read_line(&mut data).unwrap();
        // check that the \n is not part of input
        assert_eq!(text(&buf), "password123");
        // check that the \n is also consumed but the rest of the input is still there
        assert_eq!(std::str::from_utf8(data).unwrap(), "hello world");
    }

    #[test]
    fn miri_test_crlf_is_one_terminator() {
        let buf = read_line(&mut "hunter2\r\n".as_bytes()).unwrap();
        assert_eq!(text(&buf), "hunter2");
    }

    #[test]
    fn miri_test_missing_terminator_keeps_last_byte() {
        let buf = read_line(&mut "hunter2".as_bytes()).unwrap();
        assert_eq!(text(&buf), "hunter2");

        let buf = read_line(&mut "x".as_bytes()).unwrap();
        assert_eq!(text(&buf), "x");
    }

    #[test]
    fn miri_test_lone_carriage_return_is_kept() {
        let buf = read_line(&mut "abc\r".as_bytes()).unwrap();
        assert_eq!(buf.as_bytes(), b"abc\r");
    }

    #[test]
    fn miri_test_nul_byte_is_refused() {
        let before = crate::pam::live::count();
        let mut data = "ab\0cd\nrest".as_bytes();
        let err = read_line(&mut data).unwrap_err();
        assert!(
            matches!(&err, PamError::ReadFailure(e) if e.kind() == ErrorKind::InvalidData),
            "{err:?}"
        );
        // the partial secret was dropped along with the error
        assert_eq!(crate::pam::live::count(), before);
    }

    #[test]
    fn miri_test_empty_line_is_an_empty_secret() {
        let buf = read_line(&mut "\nrest".as_bytes()).unwrap();
        assert_eq!(text(&buf), "");
    }

    #[test]
    fn miri_test_end_of_stream_before_input() {
        let err = read_line(&mut "".as_bytes()).unwrap_err();
        assert!(
            matches!(&err, PamError::ReadFailure(e) if e.kind() == ErrorKind::UnexpectedEof),
            "{err:?}"
        );
    }

    #[test]
    fn miri_test_longpwd() {
        assert!(read_line(&mut "a".repeat(511).as_bytes()).is_ok());
        assert!(matches!(
            read_line(&mut "a".repeat(512).as_bytes()),
            Err(PamError::SecretTooLong)
        ));
    }

    #[test]
    fn miri_test_write() {
        let mut data = Vec::new();
        write_unbuffered(&mut data, b"prompt").unwrap();
        assert_eq!(std::str::from_utf8(&data).unwrap(), "prompt");
    }

    #[test]
    fn secret_from_pty_without_echo() {
        let (leader, follower) = open_pty();
        let mut leader = File::from(leader);
        leader.write_all(b"hunter2\n").unwrap();

        let before = TerminalMode::capture(follower.as_fd()).unwrap();
        assert!(before.echo());

        let secret = read_secret_from(follower.as_fd()).unwrap();
        assert_eq!(text(&secret), "hunter2");

        let after = TerminalMode::capture(follower.as_fd()).unwrap();
        assert!(after.echo());
    }

    #[test]
    fn echo_stays_off_when_it_was_off() {
        let (leader, follower) = open_pty();
        let mut leader = File::from(leader);

        let original = TerminalMode::capture(follower.as_fd()).unwrap();
        original.without_echo().apply(follower.as_fd()).unwrap();

        leader.write_all(b"s3cret\nnext\n").unwrap();
        let secret = read_secret_from(follower.as_fd()).unwrap();
        assert_eq!(text(&secret), "s3cret");
        assert!(!TerminalMode::capture(follower.as_fd()).unwrap().echo());

        // the second line was left alone
        let rest = read_line(&mut FdReader::new(follower.as_fd())).unwrap();
        assert_eq!(text(&rest), "next");
    }

    #[test]
    fn echo_is_restored_after_failed_read() {
        let (leader, follower) = open_pty();
        let mut leader = File::from(leader);
        leader.write_all("a".repeat(600).as_bytes()).unwrap();
        leader.write_all(b"\n").unwrap();

        assert!(matches!(
            read_secret_from(follower.as_fd()),
            Err(PamError::SecretTooLong)
        ));
        assert!(TerminalMode::capture(follower.as_fd()).unwrap().echo());
    }

    #[test]
    fn not_a_terminal() {
        let file = File::open("/dev/null").unwrap();
        assert!(matches!(
            read_secret_from(file.as_fd()),
            Err(PamError::TerminalQuery(_))
        ));
    }
}
