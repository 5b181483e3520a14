//! Routines for "secure" memory operations; i.e. data that we need to send to Linux-PAM and don't
//! want any copies to leak (that we would then need to zeroize).
use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    slice,
};

use super::{PamError, PamResult};

const SIZE: usize = super::sys::PAM_MAX_RESP_SIZE as usize;

/// A response buffer of `PAM_MAX_RESP_SIZE` bytes, allocated with `calloc` so
/// that libpam can `free` it once ownership is handed over. The last byte is
/// never reachable from safe code, so the content is always NUL-terminated.
pub struct PamBuffer(NonNull<[u8; SIZE]>);

const LAYOUT: Layout = match Layout::from_size_align(SIZE, 1) {
    Ok(layout) => layout,
    Err(_) => unreachable!(),
};

impl PamBuffer {
    /// The largest secret (in bytes) a buffer can hold.
    pub const CAPACITY: usize = SIZE - 1;

    /// Allocate a cleared buffer, reporting allocation failure instead of aborting.
    pub fn try_new() -> PamResult<Self> {
        // SAFETY: `calloc` returns either a cleared, allocated chunk of `SIZE` bytes
        // or NULL to indicate that the allocation request failed
        let res = unsafe { libc::calloc(1, SIZE) };
        let nn = NonNull::new(res).ok_or(PamError::AllocationFailure)?;
        live::inc();
        Ok(PamBuffer(nn.cast()))
    }

    /// Copy `src` into a new buffer and wipe the source afterwards.
    pub fn from_bytes(mut src: impl AsMut<[u8]>) -> PamResult<Self> {
        let src = src.as_mut();
        if src.len() > Self::CAPACITY {
            wipe_memory(src);
            return Err(PamError::SecretTooLong);
        }
        let mut buffer = PamBuffer::try_new()?;
        buffer[..src.len()].copy_from_slice(src);
        wipe_memory(src);

        Ok(buffer)
    }

    /// The content up to (excluding) the first NUL byte.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.iter().position(|&b| b == 0).unwrap_or(Self::CAPACITY);
        &self[..len]
    }

    // consume this buffer and return its internal pointer
    // (ending the type-level security, but guaranteeing you need unsafe code to access the data)
    pub fn leak(self) -> NonNull<u8> {
        let result = self.0;
        std::mem::forget(self);
        live::dec();

        result.cast()
    }
}

impl Default for PamBuffer {
    fn default() -> Self {
        match PamBuffer::try_new() {
            Ok(buffer) => buffer,
            Err(_) => alloc::handle_alloc_error(LAYOUT),
        }
    }
}

impl std::fmt::Debug for PamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PamBuffer(<redacted>)")
    }
}

impl std::ops::Deref for PamBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `self.0.as_ptr()` is non-null, aligned, and initialized, and points to `SIZE` bytes.
        // The lifetime of the slice does not exceed that of `self`.
        //
        // We make the slice one less in size to guarantee the existence of a terminating NUL.
        unsafe { slice::from_raw_parts(self.0.as_ptr().cast(), SIZE - 1) }
    }
}

impl std::ops::DerefMut for PamBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: see above
        unsafe { slice::from_raw_parts_mut(self.0.as_ptr().cast(), SIZE - 1) }
    }
}

impl Drop for PamBuffer {
    fn drop(&mut self) {
        // SAFETY: same as for `deref()` and `deref_mut()`
        wipe_memory(unsafe { self.0.as_mut() });
        // SAFETY: `self.0.as_ptr()` was obtained via `calloc`, so calling `free` is proper.
        unsafe { libc::free(self.0.as_ptr().cast()) }
        live::dec();
    }
}

/// Used to zero out memory and protect sensitive data from leaking; inspired by Conrad Kleinespel's
/// Rustatic rtoolbox::SafeString, <https://crates.io/crates/rtoolbox/0.0.1>
pub(crate) fn wipe_memory(memory: &mut [u8]) {
    use std::sync::atomic;

    let nonsense: u8 = 0x55;
    for c in memory {
        // SAFETY: `c` is safe for writes (it comes from a &mut reference)
        unsafe { std::ptr::write_volatile(c, nonsense) };
    }

    atomic::fence(atomic::Ordering::SeqCst);
    atomic::compiler_fence(atomic::Ordering::SeqCst);
}

// Buffers owned by Rust code on the current thread; test builds only.
#[cfg(test)]
pub(crate) mod live {
    use std::cell::Cell;

    thread_local! {
        static LIVE: Cell<isize> = const { Cell::new(0) };
    }

    pub(super) fn inc() {
        LIVE.with(|n| n.set(n.get() + 1));
    }

    pub(super) fn dec() {
        LIVE.with(|n| n.set(n.get() - 1));
    }

    pub(crate) fn count() -> isize {
        LIVE.with(Cell::get)
    }
}

#[cfg(not(test))]
mod live {
    pub(super) fn inc() {}
    pub(super) fn dec() {}
}

#[allow(clippy::undocumented_unsafe_blocks)]
#[cfg(test)]
mod test {
    use super::{live, PamBuffer};
    use crate::pam::PamError;

    #[test]
    fn miri_test_leaky_cstring() {
        let test = |text: &str| unsafe {
            let buf = PamBuffer::from_bytes(text.to_string().as_bytes_mut()).unwrap();
            assert_eq!(buf.as_bytes(), text.as_bytes());
            let nn = buf.leak();
            let result = crate::cutils::string_from_ptr(nn.as_ptr().cast());
            libc::free(nn.as_ptr().cast());
            result
        };
        assert_eq!(test(""), "");
        assert_eq!(test("hello"), "hello");
    }

    #[test]
    fn miri_test_wipe() {
        let mut memory: [u8; 3] = [1, 2, 3];
        let fix = PamBuffer::from_bytes(&mut memory).unwrap();
        assert_eq!(memory, [0x55, 0x55, 0x55]);
        assert_eq!(fix[0..=2], [1, 2, 3]);
        assert!(fix[3..].iter().all(|&x| x == 0));
        std::mem::drop(fix);
    }

    #[test]
    fn too_long_input_is_wiped_and_refused() {
        let mut memory = vec![b'x'; PamBuffer::CAPACITY + 1];
        assert!(matches!(
            PamBuffer::from_bytes(&mut memory),
            Err(PamError::SecretTooLong)
        ));
        assert!(memory.iter().all(|&b| b == 0x55));

        let mut memory = vec![b'x'; PamBuffer::CAPACITY];
        let buf = PamBuffer::from_bytes(&mut memory).unwrap();
        assert_eq!(buf.as_bytes().len(), PamBuffer::CAPACITY);
    }

    #[test]
    fn live_count_tracks_ownership() {
        let before = live::count();
        let a = PamBuffer::default();
        let b = PamBuffer::default();
        assert_eq!(live::count(), before + 2);

        drop(a);
        assert_eq!(live::count(), before + 1);

        let nn = b.leak();
        assert_eq!(live::count(), before);
        unsafe { libc::free(nn.as_ptr().cast()) };
    }

    #[test]
    fn debug_does_not_show_content() {
        let buf = PamBuffer::from_bytes(b"hunter2".to_vec()).unwrap();
        assert_eq!(format!("{buf:?}"), "PamBuffer(<redacted>)");
    }
}
