#![expect(unsafe_code, reason = "Creating descriptors goes through libc.")]

//! Anonymous pipes and connected socket pairs.
//!
//! Both endpoints are always close-on-exec. Where the platform allows it the
//! flags are applied atomically at creation (`pipe2`, `SOCK_CLOEXEC`), otherwise
//! they are set with `fcntl` right after.

use alloc::format;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

// -----------------------------------------------------------------------------
// Helpers

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
const HAS_ATOMIC_FLAGS: bool = true;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
const HAS_ATOMIC_FLAGS: bool = false;

/// Turn a `-1` libc return into an [`io::Error`] prefixed with `context`.
fn cvt(ret: libc::c_int, context: &str) -> io::Result<libc::c_int> {
    if ret == -1 {
        let err = io::Error::last_os_error();
        log::debug!("{context} failed: {err}");
        Err(io::Error::new(err.kind(), format!("{context}: {err}")))
    } else {
        Ok(ret)
    }
}

/// Take ownership of both descriptors returned by `pipe`/`socketpair`.
///
/// # Safety
/// Both descriptors must be open and owned by nobody else.
unsafe fn owned_pair(fds: [RawFd; 2]) -> (OwnedFd, OwnedFd) {
    // SAFETY: The caller guarantees the descriptors are fresh and open.
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// Set `FD_CLOEXEC` on `fd`.
pub fn set_cloexec(fd: &impl AsRawFd) -> io::Result<()> {
    let fd = fd.as_raw_fd();
    // SAFETY: `fcntl` on a borrowed, open descriptor.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFD) }, "fcntl(F_GETFD)")?;
    if flags & libc::FD_CLOEXEC == 0 {
        // SAFETY: As above.
        cvt(
            unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) },
            "fcntl(F_SETFD)",
        )?;
    }
    Ok(())
}

/// Set `O_NONBLOCK` on `fd`.
pub fn set_non_blocking(fd: &impl AsRawFd) -> io::Result<()> {
    let fd = fd.as_raw_fd();
    // SAFETY: `fcntl` on a borrowed, open descriptor.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) }, "fcntl(F_GETFL)")?;
    if flags & libc::O_NONBLOCK == 0 {
        // SAFETY: As above.
        cvt(
            unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) },
            "fcntl(F_SETFL)",
        )?;
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Pipe

/// A unidirectional anonymous pipe.
///
/// # Examples
///
/// ```
/// use std::io::{Read, Write};
/// use rk_os::pipe::Pipe;
///
/// let (mut reader, mut writer) = Pipe::new(false).unwrap().into_files();
/// writer.write_all(b"ping").unwrap();
/// drop(writer);
///
/// let mut buf = String::new();
/// reader.read_to_string(&mut buf).unwrap();
/// assert_eq!(buf, "ping");
/// ```
#[derive(Debug)]
pub struct Pipe {
    /// The read end.
    pub read: OwnedFd,
    /// The write end.
    pub write: OwnedFd,
}

impl Pipe {
    /// Creates a new pipe, optionally with both ends non-blocking.
    pub fn new(non_blocking: bool) -> io::Result<Self> {
        let (read, write) = raw_pipe(non_blocking)?;

        log::debug!(
            "created pipe read={} write={} non_blocking={non_blocking}",
            read.as_raw_fd(),
            write.as_raw_fd(),
        );

        Ok(Self { read, write })
    }

    /// Converts both ends into [`File`]s, `(read, write)`.
    pub fn into_files(self) -> (File, File) {
        (File::from(self.read), File::from(self.write))
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
fn raw_pipe(non_blocking: bool) -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    let flags = libc::O_CLOEXEC | if non_blocking { libc::O_NONBLOCK } else { 0 };
    // SAFETY: `fds` has room for the two descriptors `pipe2` writes.
    cvt(unsafe { libc::pipe2(fds.as_mut_ptr(), flags) }, "pipe error")?;
    // SAFETY: `pipe2` succeeded, both descriptors are ours.
    Ok(unsafe { owned_pair(fds) })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
fn raw_pipe(non_blocking: bool) -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: `fds` has room for the two descriptors `pipe` writes.
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) }, "pipe error")?;
    // SAFETY: `pipe` succeeded, both descriptors are ours.
    let (read, write) = unsafe { owned_pair(fds) };
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    if non_blocking {
        set_non_blocking(&read)?;
        set_non_blocking(&write)?;
    }
    Ok((read, write))
}

// -----------------------------------------------------------------------------
// SocketPair

/// A pair of connected `AF_UNIX` stream sockets.
///
/// The naming mirrors [`Pipe`], but both ends are bidirectional.
#[derive(Debug)]
pub struct SocketPair {
    /// The first end.
    pub read: OwnedFd,
    /// The second end.
    pub write: OwnedFd,
}

impl SocketPair {
    /// Creates a connected socket pair, optionally with both ends non-blocking.
    pub fn new(non_blocking: bool) -> io::Result<Self> {
        let mut fds: [RawFd; 2] = [-1; 2];

        let mut ty = libc::SOCK_STREAM;
        if HAS_ATOMIC_FLAGS {
            ty |= sock_flags(non_blocking);
        }

        // SAFETY: `fds` has room for the two descriptors `socketpair` writes.
        cvt(
            unsafe { libc::socketpair(libc::AF_UNIX, ty, 0, fds.as_mut_ptr()) },
            "socketpair failed",
        )?;
        // SAFETY: `socketpair` succeeded, both descriptors are ours.
        let (read, write) = unsafe { owned_pair(fds) };

        if !HAS_ATOMIC_FLAGS {
            set_cloexec(&read)?;
            set_cloexec(&write)?;
            if non_blocking {
                set_non_blocking(&read)?;
                set_non_blocking(&write)?;
            }
        }

        log::debug!(
            "created socket pair {}<->{} non_blocking={non_blocking}",
            read.as_raw_fd(),
            write.as_raw_fd(),
        );

        Ok(Self { read, write })
    }

    /// Converts both ends into [`UnixStream`]s.
    pub fn into_streams(self) -> (UnixStream, UnixStream) {
        (UnixStream::from(self.read), UnixStream::from(self.write))
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
fn sock_flags(non_blocking: bool) -> libc::c_int {
    libc::SOCK_CLOEXEC | if non_blocking { libc::SOCK_NONBLOCK } else { 0 }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
fn sock_flags(_non_blocking: bool) -> libc::c_int {
    0
}

// -----------------------------------------------------------------------------
// Tests
