// SPDX-License-Identifier: AGPL-3.0-only

//! Wrappers for various system calls.
//!
//! The wrappers retain the original names and behaviors of the system calls,
//! making it easy to look up their exact behavior in the man pages.
//! However, there are a few trivial differences for ease of use:
//!
//!  - Errors are reported via using [`Result`] instead of `errno`.
//!  - New file descriptors are returned using [`OwnedFd`].
//!  - `*_CLOEXEC` is passed to file handle creation functions by default,
//!    as setting this flag in a separate call incurs a race condition.
//!  - String arguments and array arguments are passed in a memory-safe way.
//!    The exact ways in which this is done are ad-hoc for some functions.
//!
//! These functions do not allocate memory except:
//!
//!  - When they call a trait method that allocates memory.
//!  - When otherwise noted.
//!
//! A few functions in this crate (`fork`, `dup2`, `close`, `fcntl_setfd`) are
//! deliberately *not* wrapped in [`OwnedFd`] — they operate on a file
//! descriptor number that is not owned by the caller in the usual sense,
//! either because it is about to be replaced in a freshly forked child or
//! because some other owner is responsible for it. Callers of those
//! functions are taking on the safety obligations manually.

#![warn(missing_docs)]

use {
    crate::cstr::{CStringArr, WithCStr},
    std::{
        io::{Error, Result},
        os::unix::{
            io::{FromRawFd, OwnedFd, RawFd},
            process::ExitStatusExt,
        },
        process::ExitStatus,
    },
};

pub use libc::{
    F_GETFD,
    F_SETFD,
    FD_CLOEXEC,
    O_CREAT,
    O_EXCL,
    O_RDONLY,
    O_TRUNC,
    O_WRONLY,
    RLIMIT_NOFILE,
    SIGKILL,
    SIGTERM,
    WNOHANG,
    mode_t,
    pid_t,
};

pub mod cstr;

/// _exit(2).
pub fn _exit(status: libc::c_int) -> !
{
    unsafe {
        libc::_exit(status);
    }
}

/// close(2), for a file descriptor not owned by an [`OwnedFd`].
///
/// Used while rearranging file descriptors in a freshly forked child,
/// where the descriptor table is being rebuilt by hand.
pub fn close(fd: RawFd) -> Result<()>
{
    unsafe {
        match libc::close(fd) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// dup(2).
pub fn dup(fd: RawFd) -> Result<OwnedFd>
{
    unsafe {
        match libc::dup(fd) {
            -1     => Err(Error::last_os_error()),
            newfd  => Ok(OwnedFd::from_raw_fd(newfd)),
        }
    }
}

/// dup2(2), for a target file descriptor not owned by an [`OwnedFd`].
///
/// After this call succeeds, `newfd` and `oldfd` refer to the same open
/// file description. Used to install a file descriptor at a fixed number
/// (0, 1, 2, or an extra documented number) in a freshly forked child.
pub fn dup2(oldfd: RawFd, newfd: RawFd) -> Result<()>
{
    unsafe {
        match libc::dup2(oldfd, newfd) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// execv(2).
///
/// Never returns on success; on failure, returns the error instead of
/// panicking so the caller (typically code running after `fork` in the
/// child, before any chance to unwind) can report it and `_exit`.
pub fn execv(pathname: impl WithCStr, argv: &CStringArr) -> Error
{
    pathname.with_cstr(|pathname| {
        unsafe {
            libc::execv(pathname.as_ptr(), argv.as_ptr());
        }
        Ok(Error::last_os_error())
    }).unwrap_or_else(|err| err)
}

/// fcntl(2) F_GETFD — read a file descriptor's flags (currently only
/// `FD_CLOEXEC` is defined).
pub fn fcntl_getfd(fd: RawFd) -> Result<libc::c_int>
{
    unsafe {
        match libc::fcntl(fd, libc::F_GETFD, 0) {
            -1    => Err(Error::last_os_error()),
            flags => Ok(flags),
        }
    }
}

/// fcntl(2) F_SETFD — set a file descriptor's flags (currently only
/// `FD_CLOEXEC` is defined).
pub fn fcntl_setfd(fd: RawFd, flags: libc::c_int) -> Result<()>
{
    unsafe {
        match libc::fcntl(fd, libc::F_SETFD, flags) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// Set or clear the close-on-exec flag of a file descriptor, preserving any
/// other flags (there are currently none defined besides `FD_CLOEXEC`, but
/// this mirrors how the flag is conventionally toggled).
pub fn set_cloexec(fd: RawFd, value: bool) -> Result<()>
{
    let flags = fcntl_getfd(fd)?;
    let flags = if value {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    fcntl_setfd(fd, flags)
}

/// fork(2).
///
/// # Safety
///
/// The child process runs with only the invariants that hold immediately
/// after `fork`: a single thread, a duplicated but otherwise independent
/// address space, and no guarantee that locks held by other threads in the
/// parent will ever be released. Do not allocate, log, or take locks in the
/// child between `fork` and `execv`/`_exit` beyond what is documented as
/// async-signal-safe.
pub unsafe fn fork() -> Result<pid_t>
{
    match libc::fork() {
        -1  => Err(Error::last_os_error()),
        pid => Ok(pid),
    }
}

/// getrlimit(2) for `RLIMIT_NOFILE` — the current process's open-file limit.
pub fn getrlimit_nofile() -> Result<libc::rlim_t>
{
    unsafe {
        let mut limit = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        match libc::getrlimit(libc::RLIMIT_NOFILE, limit.as_mut_ptr()) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(limit.assume_init().rlim_cur),
        }
    }
}

/// kill(2).
pub fn kill(pid: pid_t, sig: libc::c_int) -> Result<()>
{
    unsafe {
        match libc::kill(pid, sig) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// open(2).
pub fn open(
    pathname:  impl WithCStr,
    mut flags: libc::c_int,
    mode:      mode_t,
) -> Result<OwnedFd>
{
    flags |= libc::O_CLOEXEC;
    pathname.with_cstr(|pathname| {
        unsafe {
            match libc::open(pathname.as_ptr(), flags, mode) {
                -1 => Err(Error::last_os_error()),
                fd => Ok(OwnedFd::from_raw_fd(fd)),
            }
        }
    })
}

/// pipe2(2).
pub fn pipe2(mut flags: libc::c_int) -> Result<[OwnedFd; 2]>
{
    flags |= libc::O_CLOEXEC;
    unsafe {
        let mut pipefd = [0, 0];
        match libc::pipe2(pipefd.as_mut_ptr(), flags) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(pipefd.map(|fd| OwnedFd::from_raw_fd(fd))),
        }
    }
}

/// read(2), for a borrowed file descriptor (e.g. one handed out by
/// [`crate::cstr`]'s callers through a `Source`/`Sink`-style accessor).
///
/// A `0` return means end of file, matching the raw syscall.
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize>
{
    unsafe {
        match libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) {
            -1 => Err(Error::last_os_error()),
            n  => Ok(n as usize),
        }
    }
}

/// write(2), for a borrowed file descriptor.
///
/// A `0` or negative syscall return is reported as `Ok(0)`/an error
/// respectively; callers loop on short writes themselves.
pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize>
{
    unsafe {
        match libc::write(fd, buf.as_ptr().cast(), buf.len()) {
            -1 => Err(Error::last_os_error()),
            n  => Ok(n as usize),
        }
    }
}

/// sigaction(2), restricted to installing `SIG_IGN` for a signal.
///
/// Used once, process-wide, to ignore `SIGPIPE`.
pub fn signal_ignore(signum: libc::c_int) -> Result<()>
{
    unsafe {
        let handler = libc::signal(signum, libc::SIG_IGN);
        if handler == libc::SIG_ERR {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// waitpid(2).
pub fn waitpid(pid: pid_t, options: libc::c_int)
    -> Result<(pid_t, ExitStatus)>
{
    unsafe {
        let mut wstatus = 0;
        match libc::waitpid(pid, &mut wstatus, options) {
            -1  => Err(Error::last_os_error()),
            pid => Ok((pid, ExitStatus::from_raw(wstatus))),
        }
    }
}
