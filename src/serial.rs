//! Raw serial I/O: 115200 8N1 with a cancellable blocking read.
//!
//! `cancel_read()` is a self-pipe: a byte written to the pipe wakes a
//! thread blocked in `read_byte()` with no data pending, so a freshly
//! enqueued command is sent without waiting out a timeout.

use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::fcntl::{self, OFlag};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices};
use nix::unistd;

use crate::error::ModemError;

/// Safety: caller guarantees `fd` is open for the duration of use.
unsafe fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    BorrowedFd::borrow_raw(fd)
}

pub struct SerialPort {
    fd: RawFd,
    cancel_read_fd: RawFd,
    cancel_write_fd: RawFd,
}

impl SerialPort {
    /// Open `device` at 115200 8N1 raw mode, no flow control.
    pub fn open(device: &str) -> Result<Self, ModemError> {
        let fd = fcntl::open(device, OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty())
            .map_err(|e| ModemError::Io(std::io::Error::from(e)))?;

        configure_termios(fd)?;
        // SAFETY: fd just opened, valid for this call.
        unsafe {
            termios::tcflush(borrow(fd), termios::FlushArg::TCIOFLUSH)?;
        }

        let (cancel_read_owned, cancel_write_owned) =
            unistd::pipe().map_err(|e| ModemError::Io(std::io::Error::from(e)))?;
        let cancel_read_fd = set_nonblocking(cancel_read_owned)?;

        Ok(Self {
            fd,
            cancel_read_fd,
            cancel_write_fd: std::os::fd::IntoRawFd::into_raw_fd(cancel_write_owned),
        })
    }

    /// Write raw bytes to the device.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ModemError> {
        // SAFETY: fd stays open for the lifetime of `self`.
        let bfd = unsafe { borrow(self.fd) };
        unistd::write(bfd, bytes).map_err(|e| ModemError::Io(std::io::Error::from(e)))?;
        Ok(())
    }

    /// Block up to `timeout` (or indefinitely if `None`) for one byte from
    /// either the device or a `cancel_read()` wakeup.
    ///
    /// Returns `Ok(Some(byte))` on data, `Ok(None)` on timeout or a
    /// cancellation with no device data pending.
    pub fn read_byte(&self, timeout: Option<Duration>) -> Result<Option<u8>, ModemError> {
        // SAFETY: both fds stay open for the lifetime of `self`.
        let dev = unsafe { borrow(self.fd) };
        let cancel = unsafe { borrow(self.cancel_read_fd) };
        let mut fds = [
            PollFd::new(dev, PollFlags::POLLIN),
            PollFd::new(cancel, PollFlags::POLLIN),
        ];
        let poll_timeout = timeout.map_or(PollTimeout::NONE, |d| {
            PollTimeout::try_from(d.as_millis() as u32).unwrap_or(PollTimeout::MAX)
        });
        let n = nix::poll::poll(&mut fds, poll_timeout)
            .map_err(|e| ModemError::Io(std::io::Error::from(e)))?;
        if n == 0 {
            return Ok(None);
        }

        if fds[1].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
            drain_cancel_pipe(self.cancel_read_fd);
        }

        if !fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
            return Ok(None);
        }

        let mut buf = [0u8; 1];
        let n = unistd::read(self.fd, &mut buf).map_err(|e| ModemError::Io(std::io::Error::from(e)))?;
        if n == 0 {
            return Err(ModemError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "serial device closed",
            )));
        }
        Ok(Some(buf[0]))
    }

    /// Wake a thread currently blocked in `read_byte()` with no data to
    /// report — used so a freshly enqueued command is sent immediately.
    pub fn cancel_read(&self) {
        cancel_write(self.cancel_write_fd);
    }

    /// A cloneable, `Send` handle other threads use to wake a blocked
    /// `read_byte()` without touching `SerialPort` itself.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            write_fd: self.cancel_write_fd,
        }
    }
}

/// The write end of the self-pipe, detached from `SerialPort`'s lifetime so
/// the engine-owning thread and the handle passed to other threads can both
/// hold one. `SerialPort::drop` owns closing the underlying fd.
#[derive(Clone, Copy)]
pub struct CancelToken {
    write_fd: RawFd,
}

impl CancelToken {
    pub fn cancel(&self) {
        cancel_write(self.write_fd);
    }
}

fn cancel_write(fd: RawFd) {
    // SAFETY: the fd is owned by the `SerialPort` that handed out this
    // token and stays open for its lifetime.
    let w = unsafe { borrow(fd) };
    let _ = unistd::write(w, &[0u8]);
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        let _ = unistd::close(self.fd);
        let _ = unistd::close(self.cancel_read_fd);
        let _ = unistd::close(self.cancel_write_fd);
    }
}

fn drain_cancel_pipe(fd: RawFd) {
    let mut buf = [0u8; 64];
    while let Ok(n) = unistd::read(fd, &mut buf) {
        if n == 0 {
            break;
        }
    }
}

fn set_nonblocking(fd: std::os::fd::OwnedFd) -> Result<RawFd, ModemError> {
    let raw = std::os::fd::IntoRawFd::into_raw_fd(fd);
    let flags = fcntl::fcntl(raw, fcntl::FcntlArg::F_GETFL)
        .map_err(|e| ModemError::Io(std::io::Error::from(e)))?;
    let mut oflags = OFlag::from_bits_truncate(flags);
    oflags.insert(OFlag::O_NONBLOCK);
    fcntl::fcntl(raw, fcntl::FcntlArg::F_SETFL(oflags))
        .map_err(|e| ModemError::Io(std::io::Error::from(e)))?;
    Ok(raw)
}

/// Raw mode, 115200 baud, 8N1, `CLOCAL|CREAD`, no hardware flow control.
fn configure_termios(fd: RawFd) -> Result<(), ModemError> {
    // SAFETY: fd just opened by the caller, valid for this call.
    let bfd = unsafe { borrow(fd) };
    let mut tio = termios::tcgetattr(bfd)?;

    termios::cfmakeraw(&mut tio);
    termios::cfsetispeed(&mut tio, termios::BaudRate::B115200)?;
    termios::cfsetospeed(&mut tio, termios::BaudRate::B115200)?;

    tio.control_flags |= termios::ControlFlags::CLOCAL | termios::ControlFlags::CREAD;
    tio.control_flags &= !termios::ControlFlags::CRTSCTS;

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;

    termios::tcsetattr(bfd, SetArg::TCSANOW, &tio)?;
    Ok(())
}
