//! TAP frame transport.
//!
//! A thin adapter over the kernel's `/dev/net/tun` character device in TAP
//! mode: each `read` returns one whole Ethernet frame, each `write` emits
//! one.  `EINTR`/`EAGAIN` are retried transparently; every other error is
//! fatal to the pipeline and propagates to the top level.
//!
//! The read side is owned by the ingress thread and the write side by the
//! egress thread; both go through `&self`, which is safe because reads and
//! writes on a tun fd are independent.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;

const TUN_DEVICE: &str = "/dev/net/tun";

// From <linux/if_tun.h>; libc does not export the TUN ioctl surface.
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;

#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

/// A TAP endpoint exchanging whole Ethernet frames with the kernel.
pub struct TapDevice {
    fd: RawFd,
    name: String,
}

impl TapDevice {
    /// Open `/dev/net/tun` and attach to the named TAP interface.
    pub fn open(name: &str) -> io::Result<Self> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("interface name {name:?} too long"),
            ));
        }
        let path = CString::new(TUN_DEVICE).map_err(|_| io::ErrorKind::InvalidInput)?;

        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut req = IfReq {
            name: [0; libc::IFNAMSIZ],
            flags: IFF_TAP | IFF_NO_PI,
            _pad: [0; 22],
        };
        for (dst, src) in req.name.iter_mut().zip(name.bytes()) {
            *dst = src as libc::c_char;
        }

        if unsafe { libc::ioctl(fd, TUNSETIFF, &mut req) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(Self {
            fd,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read exactly one Ethernet frame into `buf`, returning its length.
    pub fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => continue,
                _ => return Err(err),
            }
        }
    }

    /// Write exactly one Ethernet frame.  A partial write is an error.
    pub fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        loop {
            let n = unsafe { libc::write(self.fd, frame.as_ptr().cast(), frame.len()) };
            if n == frame.len() as isize {
                return Ok(());
            }
            if n >= 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("partial frame write ({n} of {} bytes)", frame.len()),
                ));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => continue,
                _ => return Err(err),
            }
        }
    }
}

impl Drop for TapDevice {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
