//! AF_PACKET raw socket bound to a single interface.

use crate::DaemonError;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    WouldBlock,
    Failed,
}

#[derive(Debug)]
pub struct RawSocket {
    fd: OwnedFd,
    ifindex: u32,
}

impl RawSocket {
    /// Opens a non-blocking packet socket receiving every EtherType on `iface`.
    pub fn bind(iface: &str) -> Result<Self, DaemonError> {
        let ifindex = nix::net::if_::if_nametoindex(iface)?;
        let protocol = (libc::ETH_P_ALL as u16).to_be();

        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                protocol as libc::c_int,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // Safety: `raw` is a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = ifindex as libc::c_int;
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        tracing::info!(iface, ifindex, "Raw socket bound");
        Ok(Self { fd, ifindex })
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// Receives one inbound frame into `buf`. Returns `Ok(None)` when nothing
    /// is pending. Frames this host transmitted are skipped.
    ///
    /// The returned length is the frame's full length on the wire. It exceeds
    /// `buf.len()` when the frame did not fit and only a prefix was copied.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
            let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            let n = unsafe {
                libc::recvfrom(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_TRUNC,
                    &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => return Ok(None),
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(err),
                }
            }

            if addr.sll_pkttype == libc::PACKET_OUTGOING as libc::c_uchar {
                continue;
            }
            return Ok(Some(n as usize));
        }
    }

    pub fn send_nowait(&self, frame: &[u8]) -> SendResult {
        loop {
            let rc = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    0,
                )
            };
            if rc >= 0 {
                return SendResult::Sent;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return SendResult::WouldBlock,
                _ => {
                    tracing::debug!(error = %err, "send failed");
                    return SendResult::Failed;
                }
            }
        }
    }

    /// Sends `frame`, waiting up to `max_waits` milliseconds for the socket to
    /// drain. Returns false if the frame was dropped.
    pub fn send(&self, frame: &[u8], max_waits: u32) -> bool {
        for _ in 0..=max_waits {
            match self.send_nowait(frame) {
                SendResult::Sent => return true,
                SendResult::Failed => return false,
                SendResult::WouldBlock => {
                    let mut pfd = libc::pollfd {
                        fd: self.fd.as_raw_fd(),
                        events: libc::POLLOUT,
                        revents: 0,
                    };
                    let rc = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, 1) };
                    if rc < 0 {
                        let err = io::Error::last_os_error();
                        if err.kind() != io::ErrorKind::Interrupted {
                            tracing::debug!(error = %err, "poll(POLLOUT) failed");
                            return false;
                        }
                    }
                }
            }
        }
        false
    }
}
