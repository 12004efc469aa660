// Copyright 2026 The soloio developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Non-blocking TCP, UDP and Unix-domain sockets driven by the readiness
//! reactor.
//!
//! Every socket is created `SOCK_NONBLOCK`; the async operations wait for
//! readiness first and perform the syscall once the reactor reports the
//! descriptor ready. Synchronous setup calls (`socket`, `bind`, `listen`)
//! report their errors inline.
//!
//! Address parsing and formatting is [`std::net::SocketAddr`]'s business
//! (Unix-domain sockets are addressed by [`Path`]); this module only
//! converts to and from the C socket address structures at the syscall
//! boundary.

use core::mem;
use core::ptr;
use std::ffi::OsString;
use std::io::{self, IoSlice, IoSliceMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use crate::executor::spawn;
use crate::future::with_cancellation;
use crate::io::{readable, writable};
use crate::reactor::{syscall, syscall_len};
use crate::sync::Cancellation;

/// A TCP socket listening for incoming connections.
#[derive(Debug)]
pub struct TcpListener {
    fd: OwnedFd,
}

/// A connected TCP stream.
#[derive(Debug)]
pub struct TcpStream {
    fd: OwnedFd,
}

/// A UDP socket.
#[derive(Debug)]
pub struct UdpSocket {
    fd: OwnedFd,
}

/// A Unix-domain socket listening for incoming stream connections.
#[derive(Debug)]
pub struct UnixListener {
    fd: OwnedFd,
}

/// A connected Unix-domain stream.
#[derive(Debug)]
pub struct UnixStream {
    fd: OwnedFd,
}

/// A Unix-domain datagram socket.
#[derive(Debug)]
pub struct UnixDatagram {
    fd: OwnedFd,
}

// === impl TcpListener ===

impl TcpListener {
    /// Create a listening socket bound to `addr`.
    ///
    /// Port 0 asks the kernel for an ephemeral port; use [`local_addr`] to
    /// find out which one was assigned.
    ///
    /// [`local_addr`]: TcpListener::local_addr
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Self::bind_with_backlog(addr, 128)
    }

    /// Like [`bind`](TcpListener::bind), with an explicit `listen` backlog.
    pub fn bind_with_backlog(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let fd = new_socket(family_of(addr), libc::SOCK_STREAM)?;
        bind_fd(&fd, addr)?;
        syscall(unsafe { libc::listen(fd.as_raw_fd(), backlog) })?;
        Ok(Self { fd })
    }

    /// The local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        local_addr_of(&self.fd)
    }

    /// Accept one incoming connection, returning the stream and the peer
    /// address.
    ///
    /// Waits until the listening socket is readable, then accepts. The
    /// returned stream is non-blocking and registered with no one; the peer
    /// address matches the address family of the connection (IPv4 or IPv6).
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        readable(self.fd.as_fd()).await?;

        // Safety: an all-zero sockaddr_storage is valid and accept4 fills it
        let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = syscall(unsafe {
            libc::accept4(
                self.fd.as_raw_fd(),
                (&raw mut storage).cast(),
                &mut len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        })?;
        // Safety: accept4 returned a fresh descriptor we now own
        let stream = TcpStream {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };
        Ok((stream, from_sockaddr(&storage)?))
    }

    /// Accept connections forever, spawning `handler` for each, until
    /// `cancel` is triggered.
    ///
    /// Handler tasks are detached; a handler that is still running when
    /// `serve` returns keeps running on the executor.
    pub async fn serve<H, Fut>(&self, mut handler: H, cancel: &Cancellation) -> io::Result<()>
    where
        H: FnMut(TcpStream, SocketAddr) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        loop {
            match with_cancellation(self.accept(), cancel).await {
                None => return Ok(()),
                Some(accepted) => {
                    let (stream, peer) = accepted?;
                    tracing::trace!(%peer, "serve: accepted connection");
                    spawn(handler(stream, peer)).detach();
                }
            }
        }
    }
}

impl AsFd for TcpListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// === impl TcpStream ===

impl TcpStream {
    /// Open a connection to `addr`.
    ///
    /// The non-blocking `connect` may succeed immediately (loopback often
    /// does); otherwise the socket is registered for writability and the
    /// final outcome is read back with `SO_ERROR` after the wakeup.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let fd = new_socket(family_of(addr), libc::SOCK_STREAM)?;
        let (storage, len) = to_sockaddr(addr);
        start_connect(&fd, (&raw const storage).cast(), len).await?;
        Ok(Self { fd })
    }

    /// Receive bytes into `buf`, waiting for the socket to become readable
    /// first. Returns the number of bytes received; 0 means the peer closed
    /// its half of the connection.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        recv_fd(&self.fd, buf).await
    }

    /// Send bytes from `buf`, waiting for the socket to become writable
    /// first. Returns the number of bytes actually sent, which may be short.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        send_fd(&self.fd, buf).await
    }

    /// Vectored variant of [`recv`](TcpStream::recv).
    pub async fn recv_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        recv_vectored_fd(&self.fd, bufs).await
    }

    /// Vectored variant of [`send`](TcpStream::send).
    pub async fn send_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        send_vectored_fd(&self.fd, bufs).await
    }

    /// The local address of this stream.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        local_addr_of(&self.fd)
    }

    /// The remote address this stream is connected to.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        // Safety: an all-zero sockaddr_storage is valid and getpeername fills it
        let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        syscall(unsafe {
            libc::getpeername(self.fd.as_raw_fd(), (&raw mut storage).cast(), &mut len)
        })?;
        from_sockaddr(&storage)
    }
}

impl AsFd for TcpStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// === impl UdpSocket ===

impl UdpSocket {
    /// Create a UDP socket bound to `addr`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let fd = new_socket(family_of(addr), libc::SOCK_DGRAM)?;
        bind_fd(&fd, addr)?;
        Ok(Self { fd })
    }

    /// Set the default destination for [`send`](UdpSocket::send) and filter
    /// [`recv`](UdpSocket::recv) to `addr`.
    ///
    /// A datagram `connect` completes without blocking.
    pub fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        let (storage, len) = to_sockaddr(addr);
        syscall(unsafe {
            libc::connect(self.fd.as_raw_fd(), (&raw const storage).cast(), len)
        })?;
        Ok(())
    }

    /// Receive one datagram, returning its length and the sender's address.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        readable(self.fd.as_fd()).await?;

        // Safety: an all-zero sockaddr_storage is valid and recvfrom fills it
        let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let n = syscall_len(unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
                (&raw mut storage).cast(),
                &mut len,
            )
        })?;
        Ok((n, from_sockaddr(&storage)?))
    }

    /// Send one datagram to `addr`.
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        writable(self.fd.as_fd()).await?;

        let (storage, len) = to_sockaddr(addr);
        syscall_len(unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                0,
                (&raw const storage).cast(),
                len,
            )
        })
    }

    /// Receive one datagram on a [connected](UdpSocket::connect) socket.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        recv_fd(&self.fd, buf).await
    }

    /// Send one datagram on a [connected](UdpSocket::connect) socket.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        send_fd(&self.fd, buf).await
    }

    /// The local address this socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        local_addr_of(&self.fd)
    }
}

impl AsFd for UdpSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// === impl UnixListener ===

impl UnixListener {
    /// Create a listening socket bound to the filesystem `path`.
    ///
    /// Binding fails if `path` already exists; the path is not unlinked when
    /// the listener is dropped.
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::bind_with_backlog(path, 128)
    }

    /// Like [`bind`](UnixListener::bind), with an explicit `listen` backlog.
    pub fn bind_with_backlog(path: impl AsRef<Path>, backlog: i32) -> io::Result<Self> {
        let fd = new_socket(libc::AF_UNIX, libc::SOCK_STREAM)?;
        let (addr, len) = unix_sockaddr(path.as_ref())?;
        syscall(unsafe { libc::bind(fd.as_raw_fd(), (&raw const addr).cast(), len) })?;
        syscall(unsafe { libc::listen(fd.as_raw_fd(), backlog) })?;
        Ok(Self { fd })
    }

    /// Accept one incoming connection.
    ///
    /// Unix-domain peers are usually unnamed, so no peer address is
    /// returned.
    pub async fn accept(&self) -> io::Result<UnixStream> {
        readable(self.fd.as_fd()).await?;

        let fd = syscall(unsafe {
            libc::accept4(
                self.fd.as_raw_fd(),
                ptr::null_mut(),
                ptr::null_mut(),
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        })?;
        // Safety: accept4 returned a fresh descriptor we now own
        Ok(UnixStream {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Accept connections forever, spawning `handler` for each, until
    /// `cancel` is triggered.
    ///
    /// Handler tasks are detached; a handler that is still running when
    /// `serve` returns keeps running on the executor.
    pub async fn serve<H, Fut>(&self, mut handler: H, cancel: &Cancellation) -> io::Result<()>
    where
        H: FnMut(UnixStream) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        loop {
            match with_cancellation(self.accept(), cancel).await {
                None => return Ok(()),
                Some(accepted) => spawn(handler(accepted?)).detach(),
            }
        }
    }
}

impl AsFd for UnixListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// === impl UnixStream ===

impl UnixStream {
    /// Open a connection to the socket bound at `path`.
    ///
    /// Follows the same path as [`TcpStream::connect`]: an immediate success
    /// completes inline, `EINPROGRESS` waits for writability and reads the
    /// outcome back with `SO_ERROR`.
    pub async fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
        let fd = new_socket(libc::AF_UNIX, libc::SOCK_STREAM)?;
        let (addr, len) = unix_sockaddr(path.as_ref())?;
        start_connect(&fd, (&raw const addr).cast(), len).await?;
        Ok(Self { fd })
    }

    /// Receive bytes into `buf`, waiting for the socket to become readable
    /// first. Returns the number of bytes received; 0 means the peer closed
    /// its half of the connection.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        recv_fd(&self.fd, buf).await
    }

    /// Send bytes from `buf`, waiting for the socket to become writable
    /// first. Returns the number of bytes actually sent, which may be short.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        send_fd(&self.fd, buf).await
    }

    /// Vectored variant of [`recv`](UnixStream::recv).
    pub async fn recv_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        recv_vectored_fd(&self.fd, bufs).await
    }

    /// Vectored variant of [`send`](UnixStream::send).
    pub async fn send_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        send_vectored_fd(&self.fd, bufs).await
    }
}

impl AsFd for UnixStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// === impl UnixDatagram ===

impl UnixDatagram {
    /// Create a datagram socket bound to the filesystem `path`.
    ///
    /// Binding fails if `path` already exists; the path is not unlinked when
    /// the socket is dropped.
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let fd = new_socket(libc::AF_UNIX, libc::SOCK_DGRAM)?;
        let (addr, len) = unix_sockaddr(path.as_ref())?;
        syscall(unsafe { libc::bind(fd.as_raw_fd(), (&raw const addr).cast(), len) })?;
        Ok(Self { fd })
    }

    /// Create a datagram socket with no address.
    ///
    /// An unbound socket can [`send_to`](UnixDatagram::send_to) but its
    /// datagrams arrive with no sender path to reply to.
    pub fn unbound() -> io::Result<Self> {
        Ok(Self {
            fd: new_socket(libc::AF_UNIX, libc::SOCK_DGRAM)?,
        })
    }

    /// Set the default destination for [`send`](UnixDatagram::send) and
    /// filter [`recv`](UnixDatagram::recv) to `path`.
    ///
    /// A datagram `connect` completes without blocking.
    pub fn connect(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let (addr, len) = unix_sockaddr(path.as_ref())?;
        syscall(unsafe { libc::connect(self.fd.as_raw_fd(), (&raw const addr).cast(), len) })?;
        Ok(())
    }

    /// Receive one datagram, returning its length and the sender's path, if
    /// the sender is bound to one.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<PathBuf>)> {
        readable(self.fd.as_fd()).await?;

        // Safety: an all-zero sockaddr_un is valid and recvfrom fills it
        let mut addr = unsafe { mem::zeroed::<libc::sockaddr_un>() };
        let mut len = mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
        let n = syscall_len(unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
                (&raw mut addr).cast(),
                &mut len,
            )
        })?;
        Ok((n, unix_path_of(&addr, len)))
    }

    /// Send one datagram to the socket bound at `path`.
    pub async fn send_to(&self, buf: &[u8], path: impl AsRef<Path>) -> io::Result<usize> {
        let (addr, len) = unix_sockaddr(path.as_ref())?;
        writable(self.fd.as_fd()).await?;
        syscall_len(unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                0,
                (&raw const addr).cast(),
                len,
            )
        })
    }

    /// Receive one datagram on a [connected](UnixDatagram::connect) socket.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        recv_fd(&self.fd, buf).await
    }

    /// Send one datagram on a [connected](UnixDatagram::connect) socket.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        send_fd(&self.fd, buf).await
    }
}

impl AsFd for UnixDatagram {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// === socket plumbing ===

fn new_socket(family: libc::c_int, ty: libc::c_int) -> io::Result<OwnedFd> {
    let fd = syscall(unsafe {
        libc::socket(family, ty | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0)
    })?;
    // Safety: `socket` returned a fresh descriptor we now own
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Drive a non-blocking `connect` to its outcome.
///
/// An immediate success completes inline; `EINPROGRESS` waits for
/// writability and reads the final result back with `SO_ERROR`; any other
/// errno fails inline.
async fn start_connect(
    fd: &OwnedFd,
    addr: *const libc::sockaddr,
    len: libc::socklen_t,
) -> io::Result<()> {
    let ret = unsafe { libc::connect(fd.as_raw_fd(), addr, len) };
    if ret == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EINPROGRESS) {
        return Err(err);
    }

    writable(fd.as_fd()).await?;
    take_socket_error(fd)
}

fn take_socket_error(fd: &OwnedFd) -> io::Result<()> {
    let mut code: libc::c_int = 0;
    let mut code_len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    syscall(unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&raw mut code).cast(),
            &mut code_len,
        )
    })?;
    if code != 0 {
        return Err(io::Error::from_raw_os_error(code));
    }
    Ok(())
}

async fn recv_fd(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    readable(fd.as_fd()).await?;
    syscall_len(unsafe { libc::recv(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), 0) })
}

async fn send_fd(fd: &OwnedFd, buf: &[u8]) -> io::Result<usize> {
    writable(fd.as_fd()).await?;
    syscall_len(unsafe { libc::send(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len(), 0) })
}

async fn recv_vectored_fd(fd: &OwnedFd, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
    readable(fd.as_fd()).await?;

    // Safety: an all-zero msghdr is valid; IoSliceMut is ABI-compatible
    // with iovec
    let mut hdr = unsafe { mem::zeroed::<libc::msghdr>() };
    hdr.msg_iov = bufs.as_mut_ptr().cast();
    hdr.msg_iovlen = bufs.len();
    syscall_len(unsafe { libc::recvmsg(fd.as_raw_fd(), &mut hdr, 0) })
}

async fn send_vectored_fd(fd: &OwnedFd, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
    writable(fd.as_fd()).await?;

    // Safety: an all-zero msghdr is valid; IoSlice is ABI-compatible with
    // iovec, and sendmsg does not write through msg_iov
    let mut hdr = unsafe { mem::zeroed::<libc::msghdr>() };
    hdr.msg_iov = bufs.as_ptr().cast_mut().cast();
    hdr.msg_iovlen = bufs.len();
    syscall_len(unsafe { libc::sendmsg(fd.as_raw_fd(), &hdr, 0) })
}

fn bind_fd(fd: &OwnedFd, addr: SocketAddr) -> io::Result<()> {
    let (storage, len) = to_sockaddr(addr);
    syscall(unsafe { libc::bind(fd.as_raw_fd(), (&raw const storage).cast(), len) })?;
    Ok(())
}

fn local_addr_of(fd: &OwnedFd) -> io::Result<SocketAddr> {
    // Safety: an all-zero sockaddr_storage is valid and getsockname fills it
    let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall(unsafe { libc::getsockname(fd.as_raw_fd(), (&raw mut storage).cast(), &mut len) })?;
    from_sockaddr(&storage)
}

fn family_of(addr: SocketAddr) -> libc::c_int {
    match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    }
}

fn to_sockaddr(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // Safety: an all-zero sockaddr_storage is a valid (if unspecified)
    // address; the match below overwrites the used prefix
    let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            // Safety: sockaddr_in fits within sockaddr_storage
            unsafe { ptr::write((&raw mut storage).cast::<libc::sockaddr_in>(), sin) };
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            // Safety: sockaddr_in6 fits within sockaddr_storage
            unsafe { ptr::write((&raw mut storage).cast::<libc::sockaddr_in6>(), sin6) };
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// Build a pathname `sockaddr_un` for `path`.
///
/// Only filesystem addresses are supported; the Linux abstract namespace is
/// not.
fn unix_sockaddr(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    // Safety: an all-zero sockaddr_un is a valid (unnamed) address; the
    // fields below overwrite the used prefix
    let mut addr = unsafe { mem::zeroed::<libc::sockaddr_un>() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_os_str().as_bytes();
    if bytes.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path contains an interior nul byte",
        ));
    }
    // Leave room for the terminating nul.
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path longer than sun_path",
        ));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    let len = mem::offset_of!(libc::sockaddr_un, sun_path) + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

/// Recover the sender path from a kernel-filled `sockaddr_un`.
///
/// Returns `None` for unnamed and abstract-namespace peers.
fn unix_path_of(addr: &libc::sockaddr_un, len: libc::socklen_t) -> Option<PathBuf> {
    let path_len = (len as usize).saturating_sub(mem::offset_of!(libc::sockaddr_un, sun_path));
    if path_len == 0 {
        return None;
    }

    let bytes: Vec<u8> = addr.sun_path[..path_len.min(addr.sun_path.len())]
        .iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .collect();
    if bytes.is_empty() {
        return None;
    }
    Some(PathBuf::from(OsString::from_vec(bytes)))
}

fn from_sockaddr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match libc::c_int::from(storage.ss_family) {
        libc::AF_INET => {
            // Safety: the kernel reported AF_INET, so the storage holds a
            // sockaddr_in
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Ok(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            // Safety: the kernel reported AF_INET6, so the storage holds a
            // sockaddr_in6
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported address family {family}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;
    use crate::sync::Cancellation;
    use crate::test_util::trace_init;
    use crate::{run, spawn, yield_now};

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn tcp_echo_roundtrip() {
        let _trace = trace_init();

        run(async {
            let listener = TcpListener::bind(localhost()).unwrap();
            let addr = listener.local_addr().unwrap();

            let server = spawn(async move {
                let (stream, peer) = listener.accept().await.unwrap();
                assert!(peer.ip().is_loopback());
                let mut buf = [0u8; 16];
                let n = stream.recv(&mut buf).await.unwrap();
                stream.send(&buf[..n]).await.unwrap();
            });

            let stream = TcpStream::connect(addr).await.unwrap();
            stream.send(b"hello").await.unwrap();

            let mut buf = [0u8; 16];
            let n = stream.recv(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"hello");

            server.await.unwrap();
        });
    }

    #[test]
    fn tcp_recv_sees_eof() {
        run(async {
            let listener = TcpListener::bind(localhost()).unwrap();
            let addr = listener.local_addr().unwrap();

            let server = spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                drop(stream);
            });

            let stream = TcpStream::connect(addr).await.unwrap();
            server.await.unwrap();

            let mut buf = [0u8; 8];
            assert_eq!(stream.recv(&mut buf).await.unwrap(), 0);
        });
    }

    #[test]
    fn connect_reports_refusal_via_so_error() {
        run(async {
            // Grab an ephemeral port, then close the listener so nothing
            // accepts on it.
            let addr = {
                let listener = TcpListener::bind(localhost()).unwrap();
                listener.local_addr().unwrap()
            };

            let err = TcpStream::connect(addr).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
        });
    }

    #[test]
    fn vectored_send_and_recv() {
        run(async {
            let listener = TcpListener::bind(localhost()).unwrap();
            let addr = listener.local_addr().unwrap();

            let server = spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                let mut head = [0u8; 3];
                let mut tail = [0u8; 16];
                let mut bufs = [IoSliceMut::new(&mut head), IoSliceMut::new(&mut tail)];
                let n = stream.recv_vectored(&mut bufs).await.unwrap();
                assert_eq!(n, 8);
                assert_eq!(&head, b"abc");
                assert_eq!(&tail[..5], b"defgh");
            });

            let stream = TcpStream::connect(addr).await.unwrap();
            let n = stream
                .send_vectored(&[IoSlice::new(b"abcd"), IoSlice::new(b"efgh")])
                .await
                .unwrap();
            assert_eq!(n, 8);

            server.await.unwrap();
        });
    }

    #[test]
    fn serve_spawns_handlers_until_cancelled() {
        run(async {
            let listener = TcpListener::bind(localhost()).unwrap();
            let addr = listener.local_addr().unwrap();
            let cancel = std::rc::Rc::new(Cancellation::new());

            let server = spawn({
                let cancel = cancel.clone();
                async move {
                    listener
                        .serve(
                            |stream, _peer| async move {
                                let mut buf = [0u8; 8];
                                let n = stream.recv(&mut buf).await.unwrap();
                                stream.send(&buf[..n]).await.unwrap();
                            },
                            &cancel,
                        )
                        .await
                        .unwrap();
                }
            });

            for _ in 0..2 {
                let stream = TcpStream::connect(addr).await.unwrap();
                stream.send(b"ping").await.unwrap();
                let mut buf = [0u8; 8];
                let n = stream.recv(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], b"ping");
            }

            cancel.trigger();
            server.await.unwrap();
        });
    }

    #[test]
    fn udp_roundtrip() {
        run(async {
            let a = UdpSocket::bind(localhost()).unwrap();
            let b = UdpSocket::bind(localhost()).unwrap();
            let b_addr = b.local_addr().unwrap();

            let receiver = spawn(async move {
                let mut buf = [0u8; 16];
                let (n, from) = b.recv_from(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], b"ping");
                b.send_to(b"pong", from).await.unwrap();
            });

            // Give the receiver a tick to register interest first.
            yield_now().await;

            a.send_to(b"ping", b_addr).await.unwrap();
            let mut buf = [0u8; 16];
            let (n, _) = a.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"pong");

            receiver.await.unwrap();
        });
    }

    #[test]
    fn connected_udp() {
        run(async {
            let a = UdpSocket::bind(localhost()).unwrap();
            let b = UdpSocket::bind(localhost()).unwrap();
            a.connect(b.local_addr().unwrap()).unwrap();
            b.connect(a.local_addr().unwrap()).unwrap();

            let echo = spawn(async move {
                let mut buf = [0u8; 8];
                let n = b.recv(&mut buf).await.unwrap();
                b.send(&buf[..n]).await.unwrap();
            });

            yield_now().await;
            a.send(b"hi").await.unwrap();
            let mut buf = [0u8; 8];
            assert_eq!(a.recv(&mut buf).await.unwrap(), 2);
            assert_eq!(&buf[..2], b"hi");

            echo.await.unwrap();
        });
    }

    fn temp_sock_path(tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("soloio-{tag}-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn unix_echo_roundtrip() {
        let path = temp_sock_path("echo");

        run(async {
            let listener = UnixListener::bind(&path).unwrap();

            let server = spawn(async move {
                let stream = listener.accept().await.unwrap();
                let mut buf = [0u8; 16];
                let n = stream.recv(&mut buf).await.unwrap();
                stream.send(&buf[..n]).await.unwrap();
            });

            let stream = UnixStream::connect(&path).await.unwrap();
            stream.send(b"hello").await.unwrap();

            let mut buf = [0u8; 16];
            let n = stream.recv(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"hello");

            server.await.unwrap();
        });

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unix_connect_to_a_missing_path_fails_inline() {
        run(async {
            let err = UnixStream::connect("/soloio-nonexistent.sock")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        });
    }

    #[test]
    fn unix_serve_until_cancelled() {
        let path = temp_sock_path("serve");

        run(async {
            let listener = UnixListener::bind(&path).unwrap();
            let cancel = std::rc::Rc::new(Cancellation::new());

            let server = spawn({
                let cancel = cancel.clone();
                async move {
                    listener
                        .serve(
                            |stream| async move {
                                let mut buf = [0u8; 8];
                                let n = stream.recv(&mut buf).await.unwrap();
                                stream.send(&buf[..n]).await.unwrap();
                            },
                            &cancel,
                        )
                        .await
                        .unwrap();
                }
            });

            let stream = UnixStream::connect(&path).await.unwrap();
            stream.send(b"ping").await.unwrap();
            let mut buf = [0u8; 8];
            let n = stream.recv(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ping");

            cancel.trigger();
            server.await.unwrap();
        });

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unix_datagram_roundtrip() {
        let a_path = temp_sock_path("dgram-a");
        let b_path = temp_sock_path("dgram-b");

        run(async {
            let a = UnixDatagram::bind(&a_path).unwrap();
            let b = UnixDatagram::bind(&b_path).unwrap();

            let responder = spawn(async move {
                let mut buf = [0u8; 16];
                let (n, from) = b.recv_from(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], b"ping");
                b.send_to(&buf[..n], from.unwrap()).await.unwrap();
            });

            // Give the responder a tick to register interest first.
            yield_now().await;

            a.send_to(b"ping", &b_path).await.unwrap();
            let mut buf = [0u8; 16];
            let (n, from) = a.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ping");
            assert_eq!(from.unwrap(), b_path);

            responder.await.unwrap();
        });

        let _ = std::fs::remove_file(&a_path);
        let _ = std::fs::remove_file(&b_path);
    }

    #[test]
    fn unbound_datagrams_arrive_without_a_sender() {
        let path = temp_sock_path("dgram-anon");

        run(async {
            let bound = UnixDatagram::bind(&path).unwrap();
            let anon = UnixDatagram::unbound().unwrap();

            anon.send_to(b"hi", &path).await.unwrap();

            let mut buf = [0u8; 8];
            let (n, from) = bound.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"hi");
            assert_eq!(from, None);
        });

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sockaddr_conversion_roundtrips() {
        for addr in [
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap(),
            "[::1]:9090".parse().unwrap(),
        ] {
            let (storage, _) = to_sockaddr(addr);
            assert_eq!(from_sockaddr(&storage).unwrap(), addr);
        }
    }
}
