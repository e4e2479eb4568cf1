//! Socket-configuration helpers.
//!
//! Everything here is a thin, syscall-saving wrapper with one shared
//! convention: success is `Ok`, failure is `Err(io::Error)` carrying the
//! OS errno, and any descriptor a helper created before failing is closed
//! before the error is returned.  Configuration helpers are idempotent:
//! they read the current flags and only set missing bits.  These are the
//! only functions in the library that log at warning level, and they emit
//! exactly one structured warning before an error return.

#![allow(unsafe_code)]

use socket2::{Domain, SockAddr, Socket, Type};
use std::io;
use std::mem::{size_of, MaybeUninit};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::warn;

fn last_err() -> io::Error {
    io::Error::last_os_error()
}

/// Set `O_NONBLOCK`, querying first so an already-nonblocking descriptor
/// costs one syscall and never loses other file-status flags.
pub fn make_socket_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-supplied descriptor; no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        warn!(fd, "fcntl(F_GETFL) failed");
        return Err(last_err());
    }
    if flags & libc::O_NONBLOCK == 0 {
        // SAFETY: as above.
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
            warn!(fd, "fcntl(F_SETFL) failed");
            return Err(last_err());
        }
    }
    Ok(())
}

/// Faster [`make_socket_nonblocking`] for descriptors known to have no
/// other file-status flags set (i.e. freshly created ones).
pub fn fast_socket_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-supplied descriptor.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) } == -1 {
        warn!(fd, "fcntl(F_SETFL) failed");
        return Err(last_err());
    }
    Ok(())
}

/// Set `FD_CLOEXEC`, querying first.
pub fn make_socket_closeonexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-supplied descriptor.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        warn!(fd, "fcntl(F_GETFD) failed");
        return Err(last_err());
    }
    if flags & libc::FD_CLOEXEC == 0 {
        // SAFETY: as above.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
            warn!(fd, "fcntl(F_SETFD) failed");
            return Err(last_err());
        }
    }
    Ok(())
}

/// Faster [`make_socket_closeonexec`] for freshly created descriptors.
pub fn fast_socket_closeonexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-supplied descriptor.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        warn!(fd, "fcntl(F_SETFD) failed");
        return Err(last_err());
    }
    Ok(())
}

fn setsockopt_int(fd: RawFd, level: i32, opt: i32, value: i32) -> io::Result<()> {
    // SAFETY: the value pointer/length pair describes a live i32.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            std::ptr::addr_of!(value).cast(),
            size_of::<i32>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        warn!(fd, level, opt, "setsockopt failed");
        return Err(last_err());
    }
    Ok(())
}

/// `SO_REUSEADDR`: do not hang on to the address after the listener
/// closes.
pub fn make_listen_socket_reuseable(fd: RawFd) -> io::Result<()> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
}

/// `SO_REUSEPORT` (Linux 3.9+): several processes or threads may bind the
/// same port if each sets the option.
pub fn make_listen_socket_reuseable_port(fd: RawFd) -> io::Result<()> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1)
}

/// `IPV6_V6ONLY`: keep a v6 listener from capturing v4 connections.
pub fn make_listen_socket_ipv6only(fd: RawFd) -> io::Result<()> {
    setsockopt_int(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 1)
}

/// `TCP_DEFER_ACCEPT`: the kernel completes accept() only once data has
/// arrived and is ready to read.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn make_tcp_listen_socket_deferred(fd: RawFd) -> io::Result<()> {
    setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT, 1)
}

/// Create a socket, honoring `SOCK_NONBLOCK` / `SOCK_CLOEXEC` bits in
/// `kind` with one syscall where the kernel supports that, and with
/// explicit fcntl calls where it does not.
pub fn new_socket(domain: i32, kind: i32, protocol: i32) -> io::Result<OwnedFd> {
    const FLAG_BITS: i32 = libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;

    // SAFETY: plain socket(2) call.
    let fd = unsafe { libc::socket(domain, kind, protocol) };
    if fd >= 0 {
        // SAFETY: `fd` is a freshly created, owned descriptor.
        return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
    }
    if kind & FLAG_BITS == 0 {
        return Err(last_err());
    }

    // SAFETY: as above, with the flag bits masked off.
    let fd = unsafe { libc::socket(domain, kind & !FLAG_BITS, protocol) };
    if fd < 0 {
        return Err(last_err());
    }
    // SAFETY: as above.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    if kind & libc::SOCK_NONBLOCK != 0 {
        fast_socket_nonblocking(fd.as_raw_fd())?;
    }
    if kind & libc::SOCK_CLOEXEC != 0 {
        fast_socket_closeonexec(fd.as_raw_fd())?;
    }
    Ok(fd)
}

/// `accept4` with a runtime fallback to `accept` plus fcntl on kernels
/// that reject the flags or lack the syscall.
pub fn accept4(listener: RawFd, flags: i32) -> io::Result<(OwnedFd, SockAddr)> {
    let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
    let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    // SAFETY: storage/len describe a writable sockaddr_storage.
    let fd = unsafe { libc::accept4(listener, storage.as_mut_ptr().cast(), &mut len, flags) };
    let fd = if fd >= 0 {
        // SAFETY: freshly accepted, owned descriptor.
        unsafe { OwnedFd::from_raw_fd(fd) }
    } else {
        let err = last_err();
        // EINVAL means a flag was not supported, ENOSYS that the syscall
        // is missing; anything else is a real error.
        if !matches!(err.raw_os_error(), Some(libc::EINVAL | libc::ENOSYS)) {
            return Err(err);
        }
        // SAFETY: as for accept4.
        let fd = unsafe { libc::accept(listener, storage.as_mut_ptr().cast(), &mut len) };
        if fd < 0 {
            return Err(last_err());
        }
        // SAFETY: freshly accepted, owned descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        if flags & libc::SOCK_CLOEXEC != 0 {
            fast_socket_closeonexec(fd.as_raw_fd())?;
        }
        if flags & libc::SOCK_NONBLOCK != 0 {
            fast_socket_nonblocking(fd.as_raw_fd())?;
        }
        fd
    };
    // SAFETY: the kernel initialized `len` bytes of `storage`.
    let addr = unsafe { SockAddr::new(storage.assume_init(), len) };
    Ok((fd, addr))
}

/// Outcome of a non-blocking connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    /// The connect is still in flight; wait for writability.
    InProgress,
    /// The socket is connected.
    Connected,
    /// The peer refused the connection.
    Refused,
}

fn connect_retriable(errno: i32) -> bool {
    errno == libc::EINTR || errno == libc::EINPROGRESS
}

/// Start a non-blocking connect.  When `fd` is `None`, a stream socket of
/// the address's family is created, made non-blocking, and stored there;
/// on error any socket this call created is closed and `fd` is cleared.
pub fn socket_connect(fd: &mut Option<OwnedFd>, sa: &SockAddr) -> io::Result<ConnectProgress> {
    let mut made = false;
    if fd.is_none() {
        let sock = new_socket(i32::from(sa.family()), libc::SOCK_STREAM, 0)?;
        fast_socket_nonblocking(sock.as_raw_fd())?;
        *fd = Some(sock);
        made = true;
    }
    let raw = fd.as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1);

    // SAFETY: `sa` holds a valid sockaddr of length `sa.len()`.
    let rc = unsafe { libc::connect(raw, sa.as_ptr().cast(), sa.len()) };
    if rc == 0 {
        return Ok(ConnectProgress::Connected);
    }
    let err = last_err();
    match err.raw_os_error() {
        Some(e) if connect_retriable(e) => Ok(ConnectProgress::InProgress),
        Some(libc::ECONNREFUSED) => Ok(ConnectProgress::Refused),
        _ => {
            if made {
                *fd = None; // drops and closes the socket we created
            }
            Err(err)
        }
    }
}

/// After select/poll reports writability on a connecting socket, read
/// `SO_ERROR` to learn how the connect ended.  A refused connection is an
/// error here, with the errno taken from the socket.
pub fn socket_finished_connecting(fd: RawFd) -> io::Result<ConnectProgress> {
    let mut err: i32 = 0;
    let mut len = size_of::<i32>() as libc::socklen_t;
    // SAFETY: err/len describe a writable i32.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            std::ptr::addr_of_mut!(err).cast(),
            &mut len,
        )
    };
    if rc < 0 {
        return Err(last_err());
    }
    if err != 0 {
        if connect_retriable(err) {
            return Ok(ConnectProgress::InProgress);
        }
        return Err(io::Error::from_raw_os_error(err));
    }
    Ok(ConnectProgress::Connected)
}

/// A connected pair of stream or datagram sockets over loopback, for
/// hosts without `socketpair`.
///
/// The two ends are checked against each other: the address the listener
/// accepted from must be exactly the connector's bound address, otherwise
/// some other local process snuck in a simultaneous connect and the pair
/// is abandoned with `ECONNABORTED`.  Every intermediate failure closes
/// all descriptors opened so far.
pub fn ersatz_socketpair(kind: Type) -> io::Result<(Socket, Socket)> {
    let loopback = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

    let listener = Socket::new(Domain::IPV4, kind, None)?;
    listener.bind(&SockAddr::from(loopback))?;
    listener.listen(1)?;

    let connector = Socket::new(Domain::IPV4, kind, None)?;
    let target = listener.local_addr()?;
    connector.connect(&target)?;

    let (acceptor, accepted_from) = listener.accept()?;
    let connector_local = connector.local_addr()?;
    let same = match (accepted_from.as_socket(), connector_local.as_socket()) {
        (Some(SocketAddr::V4(a)), Some(SocketAddr::V4(b))) => {
            a.ip() == b.ip() && a.port() == b.port()
        }
        _ => false,
    };
    if !same {
        return Err(io::Error::from_raw_os_error(libc::ECONNABORTED));
    }
    Ok((connector, acceptor))
}

fn configure_pipe_ends(read: &OwnedFd, write: &OwnedFd) -> io::Result<()> {
    fast_socket_nonblocking(read.as_raw_fd())?;
    fast_socket_nonblocking(write.as_raw_fd())?;
    fast_socket_closeonexec(read.as_raw_fd())?;
    fast_socket_closeonexec(write.as_raw_fd())?;
    Ok(())
}

/// A non-blocking, close-on-exec descriptor pair where writes on the
/// second end are read from the first: the self-pipe an event loop uses
/// to wake itself from another thread.
///
/// Tries `pipe2` first (one syscall), then plain `pipe` plus fcntl, then
/// a Unix-domain socket pair.  Partially created descriptors are closed
/// on every failure path.
pub fn make_internal_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];

    // SAFETY: `fds` is writable storage for two descriptors.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } == 0 {
        // SAFETY: both descriptors are freshly created and owned here.
        return Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) });
    }

    // SAFETY: as above.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == 0 {
        // SAFETY: as above.
        let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        configure_pipe_ends(&pair.0, &pair.1)?;
        return Ok(pair);
    }
    warn!("pipe() failed, falling back to a socket pair");

    // SAFETY: as above.
    if unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) } == 0 {
        // SAFETY: as above.
        let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        configure_pipe_ends(&pair.0, &pair.1)?;
        return Ok(pair);
    }
    Err(last_err())
}

/// `eventfd` that always honors `EFD_CLOEXEC` and `EFD_NONBLOCK`, even on
/// kernels whose eventfd rejects flags.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn eventfd(initval: u32, flags: i32) -> io::Result<OwnedFd> {
    // SAFETY: plain eventfd(2) call.
    let fd = unsafe { libc::eventfd(initval, flags) };
    if fd >= 0 {
        // SAFETY: freshly created, owned descriptor.
        return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
    }
    if flags == 0 {
        return Err(last_err());
    }

    // SAFETY: as above, flagless.
    let fd = unsafe { libc::eventfd(initval, 0) };
    if fd < 0 {
        return Err(last_err());
    }
    // SAFETY: as above.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    if flags & libc::EFD_CLOEXEC != 0 {
        fast_socket_closeonexec(fd.as_raw_fd())?;
    }
    if flags & libc::EFD_NONBLOCK != 0 {
        fast_socket_nonblocking(fd.as_raw_fd())?;
    }
    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::os::fd::AsFd;

    fn fd_flags(fd: RawFd) -> (i32, i32) {
        let fl = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        let fdfl = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        (fl, fdfl)
    }

    #[test]
    fn nonblocking_is_idempotent() {
        let sock = new_socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        make_socket_nonblocking(sock.as_raw_fd()).unwrap();
        make_socket_nonblocking(sock.as_raw_fd()).unwrap();
        let (fl, _) = fd_flags(sock.as_raw_fd());
        assert!(fl & libc::O_NONBLOCK != 0);
    }

    #[test]
    fn closeonexec_is_idempotent() {
        let sock = new_socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        make_socket_closeonexec(sock.as_raw_fd()).unwrap();
        make_socket_closeonexec(sock.as_raw_fd()).unwrap();
        let (_, fdfl) = fd_flags(sock.as_raw_fd());
        assert!(fdfl & libc::FD_CLOEXEC != 0);
    }

    #[test]
    fn helpers_fail_on_bad_descriptor() {
        assert!(make_socket_nonblocking(-1).is_err());
        assert!(make_socket_closeonexec(-1).is_err());
        assert!(make_listen_socket_reuseable(-1).is_err());
    }

    #[test]
    fn new_socket_applies_flag_bits() {
        let sock = new_socket(
            libc::AF_INET,
            libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
        .unwrap();
        let (fl, fdfl) = fd_flags(sock.as_raw_fd());
        assert!(fl & libc::O_NONBLOCK != 0);
        assert!(fdfl & libc::FD_CLOEXEC != 0);
    }

    #[test]
    fn listener_options_apply() {
        let sock = new_socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        make_listen_socket_reuseable(sock.as_raw_fd()).unwrap();
        make_listen_socket_reuseable_port(sock.as_raw_fd()).unwrap();
        #[cfg(any(target_os = "linux", target_os = "android"))]
        make_tcp_listen_socket_deferred(sock.as_raw_fd()).unwrap();

        let sock6 = new_socket(libc::AF_INET6, libc::SOCK_STREAM, 0).unwrap();
        make_listen_socket_ipv6only(sock6.as_raw_fd()).unwrap();
    }

    #[test]
    fn internal_pipe_round_trips_and_is_configured() {
        let (read_end, write_end) = make_internal_pipe().unwrap();
        for fd in [read_end.as_raw_fd(), write_end.as_raw_fd()] {
            let (fl, fdfl) = fd_flags(fd);
            assert!(fl & libc::O_NONBLOCK != 0, "fd {fd} not nonblocking");
            assert!(fdfl & libc::FD_CLOEXEC != 0, "fd {fd} not cloexec");
        }
        let mut w = std::fs::File::from(write_end);
        let mut r = std::fs::File::from(read_end);
        w.write_all(b"wake").unwrap();
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"wake");
    }

    #[test]
    fn ersatz_socketpair_round_trips() {
        let (a, b) = ersatz_socketpair(Type::STREAM).unwrap();
        let mut a = std::net::TcpStream::from(a);
        let mut b = std::net::TcpStream::from(b);
        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        b.write_all(b"pong").unwrap();
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn connect_progress_against_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let target = SockAddr::from(listener.local_addr().unwrap());

        let mut fd = None;
        let progress = socket_connect(&mut fd, &target).unwrap();
        let fd = fd.expect("socket was created");
        match progress {
            ConnectProgress::Connected => {}
            ConnectProgress::InProgress => {
                // Poll SO_ERROR until the loopback handshake finishes.
                let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
                loop {
                    match socket_finished_connecting(fd.as_raw_fd()).unwrap() {
                        ConnectProgress::Connected => break,
                        _ => {
                            assert!(std::time::Instant::now() < deadline, "connect stalled");
                            std::thread::yield_now();
                        }
                    }
                }
            }
            ConnectProgress::Refused => panic!("live listener refused"),
        }
        let _ = fd.as_fd();
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn eventfd_emulates_flags() {
        let fd = eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK).unwrap();
        let (fl, fdfl) = fd_flags(fd.as_raw_fd());
        assert!(fl & libc::O_NONBLOCK != 0);
        assert!(fdfl & libc::FD_CLOEXEC != 0);
    }
}
