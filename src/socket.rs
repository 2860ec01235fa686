// Copyright (c) 2024-2026, The SNet Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{ErrKind, Error};
use crate::err;
use errno::errno;
use libc::{
	accept, bind, c_int, c_void, close, connect, fcntl, getpeername, getsockname, getsockopt,
	listen, read, setsockopt, shutdown, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage,
	sockaddr_un, socket, socklen_t, write, AF_INET, AF_INET6, AF_UNIX, EAGAIN, EINPROGRESS, EINTR,
	EWOULDBLOCK, F_GETFL, F_SETFL, O_NONBLOCK, SHUT_RD, SHUT_WR, SOCK_STREAM,
	SOL_SOCKET, SO_ERROR, SO_REUSEADDR,
};
use std::mem::{size_of, zeroed};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

/// A raw socket descriptor.
pub type Handle = i32;

/// An address a stream socket can be bound or connected to. Internet
/// (v4 or v6) and unix domain addresses are supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
	Inet(SocketAddr),
	Unix(PathBuf),
}

impl std::fmt::Display for SocketAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SocketAddress::Inet(addr) => write!(f, "{}", addr),
			SocketAddress::Unix(path) => write!(f, "unix:{}", path.display()),
		}
	}
}

impl From<SocketAddr> for SocketAddress {
	fn from(addr: SocketAddr) -> Self {
		SocketAddress::Inet(addr)
	}
}

/// Which half of a full-duplex socket to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownHow {
	Read,
	Write,
}

pub(crate) fn set_nonblocking(handle: Handle) -> Result<(), Error> {
	let flags = unsafe { fcntl(handle, F_GETFL) };
	if flags < 0 {
		return Err(err!(ErrKind::IO, "fcntl F_GETFL failed: errno {}", errno().0));
	}
	let res = unsafe { fcntl(handle, F_SETFL, flags | O_NONBLOCK) };
	if res < 0 {
		return Err(err!(ErrKind::IO, "fcntl F_SETFL failed: errno {}", errno().0));
	}
	Ok(())
}

pub(crate) fn close_fd(handle: Handle) {
	unsafe {
		close(handle);
	}
}

pub(crate) fn shutdown_fd(handle: Handle, how: ShutdownHow) -> i32 {
	let how = match how {
		ShutdownHow::Read => SHUT_RD,
		ShutdownHow::Write => SHUT_WR,
	};
	let res = unsafe { shutdown(handle, how) };
	if res < 0 {
		errno().0
	} else {
		0
	}
}

/// Read into `buf`. `Ok(n)` on success (0 = end of stream), `Err(errno)`
/// otherwise. EINTR is retried here so callers only see real outcomes.
pub(crate) fn read_fd(handle: Handle, buf: &mut [u8]) -> Result<usize, i32> {
	loop {
		let rlen = unsafe { read(handle, buf.as_mut_ptr() as *mut c_void, buf.len()) };
		if rlen >= 0 {
			return Ok(rlen as usize);
		}
		let e = errno().0;
		if e != EINTR {
			return Err(e);
		}
	}
}

pub(crate) fn write_fd(handle: Handle, buf: &[u8]) -> Result<usize, i32> {
	loop {
		let wlen = unsafe { write(handle, buf.as_ptr() as *const c_void, buf.len()) };
		if wlen >= 0 {
			return Ok(wlen as usize);
		}
		let e = errno().0;
		if e != EINTR {
			return Err(e);
		}
	}
}

pub(crate) fn would_block(e: i32) -> bool {
	e == EAGAIN || e == EWOULDBLOCK
}

/// A connected pipe pair, read end first. Test scaffolding for the
/// multiplexer backends and receiver lifecycle.
#[cfg(test)]
pub(crate) fn pipe_pair() -> Result<(Handle, Handle), Error> {
	let mut fds: [c_int; 2] = [0; 2];
	let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
	if res < 0 {
		return Err(err!(ErrKind::IO, "pipe failed: errno {}", errno().0));
	}
	set_nonblocking(fds[0])?;
	set_nonblocking(fds[1])?;
	Ok((fds[0], fds[1]))
}

fn encode_address(address: &SocketAddress) -> Result<(sockaddr_storage, socklen_t), Error> {
	let mut storage: sockaddr_storage = unsafe { zeroed() };
	let len;
	match address {
		SocketAddress::Inet(SocketAddr::V4(v4)) => {
			let sin = &mut storage as *mut sockaddr_storage as *mut sockaddr_in;
			unsafe {
				(*sin).sin_family = AF_INET as u16;
				(*sin).sin_port = v4.port().to_be();
				(*sin).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
			}
			len = size_of::<sockaddr_in>() as socklen_t;
		}
		SocketAddress::Inet(SocketAddr::V6(v6)) => {
			let sin6 = &mut storage as *mut sockaddr_storage as *mut sockaddr_in6;
			unsafe {
				(*sin6).sin6_family = AF_INET6 as u16;
				(*sin6).sin6_port = v6.port().to_be();
				(*sin6).sin6_addr.s6_addr = v6.ip().octets();
				(*sin6).sin6_scope_id = v6.scope_id();
			}
			len = size_of::<sockaddr_in6>() as socklen_t;
		}
		SocketAddress::Unix(path) => {
			use std::os::unix::ffi::OsStrExt;
			let bytes = path.as_os_str().as_bytes();
			let sun = &mut storage as *mut sockaddr_storage as *mut sockaddr_un;
			let max = size_of::<sockaddr_un>() - size_of::<u16>() - 1;
			if bytes.len() > max {
				return Err(err!(
					ErrKind::IllegalArgument,
					"unix path too long: {} bytes",
					bytes.len()
				));
			}
			unsafe {
				(*sun).sun_family = AF_UNIX as u16;
				for (i, b) in bytes.iter().enumerate() {
					(*sun).sun_path[i] = *b as libc::c_char;
				}
			}
			len = size_of::<sockaddr_un>() as socklen_t;
		}
	}
	Ok((storage, len))
}

fn decode_address(storage: &sockaddr_storage) -> Result<SocketAddress, Error> {
	match storage.ss_family as c_int {
		AF_INET => {
			let sin = storage as *const sockaddr_storage as *const sockaddr_in;
			let (port, s_addr) = unsafe { (u16::from_be((*sin).sin_port), (*sin).sin_addr.s_addr) };
			let ip = Ipv4Addr::from(s_addr.to_ne_bytes());
			Ok(SocketAddress::Inet(SocketAddr::new(IpAddr::V4(ip), port)))
		}
		AF_INET6 => {
			let sin6 = storage as *const sockaddr_storage as *const sockaddr_in6;
			let (port, octets) =
				unsafe { (u16::from_be((*sin6).sin6_port), (*sin6).sin6_addr.s6_addr) };
			let ip = Ipv6Addr::from(octets);
			Ok(SocketAddress::Inet(SocketAddr::new(IpAddr::V6(ip), port)))
		}
		AF_UNIX => {
			let sun = storage as *const sockaddr_storage as *const sockaddr_un;
			let mut bytes = vec![];
			unsafe {
				for c in (*sun).sun_path.iter() {
					if *c == 0 {
						break;
					}
					bytes.push(*c as u8);
				}
			}
			use std::os::unix::ffi::OsStringExt;
			Ok(SocketAddress::Unix(PathBuf::from(
				std::ffi::OsString::from_vec(bytes),
			)))
		}
		family => Err(err!(ErrKind::IO, "unknown address family: {}", family)),
	}
}

fn family_of(address: &SocketAddress) -> c_int {
	match address {
		SocketAddress::Inet(SocketAddr::V4(_)) => AF_INET,
		SocketAddress::Inet(SocketAddr::V6(_)) => AF_INET6,
		SocketAddress::Unix(_) => AF_UNIX,
	}
}

fn stream_socket(family: c_int) -> Result<Handle, Error> {
	let handle = unsafe { socket(family, SOCK_STREAM, 0) };
	if handle < 0 {
		return Err(err!(ErrKind::IO, "socket failed: errno {}", errno().0));
	}
	Ok(handle)
}

/// Create a non-blocking listening socket bound to `address`.
pub(crate) fn bind_listen(address: &SocketAddress, backlog: i32) -> Result<Handle, Error> {
	let handle = stream_socket(family_of(address))?;
	if let SocketAddress::Inet(_) = address {
		let optval: c_int = 1;
		unsafe {
			setsockopt(
				handle,
				SOL_SOCKET,
				SO_REUSEADDR,
				&optval as *const c_int as *const c_void,
				size_of::<c_int>() as socklen_t,
			);
		}
	}
	let (storage, len) = match encode_address(address) {
		Ok(v) => v,
		Err(e) => {
			close_fd(handle);
			return Err(e);
		}
	};
	let res = unsafe { bind(handle, &storage as *const sockaddr_storage as *const sockaddr, len) };
	if res < 0 {
		let e = errno().0;
		close_fd(handle);
		return Err(err!(ErrKind::IO, "bind to {} failed: errno {}", address, e));
	}
	let res = unsafe { listen(handle, backlog) };
	if res < 0 {
		let e = errno().0;
		close_fd(handle);
		return Err(err!(ErrKind::IO, "listen on {} failed: errno {}", address, e));
	}
	set_nonblocking(handle)?;
	Ok(handle)
}

/// Accept one pending connection. `Ok(None)` means the backlog is drained.
pub(crate) fn accept_on(handle: Handle) -> Result<Option<(Handle, SocketAddress)>, Error> {
	let mut storage: sockaddr_storage = unsafe { zeroed() };
	let mut len = size_of::<sockaddr_storage>() as socklen_t;
	let conn = unsafe {
		accept(
			handle,
			&mut storage as *mut sockaddr_storage as *mut sockaddr,
			&mut len,
		)
	};
	if conn < 0 {
		let e = errno().0;
		if would_block(e) || e == EINTR {
			return Ok(None);
		}
		return Err(err!(ErrKind::IO, "accept failed: errno {}", e));
	}
	let peer = decode_address(&storage)?;
	Ok(Some((conn, peer)))
}

/// Begin a non-blocking connect. Returns the handle and whether the
/// connection completed synchronously (loopback and unix sockets often do).
pub(crate) fn connect_on(address: &SocketAddress) -> Result<(Handle, bool), Error> {
	let handle = stream_socket(family_of(address))?;
	if let Err(e) = set_nonblocking(handle) {
		close_fd(handle);
		return Err(e);
	}
	let (storage, len) = match encode_address(address) {
		Ok(v) => v,
		Err(e) => {
			close_fd(handle);
			return Err(e);
		}
	};
	let res =
		unsafe { connect(handle, &storage as *const sockaddr_storage as *const sockaddr, len) };
	if res == 0 {
		return Ok((handle, true));
	}
	let e = errno().0;
	if e == EINPROGRESS {
		return Ok((handle, false));
	}
	close_fd(handle);
	Err(err!(ErrKind::IO, "connect to {} failed: errno {}", address, e))
}

/// The pending error on a socket, consumed. 0 means the connect succeeded.
pub(crate) fn so_error(handle: Handle) -> i32 {
	let mut optval: c_int = 0;
	let mut len = size_of::<c_int>() as socklen_t;
	let res = unsafe {
		getsockopt(
			handle,
			SOL_SOCKET,
			SO_ERROR,
			&mut optval as *mut c_int as *mut c_void,
			&mut len,
		)
	};
	if res < 0 {
		errno().0
	} else {
		optval
	}
}

pub(crate) fn local_address(handle: Handle) -> Result<SocketAddress, Error> {
	let mut storage: sockaddr_storage = unsafe { zeroed() };
	let mut len = size_of::<sockaddr_storage>() as socklen_t;
	let res = unsafe {
		getsockname(
			handle,
			&mut storage as *mut sockaddr_storage as *mut sockaddr,
			&mut len,
		)
	};
	if res < 0 {
		return Err(err!(ErrKind::IO, "getsockname failed: errno {}", errno().0));
	}
	decode_address(&storage)
}

pub(crate) fn remote_address(handle: Handle) -> Result<SocketAddress, Error> {
	let mut storage: sockaddr_storage = unsafe { zeroed() };
	let mut len = size_of::<sockaddr_storage>() as socklen_t;
	let res = unsafe {
		getpeername(
			handle,
			&mut storage as *mut sockaddr_storage as *mut sockaddr,
			&mut len,
		)
	};
	if res < 0 {
		return Err(err!(ErrKind::IO, "getpeername failed: errno {}", errno().0));
	}
	decode_address(&storage)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_address_roundtrip() -> Result<(), Error> {
		let v4: SocketAddress = "127.0.0.1:8080".parse::<SocketAddr>()?.into();
		let (storage, _) = encode_address(&v4)?;
		assert_eq!(decode_address(&storage)?, v4);

		let v6: SocketAddress = "[::1]:443".parse::<SocketAddr>()?.into();
		let (storage, _) = encode_address(&v6)?;
		assert_eq!(decode_address(&storage)?, v6);

		let unix = SocketAddress::Unix(PathBuf::from("/tmp/snet-test.sock"));
		let (storage, _) = encode_address(&unix)?;
		assert_eq!(decode_address(&storage)?, unix);

		Ok(())
	}

	#[test]
	fn test_bind_listen_and_connect() -> Result<(), Error> {
		let addr: SocketAddress = "127.0.0.1:0".parse::<SocketAddr>()?.into();
		let listener = bind_listen(&addr, 5)?;
		let bound = local_address(listener)?;

		// nothing pending yet
		assert!(accept_on(listener)?.is_none());

		let (client, _) = connect_on(&bound)?;

		// loopback connects are fast but not instantaneous
		let mut accepted = None;
		for _ in 0..1_000 {
			if let Some(v) = accept_on(listener)? {
				accepted = Some(v);
				break;
			}
			std::thread::sleep(std::time::Duration::from_millis(1));
		}
		let (server, peer) = accepted.expect("accept");
		assert_eq!(local_address(client)?, peer);
		assert_eq!(so_error(client), 0);

		close_fd(server);
		close_fd(client);
		close_fd(listener);
		Ok(())
	}
}
