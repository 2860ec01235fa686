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

use crate::constants::SNET_DEFAULT_HANDSHAKE_TIMEOUT_SECS;
use crate::error::{ErrKind, Error};
use crate::err;
use crate::sni::SniResolver;
use crate::socket::{
	close_fd, read_fd, shutdown_fd, would_block, write_fd, Handle, ShutdownHow,
};
use crate::stream::{ReadStatus, ShutdownStep, Transport, WriteStatus};
use crate::timeval::TimeVal;
use log::{debug, warn};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ClientConnection, Connection, PrivateKey, RootCertStore, ServerConfig, ServerConnection, ServerName};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

/// One auxiliary certificate served for the domains its patterns match.
#[derive(Clone)]
pub struct SniEntry {
	/// Name patterns, `*` and `?` wildcards supported.
	pub patterns: Vec<String>,
	pub certs: Vec<Certificate>,
	pub key: PrivateKey,
}

/// Server-side tls settings attached to a listener.
#[derive(Clone)]
pub struct TlsListenConfig {
	/// The default certificate chain.
	pub certs: Vec<Certificate>,
	pub key: PrivateKey,
	/// Names the default certificate answers for. Checked before the sni
	/// entries so the default wins ties.
	pub patterns: Vec<String>,
	pub sni: Vec<SniEntry>,
	/// Refuse handshakes whose requested (or missing) name matches no
	/// pattern instead of falling back to the default certificate.
	pub force_sni: bool,
	/// Whether a received close_notify ends the stream for the context.
	pub close_notify_is_eof: bool,
	pub handshake_timeout: TimeVal,
}

impl TlsListenConfig {
	pub fn new(certs: Vec<Certificate>, key: PrivateKey) -> Self {
		Self {
			certs,
			key,
			patterns: vec![],
			sni: vec![],
			force_sni: false,
			close_notify_is_eof: true,
			handshake_timeout: TimeVal::from_secs(SNET_DEFAULT_HANDSHAKE_TIMEOUT_SECS),
		}
	}
}

/// Client-side tls settings attached to a connect.
#[derive(Clone)]
pub struct TlsConnectConfig {
	/// The name presented in sni and checked against the server
	/// certificate.
	pub server_name: String,
	/// Additional trust anchors.
	pub trusted_certs: Vec<Certificate>,
	/// Skip certificate verification entirely. Testing only.
	pub accept_invalid_certs: bool,
	pub close_notify_is_eof: bool,
	pub handshake_timeout: TimeVal,
}

impl TlsConnectConfig {
	pub fn new(server_name: &str) -> Self {
		Self {
			server_name: server_name.to_string(),
			trusted_certs: vec![],
			accept_invalid_certs: false,
			close_notify_is_eof: true,
			handshake_timeout: TimeVal::from_secs(SNET_DEFAULT_HANDSHAKE_TIMEOUT_SECS),
		}
	}
}

/// Parse every certificate in a PEM blob.
pub fn certs_from_pem(pem: &[u8]) -> Result<Vec<Certificate>, Error> {
	let mut reader = std::io::BufReader::new(pem);
	let certs = rustls_pemfile::certs(&mut reader)
		.map_err(|e| err!(ErrKind::Configuration, "could not parse certificates: {}", e))?;
	if certs.is_empty() {
		return Err(err!(ErrKind::Configuration, "no certificates found"));
	}
	Ok(certs.into_iter().map(Certificate).collect())
}

/// Parse the first private key (pkcs8, rsa or ec) in a PEM blob. Encrypted
/// keys are not supported.
pub fn private_key_from_pem(pem: &[u8]) -> Result<PrivateKey, Error> {
	let mut reader = std::io::BufReader::new(pem);
	loop {
		match rustls_pemfile::read_one(&mut reader)
			.map_err(|e| err!(ErrKind::Configuration, "could not parse private key: {}", e))?
		{
			Some(rustls_pemfile::Item::PKCS8Key(key))
			| Some(rustls_pemfile::Item::RSAKey(key))
			| Some(rustls_pemfile::Item::ECKey(key)) => return Ok(PrivateKey(key)),
			Some(_) => continue,
			None => {
				return Err(err!(
					ErrKind::Configuration,
					"no usable private key found (encrypted keys are not supported)"
				))
			}
		}
	}
}

pub fn load_certs<P: AsRef<Path>>(path: P) -> Result<Vec<Certificate>, Error> {
	let pem = std::fs::read(path.as_ref()).map_err(|e| {
		err!(ErrKind::Configuration, "could not read {}: {}", path.as_ref().display(), e)
	})?;
	certs_from_pem(&pem)
}

pub fn load_private_key<P: AsRef<Path>>(path: P) -> Result<PrivateKey, Error> {
	let pem = std::fs::read(path.as_ref()).map_err(|e| {
		err!(ErrKind::Configuration, "could not read {}: {}", path.as_ref().display(), e)
	})?;
	private_key_from_pem(&pem)
}

pub(crate) fn build_server_config(config: &TlsListenConfig) -> Result<Arc<ServerConfig>, Error> {
	let resolver = SniResolver::build(config)?;
	let server_config = ServerConfig::builder()
		.with_safe_defaults()
		.with_no_client_auth()
		.with_cert_resolver(Arc::new(resolver));
	Ok(Arc::new(server_config))
}

struct NoVerify;

impl ServerCertVerifier for NoVerify {
	fn verify_server_cert(
		&self,
		_end_entity: &Certificate,
		_intermediates: &[Certificate],
		_server_name: &ServerName,
		_scts: &mut dyn Iterator<Item = &[u8]>,
		_ocsp_response: &[u8],
		_now: std::time::SystemTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}
}

pub(crate) fn build_client_config(config: &TlsConnectConfig) -> Result<Arc<ClientConfig>, Error> {
	let mut roots = RootCertStore::empty();
	for cert in config.trusted_certs.iter() {
		roots
			.add(cert)
			.map_err(|e| err!(ErrKind::Configuration, "invalid trust anchor: {}", e))?;
	}
	let mut client_config = ClientConfig::builder()
		.with_safe_defaults()
		.with_root_certificates(roots)
		.with_no_client_auth();
	if config.accept_invalid_certs {
		warn!("certificate verification disabled for '{}'", config.server_name);
		client_config
			.dangerous()
			.set_certificate_verifier(Arc::new(NoVerify));
	}
	Ok(Arc::new(client_config))
}

/// io adapter handing raw descriptor writes to the record layer.
struct FdIo {
	handle: Handle,
}

impl Write for FdIo {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		write_fd(self.handle, buf).map_err(std::io::Error::from_raw_os_error)
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

/// A stream socket with the rustls record layer in between. Raw reads are
/// checked for FIN before they ever reach the record layer, so a peer that
/// drops the connection without a close_notify surfaces as a clean end of
/// stream instead of a hang or a protocol error.
pub(crate) struct TlsTransport {
	handle: Handle,
	tls: Connection,
	close_notify_is_eof: bool,
	recv_closed: bool,
	sent_close_notify: bool,
	buffered_plaintext: bool,
	closed: bool,
}

impl TlsTransport {
	pub(crate) fn server(
		handle: Handle,
		config: Arc<ServerConfig>,
		close_notify_is_eof: bool,
	) -> Result<Self, Error> {
		let conn = ServerConnection::new(config)?;
		Ok(Self::wrap(handle, Connection::from(conn), close_notify_is_eof))
	}

	pub(crate) fn client(
		handle: Handle,
		config: Arc<ClientConfig>,
		server_name: &str,
		close_notify_is_eof: bool,
	) -> Result<Self, Error> {
		let name = ServerName::try_from(server_name)?;
		let conn = ClientConnection::new(config, name)?;
		Ok(Self::wrap(handle, Connection::from(conn), close_notify_is_eof))
	}

	fn wrap(handle: Handle, tls: Connection, close_notify_is_eof: bool) -> Self {
		Self {
			handle,
			tls,
			close_notify_is_eof,
			recv_closed: false,
			sent_close_notify: false,
			buffered_plaintext: false,
			closed: false,
		}
	}

	pub(crate) fn is_handshaking(&self) -> bool {
		self.tls.is_handshaking()
	}

	/// Pull records off the socket and process them. `Data(0)` means
	/// progress without new plaintext.
	pub(crate) fn pump_records(&mut self) -> ReadStatus {
		let mut raw = [0u8; 18_432];
		match read_fd(self.handle, &mut raw) {
			Ok(0) => ReadStatus::Eof,
			Ok(n) => {
				let mut rd = &raw[0..n];
				while !rd.is_empty() {
					match self.tls.read_tls(&mut rd) {
						Ok(0) => break,
						Ok(_) => match self.tls.process_new_packets() {
							Ok(io_state) => {
								if io_state.plaintext_bytes_to_read() > 0 {
									self.buffered_plaintext = true;
								}
								if io_state.peer_has_closed() && !self.recv_closed {
									self.recv_closed = true;
									self.reply_close_notify();
								}
							}
							Err(e) => {
								warn!("tls protocol failure: {}", e);
								return ReadStatus::Err(libc::EPROTO);
							}
						},
						Err(e) => {
							warn!("tls record intake failed: {}", e);
							return ReadStatus::Err(libc::EIO);
						}
					}
				}
				ReadStatus::Data(n)
			}
			Err(e) if would_block(e) => ReadStatus::WouldBlock,
			Err(e) => ReadStatus::Err(e),
		}
	}

	/// Flush pending records to the socket.
	pub(crate) fn flush_records(&mut self) -> WriteStatus {
		let mut io = FdIo {
			handle: self.handle,
		};
		while self.tls.wants_write() {
			match self.tls.write_tls(&mut io) {
				Ok(_) => {}
				Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					return WriteStatus::WouldBlock
				}
				Err(e) => return WriteStatus::Err(e.raw_os_error().unwrap_or(libc::EIO)),
			}
		}
		WriteStatus::Written(0)
	}

	fn reply_close_notify(&mut self) {
		if !self.sent_close_notify {
			self.sent_close_notify = true;
			self.tls.send_close_notify();
			debug!("replying close_notify on handle {}", self.handle);
		}
	}
}

impl Transport for TlsTransport {
	fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
		loop {
			match self.tls.reader().read(buf) {
				Ok(0) => {
					// close_notify received and plaintext drained
					if !self.recv_closed {
						self.recv_closed = true;
						self.reply_close_notify();
					}
					return ReadStatus::CloseNotify;
				}
				Ok(n) => return ReadStatus::Data(n),
				Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					self.buffered_plaintext = false;
					if self.recv_closed {
						return ReadStatus::CloseNotify;
					}
					match self.pump_records() {
						ReadStatus::Data(_) => continue,
						other => return other,
					}
				}
				Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
					return ReadStatus::Eof
				}
				Err(e) => {
					warn!("tls plaintext read failed: {}", e);
					return ReadStatus::Err(libc::EIO);
				}
			}
		}
	}

	fn write(&mut self, buf: &[u8]) -> WriteStatus {
		let buffered = match self.tls.writer().write(buf) {
			Ok(n) => n,
			Err(e) => {
				warn!("tls plaintext write failed: {}", e);
				return WriteStatus::Err(libc::EIO);
			}
		};
		match self.flush_records() {
			WriteStatus::Err(e) => WriteStatus::Err(e),
			// records that did not fit stay queued; report what we took
			_ if buffered > 0 => WriteStatus::Written(buffered),
			WriteStatus::WouldBlock => WriteStatus::WouldBlock,
			_ => WriteStatus::WouldBlock,
		}
	}

	fn flush(&mut self) -> WriteStatus {
		self.flush_records()
	}

	fn shutdown_write_step(&mut self) -> ShutdownStep {
		if !self.sent_close_notify {
			self.sent_close_notify = true;
			self.tls.send_close_notify();
		}
		match self.flush_records() {
			WriteStatus::WouldBlock => ShutdownStep::NeedWrite,
			WriteStatus::Err(e) => ShutdownStep::Err(e),
			_ => ShutdownStep::Done(shutdown_fd(self.handle, ShutdownHow::Write)),
		}
	}

	fn shutdown_read(&mut self) {
		shutdown_fd(self.handle, ShutdownHow::Read);
	}

	fn wants_read(&self) -> bool {
		self.tls.is_handshaking() && self.tls.wants_read()
	}

	fn wants_write(&self) -> bool {
		self.tls.wants_write()
	}

	fn close_notify_is_eof(&self) -> bool {
		self.close_notify_is_eof
	}

	fn has_buffered_input(&self) -> bool {
		self.buffered_plaintext
	}

	fn handle(&self) -> Handle {
		self.handle
	}

	fn close(&mut self) {
		if !self.closed {
			self.closed = true;
			close_fd(self.handle);
		}
	}
}
