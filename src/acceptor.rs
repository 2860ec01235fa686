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

use crate::connection::{establish, ConnTuning, DisconnectCallback};
use crate::constants::SNET_DEFAULT_BACKLOG;
use crate::context::{ConnectCallback, SocketContextFactory, SocketState, StatusCallback};
use crate::error::Error;
use crate::event::{Direction, EventReceiver, ReactorCtl, ReceiverId};
use crate::handshake::{start_handshake, HandshakeSettle};
use crate::reactor::Reactor;
use crate::socket::{
	accept_on, bind_listen, close_fd, local_address, set_nonblocking, Handle, SocketAddress,
};
use crate::stream::PlainTransport;
use crate::timeval::TimeVal;
use crate::tls::{build_server_config, TlsListenConfig};
use log::{debug, info, warn};
use rustls::ServerConfig;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Configuration of one listening server unit.
pub struct ListenConfig {
	/// Diagnostic name carried into logs and receiver names.
	pub name: String,
	pub address: SocketAddress,
	pub backlog: i32,
	/// A disabled listener reports [`SocketState::Disabled`] and binds
	/// nothing.
	pub enabled: bool,
	pub tls: Option<TlsListenConfig>,
	pub tuning: ConnTuning,
	pub factory: Rc<RefCell<dyn SocketContextFactory>>,
	pub on_connect: Option<ConnectCallback>,
	pub on_disconnect: Option<DisconnectCallback>,
	pub on_status: Option<StatusCallback>,
}

impl ListenConfig {
	pub fn new(
		name: &str,
		address: SocketAddress,
		factory: Rc<RefCell<dyn SocketContextFactory>>,
	) -> Self {
		Self {
			name: name.to_string(),
			address,
			backlog: SNET_DEFAULT_BACKLOG,
			enabled: true,
			tls: None,
			tuning: ConnTuning::default(),
			factory,
			on_connect: None,
			on_disconnect: None,
			on_status: None,
		}
	}
}

fn report(status: &Option<StatusCallback>, state: SocketState, address: &SocketAddress) {
	if let Some(status) = status {
		(status.borrow_mut())(state, address);
	}
}

/// Bind a listener and register its accept receiver. Setup failures abort
/// only this listener; they are reported through the status callback with
/// the attempted address and returned.
pub fn listen(reactor: &mut Reactor, config: ListenConfig) -> Result<(), Error> {
	if !config.enabled {
		info!("listener '{}' is disabled", config.name);
		report(&config.on_status, SocketState::Disabled, &config.address);
		return Ok(());
	}
	let tls = match config.tls {
		Some(ref tls_config) => {
			let server_config = match build_server_config(tls_config) {
				Ok(server_config) => server_config,
				Err(e) => {
					report(
						&config.on_status,
						SocketState::Fatal(format!("{}", e)),
						&config.address,
					);
					return Err(e);
				}
			};
			Some(TlsAccept {
				server_config,
				close_notify_is_eof: tls_config.close_notify_is_eof,
				handshake_timeout: tls_config.handshake_timeout,
			})
		}
		None => None,
	};
	let handle = match bind_listen(&config.address, config.backlog) {
		Ok(handle) => handle,
		Err(e) => {
			report(
				&config.on_status,
				SocketState::Fatal(format!("{}", e)),
				&config.address,
			);
			return Err(e);
		}
	};
	info!("listener '{}' bound to {}", config.name, config.address);

	let id = ReceiverId::generate();
	let receiver = AcceptReceiver {
		id,
		handle,
		address: config.address.clone(),
		name: config.name.clone(),
		tls,
		tuning: config.tuning,
		factory: config.factory,
		on_connect: config.on_connect,
		on_disconnect: config.on_disconnect,
	};
	let name = format!("{}-accept", config.name);
	reactor.with_ctl(|ctl| {
		ctl.register(
			id,
			handle,
			Direction::Read,
			&name,
			None,
			false,
			Rc::new(RefCell::new(receiver)),
		);
	});
	report(&config.on_status, SocketState::Ok, &config.address);
	Ok(())
}

struct TlsAccept {
	server_config: Arc<ServerConfig>,
	close_notify_is_eof: bool,
	handshake_timeout: TimeVal,
}

struct AcceptReceiver {
	id: ReceiverId,
	handle: Handle,
	address: SocketAddress,
	name: String,
	tls: Option<TlsAccept>,
	tuning: ConnTuning,
	factory: Rc<RefCell<dyn SocketContextFactory>>,
	on_connect: Option<ConnectCallback>,
	on_disconnect: Option<DisconnectCallback>,
}

impl AcceptReceiver {
	fn accepted(&mut self, ctl: &mut ReactorCtl, conn: Handle, remote: SocketAddress) {
		if let Err(e) = set_nonblocking(conn) {
			warn!("{}: could not prepare accepted socket: {}", self.name, e);
			close_fd(conn);
			return;
		}
		let local = local_address(conn).unwrap_or_else(|_| self.address.clone());
		if let Some(on_connect) = &self.on_connect {
			(on_connect.borrow_mut())(&local, &remote);
		}
		match &self.tls {
			Some(tls) => {
				let transport = match crate::tls::TlsTransport::server(
					conn,
					tls.server_config.clone(),
					tls.close_notify_is_eof,
				) {
					Ok(transport) => transport,
					Err(e) => {
						warn!("{}: tls session setup failed: {}", self.name, e);
						close_fd(conn);
						return;
					}
				};
				start_handshake(
					ctl,
					transport,
					HandshakeSettle {
						factory: self.factory.clone(),
						tuning: self.tuning.clone(),
						disconnect: self.on_disconnect.clone(),
						status: None,
						local,
						remote,
						name: self.name.clone(),
					},
					tls.handshake_timeout,
				);
			}
			None => {
				let context = match self.factory.borrow_mut().create() {
					Ok(context) => context,
					Err(e) => {
						warn!("{}: context creation failed: {}", self.name, e);
						close_fd(conn);
						return;
					}
				};
				establish(
					ctl,
					Box::new(PlainTransport::new(conn)),
					context,
					local,
					remote,
					self.tuning.clone(),
					self.on_disconnect.clone(),
					&self.name,
				);
			}
		}
	}
}

impl EventReceiver for AcceptReceiver {
	fn dispatch(&mut self, ctl: &mut ReactorCtl) {
		loop {
			match accept_on(self.handle) {
				Ok(Some((conn, remote))) => {
					debug!("{}: accepted {}", self.name, remote);
					self.accepted(ctl, conn, remote);
				}
				Ok(None) => break,
				Err(e) => {
					// transient resource exhaustion; the backlog stays
					warn!("{}: accept failed: {}", self.name, e);
					break;
				}
			}
		}
	}

	fn dispatch_timeout(&mut self, _ctl: &mut ReactorCtl) {}

	fn terminate(&mut self, ctl: &mut ReactorCtl) {
		info!("listener '{}' shutting down", self.name);
		ctl.disable(self.id);
	}

	fn unobserved(&mut self, _ctl: &mut ReactorCtl) {
		close_fd(self.handle);
	}

	fn name(&self) -> &str {
		"acceptor"
	}
}
