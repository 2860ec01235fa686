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
use crate::constants::SNET_DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::context::{ConnectCallback, SocketContextFactory, SocketState, StatusCallback};
use crate::error::Error;
use crate::event::{Direction, EventReceiver, ReactorCtl, ReceiverId};
use crate::handshake::{start_handshake, HandshakeSettle};
use crate::reactor::Reactor;
use crate::socket::{
	close_fd, connect_on, local_address, remote_address, so_error, Handle, SocketAddress,
};
use crate::stream::PlainTransport;
use crate::timeval::TimeVal;
use crate::tls::{build_client_config, TlsConnectConfig};
use log::{debug, info, warn};
use rustls::ClientConfig;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Configuration of one outgoing client unit.
pub struct ConnectConfig {
	pub name: String,
	pub address: SocketAddress,
	/// A disabled connector reports [`SocketState::Disabled`] and opens
	/// nothing.
	pub enabled: bool,
	pub tls: Option<TlsConnectConfig>,
	pub connect_timeout: TimeVal,
	pub tuning: ConnTuning,
	pub factory: Rc<RefCell<dyn SocketContextFactory>>,
	pub on_connect: Option<ConnectCallback>,
	pub on_disconnect: Option<DisconnectCallback>,
	pub on_status: Option<StatusCallback>,
}

impl ConnectConfig {
	pub fn new(
		name: &str,
		address: SocketAddress,
		factory: Rc<RefCell<dyn SocketContextFactory>>,
	) -> Self {
		Self {
			name: name.to_string(),
			address,
			enabled: true,
			tls: None,
			connect_timeout: TimeVal::from_secs(SNET_DEFAULT_CONNECT_TIMEOUT_SECS),
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

struct TlsConnect {
	client_config: Arc<ClientConfig>,
	config: TlsConnectConfig,
}

/// Begin a non-blocking connect and register the receiver that resolves
/// it. [`SocketState::Ok`] is reported once the connection (including a
/// tls handshake, when configured) is actually established.
pub fn connect(reactor: &mut Reactor, config: ConnectConfig) -> Result<(), Error> {
	if !config.enabled {
		info!("connector '{}' is disabled", config.name);
		report(&config.on_status, SocketState::Disabled, &config.address);
		return Ok(());
	}
	let tls = match config.tls {
		Some(tls_config) => {
			let client_config = match build_client_config(&tls_config) {
				Ok(client_config) => client_config,
				Err(e) => {
					report(
						&config.on_status,
						SocketState::Fatal(format!("{}", e)),
						&config.address,
					);
					return Err(e);
				}
			};
			Some(TlsConnect {
				client_config,
				config: tls_config,
			})
		}
		None => None,
	};
	let (handle, immediate) = match connect_on(&config.address) {
		Ok(v) => v,
		Err(e) => {
			report(
				&config.on_status,
				SocketState::Error(format!("{}", e)),
				&config.address,
			);
			return Err(e);
		}
	};
	debug!(
		"connector '{}' started towards {} (immediate: {})",
		config.name, config.address, immediate
	);

	let id = ReceiverId::generate();
	let receiver = ConnectReceiver {
		id,
		handle,
		address: config.address.clone(),
		name: config.name.clone(),
		tls,
		tuning: config.tuning,
		factory: config.factory,
		on_connect: config.on_connect,
		on_disconnect: config.on_disconnect,
		on_status: config.on_status,
		done: false,
	};
	let name = format!("{}-connect", config.name);
	let timeout = config.connect_timeout;
	reactor.with_ctl(|ctl| {
		ctl.register(
			id,
			handle,
			Direction::Write,
			&name,
			Some(timeout),
			false,
			Rc::new(RefCell::new(receiver)),
		);
	});
	Ok(())
}

struct ConnectReceiver {
	id: ReceiverId,
	handle: Handle,
	address: SocketAddress,
	name: String,
	tls: Option<TlsConnect>,
	tuning: ConnTuning,
	factory: Rc<RefCell<dyn SocketContextFactory>>,
	on_connect: Option<ConnectCallback>,
	on_disconnect: Option<DisconnectCallback>,
	on_status: Option<StatusCallback>,
	done: bool,
}

impl ConnectReceiver {
	fn resolve(&mut self, ctl: &mut ReactorCtl) {
		if self.done {
			return;
		}
		self.done = true;
		ctl.disable(self.id);

		let errnum = so_error(self.handle);
		if errnum != 0 {
			warn!("{}: connect to {} failed: errno {}", self.name, self.address, errnum);
			report(
				&self.on_status,
				SocketState::Error(format!("connect failed: errno {}", errnum)),
				&self.address,
			);
			close_fd(self.handle);
			return;
		}

		let local = match local_address(self.handle) {
			Ok(local) => local,
			Err(_) => self.address.clone(),
		};
		let remote = match remote_address(self.handle) {
			Ok(remote) => remote,
			Err(_) => self.address.clone(),
		};
		if let Some(on_connect) = &self.on_connect {
			(on_connect.borrow_mut())(&local, &remote);
		}

		match &self.tls {
			Some(tls) => {
				let transport = match crate::tls::TlsTransport::client(
					self.handle,
					tls.client_config.clone(),
					&tls.config.server_name,
					tls.config.close_notify_is_eof,
				) {
					Ok(transport) => transport,
					Err(e) => {
						warn!("{}: tls session setup failed: {}", self.name, e);
						report(
							&self.on_status,
							SocketState::Error(format!("{}", e)),
							&self.address,
						);
						close_fd(self.handle);
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
						status: self.on_status.clone(),
						local,
						remote,
						name: self.name.clone(),
					},
					tls.config.handshake_timeout,
				);
			}
			None => {
				let context = match self.factory.borrow_mut().create() {
					Ok(context) => context,
					Err(e) => {
						warn!("{}: context creation failed: {}", self.name, e);
						report(
							&self.on_status,
							SocketState::Error(format!("{}", e)),
							&self.address,
						);
						close_fd(self.handle);
						return;
					}
				};
				establish(
					ctl,
					Box::new(PlainTransport::new(self.handle)),
					context,
					local,
					remote,
					self.tuning.clone(),
					self.on_disconnect.clone(),
					&self.name,
				);
				report(&self.on_status, SocketState::Ok, &self.address);
			}
		}
	}

	fn give_up(&mut self, ctl: &mut ReactorCtl, why: &str) {
		if self.done {
			return;
		}
		self.done = true;
		ctl.disable(self.id);
		warn!("{}: {} ({})", self.name, why, self.address);
		report(
			&self.on_status,
			SocketState::Error(why.to_string()),
			&self.address,
		);
		close_fd(self.handle);
	}
}

impl EventReceiver for ConnectReceiver {
	fn dispatch(&mut self, ctl: &mut ReactorCtl) {
		self.resolve(ctl);
	}

	fn dispatch_timeout(&mut self, ctl: &mut ReactorCtl) {
		self.give_up(ctl, "connect deadline expired");
	}

	fn terminate(&mut self, ctl: &mut ReactorCtl) {
		self.give_up(ctl, "terminated while connecting");
	}

	fn name(&self) -> &str {
		"connector"
	}
}
