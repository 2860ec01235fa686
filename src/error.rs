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

use std::fmt::{Display, Formatter};
use std::net::AddrParseError;
use std::num::TryFromIntError;

/// The error kinds that occur in this crate. Each variant carries a message
/// describing the specific failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
	/// An i/o or syscall level error.
	#[error("io error: {0}")]
	IO(String),
	/// A tls record or handshake level error.
	#[error("tls error: {0}")]
	Tls(String),
	/// Invalid configuration was supplied.
	#[error("configuration error: {0}")]
	Configuration(String),
	/// An invalid argument was supplied.
	#[error("illegal argument: {0}")]
	IllegalArgument(String),
	/// An operation was attempted in a state that does not permit it.
	#[error("illegal state: {0}")]
	IllegalState(String),
	/// Any other error.
	#[error("misc error: {0}")]
	Misc(String),
}

/// The names of the [`crate::ErrorKind`] variants, used with the [`crate::err`]
/// macro to build errors without formatting the message at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrKind {
	/// see [`crate::ErrorKind::IO`]
	IO,
	/// see [`crate::ErrorKind::Tls`]
	Tls,
	/// see [`crate::ErrorKind::Configuration`]
	Configuration,
	/// see [`crate::ErrorKind::IllegalArgument`]
	IllegalArgument,
	/// see [`crate::ErrorKind::IllegalState`]
	IllegalState,
	/// see [`crate::ErrorKind::Misc`]
	Misc,
}

/// The error type returned by the fallible functions in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
	kind: ErrorKind,
}

impl Error {
	/// get the kind of error that occurred.
	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}
}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(&self.kind, f)
	}
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error { kind }
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		Error {
			kind: ErrorKind::IO(format!("{}", e)),
		}
	}
}

impl From<rustls::Error> for Error {
	fn from(e: rustls::Error) -> Error {
		Error {
			kind: ErrorKind::Tls(format!("{}", e)),
		}
	}
}

impl From<rustls::client::InvalidDnsNameError> for Error {
	fn from(e: rustls::client::InvalidDnsNameError) -> Error {
		Error {
			kind: ErrorKind::Tls(format!("invalid dns name: {}", e)),
		}
	}
}

impl From<AddrParseError> for Error {
	fn from(e: AddrParseError) -> Error {
		Error {
			kind: ErrorKind::IllegalArgument(format!("{}", e)),
		}
	}
}

impl From<TryFromIntError> for Error {
	fn from(e: TryFromIntError) -> Error {
		Error {
			kind: ErrorKind::Misc(format!("TryFromIntError: {}", e)),
		}
	}
}

/// Build the specified [`crate::ErrorKind`] and convert it into an
/// [`crate::Error`]. The desired kind is specified using the
/// [`crate::ErrKind`] name enum.
///
/// Example:
///
///```
/// use snet::{err, ErrKind, Error};
///
/// fn show_err_kind(do_error: bool) -> Result<(), Error> {
///     let e = err!(ErrKind::Configuration, "invalid parameter name");
///
///     if do_error {
///         return Err(e);
///     }
///
///     Ok(())
/// }
///```
#[macro_export]
macro_rules! err {
	($kind:expr, $msg:expr, $($param:tt)*) => {{
		let msg = format!($msg, $($param)*);
		$crate::err!($kind, msg)
	}};
	($kind:expr, $msg:expr) => {{
		let error: $crate::Error = match $kind {
			$crate::ErrKind::IO => $crate::ErrorKind::IO($msg.to_string()).into(),
			$crate::ErrKind::Tls => $crate::ErrorKind::Tls($msg.to_string()).into(),
			$crate::ErrKind::Configuration => {
				$crate::ErrorKind::Configuration($msg.to_string()).into()
			}
			$crate::ErrKind::IllegalArgument => {
				$crate::ErrorKind::IllegalArgument($msg.to_string()).into()
			}
			$crate::ErrKind::IllegalState => {
				$crate::ErrorKind::IllegalState($msg.to_string()).into()
			}
			$crate::ErrKind::Misc => $crate::ErrorKind::Misc($msg.to_string()).into(),
		};
		error
	}};
}

#[cfg(test)]
mod test {
	use crate::{ErrKind, Error, ErrorKind};

	#[test]
	fn test_error_kinds() -> Result<(), Error> {
		let e = err!(ErrKind::IO, "read failed: {}", 107);
		assert_eq!(e.kind(), &ErrorKind::IO("read failed: 107".to_string()));

		let e = err!(ErrKind::IllegalState, "already enabled");
		assert_eq!(
			e.kind(),
			&ErrorKind::IllegalState("already enabled".to_string())
		);

		let e: Error = std::io::Error::from_raw_os_error(libc::EAGAIN).into();
		match e.kind() {
			ErrorKind::IO(_) => {}
			_ => panic!("expected io kind"),
		}

		Ok(())
	}
}
