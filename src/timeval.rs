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

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::Duration;

const USECS_PER_SEC: i64 = 1_000_000;

/// A signed seconds/microseconds pair used uniformly for read, write,
/// handshake, shutdown and terminate timeouts and for the multiplexer wait
/// argument. Always normalized so that `usecs` is in `0..1_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeVal {
	secs: i64,
	usecs: i64,
}

impl TimeVal {
	/// The zero timeout. As a wait argument it means "do not block".
	pub const ZERO: TimeVal = TimeVal { secs: 0, usecs: 0 };

	/// An effectively infinite timeout.
	pub const MAX: TimeVal = TimeVal {
		secs: i64::MAX,
		usecs: 0,
	};

	pub fn new(secs: i64, usecs: i64) -> Self {
		Self { secs, usecs }.normalized()
	}

	pub fn from_secs(secs: i64) -> Self {
		Self { secs, usecs: 0 }
	}

	pub fn from_millis(millis: i64) -> Self {
		Self {
			secs: millis / 1_000,
			usecs: (millis % 1_000) * 1_000,
		}
		.normalized()
	}

	pub fn secs(&self) -> i64 {
		self.secs
	}

	pub fn usecs(&self) -> i64 {
		self.usecs
	}

	/// Total milliseconds, saturating. Negative values clamp to 0 so the
	/// result can be handed to a wait syscall directly.
	pub fn as_wait_millis(&self) -> i64 {
		if self.is_negative() {
			0
		} else {
			self.secs
				.saturating_mul(1_000)
				.saturating_add(self.usecs / 1_000)
		}
	}

	pub fn is_negative(&self) -> bool {
		self.secs < 0
	}

	fn normalized(mut self) -> Self {
		self.secs += self.usecs.div_euclid(USECS_PER_SEC);
		self.usecs = self.usecs.rem_euclid(USECS_PER_SEC);
		self
	}
}

impl From<Duration> for TimeVal {
	fn from(d: Duration) -> Self {
		Self {
			secs: d.as_secs().min(i64::MAX as u64) as i64,
			usecs: d.subsec_micros() as i64,
		}
	}
}

impl From<TimeVal> for Duration {
	fn from(tv: TimeVal) -> Self {
		if tv.is_negative() {
			Duration::ZERO
		} else {
			Duration::new(tv.secs as u64, (tv.usecs * 1_000) as u32)
		}
	}
}

impl Add for TimeVal {
	type Output = TimeVal;

	fn add(self, other: TimeVal) -> TimeVal {
		TimeVal {
			secs: self.secs.saturating_add(other.secs),
			usecs: self.usecs + other.usecs,
		}
		.normalized()
	}
}

impl Sub for TimeVal {
	type Output = TimeVal;

	fn sub(self, other: TimeVal) -> TimeVal {
		TimeVal {
			secs: self.secs.saturating_sub(other.secs),
			usecs: self.usecs - other.usecs,
		}
		.normalized()
	}
}

impl PartialOrd for TimeVal {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for TimeVal {
	fn cmp(&self, other: &Self) -> Ordering {
		(self.secs, self.usecs).cmp(&(other.secs, other.usecs))
	}
}

impl Display for TimeVal {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{:06}s", self.secs, self.usecs)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::Error;

	#[test]
	fn test_timeval_normalization() -> Result<(), Error> {
		let tv = TimeVal::new(1, 2_500_000);
		assert_eq!(tv.secs(), 3);
		assert_eq!(tv.usecs(), 500_000);

		let tv = TimeVal::new(1, -500_000);
		assert_eq!(tv.secs(), 0);
		assert_eq!(tv.usecs(), 500_000);

		Ok(())
	}

	#[test]
	fn test_timeval_arithmetic() -> Result<(), Error> {
		let a = TimeVal::from_millis(1_500);
		let b = TimeVal::from_millis(700);
		assert_eq!((a + b).as_wait_millis(), 2_200);
		assert_eq!((a - b).as_wait_millis(), 800);

		// a negative difference clamps as a wait argument
		let diff = b - a;
		assert!(diff.is_negative());
		assert_eq!(diff.as_wait_millis(), 0);
		assert_eq!(Duration::from(diff), Duration::ZERO);

		Ok(())
	}

	#[test]
	fn test_timeval_ordering() -> Result<(), Error> {
		assert!(TimeVal::ZERO < TimeVal::from_millis(1));
		assert!(TimeVal::from_secs(2) > TimeVal::from_millis(1_999));
		assert!(TimeVal::MAX > TimeVal::from_secs(1_000_000));
		assert_eq!(TimeVal::from_millis(1_000), TimeVal::from_secs(1));

		Ok(())
	}
}
