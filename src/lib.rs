//! A circuit breaker middleware for the backends of an API gateway.
//!
//! A backend whose recent calls fail too often is short-circuited: further calls are
//! rejected without reaching it until a sleep window expired, then a single probe decides
//! whether the backend recovered. Breakers are named by a command name and shared
//! through a [`Registry`], so every call site using the same name sees the same
//! statistics.
//!
//! The middleware is configured per backend by a JSON block, see [`config`], and
//! decorates a [`proxy::Proxy`] without changing its signature.
//!
//! # Example
//!
//! ```
//! use gateway_cbreaker::{Callable, CircuitBreaker, Error, State};
//!
//! let circuit_breaker = CircuitBreaker::builder("inventory")
//!     .request_volume_threshold(1)
//!     .build();
//!
//! match circuit_breaker.call(|| Err::<(), _>("connection refused")) {
//!     Err(Error::Inner(_)) => {}
//!     other => unreachable!("{:?}", other),
//! }
//! assert_eq!(State::Open, circuit_breaker.state());
//! ```
//!
//! See https://martinfowler.com/bliki/CircuitBreaker.html

#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

mod builder;
mod circuit_breaker;
mod classifier;
mod error;
mod instrument;
mod registry;
mod rolling_window;
mod settings;
mod state_machine;

pub mod clock;
pub mod config;
#[cfg(feature = "futures-support")]
pub mod futures;
#[cfg(feature = "futures-support")]
pub mod proxy;

pub use self::builder::Builder;
pub use self::circuit_breaker::{Callable, CircuitBreaker, Permit};
pub use self::classifier::{AnyError, Classifier, Outcome};
pub use self::config::{Config, Propagation};
pub use self::error::{Error, Rejection};
pub use self::instrument::{Instrument, NoopInstrument, Tracing};
pub use self::registry::Registry;
pub use self::rolling_window::{RollingWindow, Snapshot};
pub use self::settings::Settings;
pub use self::state_machine::{Admission, State, StateMachine};
