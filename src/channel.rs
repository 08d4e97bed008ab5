//! The payload channel carried across every switch.
//!
//! One [`Payload`] flows per transition, in the direction of control
//! transfer. The same type serves both uses the protocol needs: ordinary
//! cooperative signaling (handshake values exchanged at each suspend/resume
//! pair) and fault propagation (an error raised on one side surfaces on the
//! other side once control returns). Do not assume a payload is an error.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

/// A value or fault handed across one start/resume/suspend/exit transition.
pub enum Payload {
  /// Nothing to say. Also the completion payload when an entry function
  /// returns normally.
  None,
  /// An ordinary value. Opaque to the protocol.
  Value(Box<dyn Any + Send>),
  /// An exceptional condition the receiving side may choose to re-raise.
  Fault(Fault),
}

impl Payload {
  /// Wraps an ordinary value.
  pub fn value<T: Any + Send>(value: T) -> Payload {
    Payload::Value(Box::new(value))
  }

  /// Wraps an error for the far side to re-raise (or inspect).
  pub fn fault<E>(error: E) -> Payload
  where E: StdError + Send + Sync + 'static {
    Payload::Fault(Fault(Box::new(error)))
  }

  pub fn is_none(&self) -> bool {
    matches!(self, Payload::None)
  }

  pub fn is_fault(&self) -> bool {
    matches!(self, Payload::Fault(_))
  }

  /// Takes the value out if it is a `Value` of type `T`, otherwise hands the
  /// payload back untouched.
  pub fn downcast<T: Any + Send>(self) -> Result<T, Payload> {
    match self {
      Payload::Value(boxed) => match boxed.downcast::<T>() {
        Ok(v)    => Ok(*v),
        Err(any) => Err(Payload::Value(any)),
      },
      other => Err(other),
    }
  }

  /// Surfaces a carried fault as `Err`, passing everything else through.
  ///
  /// This is the "re-raise" half of the channel contract: a caller that does
  /// not expect faults writes `let p = ut.start(entry)?.raise()?;`.
  pub fn raise(self) -> Result<Payload, Fault> {
    match self {
      Payload::Fault(fault) => Err(fault),
      other => Ok(other),
    }
  }
}

impl Default for Payload {
  fn default() -> Payload { Payload::None }
}

impl fmt::Debug for Payload {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Payload::None       => f.write_str("Payload::None"),
      Payload::Value(_)   => f.write_str("Payload::Value(..)"),
      Payload::Fault(e)   => write!(f, "Payload::Fault({})", e),
    }
  }
}

/// An opaque error payload. Re-raisable on the receiving side of a switch.
pub struct Fault(Box<dyn StdError + Send + Sync>);

impl Fault {
  pub fn new<E>(error: E) -> Fault
  where E: StdError + Send + Sync + 'static {
    Fault(Box::new(error))
  }

  pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
    self.0
  }

  /// Borrow-level downcast, for callers that dispatch on the fault type.
  pub fn is<E: StdError + 'static>(&self) -> bool {
    self.0.is::<E>()
  }

  pub fn downcast<E: StdError + 'static>(self) -> Result<Box<E>, Fault> {
    self.0.downcast::<E>().map_err(Fault)
  }
}

impl fmt::Display for Fault {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    self.0.fmt(f)
  }
}

impl fmt::Debug for Fault {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "Fault({:?})", self.0)
  }
}

impl StdError for Fault {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.0.source()
  }
}

/// The fault delivered when an entry function panics instead of suspending,
/// exiting or returning. Only the rendered message crosses the switch; the
/// panic payload itself need not be `Sync`.
#[derive(Debug)]
pub struct PanicFault {
  message: String,
}

impl PanicFault {
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> PanicFault {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "non-string panic payload".to_owned()
    };
    PanicFault { message }
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl fmt::Display for PanicFault {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "microthread panicked: {}", self.message)
  }
}

impl StdError for PanicFault {}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;

  #[test]
  fn value_round_trip() {
    let p = Payload::value(42u32);
    assert!(!p.is_none());
    assert_eq!(p.downcast::<u32>().unwrap(), 42);
  }

  #[test]
  fn downcast_miss_returns_payload() {
    let p = Payload::value("hello".to_owned());
    let p = p.downcast::<u32>().unwrap_err();
    assert_eq!(p.downcast::<String>().unwrap(), "hello");
  }

  #[test]
  fn raise_surfaces_faults_only() {
    let ok = Payload::value(1u8).raise().unwrap();
    assert_eq!(ok.downcast::<u8>().unwrap(), 1);

    let err = io::Error::new(io::ErrorKind::Other, "boom");
    let fault = Payload::fault(err).raise().unwrap_err();
    assert!(fault.is::<io::Error>());
    assert_eq!(fault.to_string(), "boom");
  }

  #[test]
  fn none_is_default() {
    assert!(Payload::default().is_none());
  }

  #[test]
  fn panic_fault_renders_common_payloads() {
    let f = PanicFault::from_panic(Box::new("sliced"));
    assert_eq!(f.message(), "sliced");
    let f = PanicFault::from_panic(Box::new(7i32));
    assert_eq!(f.message(), "non-string panic payload");
  }
}
