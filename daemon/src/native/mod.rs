//! Concrete [`cnc_broker_core::NativeClient`] implementations: the
//! simulated in-process double used by default, and the real FOCAS dlopen
//! adapter behind the `focas` feature.

pub mod simulated;

#[cfg(feature = "focas")]
pub mod focas;

pub use simulated::SimulatedClient;

#[cfg(feature = "focas")]
pub use focas::FocasClient;
