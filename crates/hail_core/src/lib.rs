pub mod geo;
pub mod timer;
pub mod candidates;
pub mod routing;
pub mod pricing;
pub mod proximity;
pub mod connection;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
