pub mod capabilities;
pub mod fake_source;
pub mod fixtures;

pub use capabilities::StaticCapabilities;
pub use fake_source::{FakeSource, FakeSourceStats};
