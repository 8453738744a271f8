/*!
# Fleet DevKit - Test helpers for the fleet telemetry workspace

- `MetricsPayloadBuilder`: agent payloads, valid or deliberately broken
- `init_test_logging()`: tracing output for tests, filtered by `RUST_LOG`
*/

pub mod payloads;
pub mod test_utils;

pub use payloads::MetricsPayloadBuilder;
pub use test_utils::init_test_logging;
