/*!
# devicecheck DevKit - stubs and utilities for development

Library for exercising the device monitor without network or broker:
- Recording publisher standing in for the host event bus
- Scripted prober replaying online/offline answers per address
- Test harness driving monitor cycles and asserting on notifications
*/

pub mod bus_stub;
pub mod probe_stub;
pub mod test_utils;

pub use bus_stub::MockPublisher;
pub use probe_stub::{ScriptedProber, Scripted};
pub use test_utils::TestHarness;
