//! Integration tests driving the device loop against mock hardware.

mod device_flow_tests;
mod mock_hw;
mod sync_flow_tests;
