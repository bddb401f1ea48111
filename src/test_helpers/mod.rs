//! # Test Helpers
//!
//! In-process doubles for the dispatch core's external interfaces, plus order
//! builders. Used by the crate's own tests and available to library consumers
//! writing tests around the dispatch service.

pub mod factories;
pub mod faulty_store;
pub mod manual_clock;
pub mod mock_courier;
pub mod recording_sink;
pub mod test_utils;

pub use factories::OrderFactory;
pub use faulty_store::FaultyOrderStore;
pub use manual_clock::ManualClock;
pub use mock_courier::MockCourierClient;
pub use recording_sink::RecordingNotificationSink;
pub use test_utils::{get_test_database_url, setup_test_environment};
