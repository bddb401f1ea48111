pub mod courier;
pub mod order;

pub use courier::{CourierRef, CourierStatus, DispatchReceipt};
pub use order::{Order, OrderKey, OrderKind};
