pub mod defs;
pub mod dry_run;

pub use defs::{Article, DeliveryError, DeliveryReceipt, DeliveryRequest, Dispatcher, FeedSource};
pub use dry_run::DryRunDispatcher;
