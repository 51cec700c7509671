pub mod availability;
pub mod channel;
pub mod config;
pub mod manager;

pub use availability::AvailabilityCache;
pub use channel::{ChannelAvailability, ChannelDispatcher, ChannelError, ChannelRegistry};
pub use config::DeliveryConfig;
pub use manager::DeliveryManager;
