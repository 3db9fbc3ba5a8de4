mod config_errors;
mod device_errors;
mod handler_errors;
mod netlink_errors;
mod ring_errors;

pub use config_errors::ConfigError;
pub use device_errors::DeviceError;
pub use handler_errors::HandlerError;
pub use netlink_errors::NetlinkError;
pub use ring_errors::RingError;
