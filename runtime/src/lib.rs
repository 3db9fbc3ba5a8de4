pub mod config;
pub mod device;
pub mod eventloop;
pub mod handler;
pub mod logger;
pub mod netlink;
pub mod ring;
pub mod scsi;
pub mod shutdown;
pub mod worker;
