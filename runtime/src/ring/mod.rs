pub mod iov;
pub mod mailbox;
pub mod protocol;
