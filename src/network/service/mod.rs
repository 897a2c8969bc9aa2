// Network service module

pub mod dialer;
pub mod listener;
pub mod router;
