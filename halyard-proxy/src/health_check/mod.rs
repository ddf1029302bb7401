//! Active health checking of HA service backends.

pub mod prober;
