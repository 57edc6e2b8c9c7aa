pub mod net;
pub mod proxy;
