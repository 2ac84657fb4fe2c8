pub mod channel;
pub mod device;
pub mod health;
pub mod ipn;
pub mod message;
pub mod response;
pub mod retry;
pub mod validation;
