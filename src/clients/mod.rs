pub mod device;
pub mod health;
pub mod in_memory;
pub mod ipn;
pub mod mail;
pub mod rbmq;
pub mod redis;
pub mod sms;
