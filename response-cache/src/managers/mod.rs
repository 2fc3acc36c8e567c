#[cfg(feature = "manager-moka")]
pub mod moka;

#[cfg(feature = "redis")]
pub mod redis;
