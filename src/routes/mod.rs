//! Route modules for Stemsplit Server

pub mod health;
pub mod presign;
pub mod separate;
pub mod upload;
