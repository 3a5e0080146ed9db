//! Device trait definition and the vendor drivers behind it.

use async_trait::async_trait;

use crate::config::types::Vendor;
use crate::error::Result;

pub mod cisco;
pub mod factory;
pub mod idrac;
pub mod ilo;
pub mod nvidia;
pub mod openjbod;
pub mod smart;
pub mod supermicro;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use factory::{DeviceFactory, DriverHandle, DriverSpec, Registry, VendorFactory};
pub use types::{SpeedValue, Vocabulary};

/// A live protocol client serving one sensor group of one host.
#[async_trait]
pub trait Device: Send + Sync {
    fn vendor(&self) -> Vendor;

    /// One-off setup after construction (sensor discovery and similar).
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Current temperature in whole degrees Celsius, aggregated by maximum.
    async fn get_temp(&mut self) -> Result<i32>;

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()>;

    /// Hand fan control back to the controller. Safe to call more than once.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
