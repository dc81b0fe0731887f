//! BQ25703A buck-boost charge regulator driver.

pub mod device;
pub mod regs;

pub use device::Bq25703a;
