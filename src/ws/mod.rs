pub mod live_ha;
pub mod live_raw;
pub mod live_regression;
mod support;
