pub mod candle;
pub mod interval;
pub mod tick;
pub mod timezone;
pub mod view;

pub use candle::{Candle, HeikinAshiCandle};
pub use interval::Interval;
pub use tick::Tick;
pub use view::{SubscriptionView, Transform};
