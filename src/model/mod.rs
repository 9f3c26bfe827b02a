pub mod block;
pub mod candle;
pub mod pattern;

pub use block::{BlockInstance, BlockStatus};
pub use candle::{Candle, CandleSeries};
pub use pattern::{DetectionMode, PatternId, PatternInstance, PatternStatus};
