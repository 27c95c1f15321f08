//! 引擎生命周期与会话管理

pub mod error;
pub mod manager;
pub mod session;

pub use error::{EncodingError, EngineError, EngineFault};
pub use manager::{EngineFactory, EngineManager};
pub use session::{OptionId, OptionValue, ScanCallback, Session};
