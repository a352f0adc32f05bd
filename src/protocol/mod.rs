//! 프로토콜 모듈

pub mod messages;
pub mod session_code;

pub use messages::*;
pub use session_code::generate_session_code;
