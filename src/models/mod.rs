pub mod attempt;
pub mod otp;
pub mod session;
pub mod user;

pub use attempt::*;
pub use otp::*;
pub use session::*;
pub use user::*;
