pub mod checkpoint;
pub mod command;
pub mod session;

pub use checkpoint::*;
pub use command::*;
pub use session::*;
