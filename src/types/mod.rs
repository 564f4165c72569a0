pub mod account;
pub mod event;
pub mod position;
pub mod wire;

pub use account::*;
pub use event::*;
pub use position::*;
pub use wire::*;
