pub mod alu;
pub mod float;
pub mod instance;
pub mod io;
pub mod types;

pub use self::float::Fpu;
pub use self::instance::{Fault, Flags, State, Vm};
pub use self::types::LogLevel;
