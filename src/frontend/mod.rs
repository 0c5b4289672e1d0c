pub mod execute;

pub use self::execute::{execute, run, Config, Summary};
