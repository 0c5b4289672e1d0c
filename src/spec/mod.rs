pub mod arch;
pub mod isa;
