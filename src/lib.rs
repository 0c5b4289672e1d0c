pub mod spec;

pub mod assembler;

pub mod frontend;
pub mod vm;
