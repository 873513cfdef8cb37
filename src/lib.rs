pub mod opcode;
pub mod parser;
pub mod machine;
pub mod presets;
pub mod runner;

#[cfg(feature = "viz")]
pub mod viz;
