pub mod registry;
pub mod scanner;
