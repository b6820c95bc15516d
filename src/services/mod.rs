pub mod classifier;
pub mod converter;
pub mod ephemeral;
pub mod pdf;
pub mod pipeline;
pub mod scanner;
pub mod sink;
