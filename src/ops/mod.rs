pub mod prelu;

pub use prelu::{prelu_forward_ref, PreluForward};
