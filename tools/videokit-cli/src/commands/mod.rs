pub mod check;
pub mod mutate;
pub mod probe;
