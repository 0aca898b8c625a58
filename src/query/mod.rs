pub mod compiler;
pub mod fragment;
pub mod period;
