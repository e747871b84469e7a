// Core value types, wire codec, lifecycle states, and errors.
pub mod error;
pub mod event;
pub mod frame;
pub mod state;
pub mod status;
