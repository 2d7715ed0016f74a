pub mod config;
pub mod error;
pub mod event;
pub mod ndef;
pub mod validate;

pub mod publisher;
pub mod reader;
pub mod store;

pub mod controller;
pub mod lifecycle;

pub mod impls;

pub use error::Error;
