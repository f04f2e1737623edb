//! Types shared between the burger client engine and its front-ends.

pub mod domain;
pub mod error;
pub mod protocol;
