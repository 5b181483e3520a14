//! Glue between an application and libpam: a conversation bridge that
//! answers PAM messages through a Rust handler, and a no-echo secret prompt.

#[macro_use]
mod macros;
pub(crate) mod cutils;
pub mod log;
pub mod pam;
pub mod rpassword;
pub(crate) mod system;

#[cfg(feature = "libpam")]
mod pamauth;

#[cfg(feature = "libpam")]
pub use pamauth::main as pamauth_main;

pub use rpassword::{read_secret, read_secret_from};
