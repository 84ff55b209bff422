//! Client for the iQua water-softener cloud API.
//!
//! [`IquaClient`] owns one authenticated session: it logs in on first use,
//! renews tokens before they expire, and recovers once from a 401 before
//! giving up.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod token;

pub use auth::{Authenticator, Credentials};
pub use client::{ApiResponse, IquaClient};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{Device, FlowAndSalt, RegenerationAction, SoftenerData, ValveAction};
pub use token::{TokenState, TokenStatus};
