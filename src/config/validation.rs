//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports valid, known status names)
//! - Detect conflicting listeners
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Lenient fields (log level, balance method, attempts) are normalized, not rejected

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::load_balancer::endpoint::Status;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("port must not be 0")]
    ZeroPort,

    #[error("listener on port {0} needs both cert and key for TLS")]
    IncompleteTls(u16),

    #[error("port {0} is configured more than once")]
    DuplicatePort(u16),

    #[error("\"{0}\" is not a status that can be considered (up, unknown, down)")]
    UnknownStatus(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }

    let mut seen = HashSet::new();
    for listener in &config.listeners {
        if listener.port == 0 {
            errors.push(ValidationError::ZeroPort);
        }
        if listener.cert.is_some() != listener.key.is_some() {
            errors.push(ValidationError::IncompleteTls(listener.port));
        }
        if !seen.insert(listener.port) {
            errors.push(ValidationError::DuplicatePort(listener.port));
        }
    }

    for name in &config.consider {
        match name.parse::<Status>() {
            Ok(Status::Off) | Err(_) => errors.push(ValidationError::UnknownStatus(name.clone())),
            Ok(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
