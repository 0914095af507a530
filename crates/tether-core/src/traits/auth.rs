//! Credential validation at the controller

use std::collections::HashSet;

use tether_protocol::Credential;

use crate::types::ServiceTarget;

/// Decides whether a session handshake may reach its target service
pub trait CredentialValidator: Send + Sync {
    /// Returns the rejection reason if the credential is not accepted
    fn validate(&self, credential: &Credential, target: &ServiceTarget) -> Result<(), String>;
}

/// Accepts every credential
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl CredentialValidator for AllowAll {
    fn validate(&self, _credential: &Credential, _target: &ServiceTarget) -> Result<(), String> {
        Ok(())
    }
}

/// Accepts credentials from a fixed set of tokens
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    tokens: HashSet<String>,
}

impl StaticTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl CredentialValidator for StaticTokens {
    fn validate(&self, credential: &Credential, target: &ServiceTarget) -> Result<(), String> {
        if credential.is_empty() {
            return Err(format!("missing credential for {}", target));
        }
        if self.tokens.contains(credential.expose()) {
            Ok(())
        } else {
            Err(format!("invalid credential for {}", target))
        }
    }
}
