//! Command definitions
//!
//! Represents commands submitted by callers.

use crate::error::{ClientError, Result};

/// Command kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Get,
    Set,
    Del,
    Ping,
}

impl CommandKind {
    /// The RESP verb for this kind
    pub fn verb(&self) -> &'static str {
        match self {
            CommandKind::Get => "GET",
            CommandKind::Set => "SET",
            CommandKind::Del => "DEL",
            CommandKind::Ping => "PING",
        }
    }

    /// Parse a verb (case-insensitive)
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb.to_ascii_uppercase().as_str() {
            "GET" => Some(CommandKind::Get),
            "SET" => Some(CommandKind::Set),
            "DEL" => Some(CommandKind::Del),
            "PING" => Some(CommandKind::Ping),
            _ => None,
        }
    }
}

/// A command to send to the server
///
/// Immutable once built: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    key: Option<String>,
    value: Option<String>,
}

impl Command {
    /// GET key
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Get,
            key: Some(key.into()),
            value: None,
        }
    }

    /// SET key value
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Set,
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }

    /// DEL key
    pub fn del(key: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Del,
            key: Some(key.into()),
            value: None,
        }
    }

    /// PING
    pub fn ping() -> Self {
        Self {
            kind: CommandKind::Ping,
            key: None,
            value: None,
        }
    }

    /// Build a command from raw parts, validating the shape
    pub fn from_parts(kind: CommandKind, key: Option<String>, value: Option<String>) -> Result<Self> {
        let command = Self { kind, key, value };
        command.validate()?;
        Ok(command)
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Check the key/value shape for this kind
    ///
    /// - GET/SET/DEL need a non-empty key, PING takes none
    /// - value is present iff the kind is SET
    pub fn validate(&self) -> Result<()> {
        match (self.kind, &self.key) {
            (CommandKind::Ping, None) => {}
            (CommandKind::Ping, Some(_)) => {
                return Err(ClientError::InvalidCommand("PING takes no key".to_string()));
            }
            (kind, None) => {
                return Err(ClientError::InvalidCommand(format!("{} requires a key", kind.verb())));
            }
            (kind, Some(key)) if key.is_empty() => {
                return Err(ClientError::InvalidCommand(format!(
                    "{} requires a non-empty key",
                    kind.verb()
                )));
            }
            _ => {}
        }

        match (self.kind, &self.value) {
            (CommandKind::Set, None) => {
                Err(ClientError::InvalidCommand("SET requires a value".to_string()))
            }
            (CommandKind::Set, Some(_)) | (_, None) => Ok(()),
            (kind, Some(_)) => Err(ClientError::InvalidCommand(format!(
                "{} does not take a value",
                kind.verb()
            ))),
        }
    }

    /// Arguments in wire order (verb first)
    pub(crate) fn args(&self) -> Vec<&[u8]> {
        let mut args = Vec::with_capacity(3);
        args.push(self.kind.verb().as_bytes());
        if let Some(key) = &self.key {
            args.push(key.as_bytes());
        }
        if let Some(value) = &self.value {
            args.push(value.as_bytes());
        }
        args
    }
}
