//! Type-safe prefixed ID types for every persisted entity.
//!
//! Each ID type wraps a UUID v7 (time-ordered) and serializes with a
//! human-readable prefix, e.g. `T-01961a8e-7d3a-7f1c-9b2e-4a5c6d7e8f90`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("missing prefix separator '-'")]
    MissingPrefix,
    #[error("wrong prefix: expected '{expected}', got '{got}'")]
    WrongPrefix { expected: &'static str, got: String },
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

impl From<uuid::Error> for IdParseError {
    fn from(e: uuid::Error) -> Self {
        IdParseError::InvalidUuid(e.to_string())
    }
}

macro_rules! define_prefixed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            #[must_use]
            pub const fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (prefix, uuid_str) = s.split_once('-').ok_or(IdParseError::MissingPrefix)?;

                if prefix != Self::PREFIX {
                    return Err(IdParseError::WrongPrefix {
                        expected: Self::PREFIX,
                        got: prefix.to_string(),
                    });
                }

                let uuid = Uuid::parse_str(uuid_str)?;
                Ok(Self(uuid))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
    };
}

define_prefixed_id!(WorkflowTemplateId, "WF");
define_prefixed_id!(WorkflowVersionId, "WFV");
define_prefixed_id!(TicketId, "T");
define_prefixed_id!(TicketStepId, "TS");
define_prefixed_id!(ApprovalTaskId, "AT");
define_prefixed_id!(AssignmentId, "ASG");
define_prefixed_id!(InfoRequestId, "IR");
define_prefixed_id!(HandoverRequestId, "HR");
define_prefixed_id!(ChangeRequestId, "CR");
define_prefixed_id!(AuditEventId, "AE");
define_prefixed_id!(NotificationId, "NTF");

/// A step's identifier as declared in a workflow definition. Author-chosen,
/// stable across versions, not a UUID — e.g. `"A1"` in a YAML definition.
pub type StepDefId = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_id_new_and_display() {
        let id = TicketId::new();
        let s = id.to_string();
        assert!(s.starts_with("T-"), "expected T- prefix, got: {s}");
    }

    #[test]
    fn ticket_id_parse_roundtrip() {
        let id = TicketId::new();
        let parsed: TicketId = id.to_string().parse().expect("should parse valid id");
        assert_eq!(id, parsed);
    }

    #[test]
    fn ticket_step_id_parse_valid() {
        let s = "TS-01961a8e-7d3a-7f1c-9b2e-4a5c6d7e8f90";
        let id: TicketStepId = s.parse().expect("should parse valid id");
        assert_eq!(id.to_string(), s);
    }

    #[test]
    fn parse_missing_prefix() {
        let result = "01961a8e-7d3a-7f1c-9b2e-4a5c6d7e8f90".parse::<TicketId>();
        assert!(matches!(result, Err(IdParseError::MissingPrefix)));
    }

    #[test]
    fn parse_wrong_prefix() {
        let result = "TS-01961a8e-7d3a-7f1c-9b2e-4a5c6d7e8f90".parse::<TicketId>();
        match result {
            Err(IdParseError::WrongPrefix { expected, got }) => {
                assert_eq!(expected, "T");
                assert_eq!(got, "TS");
            }
            other => panic!("expected WrongPrefix error, got {other:?}"),
        }
    }

    #[test]
    fn parse_invalid_uuid() {
        let result = "T-not-a-valid-uuid".parse::<TicketId>();
        assert!(matches!(result, Err(IdParseError::InvalidUuid(_))));
    }

    #[test]
    fn serde_roundtrip() {
        let id = ChangeRequestId::new();
        let json = serde_json::to_string(&id).expect("should serialize");
        let parsed: ChangeRequestId = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(TicketId::new(), TicketId::new());
    }

    #[test]
    fn cross_type_prefix_rejection() {
        let step_id = TicketStepId::new();
        let result = step_id.to_string().parse::<TicketId>();
        assert!(matches!(
            result,
            Err(IdParseError::WrongPrefix { expected: "T", .. })
        ));
    }
}
