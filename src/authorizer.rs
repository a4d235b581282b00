//! Role gating for workflow transitions. Pure, no storage access.
use crate::types::Role;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transition {
    Submit,
    RequestRevision,
    EditDuringRevision,
    Resubmit,
    Check,
    Approve,
}

impl Transition {
    pub const ALL: [Transition; 6] = [
        Transition::Submit,
        Transition::RequestRevision,
        Transition::EditDuringRevision,
        Transition::Resubmit,
        Transition::Check,
        Transition::Approve,
    ];

    pub fn required_role(self) -> Role {
        match self {
            Transition::Submit | Transition::Resubmit => Role::Inspector,
            Transition::RequestRevision | Transition::Check | Transition::Approve => {
                Role::Supervisor
            }
            Transition::EditDuringRevision => Role::Operator,
        }
    }

    /// Only the owning inspector may hand a checksheet (back) into review
    pub fn requires_ownership(self) -> bool {
        matches!(self, Transition::Submit | Transition::Resubmit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Submit => "submit",
            Transition::RequestRevision => "request-revision",
            Transition::EditDuringRevision => "edit-during-revision",
            Transition::Resubmit => "resubmit",
            Transition::Check => "check",
            Transition::Approve => "approve",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    WrongRole { required: Role, actual: Role },
    NotOwner,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::WrongRole { required, actual } => {
                write!(f, "requires role {required}, actor is {actual}")
            }
            DenyReason::NotOwner => f.write_str("actor does not own this checksheet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

pub fn authorize(role: Role, transition: Transition, is_owner: bool) -> Decision {
    let required = transition.required_role();
    if role != required {
        return Decision::Denied(DenyReason::WrongRole {
            required,
            actual: role,
        });
    }
    if transition.requires_ownership() && !is_owner {
        return Decision::Denied(DenyReason::NotOwner);
    }
    Decision::Allowed
}
