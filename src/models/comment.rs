//! Review comments: locally pending, remotely posted, and reconciled.

use serde::{Deserialize, Serialize};

/// A violation rendered into postable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingComment {
    pub rule_name: String,
    pub file_path: String,
    /// `None` for file-level comments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub body: String,
    pub score: u8,
}

/// A comment the remote system reports as already posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(alias = "path")]
    pub file_path: String,
    #[serde(default, alias = "line", skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub body: String,
}

/// Lifecycle state of a comment after reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconciledComment {
    /// Pending only: needs posting.
    New { pending: PendingComment },
    /// Pending and already posted.
    Redetected {
        pending: PendingComment,
        posted: PostedComment,
    },
    /// Posted but no longer detected; the issue may be resolved.
    PostedOnly { posted: PostedComment },
}

impl ReconciledComment {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }

    pub fn is_redetected(&self) -> bool {
        matches!(self, Self::Redetected { .. })
    }

    pub fn is_posted_only(&self) -> bool {
        matches!(self, Self::PostedOnly { .. })
    }

    pub fn file_path(&self) -> &str {
        match self {
            Self::New { pending } | Self::Redetected { pending, .. } => &pending.file_path,
            Self::PostedOnly { posted } => &posted.file_path,
        }
    }

    pub fn line_number(&self) -> Option<u32> {
        match self {
            Self::New { pending } | Self::Redetected { pending, .. } => pending.line_number,
            Self::PostedOnly { posted } => posted.line_number,
        }
    }
}
