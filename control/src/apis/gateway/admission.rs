//! Admission verdicts shared by every kind

use std::fmt;

/// Condition reasons (Gateway API reason strings where one exists)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    Accepted,
    Programmed,
    ResolvedRefs,
    Pending,
    /// Class belongs to another controller; never reported
    UnmanagedController,
    InvalidParameters,
    Invalid,
    ListenersNotValid,
    PortUnavailable,
    UnsupportedProtocol,
    UnsupportedValue,
    InvalidCertificateRef,
    InvalidTlsConfiguration,
    ListenerNameConflict,
    ProtocolConflict,
    HostnameConflict,
    NoConflicts,
    NoMatchingParent,
    NotAllowedByListeners,
    NoMatchingListenerHostname,
}

impl Reason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Reason::Accepted => "Accepted",
            Reason::Programmed => "Programmed",
            Reason::ResolvedRefs => "ResolvedRefs",
            Reason::Pending => "Pending",
            Reason::UnmanagedController => "UnmanagedController",
            Reason::InvalidParameters => "InvalidParameters",
            Reason::Invalid => "Invalid",
            Reason::ListenersNotValid => "ListenersNotValid",
            Reason::PortUnavailable => "PortUnavailable",
            Reason::UnsupportedProtocol => "UnsupportedProtocol",
            Reason::UnsupportedValue => "UnsupportedValue",
            Reason::InvalidCertificateRef => "InvalidCertificateRef",
            Reason::InvalidTlsConfiguration => "InvalidTLSConfiguration",
            Reason::ListenerNameConflict => "ListenerNameConflict",
            Reason::ProtocolConflict => "ProtocolConflict",
            Reason::HostnameConflict => "HostnameConflict",
            Reason::NoConflicts => "NoConflicts",
            Reason::NoMatchingParent => "NoMatchingParent",
            Reason::NotAllowedByListeners => "NotAllowedByListeners",
            Reason::NoMatchingListenerHostname => "NoMatchingListenerHostname",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: Reason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Rejections that must not produce a status write
    pub fn is_silent(&self) -> bool {
        self.reason == Reason::UnmanagedController
    }
}

/// Admission outcome for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
    /// Waiting for an object that does not exist yet
    Pending { message: String },
}

impl Verdict {
    pub fn rejected(reason: Reason, message: impl Into<String>) -> Self {
        Verdict::Rejected(Rejection::new(reason, message))
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Verdict::Pending {
            message: message.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}
