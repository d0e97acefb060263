//! Lifecycle guards for clients, agreements, and catalog services. Each
//! transition is a single guarded update; preconditions are evaluated
//! against freshly read state and violations are rejected with an error
//! naming the rule, never silently ignored.

use std::fmt;

use contracts::{AgreementStatus, ApiError, ClientStatus, ErrorCode, ServiceStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    InvalidClientTransition {
        client_id: String,
        from: ClientStatus,
        to: ClientStatus,
    },
    InvalidAgreementTransition {
        agreement_id: String,
        from: AgreementStatus,
        to: AgreementStatus,
    },
    InvalidServiceTransition {
        service_id: String,
        from: ServiceStatus,
        to: ServiceStatus,
    },
    /// Activating an agreement requires its client to be active right now.
    ClientNotActive {
        agreement_id: String,
        client_id: String,
        client_status: ClientStatus,
    },
    AgreementNotEditable {
        agreement_id: String,
        status: AgreementStatus,
    },
    ServiceArchived {
        service_id: String,
    },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidClientTransition { client_id, from, to } => write!(
                f,
                "client {client_id} cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::InvalidAgreementTransition {
                agreement_id,
                from,
                to,
            } => write!(
                f,
                "agreement {agreement_id} cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::InvalidServiceTransition {
                service_id,
                from,
                to,
            } => write!(
                f,
                "service {service_id} cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::ClientNotActive {
                agreement_id,
                client_id,
                client_status,
            } => write!(
                f,
                "agreement {agreement_id} cannot activate: client {client_id} is {}",
                client_status.as_str()
            ),
            Self::AgreementNotEditable {
                agreement_id,
                status,
            } => write!(
                f,
                "agreement {agreement_id} is {} and can only be edited in draft",
                status.as_str()
            ),
            Self::ServiceArchived { service_id } => {
                write!(f, "service {service_id} is archived and cannot be deleted")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

impl TransitionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::AgreementNotEditable { .. } => ErrorCode::AgreementNotEditable,
            _ => ErrorCode::StatusPreconditionFailed,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(self.error_code(), self.to_string(), None)
    }
}

/// `prospect -> active -> deactivated`, plus the explicit
/// `deactivated -> prospect` reset. No automatic transitions exist.
pub fn transition_client(
    client_id: &str,
    from: ClientStatus,
    to: ClientStatus,
) -> Result<ClientStatus, TransitionError> {
    let allowed = matches!(
        (from, to),
        (ClientStatus::Prospect, ClientStatus::Active)
            | (ClientStatus::Active, ClientStatus::Deactivated)
            | (ClientStatus::Deactivated, ClientStatus::Prospect)
    );
    if !allowed {
        return Err(TransitionError::InvalidClientTransition {
            client_id: client_id.to_string(),
            from,
            to,
        });
    }
    Ok(to)
}

/// `draft -> active` gated on the owning client being active at transition
/// time; `draft | active -> expired | cancelled`.
pub fn transition_agreement(
    agreement_id: &str,
    client_id: &str,
    from: AgreementStatus,
    to: AgreementStatus,
    client_status: ClientStatus,
) -> Result<AgreementStatus, TransitionError> {
    let allowed = matches!(
        (from, to),
        (AgreementStatus::Draft, AgreementStatus::Active)
            | (
                AgreementStatus::Draft | AgreementStatus::Active,
                AgreementStatus::Expired | AgreementStatus::Cancelled,
            )
    );
    if !allowed {
        return Err(TransitionError::InvalidAgreementTransition {
            agreement_id: agreement_id.to_string(),
            from,
            to,
        });
    }
    if to == AgreementStatus::Active && client_status != ClientStatus::Active {
        return Err(TransitionError::ClientNotActive {
            agreement_id: agreement_id.to_string(),
            client_id: client_id.to_string(),
            client_status,
        });
    }
    Ok(to)
}

/// `draft -> active -> inactive -> archived`, with `inactive -> active`
/// reactivation. Archived is terminal.
pub fn transition_service(
    service_id: &str,
    from: ServiceStatus,
    to: ServiceStatus,
) -> Result<ServiceStatus, TransitionError> {
    let allowed = matches!(
        (from, to),
        (ServiceStatus::Draft, ServiceStatus::Active)
            | (ServiceStatus::Active, ServiceStatus::Inactive)
            | (ServiceStatus::Inactive, ServiceStatus::Active)
            | (ServiceStatus::Inactive, ServiceStatus::Archived)
    );
    if !allowed {
        return Err(TransitionError::InvalidServiceTransition {
            service_id: service_id.to_string(),
            from,
            to,
        });
    }
    Ok(to)
}

/// Box and field changes are permitted only while the agreement is in draft.
pub fn ensure_agreement_editable(
    agreement_id: &str,
    status: AgreementStatus,
) -> Result<(), TransitionError> {
    if status != AgreementStatus::Draft {
        return Err(TransitionError::AgreementNotEditable {
            agreement_id: agreement_id.to_string(),
            status,
        });
    }
    Ok(())
}

/// Deleting a catalog service is only offered while it is not archived.
pub fn ensure_service_deletable(
    service_id: &str,
    status: ServiceStatus,
) -> Result<(), TransitionError> {
    if status == ServiceStatus::Archived {
        return Err(TransitionError::ServiceArchived {
            service_id: service_id.to_string(),
        });
    }
    Ok(())
}
