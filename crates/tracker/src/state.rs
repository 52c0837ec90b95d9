//! Submission transition table.
//!
//! [`transition`] is a pure function of the current state and what the
//! gateway said. Downstream accounting keys off the exact resulting states,
//! so every `(state, event)` pair maps to exactly one [`Step`].

use do_ecf_core::SendState;
use gateway::GatewayStatus;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The submission never reached the gateway.
    ConnectionFailed,
    /// HTTP 200 carrying a DGII verdict.
    Received(GatewayStatus),
    /// HTTP 408: signed, but DGII could not be reached.
    AuthorityTimeout,
    /// HTTP 400: payload failed schema validation.
    SchemaRejected,
    /// Any other reply, including a 200 without a known status.
    UnexpectedReply,
    /// Status query answer.
    Polled(GatewayStatus),
    /// Document signed locally while DGII is unreachable.
    ContingencyDeclared,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ConnectionFailed => f.write_str("connection failure"),
            Event::Received(status) => write!(f, "gateway status {status}"),
            Event::AuthorityTimeout => f.write_str("authority timeout"),
            Event::SchemaRejected => f.write_str("schema rejection"),
            Event::UnexpectedReply => f.write_str("unexpected reply"),
            Event::Polled(status) => write!(f, "polled status {status}"),
            Event::ContingencyDeclared => f.write_str("contingency declaration"),
        }
    }
}

/// What to do with tracking id, security code, signature time and signed
/// document carried by the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierPolicy {
    Keep,
    FillEmpty,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effects {
    pub identifiers: IdentifierPolicy,
    pub log_remarks: bool,
    pub cancel: bool,
}

impl Effects {
    pub const NONE: Effects = Effects {
        identifiers: IdentifierPolicy::Keep,
        log_remarks: false,
        cancel: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    AlreadyDelivered,
    AlreadyRefused,
    Validation,
    ServiceUnreachable,
    IllegalTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Move { to: SendState, effects: Effects },
    Stay,
    Fail(Failure),
}

pub fn verdict_state(status: GatewayStatus) -> SendState {
    match status {
        GatewayStatus::Aceptado => SendState::DeliveredAccepted,
        GatewayStatus::AceptadoCondicional => SendState::ConditionallyAccepted,
        GatewayStatus::EnProceso => SendState::DeliveredPending,
        GatewayStatus::Rechazado => SendState::DeliveredRefused,
    }
}

/// Identifiers obtained while the authority was unreachable are replaced.
/// Everywhere else, contingency resends included, only empty fields are
/// filled so identifiers set at signature time survive.
fn identifier_policy(current: SendState) -> IdentifierPolicy {
    match current {
        SendState::SignedPending => IdentifierPolicy::Replace,
        _ => IdentifierPolicy::FillEmpty,
    }
}

fn verdict_effects(status: GatewayStatus, identifiers: IdentifierPolicy) -> Effects {
    match status {
        GatewayStatus::Aceptado | GatewayStatus::EnProceso => Effects {
            identifiers,
            ..Effects::NONE
        },
        GatewayStatus::AceptadoCondicional => Effects {
            identifiers,
            log_remarks: true,
            cancel: false,
        },
        GatewayStatus::Rechazado => Effects {
            identifiers: IdentifierPolicy::Keep,
            log_remarks: true,
            cancel: true,
        },
    }
}

pub fn transition(current: SendState, event: Event) -> Step {
    match event {
        Event::Polled(status) => {
            let to = verdict_state(status);
            if !current.awaits_verdict() || to == current {
                Step::Stay
            } else {
                Step::Move {
                    to,
                    effects: verdict_effects(status, IdentifierPolicy::Keep),
                }
            }
        }
        Event::ContingencyDeclared => match current {
            SendState::Contingency => Step::Stay,
            SendState::ToSend
            | SendState::NotSent
            | SendState::SignedPending
            | SendState::ServiceUnreachable
            | SendState::Invalid => Step::Move {
                to: SendState::Contingency,
                effects: Effects {
                    identifiers: identifier_policy(current),
                    ..Effects::NONE
                },
            },
            s if s.is_delivered() => Step::Fail(Failure::AlreadyDelivered),
            _ => Step::Fail(Failure::IllegalTransition),
        },
        _ if current.is_delivered() => Step::Fail(Failure::AlreadyDelivered),
        _ if current.is_terminal() => Step::Fail(Failure::AlreadyRefused),
        Event::ConnectionFailed => Step::Move {
            to: SendState::NotSent,
            effects: Effects::NONE,
        },
        Event::Received(status) => Step::Move {
            to: verdict_state(status),
            effects: verdict_effects(status, identifier_policy(current)),
        },
        Event::AuthorityTimeout => Step::Move {
            to: SendState::SignedPending,
            effects: Effects::NONE,
        },
        Event::SchemaRejected => Step::Fail(Failure::Validation),
        Event::UnexpectedReply => Step::Fail(Failure::ServiceUnreachable),
    }
}
