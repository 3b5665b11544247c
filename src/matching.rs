//! Binding-offer matching rules.
//!
//! [`apply_action`] validates one action from one agent against the match state
//! and, if every check passes, applies it together with its cascading effects.
//! A failed check never mutates the state.

use crate::state::MatchState;
use crate::types::{Action, AgentId, FormationError, RejectionReason};

/// What a successful action did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// State changed; every client should see the new projection.
    Mutated,
    /// Ping: nothing changed.
    Unchanged,
}

/// Apply one action by `actor`. Checks run in a fixed order and the first failure wins.
pub fn apply_action(
    state: &mut MatchState,
    actor: AgentId,
    action: &Action,
    max_firm_size: usize,
) -> Result<Applied, FormationError> {
    if !state.contains(actor) {
        return Err(FormationError::UnknownAgent);
    }
    match *action {
        Action::Ping => Ok(Applied::Unchanged),
        Action::Apply { owner } => {
            apply(state, actor, owner, max_firm_size)?;
            Ok(Applied::Mutated)
        }
        Action::Withdraw { owner } => {
            withdraw(state, actor, owner)?;
            Ok(Applied::Mutated)
        }
        Action::Accept { owner, applicant } => {
            accept(state, actor, owner, applicant, max_firm_size)?;
            Ok(Applied::Mutated)
        }
        Action::Reject { owner, applicant } => {
            reject(state, actor, owner, applicant)?;
            Ok(Applied::Mutated)
        }
    }
}

fn apply(state: &mut MatchState, actor: AgentId, owner: AgentId, max_firm_size: usize) -> Result<(), FormationError> {
    if !state.contains(owner) {
        return Err(FormationError::InvalidFirm);
    }
    if owner == actor {
        return Err(FormationError::OwnFirm);
    }
    if state.is_employed(actor) {
        return Err(FormationError::AlreadyEmployed);
    }
    if state.has_hired(actor) {
        return Err(FormationError::HasHired);
    }
    if state.is_employed(owner) {
        return Err(FormationError::FirmInactive);
    }
    if state.is_full(owner, max_firm_size) {
        return Err(FormationError::FirmFull);
    }
    if state.is_pending(owner, actor) {
        return Err(FormationError::AlreadyApplied);
    }
    state.push_pending(owner, actor);
    Ok(())
}

fn withdraw(state: &mut MatchState, actor: AgentId, owner: AgentId) -> Result<(), FormationError> {
    if !state.contains(owner) {
        return Err(FormationError::InvalidFirm);
    }
    if state.is_employed(actor) {
        return Err(FormationError::WithdrawAfterAccept);
    }
    if !state.remove_pending(owner, actor) {
        return Err(FormationError::NothingToWithdraw);
    }
    Ok(())
}

fn accept(
    state: &mut MatchState,
    actor: AgentId,
    owner: AgentId,
    applicant: AgentId,
    max_firm_size: usize,
) -> Result<(), FormationError> {
    if owner != actor {
        return Err(FormationError::NotOwnerAccept);
    }
    if state.is_employed(owner) {
        return Err(FormationError::OwnerEmployed);
    }
    if !state.is_pending(owner, applicant) {
        return Err(FormationError::NotPending);
    }
    if state.is_employed(applicant) {
        return Err(FormationError::ApplicantEmployed);
    }
    if state.has_hired(applicant) {
        return Err(FormationError::ApplicantHasHired);
    }
    if state.is_full(owner, max_firm_size) {
        return Err(FormationError::OwnFirmFull);
    }

    state.remove_pending(owner, applicant);
    state.hire(owner, applicant);
    // Binding: the applicant's other applications are void.
    state.remove_from_all_pending(applicant);
    // The owner is committed and can no longer be anyone's applicant.
    state.remove_from_all_pending(owner);
    // The applicant's own firm can no longer operate.
    state.reject_all_incoming(applicant, RejectionReason::OwnerBecameInactive);
    Ok(())
}

fn reject(state: &mut MatchState, actor: AgentId, owner: AgentId, applicant: AgentId) -> Result<(), FormationError> {
    if owner != actor {
        return Err(FormationError::NotOwnerReject);
    }
    if !state.remove_pending(owner, applicant) {
        return Err(FormationError::NotPending);
    }
    // Whether this counts as a termination is decided at finalize.
    state.log_rejection(applicant, owner, RejectionReason::Rejected);
    Ok(())
}
