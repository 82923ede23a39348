use log::debug;

use crate::models::{RegisteredOpportunity, RegistrationStatus, Volunteer};

/// Outcome of a state-machine call. Invalid transitions are deliberate
/// no-ops rather than errors so retries stay safe; callers may surface a
/// `Noop` as a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Noop,
}

/// Register the volunteer for an opportunity.
///
/// A live registration (Registered or Completed) makes this a no-op and the
/// original application text stays put. A Cancelled record is replaced by
/// the fresh registration. Points and hours are never awarded here, they
/// accrue only through completion.
pub fn register(
    volunteer: &mut Volunteer,
    opportunity_id: u64,
    application_text: &str,
) -> Transition {
    let already_active = volunteer
        .registration_for(opportunity_id)
        .is_some_and(|r| r.status.is_active());
    if already_active {
        debug!("volunteer {} already registered for {opportunity_id}", volunteer.id);
        return Transition::Noop;
    }

    volunteer
        .registered_opportunities
        .retain(|r| r.opportunity_id != opportunity_id);
    volunteer.registered_opportunities.push(RegisteredOpportunity {
        opportunity_id,
        status: RegistrationStatus::Registered,
        application_text: application_text.to_string(),
    });
    Transition::Applied
}

/// Cancel a Registered record. Completed and Cancelled records, or a
/// missing one, are left untouched.
pub fn cancel(volunteer: &mut Volunteer, opportunity_id: u64) -> Transition {
    for registration in volunteer.registered_opportunities.iter_mut() {
        if registration.opportunity_id == opportunity_id
            && registration.status == RegistrationStatus::Registered
        {
            registration.status = RegistrationStatus::Cancelled;
            return Transition::Applied;
        }
    }
    Transition::Noop
}

/// Mark an opportunity as reviewed by this volunteer. Re-reviewing is a
/// no-op. The rating/comment payload is handed to the boundary that
/// collects it; this layer only tracks the reviewed flag.
pub fn submit_review(volunteer: &mut Volunteer, opportunity_id: u64) -> Transition {
    if volunteer.reviewed_opportunity_ids.insert(opportunity_id) {
        Transition::Applied
    } else {
        Transition::Noop
    }
}
