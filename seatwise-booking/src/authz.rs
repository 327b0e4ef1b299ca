use seatwise_core::model::{ClassOffering, Reservation};
use seatwise_core::principal::{Principal, Role};

use crate::error::BookingError;

/// Gate an operation on a declared set of allowed roles. Every operation
/// does this once up front instead of scattering role comparisons through
/// its body.
pub fn require_role(principal: &Principal, allowed: &[Role]) -> Result<(), BookingError> {
    if allowed.contains(&principal.role) {
        Ok(())
    } else {
        Err(BookingError::Forbidden(format!(
            "role {} may not perform this operation",
            principal.role
        )))
    }
}

/// May this principal act on the reservation itself (view, settle)?
/// Owning student or admin.
pub fn owns_reservation(principal: &Principal, reservation: &Reservation) -> bool {
    principal.is_admin() || principal.id == reservation.student_id
}

/// May this principal cancel the reservation? Owning student, the
/// offering's teacher, or admin.
pub fn may_cancel(
    principal: &Principal,
    reservation: &Reservation,
    offering: &ClassOffering,
) -> bool {
    principal.is_admin()
        || principal.id == reservation.student_id
        || (principal.role == Role::Teacher && principal.id == offering.teacher_id)
}

/// May this principal modify the offering? Owning teacher or admin.
pub fn may_manage_offering(principal: &Principal, offering: &ClassOffering) -> bool {
    principal.is_admin()
        || (principal.role == Role::Teacher && principal.id == offering.teacher_id)
}
