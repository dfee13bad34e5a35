use chronicle_events::EventError;
use chronicle_manager::ManagerError;
use chronicle_store::StoreError;

/// Exit codes a CLI wrapper reports (spec.md §6): 0 success, 1 repair
/// declined, 2 integrity failure, 3 backend unavailable, 4 bad input.
pub const SUCCESS: i32 = 0;
pub const REPAIR_DECLINED: i32 = 1;
pub const INTEGRITY_FAILURE: i32 = 2;
pub const BACKEND_UNAVAILABLE: i32 = 3;
pub const BAD_INPUT: i32 = 4;

pub fn code_for_manager_error(error: &ManagerError) -> i32 {
    match error {
        ManagerError::Event(EventError::BackendUnavailable(_)) => BACKEND_UNAVAILABLE,
        ManagerError::Event(EventError::DigestMismatch { .. } | EventError::ImmutabilityViolation(_)) => INTEGRITY_FAILURE,
        ManagerError::Store(StoreError::BackendUnavailable(_)) => BACKEND_UNAVAILABLE,
        ManagerError::Store(StoreError::DigestMismatch(_) | StoreError::ImmutabilityViolation(_)) => INTEGRITY_FAILURE,
        ManagerError::Materializer(_) => INTEGRITY_FAILURE,
        ManagerError::TargetNotOrphan(_, _) => BAD_INPUT,
        _ => BAD_INPUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_unavailable_event_error_maps_to_its_own_code() {
        let error = ManagerError::Event(EventError::BackendUnavailable("down".to_string()));
        assert_eq!(code_for_manager_error(&error), BACKEND_UNAVAILABLE);
    }

    #[test]
    fn digest_mismatch_maps_to_integrity_failure() {
        let error = ManagerError::Event(EventError::DigestMismatch { event_id: "e1".to_string() });
        assert_eq!(code_for_manager_error(&error), INTEGRITY_FAILURE);
    }
}
