use crate::models::DoctorIdSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Pending,
    Approved,
}

/// Pure decision over required vs. received approvals, recomputed after
/// every decision rather than cached as separate state. A request is
/// approved only on set equality, so a batched request is all-or-nothing
/// across its whole doctor union.
pub fn aggregate_approvals(affected: &DoctorIdSet, approved: &DoctorIdSet) -> ApprovalOutcome {
    if !affected.is_empty() && approved == affected {
        ApprovalOutcome::Approved
    } else {
        ApprovalOutcome::Pending
    }
}
