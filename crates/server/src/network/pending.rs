//! Pending-URB table
//!
//! Correlates "the host is waiting for IN data on endpoint N" with "the
//! device produced data for endpoint N". The session inserts; the completion
//! path takes. Both run on different tasks, so every access goes through one
//! short-lived lock that is never held across I/O.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An IN transfer the host has submitted and not yet seen completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Host-assigned sequence number, echoed back in RET_SUBMIT
    pub seqnum: u32,
    /// Device id from the submit, echoed back in RET_SUBMIT
    pub devid: u32,
    /// Endpoint number
    pub ep: u32,
    /// Requested transfer length; completions are truncated to it
    pub length: u32,
}

/// Ordered table of outstanding IN requests for one session
///
/// Requests on the same endpoint complete in submission order.
#[derive(Debug, Default)]
pub struct PendingUrbTable {
    requests: Mutex<VecDeque<PendingRequest>>,
}

impl PendingUrbTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a request; returns how many are now outstanding on its endpoint
    pub fn insert(&self, request: PendingRequest) -> usize {
        let mut requests = self.lock();
        requests.push_back(request);
        requests.iter().filter(|r| r.ep == request.ep).count()
    }

    /// Remove and return the oldest request waiting on `ep`
    pub fn take(&self, ep: u32) -> Option<PendingRequest> {
        let mut requests = self.lock();
        let index = requests.iter().position(|r| r.ep == ep)?;
        requests.remove(index)
    }

    /// Remove the request with sequence number `seqnum`, if still outstanding
    pub fn remove_seqnum(&self, seqnum: u32) -> Option<PendingRequest> {
        let mut requests = self.lock();
        let index = requests.iter().position(|r| r.seqnum == seqnum)?;
        requests.remove(index)
    }

    /// Drop every outstanding request; returns how many were abandoned
    pub fn clear(&self) -> usize {
        let mut requests = self.lock();
        let abandoned = requests.len();
        requests.clear();
        abandoned
    }

    /// Number of requests outstanding on `ep`
    pub fn outstanding_on(&self, ep: u32) -> usize {
        self.lock().iter().filter(|r| r.ep == ep).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
