//! Oversized-request diagnostics.
//!
//! Very large allocations in a consensus engine are almost always a bug
//! (an entry batch that was never bounded, a corrupt length prefix). The
//! facade reports them to a [`DiagnosticSink`] before forwarding the
//! request. Reporting never changes the outcome of the allocation.
//!
//! The default sink prints to standard output, and adds a stack trace for
//! plain allocations. Install a [`Diagnostics`] with [`TracingSink`] or
//! [`NullSink`] to route or silence the reports.

use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;
use std::io::{self, Write};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Plain allocations above this many bytes are reported with a stack trace.
pub const ALLOCATE_THRESHOLD: usize = 20 * 1024 * 1024;

/// Zeroed allocations above this many bytes are reported.
///
/// The limit applies to the whole request, `count * size`, not to the
/// element size alone, so many small elements are reported the same way as
/// one large one.
pub const ZERO_ALLOCATE_THRESHOLD: usize = 10 * 1024 * 1024;

/// Which facade operation produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// [`crate::allocate`].
    Allocate,
    /// [`crate::zero_allocate`].
    ZeroAllocate,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocate => f.write_str("allocate"),
            Self::ZeroAllocate => f.write_str("zero_allocate"),
        }
    }
}

/// A request that crossed its diagnostic threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OversizedRequest {
    /// Operation that was requested.
    pub kind: RequestKind,
    /// Requested size in bytes (total bytes for zeroed allocations).
    pub size: usize,
    /// Process id of the requester.
    pub pid: u32,
}

impl OversizedRequest {
    /// Whether the report should carry a stack trace.
    #[must_use]
    pub const fn wants_backtrace(&self) -> bool {
        matches!(self.kind, RequestKind::Allocate)
    }
}

/// Receives oversized-request reports.
///
/// Sinks run inside the allocation path, possibly inside the global
/// allocator. They may allocate (nested reports are suppressed) but must
/// not panic.
pub trait DiagnosticSink: Sync {
    /// Handles one report.
    fn report(&self, request: &OversizedRequest);
}

/// Writes one line per report to standard output, followed by a stack
/// trace for plain allocations.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn report(&self, request: &OversizedRequest) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}: {} {}", request.pid, request.kind, request.size);
        if request.wants_backtrace() {
            let _ = writeln!(out, "{}", Backtrace::force_capture());
        }
        let _ = out.flush();
    }
}

/// Emits each report as a `tracing` warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, request: &OversizedRequest) {
        if request.wants_backtrace() {
            tracing::warn!(
                pid = request.pid,
                size = request.size,
                kind = %request.kind,
                backtrace = %Backtrace::force_capture(),
                "oversized heap request"
            );
        } else {
            tracing::warn!(
                pid = request.pid,
                size = request.size,
                kind = %request.kind,
                "oversized heap request"
            );
        }
    }
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _request: &OversizedRequest) {}
}

/// Thresholds plus the sink that receives reports.
#[derive(Clone, Copy)]
pub struct Diagnostics {
    allocate_threshold: usize,
    zero_allocate_threshold: usize,
    sink: &'static dyn DiagnosticSink,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("allocate_threshold", &self.allocate_threshold)
            .field("zero_allocate_threshold", &self.zero_allocate_threshold)
            .finish_non_exhaustive()
    }
}

impl Diagnostics {
    /// Creates diagnostics with the default thresholds.
    #[must_use]
    pub const fn new(sink: &'static dyn DiagnosticSink) -> Self {
        Self {
            allocate_threshold: ALLOCATE_THRESHOLD,
            zero_allocate_threshold: ZERO_ALLOCATE_THRESHOLD,
            sink,
        }
    }

    /// Diagnostics that never report.
    #[must_use]
    pub const fn silent() -> Self {
        Self::new(&NullSink)
    }

    /// Sets the plain allocation threshold.
    #[must_use]
    pub const fn allocate_threshold(mut self, bytes: usize) -> Self {
        self.allocate_threshold = bytes;
        self
    }

    /// Sets the zeroed allocation threshold.
    #[must_use]
    pub const fn zero_allocate_threshold(mut self, bytes: usize) -> Self {
        self.zero_allocate_threshold = bytes;
        self
    }

    /// Returns the plain allocation threshold.
    #[must_use]
    pub const fn allocate_limit(&self) -> usize {
        self.allocate_threshold
    }

    /// Returns the zeroed allocation threshold.
    #[must_use]
    pub const fn zero_allocate_limit(&self) -> usize {
        self.zero_allocate_threshold
    }
}

static DEFAULT_DIAGNOSTICS: Diagnostics = Diagnostics::new(&StdoutSink);

static ACTIVE: AtomicPtr<Diagnostics> =
    AtomicPtr::new(ptr::addr_of!(DEFAULT_DIAGNOSTICS).cast_mut());

thread_local! {
    static REPORTING: Cell<bool> = const { Cell::new(false) };
}

/// Installs process-wide diagnostics.
///
/// Like the heap table itself, this belongs in the configuration window
/// before concurrent allocation starts.
pub fn set_diagnostics(diagnostics: &'static Diagnostics) {
    ACTIVE.store(ptr::from_ref(diagnostics).cast_mut(), Ordering::Release);
}

/// Restores the default stdout diagnostics.
pub fn reset_diagnostics() {
    set_diagnostics(&DEFAULT_DIAGNOSTICS);
}

/// Returns the active diagnostics.
#[must_use]
pub fn diagnostics() -> &'static Diagnostics {
    // SAFETY: ACTIVE only ever holds pointers derived from `&'static`.
    unsafe { &*ACTIVE.load(Ordering::Acquire) }
}

pub(crate) fn check_allocate(size: usize) {
    let active = diagnostics();
    if size > active.allocate_threshold {
        emit(active, RequestKind::Allocate, size);
    }
}

pub(crate) fn check_zero_allocate(count: usize, size: usize) {
    let active = diagnostics();
    if let Some(total) = active.oversized_zero_allocate(count, size) {
        emit(active, RequestKind::ZeroAllocate, total);
    }
}

impl Diagnostics {
    fn oversized_zero_allocate(&self, count: usize, size: usize) -> Option<usize> {
        let total = count.saturating_mul(size);
        (total > self.zero_allocate_threshold).then_some(total)
    }
}

fn emit(active: &Diagnostics, kind: RequestKind, size: usize) {
    // The sink may allocate; a report raised from inside a report is dropped.
    let entered = REPORTING
        .try_with(|flag| !flag.replace(true))
        .unwrap_or(false);
    if !entered {
        return;
    }
    let request = OversizedRequest {
        kind,
        size,
        pid: std::process::id(),
    };
    active.sink.report(&request);
    let _ = REPORTING.try_with(|flag| flag.set(false));
}
