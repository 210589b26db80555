//! Parent/child result handshake over the session segment.
//!
//! A child writes its outcome once and exits; the parent consumes it exactly
//! once. A single-point edit is handed on to the monitor tier by leaving
//! [`ModCode::ForwardToMonitor`] behind instead of clearing the code.

use super::layout::ModCode;
use super::segment::AbeShareSegment;

/// What a finished ancillary process did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildResult {
    /// Nothing the parent needs to re-read.
    NoActionRequired,
    /// One point of the point-cloud segment was edited.
    PositionValueEdit {
        /// Index in the point-cloud segment.
        point: u32,
        /// New value.
        value: f64,
    },
    /// Soundings inside the edit area were invalidated on disk.
    AreaInvalidated,
    /// The layer list changed.
    LayersChanged,
    /// Files were queued for deletion.
    FilesDeleted,
}

impl ChildResult {
    /// Code written to the segment for this result.
    pub const fn modcode(&self) -> ModCode {
        match self {
            ChildResult::NoActionRequired => ModCode::NoActionRequired,
            ChildResult::PositionValueEdit { .. } => ModCode::PositionValueEdit,
            ChildResult::AreaInvalidated => ModCode::AreaInvalidated,
            ChildResult::LayersChanged => ModCode::LayersChanged,
            ChildResult::FilesDeleted => ModCode::FilesDeleted,
        }
    }
}

/// Publish a child's result. The payload and the code change under one lock.
pub fn report_result(segment: &AbeShareSegment, result: &ChildResult) {
    let mut guard = segment.lock();
    if let ChildResult::PositionValueEdit { point, value } = *result {
        guard.set_modified(point, value);
    }
    guard.set_modcode(result.modcode());
    log::debug!("{}: child reported {:?}", segment.key(), result.modcode());
}

/// Consume a pending child result.
///
/// Returns `None` when nothing is pending, when the code was already forwarded
/// to the monitor tier, or when the raw code is unknown (logged and cleared).
pub fn take_result(segment: &AbeShareSegment) -> Option<ChildResult> {
    let mut guard = segment.lock();
    let code = match segment.modcode() {
        Some(ModCode::None) | Some(ModCode::ForwardToMonitor) => return None,
        Some(code) => code,
        None => {
            log::warn!("{}: unknown modcode in segment, clearing", segment.key());
            guard.set_modcode(ModCode::None);
            return None;
        }
    };

    let result = match code {
        ModCode::PositionValueEdit => {
            let (point, value) = guard.modified();
            guard.set_modcode(ModCode::ForwardToMonitor);
            return Some(ChildResult::PositionValueEdit { point, value });
        }
        ModCode::NoActionRequired => ChildResult::NoActionRequired,
        ModCode::AreaInvalidated => ChildResult::AreaInvalidated,
        ModCode::LayersChanged => ChildResult::LayersChanged,
        ModCode::FilesDeleted => ChildResult::FilesDeleted,
        ModCode::None | ModCode::ForwardToMonitor => return None,
    };
    guard.set_modcode(ModCode::None);
    Some(result)
}

/// Second-tier consumption of a forwarded point edit.
pub fn take_forwarded_edit(segment: &AbeShareSegment) -> Option<(u32, f64)> {
    let mut guard = segment.lock();
    if segment.modcode() != Some(ModCode::ForwardToMonitor) {
        return None;
    }
    let edit = guard.modified();
    guard.set_modcode(ModCode::None);
    Some(edit)
}
