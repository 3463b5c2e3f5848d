//! Resolution session: sole owner of a scanned document and the only place
//! reference status changes, enforcing the resolution state machine.

use std::path::Path;

use crate::error::Error;
use crate::search::classify;
use crate::types::{DocumentContext, Reference, ReferenceStatus, ReferenceUpdate, SearchOutcome, SearchRequest};

/// Whether a search outcome may move a reference out of `from`.
/// `Existing` and `Updated` are never searched again.
pub const fn search_may_leave(from: ReferenceStatus) -> bool {
    return matches!(
        from,
        ReferenceStatus::Missing | ReferenceStatus::Ambiguous | ReferenceStatus::NotFound | ReferenceStatus::Failed
    );
}

/// Per-status tallies over a session's references.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    /// References waiting for a user pick.
    pub ambiguous: usize,
    /// References whose file exists.
    pub existing: usize,
    /// References that failed to scan or search.
    pub failed: usize,
    /// References not yet searched for.
    pub missing: usize,
    /// References searched for without result.
    pub not_found: usize,
    /// References with an accepted replacement.
    pub updated: usize,
}

/// Owns one `DocumentContext` for the length of a resolution session.
/// Callers read references through it and change them only via its methods.
#[derive(Debug)]
pub struct Session {
    /// The scanned document.
    context: DocumentContext,
}

impl Session {
    /// References with an accepted replacement, in index order.
    pub fn accepted(&self) -> impl Iterator<Item = &Reference> {
        return self
            .context
            .references
            .iter()
            .filter(|r| return r.status == ReferenceStatus::Updated && r.selected_candidate.is_some());
    }

    /// Apply one search update.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownReference` for an out-of-range index, or
    /// `Error::InvalidTransition` if the reference may not be searched again.
    pub fn apply(&mut self, update: &ReferenceUpdate) -> Result<(), Error> {
        return self.apply_batch(std::slice::from_ref(update));
    }

    /// Apply a whole batch of updates, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the first validation error; nothing is changed in that case.
    pub fn apply_batch(&mut self, updates: &[ReferenceUpdate]) -> Result<(), Error> {
        for update in updates {
            self.validate(update)?;
        }
        for update in updates {
            let reference = self.reference_mut(update.index)?;
            apply_outcome(reference, &update.outcome);
        }
        return Ok(());
    }

    /// Read-only view of the scanned document.
    pub const fn context(&self) -> &DocumentContext {
        return &self.context;
    }

    /// Tally references per current status.
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for reference in &self.context.references {
            let slot = match reference.status {
                ReferenceStatus::Ambiguous => &mut counts.ambiguous,
                ReferenceStatus::Existing => &mut counts.existing,
                ReferenceStatus::Failed => &mut counts.failed,
                ReferenceStatus::Missing => &mut counts.missing,
                ReferenceStatus::NotFound => &mut counts.not_found,
                ReferenceStatus::Updated => &mut counts.updated,
            };
            *slot = slot.saturating_add(1);
        }
        return counts;
    }

    /// Give up ownership of the document, typically to save it.
    pub fn into_context(self) -> DocumentContext {
        return self.context;
    }

    /// Take ownership of a freshly scanned document.
    pub const fn new(context: DocumentContext) -> Self {
        return Self { context };
    }

    /// Look up a reference by index.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownReference` if no reference has this index.
    pub fn reference(&self, index: usize) -> Result<&Reference, Error> {
        return self
            .context
            .references
            .get(index)
            .ok_or(Error::UnknownReference { index });
    }

    /// Mutable lookup, private so every change goes through the state machine.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownReference` if no reference has this index.
    fn reference_mut(&mut self, index: usize) -> Result<&mut Reference, Error> {
        return self
            .context
            .references
            .get_mut(index)
            .ok_or(Error::UnknownReference { index });
    }

    /// All references in index order.
    pub fn references(&self) -> &[Reference] {
        return &self.context.references;
    }

    /// Snapshots of the references a new search pass should cover.
    /// `Failed` references are only included when the caller asks for a retry.
    pub fn searchable(&self, retry_failed: bool) -> Vec<SearchRequest> {
        return self
            .context
            .references
            .iter()
            .filter(|r| {
                return match r.status {
                    ReferenceStatus::Failed => retry_failed,
                    other => search_may_leave(other),
                };
            })
            .map(SearchRequest::from)
            .collect();
    }

    /// The user picks one of an ambiguous reference's candidates.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the reference is `Ambiguous`,
    /// or `Error::NotACandidate` if `candidate` is not in its list.
    pub fn select(&mut self, index: usize, candidate: &Path) -> Result<(), Error> {
        let reference = self.reference_mut(index)?;
        if reference.status != ReferenceStatus::Ambiguous {
            return Err(Error::InvalidTransition {
                from: reference.status,
                index,
                to: ReferenceStatus::Updated,
            });
        }
        let Some(chosen) = reference.candidates.iter().find(|c| return c.as_path() == candidate).cloned() else {
            return Err(Error::NotACandidate {
                index,
                path: candidate.to_path_buf(),
            });
        };

        reference.message = format!("selected {} of {} candidates", chosen.display(), reference.candidates.len());
        reference.selected_candidate = Some(chosen);
        reference.status = ReferenceStatus::Updated;
        tracing::debug!(index, "ambiguous reference resolved by selection");
        return Ok(());
    }

    /// Check an update against the state machine without applying it.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownReference` or `Error::InvalidTransition`.
    fn validate(&self, update: &ReferenceUpdate) -> Result<(), Error> {
        let reference = self.reference(update.index)?;
        if !search_may_leave(reference.status) {
            return Err(Error::InvalidTransition {
                from: reference.status,
                index: update.index,
                to: update.outcome.status(),
            });
        }
        return Ok(());
    }
}

/// Write a search outcome onto a reference. Ambiguous outcomes with fewer
/// than two candidates are reclassified so the status invariants hold.
fn apply_outcome(reference: &mut Reference, outcome: &SearchOutcome) {
    let outcome = match outcome {
        SearchOutcome::Ambiguous(candidates) if candidates.len() < 2 => classify(candidates.clone()),
        other => other.clone(),
    };

    match outcome {
        SearchOutcome::Ambiguous(candidates) => {
            reference.message = format!("{} candidates found; pick one", candidates.len());
            reference.candidates = candidates;
            reference.selected_candidate = None;
            reference.status = ReferenceStatus::Ambiguous;
        },
        SearchOutcome::Failed(reason) => {
            reference.candidates.clear();
            reference.message = reason;
            reference.selected_candidate = None;
            reference.status = ReferenceStatus::Failed;
        },
        SearchOutcome::NotFound => {
            reference.candidates.clear();
            reference.message = format!("no file named {} under the search roots", reference.file_name);
            reference.selected_candidate = None;
            reference.status = ReferenceStatus::NotFound;
        },
        SearchOutcome::Resolved(path) => {
            reference.message = format!("found {}", path.display());
            reference.candidates = vec![path.clone()];
            reference.selected_candidate = Some(path);
            reference.status = ReferenceStatus::Updated;
        },
    }
}
