//! Migration planning — a pure function from what the nodes currently look
//! like to the next step of the handover.
//!
//! | step | source                 | destination            |
//! |------|------------------------|------------------------|
//! | 1    | attached               | → `Secondary{warm}`    |
//! | 2    | → `AttachedStale(g0)`  | warm secondary         |
//! | 3-4  | stale                  | → `AttachedMulti(g1)`  |
//! | 5    | stale                  | catch up to source     |
//! | 6    | → `Secondary{warm}`    | multi                  |
//! | 7    | secondary              | → `AttachedSingle(g1)` |

use strata_core::{AttachmentMode, Generation, LocationConf, LocationMode, NodeId};
use strata_generation::Issued;

/// Snapshot of both nodes and the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub source: LocationConf,
    pub destination: LocationConf,
    pub destination_node: NodeId,
    pub latest: Option<Issued>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    /// Make the destination a warm secondary and prefetch.
    WarmDestination,
    /// Mark the source stale under its current generation.
    DemoteSource { generation: Generation },
    /// Attach the destination in multi mode. `None` means a new generation
    /// must be issued; `Some` reuses one already issued to the destination.
    AttachDestination { generation: Option<Generation> },
    /// Wait for the destination to reach the source's positions.
    CatchUp,
    /// Release the source to a warm secondary.
    ReleaseSource,
    /// Make the destination the single attached location.
    PromoteDestination { generation: Generation },
    Done,
}

/// Decide the next step. `caught_up` records whether the catch-up wait has
/// already succeeded in this run; it is the only input not derived from the
/// nodes, and losing it merely repeats the wait.
///
/// Returns `None` when the source holds no attachment to hand over.
pub fn next_step(observed: &Observed, caught_up: bool) -> Option<MigrationStep> {
    let source = observed.source.mode;
    let destination = observed.destination.mode;

    match destination {
        LocationMode::AttachedSingle { .. } => Some(if source.is_attached() {
            MigrationStep::ReleaseSource
        } else {
            MigrationStep::Done
        }),
        LocationMode::AttachedMulti { generation } => Some(if !source.is_attached() {
            MigrationStep::PromoteDestination { generation }
        } else if caught_up {
            MigrationStep::ReleaseSource
        } else {
            MigrationStep::CatchUp
        }),
        _ => match source.attachment() {
            Some((AttachmentMode::Stale, g0)) => {
                let reusable = observed
                    .latest
                    .filter(|l| l.node_id == observed.destination_node && l.generation > g0)
                    .map(|l| l.generation);
                Some(MigrationStep::AttachDestination {
                    generation: reusable,
                })
            }
            Some((_, g0)) => Some(
                if destination == (LocationMode::Secondary { warm: true }) {
                    MigrationStep::DemoteSource { generation: g0 }
                } else {
                    MigrationStep::WarmDestination
                },
            ),
            None => None,
        },
    }
}
