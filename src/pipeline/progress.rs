use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tokio::sync::watch;

use super::AssetReport;
use crate::library::UploadItem;

/// Units of work done so far in an export batch.
///
/// Each asset is one unit, plus one more when it needs an on-device JPEG
/// conversion. `total` grows as assets discover they need converting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportProgress {
    pub completed: usize,
    pub total: usize,
}

impl ExportProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// How an asset gets its JPEG for re-upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JpegPlan {
    NotRequested,
    ReadyMade,
    Convert,
}

/// Messages from per-asset tasks to the coordinator.
#[derive(Debug)]
pub(crate) enum AssetEvent {
    Resolved {
        index: usize,
        plan: JpegPlan,
    },
    Converted {
        index: usize,
    },
    Prepared {
        path: PathBuf,
        is_favorite: bool,
    },
    Finished {
        index: usize,
        report: AssetReport,
    },
}

/// Sole owner of the batch's shared state. Per-asset tasks only send it
/// events, so every update is applied in arrival order by one writer.
/// Tasks are keyed by their selection index.
pub(crate) struct Coordinator {
    progress: ExportProgress,
    publisher: watch::Sender<ExportProgress>,
    awaiting_conversion: HashSet<usize>,
    skip_conversion: HashSet<usize>,
    prepared: BTreeMap<PathBuf, bool>,
    reports: Vec<(usize, AssetReport)>,
}

impl Coordinator {
    pub(crate) fn new(selected: usize, publisher: watch::Sender<ExportProgress>) -> Self {
        let progress = ExportProgress {
            completed: 0,
            total: selected,
        };
        publisher.send_replace(progress);
        Self {
            progress,
            publisher,
            awaiting_conversion: HashSet::new(),
            skip_conversion: HashSet::new(),
            prepared: BTreeMap::new(),
            reports: Vec::new(),
        }
    }

    pub(crate) fn handle(&mut self, event: AssetEvent) {
        match event {
            AssetEvent::Resolved { index, plan } => match plan {
                JpegPlan::NotRequested => {}
                JpegPlan::ReadyMade => {
                    self.skip_conversion.insert(index);
                }
                JpegPlan::Convert => {
                    self.awaiting_conversion.insert(index);
                    self.progress.total += 1;
                    self.publish();
                }
            },
            AssetEvent::Converted { index } => {
                if self.awaiting_conversion.remove(&index) {
                    self.progress.completed += 1;
                    self.publish();
                }
            }
            AssetEvent::Prepared { path, is_favorite } => {
                self.prepared.insert(path, is_favorite);
            }
            AssetEvent::Finished { index, report } => {
                // A conversion that never happened still owes its unit
                let owed = usize::from(self.awaiting_conversion.remove(&index));
                self.progress.completed += 1 + owed;
                self.publish();
                self.reports.push((index, report));
            }
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.progress);
    }

    pub(crate) fn progress(&self) -> ExportProgress {
        self.progress
    }

    /// Assets whose ready-made JPEG made conversion unnecessary.
    pub(crate) fn skipped_conversions(&self) -> usize {
        self.skip_conversion.len()
    }

    /// Reports in selection order, and the files prepared for upload.
    pub(crate) fn finish(mut self) -> (Vec<AssetReport>, Vec<UploadItem>) {
        self.reports.sort_by_key(|(index, _)| *index);
        let reports = self.reports.into_iter().map(|(_, r)| r).collect();
        let items = self
            .prepared
            .into_iter()
            .map(|(path, is_favorite)| UploadItem { path, is_favorite })
            .collect();
        (reports, items)
    }
}
