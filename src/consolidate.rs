//! Selection of complete studies.
//!
//! A study qualifies only when every required canonical label is present
//! among its series. For each required label the last matching series in
//! stored (discovery) order is kept.

use crate::{config::SeriesToProcess, metadata::SeriesRecord};

use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// The series chosen for one required label.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedSeries {
    pub label: String,
    pub slot: String,
    pub record: SeriesRecord,
}

/// A study with exactly one series per required label, in configured order.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsolidatedStudy {
    pub study_id: String,
    pub patient_id: String,
    pub selections: Vec<SelectedSeries>,
}

impl ConsolidatedStudy {
    pub fn selection(&self, label: &str) -> Option<&SelectedSeries> {
        self.selections.iter().find(|selected| selected.label == label)
    }
}

/// Group records by study, ascending by study id. Records keep their
/// stored order within a group.
pub fn group_by_study(records: &[SeriesRecord]) -> BTreeMap<&str, Vec<&SeriesRecord>> {
    let mut groups: BTreeMap<&str, Vec<&SeriesRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.study_id.as_str()).or_default().push(record);
    }
    groups
}

pub fn consolidate(records: &[SeriesRecord], required: &SeriesToProcess) -> Vec<ConsolidatedStudy> {
    group_by_study(records)
        .into_iter()
        .filter_map(|(study_id, group)| consolidate_study(study_id, &group, required))
        .collect()
}

fn consolidate_study(
    study_id: &str,
    group: &[&SeriesRecord],
    required: &SeriesToProcess,
) -> Option<ConsolidatedStudy> {
    let present: HashSet<&str> = group
        .iter()
        .filter_map(|record| record.canonical_label.resolved())
        .filter(|label| required.contains(label))
        .collect();
    if present.len() != required.len() {
        debug!(
            study_id,
            missing = ?required.labels().filter(|l| !present.contains(l)).collect::<Vec<_>>(),
            "study lacks required series"
        );
        return None;
    }

    let selections: Vec<SelectedSeries> = required
        .iter()
        .filter_map(|(label, slot)| {
            group
                .iter()
                .rev()
                .find(|record| record.canonical_label.resolved() == Some(label))
                .map(|record| SelectedSeries {
                    label: label.to_owned(),
                    slot: slot.to_owned(),
                    record: (*record).clone(),
                })
        })
        .collect();

    let patient_id = selections.first()?.record.patient_id.clone();
    Some(ConsolidatedStudy {
        study_id: study_id.to_owned(),
        patient_id,
        selections,
    })
}
