use std::collections::{HashMap, HashSet};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::acquisition::{ExperimentRecord, discover_experiments};
use crate::domain::{display_timestamp, parse_filename};
use crate::error::KiraError;
use crate::store::SampleStore;

const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SampleCreated { document: Utf8PathBuf },
    SampleEjected { document: Utf8PathBuf },
    Experiment(ExperimentRecord),
}

impl EventKind {
    /// Sample bookkeeping sorts ahead of experiments at equal timestamps.
    fn rank(&self) -> u8 {
        match self {
            EventKind::SampleCreated { .. } | EventKind::SampleEjected { .. } => 0,
            EventKind::Experiment(_) => 1,
        }
    }

    fn is_sample_event(&self) -> bool {
        self.rank() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    #[serde(flatten)]
    pub kind: EventKind,
    /// Sample document the event belongs to, when one can be determined.
    pub sample: Option<Utf8PathBuf>,
    pub is_orphan: bool,
}

impl TimelineEvent {
    fn sample_event(kind: EventKind, timestamp: DateTime<Utc>, name: &str) -> Self {
        Self {
            timestamp,
            name: name.to_string(),
            kind,
            sample: None,
            is_orphan: false,
        }
    }

    fn experiment(record: ExperimentRecord) -> Self {
        Self {
            timestamp: record.started_at,
            name: record.number.to_string(),
            kind: EventKind::Experiment(record),
            sample: None,
            is_orphan: false,
        }
    }

    pub fn experiment_record(&self) -> Option<&ExperimentRecord> {
        match &self.kind {
            EventKind::Experiment(record) => Some(record),
            _ => None,
        }
    }

    pub fn experiment_number(&self) -> Option<u32> {
        self.experiment_record().map(|record| record.number)
    }

    pub fn display_text(&self) -> String {
        let time = display_timestamp(&self.timestamp);
        match &self.kind {
            EventKind::SampleCreated { .. } => format!("{time} | Sample Created | {}", self.name),
            EventKind::SampleEjected { .. } => format!("{time} | Sample Ejected | {}", self.name),
            EventKind::Experiment(record) => {
                format!("{time} | Experiment {} | {}", self.name, record.summary())
            }
        }
    }
}

/// Contiguous run of orphaned experiments, as positions in the event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub first: usize,
    pub last: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReassignOptions {
    pub previous: Option<Utf8PathBuf>,
    pub next: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReassignDirection {
    Previous,
    Next,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reassignment {
    pub direction: ReassignDirection,
    pub document: Utf8PathBuf,
    pub shifted_to: DateTime<Utc>,
    /// Experiments that were orphaned before the shift and are not any more.
    pub attributed: Vec<u32>,
    pub timeline: Timeline,
}

/// Chronological merge of sample lifecycle events and acquired experiments
/// for one dataset directory. Every build is a full recomputation.
#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub directory: Utf8PathBuf,
    pub events: Vec<TimelineEvent>,
}

struct Owner {
    document: Utf8PathBuf,
    created: DateTime<Utc>,
    ejected: Option<DateTime<Utc>>,
}

impl Timeline {
    pub fn build(store: &SampleStore, directory: &Utf8Path) -> Result<Self, KiraError> {
        let mut events = Vec::new();
        let mut ejections = HashMap::new();

        for path in SampleStore::list_paths(directory)? {
            let document = match store.read(&path) {
                Ok(document) => document,
                Err(err) => {
                    warn!(path = %path, error = %err, "skipping unreadable sample");
                    continue;
                }
            };
            let name = document
                .label()
                .map(str::to_string)
                .or_else(|| {
                    path.file_name()
                        .and_then(parse_filename)
                        .map(|(_, label)| label)
                        .filter(|label| !label.is_empty())
                })
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
            if let Some(created) = document.metadata.created_timestamp {
                events.push(TimelineEvent::sample_event(
                    EventKind::SampleCreated {
                        document: path.clone(),
                    },
                    created,
                    &name,
                ));
            }
            if let Some(ejected) = document.metadata.ejected_timestamp {
                ejections.insert(path.clone(), ejected);
                events.push(TimelineEvent::sample_event(
                    EventKind::SampleEjected {
                        document: path.clone(),
                    },
                    ejected,
                    &name,
                ));
            }
        }

        let has_samples = !events.is_empty();
        events.extend(
            discover_experiments(directory)?
                .into_iter()
                .map(TimelineEvent::experiment),
        );

        // Stable: equal keys keep filename order for samples and number
        // order for experiments.
        events.sort_by_key(|event| (event.timestamp, event.kind.rank()));

        if has_samples {
            assign_owners(&mut events, &ejections);
        } else {
            debug!(path = %directory, "no sample events; orphan detection skipped");
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            events,
        })
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn orphans(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.events.iter().filter(|event| event.is_orphan)
    }

    pub fn experiments_for(&self, document: &Utf8Path) -> Vec<&ExperimentRecord> {
        self.events
            .iter()
            .filter(|event| !event.is_orphan && event.sample.as_deref() == Some(document))
            .filter_map(TimelineEvent::experiment_record)
            .collect()
    }

    pub fn position_of(&self, experiment: u32) -> Option<usize> {
        self.events
            .iter()
            .position(|event| event.experiment_number() == Some(experiment))
    }

    /// Accepts only a non-empty, gap-free run of orphaned experiments.
    pub fn validate_selection(&self, experiments: &[u32]) -> Result<Selection, KiraError> {
        if experiments.is_empty() {
            return Err(KiraError::InvalidSelection(
                "no experiments selected".to_string(),
            ));
        }
        let mut positions = experiments
            .iter()
            .map(|number| {
                self.position_of(*number).ok_or_else(|| {
                    KiraError::InvalidSelection(format!("experiment {number} is not on the timeline"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        positions.sort_unstable();
        positions.dedup();

        if let Some(event) = positions
            .iter()
            .map(|position| &self.events[*position])
            .find(|event| !event.is_orphan)
        {
            return Err(KiraError::InvalidSelection(format!(
                "experiment {} is not orphaned",
                event.name
            )));
        }
        if positions.windows(2).any(|pair| pair[1] != pair[0] + 1) {
            return Err(KiraError::InvalidSelection(
                "selected experiments are not contiguous".to_string(),
            ));
        }
        Ok(Selection {
            first: positions[0],
            last: positions[positions.len() - 1],
        })
    }

    /// Samples that could absorb `selection`: the nearest earlier sample if
    /// it has been ejected, the nearest later sample if it is being created.
    pub fn reassign_options(&self, selection: Selection) -> ReassignOptions {
        let previous = self.events[..selection.first]
            .iter()
            .rev()
            .find(|event| event.kind.is_sample_event())
            .and_then(|event| match &event.kind {
                EventKind::SampleEjected { document } => Some(document.clone()),
                _ => None,
            });
        let next = self.events[selection.last + 1..]
            .iter()
            .find(|event| event.kind.is_sample_event())
            .and_then(|event| match &event.kind {
                EventKind::SampleCreated { document } => Some(document.clone()),
                _ => None,
            });
        ReassignOptions { previous, next }
    }

    pub fn offer(&self, experiments: &[u32]) -> Result<ReassignOptions, KiraError> {
        Ok(self.reassign_options(self.validate_selection(experiments)?))
    }

    /// Moves the previous sample's ejection to just after the last selected
    /// experiment, then rebuilds the timeline.
    pub fn reassign_to_previous(
        &self,
        store: &SampleStore,
        experiments: &[u32],
    ) -> Result<Reassignment, KiraError> {
        let selection = self.validate_selection(experiments)?;
        let document = self.reassign_options(selection).previous.ok_or_else(|| {
            KiraError::NoReassignTarget("no ejected sample precedes the selection".to_string())
        })?;
        let shifted_to = self.events[selection.last].timestamp + Duration::milliseconds(1);

        let mut sample = store.read(&document)?;
        sample.metadata.ejected_timestamp = Some(shifted_to);
        store.write(&document, &mut sample, false)?;
        debug!(path = %document, ejected = %shifted_to, "ejection moved forward");

        self.finish(store, ReassignDirection::Previous, document, shifted_to)
    }

    /// Moves the next sample's creation to just before the first selected
    /// experiment, then rebuilds the timeline.
    pub fn reassign_to_next(
        &self,
        store: &SampleStore,
        experiments: &[u32],
    ) -> Result<Reassignment, KiraError> {
        let selection = self.validate_selection(experiments)?;
        let document = self.reassign_options(selection).next.ok_or_else(|| {
            KiraError::NoReassignTarget("no sample is created after the selection".to_string())
        })?;
        let shifted_to = self.events[selection.first].timestamp - Duration::milliseconds(1);

        let mut sample = store.read(&document)?;
        sample.metadata.created_timestamp = Some(shifted_to);
        store.write(&document, &mut sample, false)?;
        debug!(path = %document, created = %shifted_to, "creation moved backward");

        self.finish(store, ReassignDirection::Next, document, shifted_to)
    }

    fn finish(
        &self,
        store: &SampleStore,
        direction: ReassignDirection,
        document: Utf8PathBuf,
        shifted_to: DateTime<Utc>,
    ) -> Result<Reassignment, KiraError> {
        let before = self
            .orphans()
            .filter_map(TimelineEvent::experiment_number)
            .collect::<HashSet<_>>();
        let timeline = Self::build(store, &self.directory)?;
        let attributed = timeline
            .events
            .iter()
            .filter(|event| !event.is_orphan)
            .filter_map(TimelineEvent::experiment_number)
            .filter(|number| before.contains(number))
            .collect();
        Ok(Reassignment {
            direction,
            document,
            shifted_to,
            attributed,
            timeline,
        })
    }
}

/// Sweeps the sorted events, tracking the sample currently loaded, and
/// marks experiments that fall outside any sample's active window.
fn assign_owners(events: &mut [TimelineEvent], ejections: &HashMap<Utf8PathBuf, DateTime<Utc>>) {
    let mut current: Option<Owner> = None;
    for event in events.iter_mut() {
        match &event.kind {
            EventKind::SampleCreated { document } => {
                current = Some(Owner {
                    document: document.clone(),
                    created: event.timestamp,
                    ejected: ejections.get(document).copied(),
                });
                event.sample = Some(document.clone());
            }
            EventKind::SampleEjected { .. } => {
                event.sample = current.take().map(|owner| owner.document);
            }
            EventKind::Experiment(record) => {
                let started = record.started_at;
                event.sample = current.as_ref().map(|owner| owner.document.clone());
                event.is_orphan = match &current {
                    None => true,
                    Some(owner) => {
                        started < owner.created
                            || owner.ejected.is_some_and(|ejected| started > ejected)
                    }
                };
            }
        }
    }
}
