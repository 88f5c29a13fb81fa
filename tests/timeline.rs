use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, TimeZone, Utc};

use kira_sample_manager::acquisition::TimestampSource;
use kira_sample_manager::app::App;
use kira_sample_manager::document::SampleDocument;
use kira_sample_manager::error::KiraError;
use kira_sample_manager::output::JsonOutput;
use kira_sample_manager::store::SampleStore;
use kira_sample_manager::timeline::{EventKind, ReassignDirection, Timeline, TimelineEvent};

fn workdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

fn sample(
    store: &SampleStore,
    dir: &Utf8Path,
    label: &str,
    created: DateTime<Utc>,
    ejected: Option<DateTime<Utc>>,
) -> Utf8PathBuf {
    let mut document = SampleDocument::default();
    document.set_label(label);
    let path = store.create(dir, document, created).unwrap();
    if let Some(ejected) = ejected {
        store.eject_at(&path, ejected).unwrap();
    }
    path
}

fn experiment(dir: &Utf8Path, number: u32, started: DateTime<Utc>) {
    let exp = dir.join(number.to_string());
    fs::create_dir_all(exp.as_std_path()).unwrap();
    fs::write(exp.join("acqu").as_std_path(), "##TITLE= Parameter file\n").unwrap();
    fs::write(
        exp.join("acqus").as_std_path(),
        format!(
            "##TITLE= Parameter file, TopSpin 4.1.4\n\
             $$ {} +0000  nmr@spec\n\
             ##$NS= 16\n\
             ##$NUC1= <1H>\n\
             ##$PULPROG= <zg30>\n",
            started.format("%Y-%m-%d %H:%M:%S%.3f")
        ),
    )
    .unwrap();
}

/// Two samples with one covered and one orphaned experiment between them.
fn reference_dataset(store: &SampleStore, dir: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    let a = sample(store, dir, "A", at(9, 0), Some(at(10, 0)));
    let b = sample(store, dir, "B", at(11, 0), None);
    experiment(dir, 5, at(9, 30));
    experiment(dir, 6, at(10, 30));
    (a, b)
}

fn describe(event: &TimelineEvent) -> String {
    match &event.kind {
        EventKind::SampleCreated { .. } => format!("created {}", event.name),
        EventKind::SampleEjected { .. } => format!("ejected {}", event.name),
        EventKind::Experiment(_) if event.is_orphan => format!("exp {} orphan", event.name),
        EventKind::Experiment(_) => format!("exp {}", event.name),
    }
}

fn outline(timeline: &Timeline) -> Vec<String> {
    timeline.events().iter().map(describe).collect()
}

#[test]
fn merges_samples_and_experiments() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    let (a, b) = reference_dataset(&store, &dir);

    let timeline = Timeline::build(&store, &dir).unwrap();
    assert_eq!(
        outline(&timeline),
        vec!["created A", "exp 5", "ejected A", "exp 6 orphan", "created B"]
    );
    assert_eq!(timeline.events()[1].sample.as_ref(), Some(&a));
    assert_eq!(timeline.events()[3].sample, None);
    assert_eq!(store.find_active(&dir).unwrap(), Some(b));

    let covered = timeline.experiments_for(&a);
    assert_eq!(covered.len(), 1);
    assert_eq!(covered[0].number, 5);
    assert_eq!(covered[0].timestamp_source, TimestampSource::Declared);
    assert_eq!(covered[0].summary(), "zg30, 1H, 16 scans");
}

#[test]
fn orphans_are_listed() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    reference_dataset(&store, &dir);

    let app = App::new(store);
    let orphans = app.orphans(&dir).unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].experiment_number(), Some(6));
}

#[test]
fn event_count_covers_every_timestamp() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    reference_dataset(&store, &dir);
    sample(&store, &dir, "C", at(12, 0), Some(at(13, 0)));
    experiment(&dir, 7, at(12, 30));

    let timeline = Timeline::build(&store, &dir).unwrap();
    // 3 created, 2 ejected, 3 experiments.
    assert_eq!(timeline.len(), 8);
    assert!(
        timeline
            .events()
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    );
}

#[test]
fn sample_events_sort_before_experiments_at_equal_time() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    let a = sample(&store, &dir, "A", at(9, 0), None);
    experiment(&dir, 1, at(9, 0));

    let timeline = Timeline::build(&store, &dir).unwrap();
    assert_eq!(outline(&timeline), vec!["created A", "exp 1"]);
    assert_eq!(timeline.events()[1].sample.as_ref(), Some(&a));
}

#[test]
fn no_orphans_without_sample_bookkeeping() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    experiment(&dir, 1, at(9, 0));
    experiment(&dir, 2, at(10, 0));

    let timeline = Timeline::build(&store, &dir).unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline.orphans().count(), 0);
    assert!(timeline.events().iter().all(|event| event.sample.is_none()));
}

#[test]
fn unacquired_and_unnumbered_directories_are_ignored() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    experiment(&dir, 1, at(9, 0));
    let pending = dir.join("2");
    fs::create_dir_all(pending.as_std_path()).unwrap();
    fs::write(pending.join("acqu").as_std_path(), "").unwrap();
    fs::create_dir_all(dir.join("notes").as_std_path()).unwrap();

    let timeline = Timeline::build(&store, &dir).unwrap();
    assert_eq!(outline(&timeline), vec!["exp 1"]);
}

#[test]
fn missing_stamp_falls_back_to_file_time() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    let exp = dir.join("3");
    fs::create_dir_all(exp.as_std_path()).unwrap();
    fs::write(exp.join("acqu").as_std_path(), "").unwrap();
    fs::write(exp.join("acqus").as_std_path(), "##$NS= 8\n").unwrap();

    let timeline = Timeline::build(&store, &dir).unwrap();
    let record = timeline.events()[0].experiment_record().unwrap();
    assert_eq!(record.timestamp_source, TimestampSource::FileModified);
    assert_eq!(record.scans, Some(8));
}

#[test]
fn reassign_to_previous_extends_ejection() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    let (a, b) = reference_dataset(&store, &dir);

    let timeline = Timeline::build(&store, &dir).unwrap();
    let options = timeline.offer(&[6]).unwrap();
    assert_eq!(options.previous.as_ref(), Some(&a));
    assert_eq!(options.next.as_ref(), Some(&b));

    let result = timeline.reassign_to_previous(&store, &[6]).unwrap();
    assert_eq!(result.document, a);
    assert_eq!(result.shifted_to, at(10, 30) + Duration::milliseconds(1));
    assert_eq!(result.attributed, vec![6]);
    assert_eq!(
        outline(&result.timeline),
        vec!["created A", "exp 5", "exp 6", "ejected A", "created B"]
    );

    let stored = store.read(&a).unwrap();
    assert!(stored.metadata.ejected_timestamp.unwrap() > at(10, 30));
    assert_eq!(stored.metadata.created_timestamp, Some(at(9, 0)));
}

#[test]
fn reassign_to_next_pulls_creation_back() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    let (_, b) = reference_dataset(&store, &dir);

    let app = App::new(store);
    let result = app.reassign(&dir, &[6], ReassignDirection::Next).unwrap();
    assert_eq!(result.document, b);
    assert_eq!(result.shifted_to, at(10, 30) - Duration::milliseconds(1));
    assert_eq!(
        outline(&result.timeline),
        vec!["created A", "exp 5", "ejected A", "created B", "exp 6"]
    );
    assert_eq!(result.timeline.events()[4].sample.as_ref(), Some(&b));
}

#[test]
fn reassignment_picks_up_neighbouring_orphans() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    let (a, _) = reference_dataset(&store, &dir);
    experiment(&dir, 7, at(10, 15));

    let timeline = Timeline::build(&store, &dir).unwrap();
    assert_eq!(timeline.orphans().count(), 2);

    let result = timeline.reassign_to_previous(&store, &[6]).unwrap();
    assert_eq!(result.document, a);
    assert_eq!(result.attributed, vec![7, 6]);
    assert_eq!(result.timeline.orphans().count(), 0);
}

#[test]
fn selection_must_be_orphaned_and_contiguous() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    sample(&store, &dir, "A", at(9, 0), Some(at(10, 0)));
    experiment(&dir, 1, at(8, 0));
    experiment(&dir, 2, at(9, 30));
    experiment(&dir, 3, at(10, 30));

    let timeline = Timeline::build(&store, &dir).unwrap();
    assert_matches!(timeline.offer(&[]), Err(KiraError::InvalidSelection(_)));
    assert_matches!(timeline.offer(&[2]), Err(KiraError::InvalidSelection(_)));
    assert_matches!(timeline.offer(&[99]), Err(KiraError::InvalidSelection(_)));
    assert_matches!(timeline.offer(&[1, 3]), Err(KiraError::InvalidSelection(_)));
}

#[test]
fn reassignment_needs_a_neighbour() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    let a = sample(&store, &dir, "A", at(9, 0), Some(at(10, 0)));
    experiment(&dir, 1, at(8, 0));
    experiment(&dir, 2, at(10, 30));

    let timeline = Timeline::build(&store, &dir).unwrap();
    let options = timeline.offer(&[1]).unwrap();
    assert_eq!(options.previous, None);
    assert_eq!(options.next.as_ref(), Some(&a));
    assert_matches!(
        timeline.reassign_to_previous(&store, &[1]),
        Err(KiraError::NoReassignTarget(_))
    );
    assert_matches!(
        timeline.reassign_to_next(&store, &[2]),
        Err(KiraError::NoReassignTarget(_))
    );
}

#[test]
fn unreadable_samples_are_left_out() {
    let (_temp, dir) = workdir();
    let store = SampleStore::default();
    sample(&store, &dir, "A", at(9, 0), None);
    fs::write(
        dir.join("2024-01-01_100000_Broken.json").as_std_path(),
        "{ nope",
    )
    .unwrap();

    let app = App::new(store);
    let timeline = app.timeline(&dir, &JsonOutput).unwrap();
    assert_eq!(outline(&timeline), vec!["created A"]);
}
