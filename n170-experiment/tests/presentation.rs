use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use n170_core::{Condition, Display, ImageSource, MarkerSample, StandardPhase, Stimulus};
use n170_experiment::{
    DeviceBackend, ExperimentConfig, ExperimentEvent, ExperimentStateMachine, MarkerLog,
    StimulusSet, TrialTable, VisualN170, load_stimulus,
};
use n170_timing::{ManualTimer, Timer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingDisplay {
    drawn: Vec<PathBuf>,
    back: Option<PathBuf>,
    front: Vec<Option<PathBuf>>,
}

impl Display for RecordingDisplay {
    type Image = ImageSource;

    fn draw(&mut self, image: &ImageSource) -> Result<()> {
        self.drawn.push(image.source().to_path_buf());
        self.back = Some(image.source().to_path_buf());
        Ok(())
    }

    fn clear(&mut self) {
        self.back = None;
    }

    fn flip(&mut self) -> Result<()> {
        self.front.push(self.back.clone());
        Ok(())
    }
}

fn touch(dir: &Path, name: &str) {
    fs::write(dir.join(name), b"img").unwrap();
}

/// 3 house images, 2 mountain images, plus files that must not match.
fn stimulus_tree() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let houses = root.path().join("houses");
    let mountains = root.path().join("mountains");
    fs::create_dir_all(&houses).unwrap();
    fs::create_dir_all(&mountains).unwrap();
    for name in ["h1.3.jpg", "h2.3.jpg", "h3.3.jpg", "h1.2.jpg", "notes.txt"] {
        touch(&houses, name);
    }
    for name in ["m1_3.png", "m2_3.png", "m1_2.png"] {
        touch(&mountains, name);
    }
    root
}

fn config_for(root: &Path, n_trials: usize) -> ExperimentConfig {
    ExperimentConfig {
        n_trials,
        stimulus_root: root.to_path_buf(),
        ..Default::default()
    }
}

fn load(root: &Path, config: &ExperimentConfig) -> Result<StimulusSet<ImageSource>> {
    load_stimulus(root, &config.stimulus_sets, |p| Ok(ImageSource::new(p)))
}

#[test]
fn load_stimulus_returns_only_pattern_matches() {
    let root = stimulus_tree();
    let config = config_for(root.path(), 5);
    let set = load(root.path(), &config).unwrap();

    let houses: Vec<String> = set
        .get(Condition::House)
        .iter()
        .map(|s| s.source().file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    let mountains: Vec<String> = set
        .get(Condition::Face)
        .iter()
        .map(|s| s.source().file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(houses, ["h1.3.jpg", "h2.3.jpg", "h3.3.jpg"]);
    assert_eq!(mountains, ["m1_3.png", "m2_3.png"]);
    assert_eq!(set.len(), 5);
}

#[test]
fn missing_directory_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("houses")).unwrap();
    touch(&root.path().join("houses"), "a.3.jpg");
    let config = config_for(root.path(), 5);
    let err = load(root.path(), &config).unwrap_err();
    assert!(err.to_string().contains("mountains"), "{err}");
}

#[test]
fn empty_condition_is_an_error() {
    let root = stimulus_tree();
    for entry in fs::read_dir(root.path().join("mountains")).unwrap() {
        fs::remove_file(entry.unwrap().path()).unwrap();
    }
    let config = config_for(root.path(), 5);
    assert!(load(root.path(), &config).is_err());
}

#[test]
fn alternating_trials_draw_from_their_own_set_and_push_one_marker_each() {
    let root = stimulus_tree();
    let config = config_for(root.path(), 5);
    let set = load(root.path(), &config).unwrap();
    let house_set: Vec<PathBuf> = set
        .get(Condition::House)
        .iter()
        .map(|s| s.source().to_path_buf())
        .collect();
    let mountain_set: Vec<PathBuf> = set
        .get(Condition::Face)
        .iter()
        .map(|s| s.source().to_path_buf())
        .collect();

    let trials = TrialTable::from_labels(&[1, 2, 1, 2, 1]).unwrap();
    let mut presenter = VisualN170::new(set, Some(MarkerLog::new(DeviceBackend::MuseLsl)));
    let mut display = RecordingDisplay::default();
    let mut machine = ExperimentStateMachine::<StandardPhase, _, _>::new(
        config,
        trials,
        ManualTimer::default(),
        StdRng::seed_from_u64(11),
    );

    let records = machine.run_blocking(&mut presenter, &mut display).unwrap().to_vec();
    assert_eq!(records.len(), 5);
    assert_eq!(display.drawn.len(), 5);
    for (i, drawn) in display.drawn.iter().enumerate() {
        if i % 2 == 0 {
            assert!(house_set.contains(drawn), "trial {i} drew {}", drawn.display());
        } else {
            assert!(mountain_set.contains(drawn), "trial {i} drew {}", drawn.display());
        }
    }

    let samples = presenter.outlet().unwrap().samples();
    assert_eq!(samples.len(), 5);
    let labels: Vec<MarkerSample> = samples.iter().map(|(s, _)| s.clone()).collect();
    assert_eq!(
        labels,
        [1, 2, 1, 2, 1].map(|l| MarkerSample::Sequence(vec![l]))
    );
    assert!(samples.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(machine.current_phase() == &StandardPhase::Complete);

    // every onset flip shows the image, every offset flip is blank
    assert_eq!(display.front.len(), 10);
    for (i, frame) in display.front.iter().enumerate() {
        assert_eq!(frame.is_some(), i % 2 == 0);
    }
}

#[test]
fn bare_labels_for_non_lsl_backend() {
    let root = stimulus_tree();
    let config = config_for(root.path(), 3);
    let set = load(root.path(), &config).unwrap();
    let trials = TrialTable::from_labels(&[2, 1, 2]).unwrap();
    let mut presenter = VisualN170::new(set, Some(MarkerLog::new(DeviceBackend::Brainflow)));
    let mut display = RecordingDisplay::default();
    let mut machine = ExperimentStateMachine::<StandardPhase, _, _>::new(
        config,
        trials,
        ManualTimer::default(),
        StdRng::seed_from_u64(1),
    );
    machine.run_blocking(&mut presenter, &mut display).unwrap();
    let sent: Vec<MarkerSample> = presenter
        .outlet()
        .unwrap()
        .samples()
        .iter()
        .map(|(s, _)| s.clone())
        .collect();
    assert_eq!(
        sent,
        [MarkerSample::Label(2), MarkerSample::Label(1), MarkerSample::Label(2)]
    );
}

#[test]
fn random_selection_never_crosses_conditions() {
    let root = stimulus_tree();
    let config = ExperimentConfig {
        duration_s: 1e6,
        ..config_for(root.path(), 200)
    };
    let set = load(root.path(), &config).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let trials = TrialTable::generate(200, &mut rng);
    let mut presenter: VisualN170<ImageSource, MarkerLog> = VisualN170::new(set, None);
    let mut display = RecordingDisplay::default();
    let mut machine = ExperimentStateMachine::<StandardPhase, _, _>::new(
        config,
        trials,
        ManualTimer::default(),
        rng,
    );
    let records = machine.run_blocking(&mut presenter, &mut display).unwrap();
    assert_eq!(records.len(), 200);
    for r in records {
        let dir = r.image.parent().unwrap().file_name().unwrap().to_string_lossy();
        match r.condition {
            Condition::House => assert_eq!(dir, "houses"),
            Condition::Face => assert_eq!(dir, "mountains"),
        }
        assert!(r.marker.is_none());
    }
}

#[test]
fn run_stops_when_duration_elapses() {
    let root = stimulus_tree();
    let config = ExperimentConfig {
        duration_s: 1.0,
        jitter_s: 0.0,
        ..config_for(root.path(), 100)
    };
    let set = load(root.path(), &config).unwrap();
    let trials = TrialTable::from_labels(&[1; 100]).unwrap();
    let timer = ManualTimer::default();
    let mut presenter = VisualN170::new(set, Some(MarkerLog::new(DeviceBackend::Synthetic)));
    let mut display = RecordingDisplay::default();
    let mut machine = ExperimentStateMachine::<StandardPhase, _, _>::new(
        config,
        trials,
        timer.clone(),
        StdRng::seed_from_u64(2),
    );
    machine.run_blocking(&mut presenter, &mut display).unwrap();
    // onset at 0.4 s, offset at 0.7 s, next onset would be 1.1 s
    assert_eq!(machine.records().len(), 1);
    assert_eq!(timer.now(), Duration::from_secs(1).as_nanos() as u64);
    assert_eq!(display.front.last(), Some(&None));
}

#[test]
fn escape_aborts_the_run() {
    let root = stimulus_tree();
    let config = config_for(root.path(), 5);
    let set = load(root.path(), &config).unwrap();
    let trials = TrialTable::from_labels(&[1, 2, 1, 2, 1]).unwrap();
    let timer = ManualTimer::default();
    let mut presenter: VisualN170<ImageSource, MarkerLog> = VisualN170::new(set, None);
    let mut display = RecordingDisplay::default();
    let mut machine = ExperimentStateMachine::<StandardPhase, _, _>::new(
        config,
        trials,
        timer.clone(),
        StdRng::seed_from_u64(2),
    );

    // nothing happens before the participant presses space
    assert!(machine.tick(&mut presenter, &mut display).unwrap());
    assert!(display.drawn.is_empty());

    assert!(machine.handle_event(ExperimentEvent::SpacePressed));
    timer.advance(Duration::from_secs(1));
    assert!(machine.tick(&mut presenter, &mut display).unwrap());
    assert_eq!(machine.records().len(), 1);

    assert!(machine.handle_event(ExperimentEvent::EscapePressed));
    assert!(machine.is_aborted());
    assert!(!machine.tick(&mut presenter, &mut display).unwrap());
    assert_eq!(machine.records().len(), 1);
}
