use anyhow::{Context, Result, anyhow, bail};
use log::info;
use n170_core::{Condition, Stimulus};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StimulusSource;

/// Two immutable image collections, one per condition.
#[derive(Debug, Clone)]
pub struct StimulusSet<S: Stimulus> {
    house: Vec<S>,
    face: Vec<S>,
}

impl<S: Stimulus> StimulusSet<S> {
    pub fn new(house: Vec<S>, face: Vec<S>) -> Self {
        Self { house, face }
    }

    pub fn get(&self, condition: Condition) -> &[S] {
        match condition {
            Condition::House => &self.house,
            Condition::Face => &self.face,
        }
    }

    pub fn len(&self) -> usize {
        self.house.len() + self.face.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shell-style file name match supporting `*` and `?`. As with glob, a
/// leading `.` is only matched by a pattern that starts with `.` itself.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    if name.starts_with('.') && !pattern.starts_with('.') {
        return false;
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Sorted files directly inside `dir` whose names match `pattern`.
pub fn find_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("stimulus directory {} does not exist", dir.display());
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| matches_pattern(pattern, name))
        {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Scan both condition directories and load every matching image.
///
/// A missing directory or a condition without any match is an error.
pub fn load_stimulus<S, L>(
    root: &Path,
    sources: &[StimulusSource],
    mut load: L,
) -> Result<StimulusSet<S>>
where
    S: Stimulus,
    L: FnMut(&Path) -> Result<S>,
{
    let mut load_condition = |condition: Condition| -> Result<Vec<S>> {
        let source = sources
            .iter()
            .find(|s| s.condition == condition)
            .ok_or_else(|| anyhow!("no stimulus source for condition {condition}"))?;
        let dir = root.join(&source.dir);
        let paths = find_matching(&dir, &source.pattern)?;
        if paths.is_empty() {
            bail!(
                "no stimuli matching '{}' in {} for condition {}",
                source.pattern,
                dir.display(),
                condition
            );
        }
        let images = paths
            .iter()
            .map(|p| load(p).with_context(|| format!("failed to load stimulus {}", p.display())))
            .collect::<Result<Vec<S>>>()?;
        info!("loaded {} {} stimuli from {}", images.len(), condition, dir.display());
        Ok(images)
    };

    let house = load_condition(Condition::House)?;
    let face = load_condition(Condition::Face)?;
    Ok(StimulusSet::new(house, face))
}
