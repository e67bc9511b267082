use anyhow::{Result, bail};

/// Sampling layout of a recording device as it appears in session CSVs.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub sfreq: f64,
    pub channels: &'static [&'static str],
    pub stim_column: &'static str,
}

const MUSE_2016: &[&str] = &["TP9", "AF7", "AF8", "TP10"];
const MUSE_2: &[&str] = &["TP9", "AF7", "AF8", "TP10", "Right AUX"];
const CYTON: &[&str] = &["Fp1", "Fp2", "C3", "C4", "P7", "P8", "O1", "O2"];
const GANGLION: &[&str] = &["fp1", "fp2", "tp7", "tp8"];

static PROFILES: &[DeviceProfile] = &[
    DeviceProfile {
        name: "muse2016",
        sfreq: 256.0,
        channels: MUSE_2016,
        stim_column: "stim",
    },
    DeviceProfile {
        name: "muse2016_bfn",
        sfreq: 256.0,
        channels: MUSE_2016,
        stim_column: "stim",
    },
    DeviceProfile {
        name: "muse2",
        sfreq: 256.0,
        channels: MUSE_2,
        stim_column: "stim",
    },
    DeviceProfile {
        name: "muse2_bfn",
        sfreq: 256.0,
        channels: MUSE_2,
        stim_column: "stim",
    },
    DeviceProfile {
        name: "cyton",
        sfreq: 250.0,
        channels: CYTON,
        stim_column: "stim",
    },
    DeviceProfile {
        name: "ganglion",
        sfreq: 200.0,
        channels: GANGLION,
        stim_column: "stim",
    },
];

impl DeviceProfile {
    pub fn lookup(name: &str) -> Result<&'static DeviceProfile> {
        match PROFILES.iter().find(|p| p.name == name) {
            Some(p) => Ok(p),
            None => bail!(
                "unknown device {name:?}, expected one of: {}",
                PROFILES.iter().map(|p| p.name).collect::<Vec<_>>().join(", ")
            ),
        }
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muse_bfn_layout() {
        let p = DeviceProfile::lookup("muse2016_bfn").unwrap();
        assert_eq!(p.sfreq, 256.0);
        assert_eq!(p.channels, &["TP9", "AF7", "AF8", "TP10"]);
    }

    #[test]
    fn unknown_device_lists_known_ones() {
        let err = DeviceProfile::lookup("hololens").unwrap_err().to_string();
        assert!(err.contains("muse2016_bfn"));
    }
}
