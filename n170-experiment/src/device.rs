use anyhow::{Context, Result};
use log::debug;
use n170_core::{Marker, MarkerSample};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Recording backends a marker can be sent to. Each one owns its marker wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    /// Lab Streaming Layer outlet: samples are channel vectors.
    #[serde(rename = "muselsl")]
    MuseLsl,
    Brainflow,
    Synthetic,
}

impl DeviceBackend {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceBackend::MuseLsl => "muselsl",
            DeviceBackend::Brainflow => "brainflow",
            DeviceBackend::Synthetic => "synthetic",
        }
    }

    pub fn encode(&self, marker: Marker) -> MarkerSample {
        match self {
            DeviceBackend::MuseLsl => MarkerSample::Sequence(vec![marker.label]),
            DeviceBackend::Brainflow | DeviceBackend::Synthetic => {
                MarkerSample::Label(marker.label)
            }
        }
    }
}

impl std::str::FromStr for DeviceBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "muselsl" => Ok(DeviceBackend::MuseLsl),
            "brainflow" => Ok(DeviceBackend::Brainflow),
            "synthetic" => Ok(DeviceBackend::Synthetic),
            other => anyhow::bail!("unknown device backend '{other}'"),
        }
    }
}

/// Capability of a recording device to accept timestamped event markers.
pub trait MarkerOutlet {
    fn backend(&self) -> DeviceBackend;

    /// Encode `marker` for this backend and push it; returns what was sent.
    fn push_sample(&mut self, marker: Marker, timestamp: f64) -> Result<MarkerSample>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<O: MarkerOutlet + ?Sized> MarkerOutlet for Box<O> {
    fn backend(&self) -> DeviceBackend {
        (**self).backend()
    }

    fn push_sample(&mut self, marker: Marker, timestamp: f64) -> Result<MarkerSample> {
        (**self).push_sample(marker, timestamp)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Keeps every pushed sample in memory.
#[derive(Debug, Clone)]
pub struct MarkerLog {
    backend: DeviceBackend,
    samples: Vec<(MarkerSample, f64)>,
}

impl MarkerLog {
    pub fn new(backend: DeviceBackend) -> Self {
        Self {
            backend,
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[(MarkerSample, f64)] {
        &self.samples
    }
}

impl MarkerOutlet for MarkerLog {
    fn backend(&self) -> DeviceBackend {
        self.backend
    }

    fn push_sample(&mut self, marker: Marker, timestamp: f64) -> Result<MarkerSample> {
        let sample = self.backend.encode(marker);
        self.samples.push((sample.clone(), timestamp));
        Ok(sample)
    }
}

/// Writes `timestamp,marker` rows, one per pushed sample.
pub struct CsvMarkerWriter<W: Write> {
    backend: DeviceBackend,
    writer: csv::Writer<W>,
    written: usize,
}

impl CsvMarkerWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P, backend: DeviceBackend) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create marker file {}", path.display()))?;
        Self::new(file, backend)
    }
}

impl<W: Write> CsvMarkerWriter<W> {
    pub fn new(inner: W, backend: DeviceBackend) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(["timestamp", "marker"])?;
        Ok(Self {
            backend,
            writer,
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush marker writer: {}", e.error()))
    }
}

impl<W: Write> MarkerOutlet for CsvMarkerWriter<W> {
    fn backend(&self) -> DeviceBackend {
        self.backend
    }

    fn push_sample(&mut self, marker: Marker, timestamp: f64) -> Result<MarkerSample> {
        let sample = self.backend.encode(marker);
        self.writer
            .write_record([format!("{timestamp:.6}"), sample.to_string()])
            .context("failed to write marker row")?;
        self.written += 1;
        debug!("marker {} at {:.6} ({})", sample, timestamp, self.backend.name());
        Ok(sample)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush marker file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muselsl_wraps_label_in_one_element_sequence() {
        let s = DeviceBackend::MuseLsl.encode(Marker::new(1));
        assert_eq!(s, MarkerSample::Sequence(vec![1]));
    }

    #[test]
    fn other_backends_send_bare_label() {
        for b in [DeviceBackend::Brainflow, DeviceBackend::Synthetic] {
            assert_eq!(b.encode(Marker::new(2)), MarkerSample::Label(2));
        }
    }

    #[test]
    fn backend_names_parse_back() {
        for b in [
            DeviceBackend::MuseLsl,
            DeviceBackend::Brainflow,
            DeviceBackend::Synthetic,
        ] {
            assert_eq!(b.name().parse::<DeviceBackend>().unwrap(), b);
        }
        assert!("openbci".parse::<DeviceBackend>().is_err());
    }

    #[test]
    fn csv_writer_rows() {
        let mut w = CsvMarkerWriter::new(Vec::new(), DeviceBackend::MuseLsl).unwrap();
        w.push_sample(Marker::new(1), 10.5).unwrap();
        w.push_sample(Marker::new(2), 11.0).unwrap();
        assert_eq!(w.written(), 2);
        let text = String::from_utf8(w.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, ["timestamp,marker", "10.500000,[1]", "11.000000,[2]"]);
    }

    #[test]
    fn boxed_outlet_forwards() {
        let mut boxed: Box<dyn MarkerOutlet> = Box::new(MarkerLog::new(DeviceBackend::Brainflow));
        let s = boxed.push_sample(Marker::new(1), 0.0).unwrap();
        assert_eq!(s, MarkerSample::Label(1));
        assert_eq!(boxed.backend(), DeviceBackend::Brainflow);
    }
}
