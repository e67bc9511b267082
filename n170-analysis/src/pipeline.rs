use anyhow::{Context, Result, bail};
use log::{info, warn};
use n170_core::Condition;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::PathBuf;

use crate::bootstrap::ConditionSummary;
use crate::config::AnalysisConfig;
use crate::dataset::{DatasetFetcher, ensure_dataset, session_dir, session_files};
use crate::device::DeviceProfile;
use crate::epochs::{EpochParams, Epochs, Evoked};
use crate::events::find_events;
use crate::filter::BandPass;
use crate::plots;
use crate::psd::Psd;
use crate::raw::RawRecording;
use crate::spectral::SpectralModel;

/// Segment length of the whole-recording spectra.
const RAW_PSD_NFFT: usize = 2048;

#[derive(Debug)]
pub struct AnalysisReport {
    pub n_events: usize,
    pub n_epochs: usize,
    pub drop_percentage: f64,
    pub evoked: Vec<Evoked>,
    pub summaries: Vec<ConditionSummary>,
    pub models: Vec<(Condition, SpectralModel)>,
    pub figures: Vec<PathBuf>,
}

impl AnalysisReport {
    pub fn model(&self, condition: Condition) -> Option<&SpectralModel> {
        self.models.iter().find(|(c, _)| *c == condition).map(|(_, m)| m)
    }
}

/// Locate (or fetch) the configured session, load it and analyze it.
pub fn run(
    config: &AnalysisConfig,
    fetcher: Option<&dyn DatasetFetcher>,
) -> Result<AnalysisReport> {
    config.validate()?;
    let site = ensure_dataset(config, fetcher)?;
    let profile = DeviceProfile::lookup(&config.device)?;
    let dir = session_dir(&site, &config.device, config.subject, config.session);
    let files = session_files(&dir)?;
    let raw = RawRecording::load_session(&files, profile)?;
    analyze_raw(raw, config)
}

fn raw_psd(raw: &RawRecording) -> Result<Psd> {
    let n_fft = RAW_PSD_NFFT.min(raw.n_times());
    Psd::of_rows(&raw.data, raw.sfreq, n_fft, 0)
}

/// Filter, epoch, average and parametrize an already loaded recording.
pub fn analyze_raw(mut raw: RawRecording, config: &AnalysisConfig) -> Result<AnalysisReport> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let out = &config.output_dir;
    let mut figures = Vec::new();
    if !config.skip_plots {
        fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
        let path = out.join("psd_raw.png");
        plots::plot_psd(&path, "Raw PSD", &raw_psd(&raw)?, &raw.ch_names, None)?;
        figures.push(path);
    }

    let filter =
        BandPass::butterworth(config.l_freq, config.h_freq, raw.sfreq, config.filter_order)?;
    filter.apply(&mut raw.data);
    if !config.skip_plots {
        let path = out.join("psd_filtered.png");
        let band = Some((config.l_freq, config.h_freq));
        plots::plot_psd(&path, "Filtered PSD", &raw_psd(&raw)?, &raw.ch_names, band)?;
        figures.push(path);
    }

    let events = find_events(&raw.stim);
    if events.is_empty() {
        bail!("no events found in the stim channel");
    }
    let params = EpochParams {
        event_id: config.event_id.clone(),
        tmin: config.tmin,
        tmax: config.tmax,
        reject_ptp: Some(config.reject_ptp),
        picks: config.picks.clone(),
    };
    let epochs = Epochs::from_raw(&raw, &events, &params)?;
    let drop_percentage = epochs.drop_percentage();
    info!("sample drop %: {drop_percentage}");
    if epochs.is_empty() {
        bail!("every one of the {} events was dropped", events.len());
    }

    let mut summaries = Vec::new();
    for &ch in &config.channel_order {
        for &condition in &config.event_id {
            let summary = ConditionSummary::from_epochs(
                &epochs,
                condition,
                ch,
                config.ci,
                config.n_boot,
                &mut rng,
            );
            match summary {
                Some(s) => summaries.push(s),
                None => warn!("no {condition} epochs on channel {ch}"),
            }
        }
    }
    if !config.skip_plots {
        let path = out.join("erp_conditions.png");
        plots::plot_conditions(&path, &summaries, &config.channel_order, &epochs.ch_names)?;
        figures.push(path);
    }

    let evoked = epochs.average_by_event_type(&config.event_id);
    let mut models = Vec::new();
    for e in &evoked {
        let psd = Psd::of_evoked(e)?;
        if config.psd_channel >= psd.power.nrows() {
            bail!(
                "psd channel {} out of range for {} channels",
                config.psd_channel,
                psd.power.nrows()
            );
        }
        let power = psd.power.row(config.psd_channel).to_vec();
        let model = SpectralModel::fit(&psd.freqs, &power, config.freq_range, &config.spectral)
            .with_context(|| format!("spectral model of {} failed", e.condition))?;
        info!(
            "{}: exponent {:.3}, {} peaks, r2 {:.3}",
            e.condition,
            model.exponent(),
            model.peak_params.len(),
            model.r_squared
        );
        if !config.skip_plots {
            let path = out.join(format!("fooof_{}.png", e.condition.name().to_lowercase()));
            plots::plot_model(&path, &format!("FOOOF - {}", e.condition), &model)?;
            figures.push(path);
        }
        models.push((e.condition, model));
    }

    if !config.skip_plots && models.len() > 1 {
        let path = out.join("spectra_parametrization.png");
        let labels: Vec<&str> = models.iter().map(|(c, _)| c.name()).collect();
        let fitted: Vec<&SpectralModel> = models.iter().map(|(_, m)| m).collect();
        plots::plot_parametrization(&path, &labels, &fitted)?;
        figures.push(path);
    }

    Ok(AnalysisReport {
        n_events: events.len(),
        n_epochs: epochs.len(),
        drop_percentage,
        evoked,
        summaries,
        models,
        figures,
    })
}
