use anyhow::Result;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;

use crate::bootstrap::ConditionSummary;
use crate::psd::Psd;
use crate::spectral::SpectralModel;

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

/// Data range with a margin; degenerate ranges are widened.
fn padded_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    let span = hi - lo;
    let pad = if span > 0.0 { span * 0.05 } else { lo.abs().max(1.0) * 0.1 };
    (lo - pad)..(hi + pad)
}

fn series_color(i: usize) -> RGBAColor {
    Palette99::pick(i).to_rgba()
}

/// One panel with one line per labelled series over a shared x axis.
fn draw_lines(
    area: &Area,
    title: &str,
    xs: &[f64],
    series: &[(&str, &[f64])],
    x_desc: &str,
    y_desc: &str,
) -> Result<()> {
    let x_range = padded_range(xs.iter().copied());
    let y_range = padded_range(series.iter().flat_map(|(_, ys)| ys.iter().copied()));
    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;
    chart.configure_mesh().x_desc(x_desc).y_desc(y_desc).draw()?;

    for (i, (label, ys)) in series.iter().enumerate() {
        let color = series_color(i);
        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(ys.iter().copied()),
                color.stroke_width(2),
            ))?
            .label(*label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

/// Channel spectra in dB re 1 µV²/Hz.
pub fn plot_psd(
    path: &Path,
    title: &str,
    psd: &Psd,
    ch_names: &[String],
    band: Option<(f64, f64)>,
) -> Result<()> {
    let keep: Vec<usize> = (0..psd.freqs.len())
        .filter(|&k| band.is_none_or(|(lo, hi)| psd.freqs[k] >= lo && psd.freqs[k] <= hi))
        .collect();
    let freqs: Vec<f64> = keep.iter().map(|&k| psd.freqs[k]).collect();
    let db: Vec<Vec<f64>> = psd
        .power
        .rows()
        .into_iter()
        .map(|row| keep.iter().map(|&k| 10.0 * (row[k] * 1e12).max(1e-30).log10()).collect())
        .collect();
    let series: Vec<(&str, &[f64])> = ch_names
        .iter()
        .map(|n| n.as_str())
        .zip(db.iter().map(|v| v.as_slice()))
        .collect();

    let root = BitMapBackend::new(path, (1200, 700)).into_drawing_area();
    root.fill(&WHITE)?;
    draw_lines(&root, title, &freqs, &series, "Frequency (Hz)", "µV²/Hz (dB)")?;
    root.present()?;
    Ok(())
}

/// ERP per channel, 2x2 grid in `channel_order`, mean with its bootstrap band, µV.
pub fn plot_conditions(
    path: &Path,
    summaries: &[ConditionSummary],
    channel_order: &[usize],
    ch_names: &[String],
) -> Result<()> {
    let root = BitMapBackend::new(path, (1400, 1000)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 2));

    for (panel, &ch) in panels.iter().zip(channel_order) {
        let Some(name) = ch_names.get(ch) else {
            continue;
        };
        let traces: Vec<&ConditionSummary> =
            summaries.iter().filter(|s| &s.channel == name).collect();
        let Some(first) = traces.first() else {
            continue;
        };
        let x_range = padded_range(first.times.iter().copied());
        let y_range = padded_range(
            traces
                .iter()
                .flat_map(|s| s.lower.iter().chain(&s.upper))
                .map(|v| v * 1e6),
        );
        let (y0, y1) = (y_range.start, y_range.end);
        let mut chart = ChartBuilder::on(panel)
            .caption(name, ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(50)
            .build_cartesian_2d(x_range, y_range)?;
        chart.configure_mesh().x_desc("Time (s)").y_desc("µV").draw()?;

        for (i, s) in traces.iter().enumerate() {
            let color = series_color(i);
            let band: Vec<(f64, f64)> = s
                .times
                .iter()
                .zip(&s.upper)
                .map(|(t, v)| (*t, v * 1e6))
                .chain(s.times.iter().zip(&s.lower).rev().map(|(t, v)| (*t, v * 1e6)))
                .collect();
            chart.draw_series(std::iter::once(Polygon::new(band, color.mix(0.2).filled())))?;
            chart
                .draw_series(LineSeries::new(
                    s.times.iter().zip(&s.mean).map(|(t, v)| (*t, v * 1e6)),
                    color.stroke_width(2),
                ))?
                .label(format!("{} (n={})", s.condition, s.n_epochs))
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(0.0, y0), (0.0, y1)],
            BLACK.mix(0.4),
        )))?;
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    root.present()?;
    Ok(())
}

/// Data, full model and aperiodic fit, with each peak shaded over its bandwidth.
pub fn plot_model(path: &Path, title: &str, model: &SpectralModel) -> Result<()> {
    let root = BitMapBackend::new(path, (1500, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = padded_range(model.freqs.iter().copied());
    let y_range = padded_range(
        model
            .power_spectrum
            .iter()
            .chain(&model.modeled_spectrum)
            .chain(&model.ap_fit)
            .copied(),
    );
    let (y0, y1) = (y_range.start, y_range.end);
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;
    chart.configure_mesh().x_desc("Frequency").y_desc("log(Power)").draw()?;

    for peak in &model.peak_params {
        let half = peak.bandwidth / 2.0;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(peak.cf - half, y0), (peak.cf + half, y1)],
            GREEN.mix(0.15).filled(),
        )))?;
    }

    let lines: [(&str, &[f64], RGBColor); 3] = [
        ("Original Spectrum", &model.power_spectrum, BLACK),
        ("Full Model Fit", &model.modeled_spectrum, RED),
        ("Aperiodic Fit", &model.ap_fit, BLUE),
    ];
    for (label, ys, color) in lines {
        chart
            .draw_series(LineSeries::new(
                model.freqs.iter().copied().zip(ys.iter().copied()),
                color.stroke_width(2),
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    for (peak, g) in model.peak_params.iter().zip(&model.gaussians) {
        let ap = model.mode.eval(peak.cf, &model.aperiodic_params);
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(g.cf, ap), (g.cf, ap + peak.power)],
            GREEN.stroke_width(2),
        )))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Side-by-side view of two or more models: original spectra, flattened
/// spectra, peak fits and aperiodic fits.
pub fn plot_parametrization(
    path: &Path,
    labels: &[&str],
    models: &[&SpectralModel],
) -> Result<()> {
    let Some(first) = models.first() else {
        return Ok(());
    };
    let root = BitMapBackend::new(path, (1500, 1000)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 2));

    let views: [(&str, fn(&SpectralModel) -> &[f64]); 4] = [
        ("Original Spectra", |m| m.power_spectrum.as_slice()),
        ("Flat Spectrum (NO AP)", |m| m.spectrum_flat.as_slice()),
        ("Peak Fit", |m| m.peak_fit.as_slice()),
        ("AP Fit", |m| m.ap_fit.as_slice()),
    ];
    for (panel, (title, pick)) in panels.iter().zip(views) {
        let series: Vec<(&str, &[f64])> =
            labels.iter().copied().zip(models.iter().map(|m| pick(m))).collect();
        draw_lines(panel, title, &first.freqs, &series, "Frequency", "log(Power)")?;
    }
    root.present()?;
    Ok(())
}
