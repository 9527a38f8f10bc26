//! SVG rendering of ROC and precision-recall curves.

use super::{PrCurve, RocCurve};
use anyhow::Result;
use plotters::prelude::*;
use std::path::Path;
use tracing::info;

const SIZE: (u32, u32) = (640, 480);

/// ROC curve with the chance diagonal and the AUC in the legend
pub fn render_roc_curve<P: AsRef<Path>>(roc: &RocCurve, roc_auc: f64, path: P) -> Result<()> {
    let path = path.as_ref();
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("ROC Curve", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0f64..1.0f64, 0.0f64..1.05f64)?;

    chart
        .configure_mesh()
        .x_desc("False Positive Rate")
        .y_desc("True Positive Rate")
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            roc.fpr.iter().copied().zip(roc.tpr.iter().copied()),
            &BLUE,
        ))?
        .label(format!("AUC= {:.2}", roc_auc))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart.draw_series(LineSeries::new(vec![(0.0, 0.0), (1.0, 1.0)], &RED))?;

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    info!("ROC curve written to {:?}", path);
    Ok(())
}

/// Precision against recall with a marker at every threshold
pub fn render_pr_curve<P: AsRef<Path>>(pr: &PrCurve, auprc: f64, path: P) -> Result<()> {
    let path = path.as_ref();
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("PRC Curve", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0f64..1.0f64, 0.0f64..1.05f64)?;

    chart
        .configure_mesh()
        .x_desc("Recall")
        .y_desc("Precision")
        .draw()?;

    let points: Vec<(f64, f64)> = pr
        .recall
        .iter()
        .copied()
        .zip(pr.precision.iter().copied())
        .collect();

    chart
        .draw_series(LineSeries::new(points.iter().copied(), &BLUE))?
        .label(format!("AUC= {:.2}", auprc))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart.draw_series(points.iter().map(|&p| Circle::new(p, 2, BLUE.filled())))?;

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    info!("PR curve written to {:?}", path);
    Ok(())
}
