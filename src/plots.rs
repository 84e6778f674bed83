use plotters::prelude::*;

const PLOT_FONT_SIZE: u32 = 15;
const PLOT_SIZE_X: u32 = 400;
const PLOT_SIZE_Y: u32 = 200;
const PLOT_FOLDER: &str = "plots";

// one sync-track event every half frame
const EVENT_PERIOD_SEC: f64 = 0.005;

pub fn plot_time_graph(name: &str, time_series: &[f64], y_delta: f64, color: &RGBColor) {
    if time_series.len() < 10 {
        return;
    }
    if std::fs::create_dir_all(PLOT_FOLDER).is_err() {
        log::warn!("Failed to create {} folder", PLOT_FOLDER);
        return;
    }

    let file_name = format!("{}/{}.png", PLOT_FOLDER, name);
    let root_area = BitMapBackend::new(&file_name, (PLOT_SIZE_X, PLOT_SIZE_Y)).into_drawing_area();
    root_area.fill(&WHITE).unwrap();

    let x_max = time_series.len() as f64 * EVENT_PERIOD_SEC;

    let mut y_max = time_series
        .iter()
        .fold(f64::MIN, |acc, v| if *v > acc { *v } else { acc });
    y_max += y_delta;
    let mut y_min = time_series
        .iter()
        .fold(f64::MAX, |acc, v| if *v < acc { *v } else { acc });
    y_min -= y_delta;

    let mut ctx = ChartBuilder::on(&root_area)
        .set_label_area_size(LabelAreaPosition::Left, 40)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .caption(name, ("sans-serif", PLOT_FONT_SIZE))
        .build_cartesian_2d(0.0..x_max, y_min..y_max)
        .unwrap();

    ctx.configure_mesh().draw().unwrap();

    ctx.draw_series(
        time_series
            .iter()
            .enumerate()
            .map(|(idx, v)| Circle::new((idx as f64 * EVENT_PERIOD_SEC, *v), 1, color)),
    )
    .unwrap();

    log::info!("Wrote chart: {}", file_name);
}
