use crate::app::{App, AppView, Panel};
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};
use speedmeter::settings::SettingsField;
use speedmeter::speedtest::{format_speed, TestPhase};

// Color Palette - Elegant & Minimal
const ACCENT: Color = Color::Rgb(100, 149, 237);      // Cornflower blue
const SUCCESS: Color = Color::Rgb(134, 194, 156);     // Soft green
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);        // Soft blue
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const WARN: Color = Color::Rgb(220, 180, 130);        // Soft amber
const ERROR: Color = Color::Rgb(220, 110, 110);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let area = frame.area();

    match app.view {
        AppView::Main => {
            if app.expanded {
                draw_expanded_view(frame, area, app);
            } else {
                draw_normal_view(frame, area, app);
            }
        }
        AppView::Settings => {
            draw_settings_view(frame, area, app);
        }
        AppView::History => {
            draw_history_view(frame, area, app);
        }
    }
}

fn draw_normal_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app);
    draw_status_line(frame, chunks[2], app);

    let panels = Layout::horizontal([
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
    ])
    .split(chunks[1]);

    for (area, panel) in panels.iter().zip([Panel::Download, Panel::Upload, Panel::Ping]) {
        let metric = Metric::for_panel(panel, app);
        draw_panel(frame, *area, &metric, app.selected_panel == panel);
    }

    draw_help(frame, chunks[3], app);
}

fn draw_expanded_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app);

    let metric = Metric::for_panel(app.selected_panel, app);
    draw_expanded_panel(frame, chunks[1], &metric);

    draw_help(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(28),
    ])
    .split(inner);

    // Title
    let title = Paragraph::new("speedmeter")
        .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD));
    frame.render_widget(title, chunks[0]);

    // Status
    let (status, color) = match app.phase {
        TestPhase::Idle => ("Ready".to_string(), TEXT_MUTED),
        TestPhase::Selecting => ("Selecting server...".to_string(), WARN),
        TestPhase::Pinging => ("Measuring latency...".to_string(), WARN),
        TestPhase::Downloading => ("Testing download...".to_string(), SUCCESS),
        TestPhase::Uploading => ("Testing upload...".to_string(), INFO),
        TestPhase::Completed => ("Complete".to_string(), ACCENT),
        TestPhase::Cancelled => ("Stopped".to_string(), TEXT_SECONDARY),
        TestPhase::Failed => ("Failed".to_string(), ERROR),
    };
    let status = match &app.server {
        Some(server) if app.phase != TestPhase::Idle => format!("{} · {}", status, server.name),
        _ => status,
    };

    let status_text = Paragraph::new(status)
        .style(Style::default().fg(color))
        .alignment(Alignment::Center);
    frame.render_widget(status_text, chunks[1]);

    // Phase indicator
    let phase_text = create_phase_text(app.phase);
    frame.render_widget(
        Paragraph::new(phase_text).alignment(Alignment::Right),
        chunks[2],
    );
}

fn create_phase_text(phase: TestPhase) -> Line<'static> {
    let phases = [
        (TestPhase::Selecting, "select"),
        (TestPhase::Pinging, "ping"),
        (TestPhase::Downloading, "down"),
        (TestPhase::Uploading, "up"),
    ];
    let current = phases.iter().position(|(p, _)| *p == phase);

    let mut spans = Vec::new();

    for (i, (p, label)) in phases.iter().enumerate() {
        let is_active = phase == *p;
        let is_complete = phase == TestPhase::Completed || current.is_some_and(|c| i < c);

        let style = if is_active {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if is_complete {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };

        spans.push(Span::styled(*label, style));

        if i < phases.len() - 1 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
    }

    Line::from(spans)
}

/// What a panel shows, independent of whether it is drawn small or expanded.
struct Metric<'a> {
    title: &'static str,
    color: Color,
    dim_color: Color,
    value: String,
    detail: Option<String>,
    progress: Option<f64>,
    samples: &'a [f64],
    unit: &'static str,
}

impl<'a> Metric<'a> {
    fn for_panel(panel: Panel, app: &'a App) -> Self {
        match panel {
            Panel::Download => Metric {
                title: "Download",
                color: SUCCESS,
                dim_color: SUCCESS_DIM,
                value: format_speed(current_value(app.measured.download_mbps, &app.download_samples)),
                detail: None,
                progress: Some(stage_progress(app, app.download_progress)),
                samples: &app.download_samples,
                unit: "Mbps",
            },
            Panel::Upload => Metric {
                title: "Upload",
                color: INFO,
                dim_color: INFO_DIM,
                value: format_speed(current_value(app.measured.upload_mbps, &app.upload_samples)),
                detail: None,
                progress: Some(stage_progress(app, app.upload_progress)),
                samples: &app.upload_samples,
                unit: "Mbps",
            },
            Panel::Ping => {
                let ping = current_value(app.measured.ping_ms, &app.ping_samples);
                let jitter = if app.measured.jitter_ms > 0.0 {
                    format!("jitter {:.1} ms", app.measured.jitter_ms)
                } else {
                    "jitter —".to_string()
                };
                Metric {
                    title: "Latency",
                    color: WARN,
                    dim_color: WARN,
                    value: if ping > 0.0 { format!("{:.0} ms", ping) } else { "—".to_string() },
                    detail: Some(jitter),
                    progress: None,
                    samples: &app.ping_samples,
                    unit: "ms",
                }
            }
        }
    }

    fn format(&self, value: f64) -> String {
        if self.unit == "ms" {
            format!("{:.0} ms", value)
        } else {
            format_speed(value)
        }
    }
}

// Panels
fn draw_panel(frame: &mut Frame, area: Rect, metric: &Metric, selected: bool) {
    let border_color = if selected { BORDER_ACTIVE } else { BORDER };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(Span::styled(
            format!(" {} ", metric.title),
            Style::default().fg(if selected { metric.color } else { TEXT_SECONDARY }),
        ));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new(metric.value.clone())
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    match (metric.progress, &metric.detail) {
        (Some(progress), _) => {
            draw_progress_bar(frame, chunks[1], progress, metric.color, metric.dim_color)
        }
        (None, Some(detail)) => frame.render_widget(
            Paragraph::new(detail.clone())
                .style(Style::default().fg(TEXT_MUTED))
                .alignment(Alignment::Center),
            chunks[1],
        ),
        (None, None) => {}
    }

    draw_chart(frame, chunks[2], metric, false);
}

fn draw_expanded_panel(frame: &mut Frame, area: Rect, metric: &Metric) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER_ACTIVE))
        .title(Span::styled(
            format!(" {} ", metric.title),
            Style::default().fg(metric.color),
        ));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(4),
    ])
    .split(inner);

    let separator = || Span::styled("  ·  ", Style::default().fg(TEXT_MUTED));
    let mut spans = vec![Span::styled(
        metric.value.clone(),
        Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
    )];
    if let Some(detail) = &metric.detail {
        spans.push(separator());
        spans.push(Span::styled(detail.clone(), Style::default().fg(TEXT_SECONDARY)));
    }
    if let Some((avg, max, min)) = get_stats(metric.samples) {
        for (label, value) in [("avg", avg), ("max", max), ("min", min)] {
            spans.push(separator());
            spans.push(Span::styled(
                format!("{} {}", label, metric.format(value)),
                Style::default().fg(TEXT_MUTED),
            ));
        }
    }
    frame.render_widget(
        Paragraph::new(Line::from(spans)).alignment(Alignment::Center),
        chunks[0],
    );

    if let Some(progress) = metric.progress {
        draw_progress_bar(frame, chunks[1], progress, metric.color, metric.dim_color);
    }

    draw_chart(frame, chunks[2], metric, true);
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio.clamp(0.0, 1.0) * width as f64) as usize).min(width);
    let empty = width - filled;

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(empty), Style::default().fg(dim_color)),
        Span::raw(" "),
    ]);

    frame.render_widget(Paragraph::new(bar), area);
}

/// Line chart of `data`. The detailed form adds an average line and y labels.
fn draw_chart(frame: &mut Frame, area: Rect, metric: &Metric, detailed: bool) {
    let data = metric.samples;
    let (min_width, min_height) = if detailed { (10, 3) } else { (4, 2) };
    if data.is_empty() || area.width < min_width || area.height < min_height {
        return;
    }

    let (low, high) = get_data_range(data);
    let pad = (high - low).max(if detailed { 0.1 } else { 1.0 }) * 0.1;
    let y_bounds = if detailed {
        [(low - pad).max(0.0), high + pad]
    } else {
        [low - pad, high + pad]
    };
    let x_bounds = [0.0, data.len() as f64];

    let points = to_points(data);
    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let avg_line = [(x_bounds[0], avg), (x_bounds[1], avg)];

    let mut datasets = vec![line_dataset(&points, metric.color)];
    let mut x_axis = Axis::default().bounds(x_bounds);
    let mut y_axis = Axis::default().bounds(y_bounds);
    if detailed {
        datasets.push(line_dataset(&avg_line, TEXT_MUTED));
        x_axis = x_axis.style(Style::default().fg(BORDER));
        y_axis = y_axis.style(Style::default().fg(BORDER)).labels(vec![
            Span::styled(format!("{:.0}", y_bounds[0]), Style::default().fg(TEXT_MUTED)),
            Span::styled(
                format!("{:.0} {}", y_bounds[1], metric.unit),
                Style::default().fg(TEXT_MUTED),
            ),
        ]);
    }

    frame.render_widget(Chart::new(datasets).x_axis(x_axis).y_axis(y_axis), area);
}

fn line_dataset(points: &[(f64, f64)], color: Color) -> Dataset<'_> {
    Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(points)
}

fn draw_status_line(frame: &mut Frame, area: Rect, app: &App) {
    let color = match app.phase {
        TestPhase::Failed => ERROR,
        phase if phase.is_terminal() => ACCENT,
        _ => TEXT_SECONDARY,
    };
    let separator = || Span::styled("  ·  ", Style::default().fg(TEXT_MUTED));
    let mut spans = vec![Span::styled(app.status.clone(), Style::default().fg(color))];
    if app.phase == TestPhase::Idle {
        if let Some(last) = app.history.latest() {
            spans.push(separator());
            spans.push(Span::styled(
                format!(
                    "last ↓ {} ↑ {}",
                    format_speed(last.download_mbps),
                    format_speed(last.upload_mbps)
                ),
                Style::default().fg(TEXT_SECONDARY),
            ));
        }
    }
    spans.push(separator());
    spans.push(Span::styled(
        format!("server {}", app.selected_server_name()),
        Style::default().fg(TEXT_MUTED),
    ));
    let line = Line::from(spans);
    frame.render_widget(Paragraph::new(line).alignment(Alignment::Center), area);
}

// Settings
fn draw_settings_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(area);

    draw_titled_header(frame, chunks[0], "Settings");

    let content_area = Layout::horizontal([
        Constraint::Length(2),
        Constraint::Min(30),
        Constraint::Length(2),
    ])
    .split(chunks[1])[1];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(content_area);
    frame.render_widget(block, content_area);

    let mut constraints = vec![Constraint::Length(2); SettingsField::ALL.len()];
    constraints.push(Constraint::Min(0));
    let rows = Layout::vertical(constraints).split(inner);

    for (row, field) in rows.iter().zip(SettingsField::ALL) {
        draw_setting_row(
            frame,
            *row,
            field.label(),
            &setting_value(app, field),
            app.selected_setting == field,
        );
    }

    let help = "↑↓ select · ←→ adjust · enter save";
    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn setting_value(app: &App, field: SettingsField) -> String {
    let s = &app.settings;
    match field {
        SettingsField::Duration => format!("{} s", s.duration_secs),
        SettingsField::Warmup => format!("{} s", s.warmup_secs),
        SettingsField::Connections => s.connections.to_string(),
        SettingsField::PingCount => s.ping_count.to_string(),
        SettingsField::AutoSelect => if s.auto_select { "on" } else { "off" }.to_string(),
        SettingsField::Server => app
            .engine
            .servers()
            .get(s.server_index)
            .map(|server| server.name.clone())
            .unwrap_or_else(|| "—".to_string()),
    }
}

fn draw_setting_row(frame: &mut Frame, area: Rect, label: &str, value: &str, selected: bool) {
    let chunks = Layout::horizontal([
        Constraint::Length(16),
        Constraint::Min(10),
    ])
    .split(area);

    let (label_style, value_style) = if selected {
        (Style::default().fg(ACCENT), Style::default().fg(TEXT_PRIMARY))
    } else {
        (Style::default().fg(TEXT_SECONDARY), Style::default().fg(TEXT_MUTED))
    };

    frame.render_widget(
        Paragraph::new(format!(" {}", label)).style(label_style),
        chunks[0],
    );

    let value_text = if selected {
        format!("< {} >", value)
    } else {
        value.to_string()
    };
    frame.render_widget(Paragraph::new(value_text).style(value_style), chunks[1]);
}

// History
fn draw_history_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(5),
        Constraint::Length(1),
    ])
    .split(area);

    draw_titled_header(frame, chunks[0], "History");

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(chunks[1]);
    frame.render_widget(block, chunks[1]);

    let entries = app.history.entries();
    let lines: Vec<Line> = if entries.is_empty() {
        vec![Line::styled(" No completed tests yet", Style::default().fg(TEXT_MUTED))]
    } else {
        entries
            .iter()
            .skip(app.history_scroll)
            .take(inner.height as usize)
            .map(|entry| {
                Line::from(vec![
                    Span::styled(
                        format!(" {} ", entry.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")),
                        Style::default().fg(TEXT_MUTED),
                    ),
                    Span::styled(format!("↓ {:>11} ", format_speed(entry.download_mbps)), Style::default().fg(SUCCESS)),
                    Span::styled(format!("↑ {:>11} ", format_speed(entry.upload_mbps)), Style::default().fg(INFO)),
                    Span::styled(
                        format!("{:>5.0} ms ±{:.1} ", entry.ping_ms, entry.jitter_ms),
                        Style::default().fg(WARN),
                    ),
                    Span::styled(entry.server_name.clone(), Style::default().fg(TEXT_SECONDARY)),
                ])
            })
            .collect()
    };
    frame.render_widget(Paragraph::new(lines), inner);

    frame.render_widget(
        Paragraph::new("↑↓ scroll · esc back")
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_titled_header(frame: &mut Frame, area: Rect, title: &str) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    frame.render_widget(
        Paragraph::new(title.to_string())
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        inner,
    );
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = if app.expanded {
        "esc close · q quit"
    } else if app.is_testing() {
        "tab select · space expand · esc cancel · q quit"
    } else {
        "enter start · s settings · h history · tab select · space expand · q quit"
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

// Helpers
/// Final value once known, otherwise the latest sample.
fn current_value(final_value: f64, samples: &[f64]) -> f64 {
    if final_value > 0.0 {
        final_value
    } else {
        samples.last().copied().unwrap_or(0.0)
    }
}

fn stage_progress(app: &App, progress: f64) -> f64 {
    if app.phase == TestPhase::Completed {
        1.0
    } else {
        progress
    }
}

fn to_points(data: &[f64]) -> Vec<(f64, f64)> {
    data.iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect()
}

fn get_data_range(data: &[f64]) -> (f64, f64) {
    let min = data.iter().cloned().fold(f64::MAX, f64::min);
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    (if min == f64::MAX { 0.0 } else { min }, if max == f64::MIN { 0.0 } else { max })
}

fn get_stats(data: &[f64]) -> Option<(f64, f64, f64)> {
    if data.is_empty() {
        return None;
    }
    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let (min, max) = get_data_range(data);
    Some((avg, max, min))
}
