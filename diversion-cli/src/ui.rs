use diversion_core::{DeltaKind, Severity, ValidationFinding};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table, Tabs, Wrap},
};

use crate::app::{App, LEVELS};

pub(crate) fn draw(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();

    // Outer layout: level tabs, main content, status line
    let layout_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    let chunks = layout_chunks.as_ref();
    let [tabs_area, content_area, status_area] = chunks else {
        return;
    };

    let titles = LEVELS
        .iter()
        .map(|level| format!("{level} ({})", app.count_at(*level)))
        .collect::<Vec<String>>();
    let tabs = Tabs::new(titles)
        .select(app.level_index)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Findings: {}", app.source)),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, *tabs_area);

    if app.show_detail {
        draw_detail(frame, app, *content_area);
    } else {
        draw_list(frame, app, *content_area);
    }

    let nav_hint = if app.show_detail {
        "Esc/←/Enter back to list · q/Ctrl-C quit"
    } else {
        "←/→ level · ↑/↓ move · Enter details · q/Ctrl-C quit"
    };
    let status_text = match app.worst_severity() {
        Some(severity) => format!(
            "{} findings, worst {severity} · {nav_hint}",
            app.findings.len()
        ),
        None => format!("No findings · {nav_hint}"),
    };
    let status = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(Style::default().fg(app.worst_severity().map_or(Color::Reset, severity_color)))
        .wrap(Wrap { trim: true });
    frame.render_widget(status, *status_area);
}

fn draw_list(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let visible = app.visible();
    let items = if visible.is_empty() {
        vec![ListItem::new(format!("No {} findings.", app.level()))]
    } else {
        visible
            .iter()
            .map(|finding| {
                ListItem::new(format!(
                    "{:<8} {:<24} {:<22} {}",
                    finding.severity.to_string(),
                    finding.entity_name,
                    finding.metric.to_string(),
                    delta_label(finding),
                ))
                .style(Style::default().fg(severity_color(finding.severity)))
            })
            .collect()
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{} findings (↑/↓, Enter)", app.level())),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED | Modifier::BOLD));

    let mut state = ListState::default();
    if !visible.is_empty() {
        state.select(Some(app.list_index));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_detail(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let Some(finding) = app.selected() else {
        let paragraph = Paragraph::new("Nothing selected.")
            .block(Block::default().borders(Borders::ALL).title("Detail"));
        frame.render_widget(paragraph, area);
        return;
    };

    let percent = finding
        .percent_delta
        .map_or_else(|| "n/a (prior was zero)".to_owned(), |percent| format!("{percent:+.2}%"));
    let trigger = match finding.delta_kind {
        DeltaKind::Absolute => "absolute change",
        DeltaKind::Percentage => "percentage change",
    };

    let rows = [
        ("Level", finding.level.to_string()),
        ("Entity", format!("{} ({})", finding.entity_name, finding.entity_id)),
        ("Metric", finding.metric.to_string()),
        ("Prior", format!("{:.3}", finding.prior)),
        ("Current", format!("{:.3}", finding.current)),
        ("Change", format!("{:+.3}", finding.absolute_delta)),
        ("Change %", percent),
        ("Triggered by", trigger.to_owned()),
        ("Severity", finding.severity.to_string()),
    ]
    .into_iter()
    .map(|(label, value)| {
        Row::new(vec![
            Cell::from(label).style(Style::default().add_modifier(Modifier::BOLD)),
            Cell::from(value),
        ])
    });

    let table = Table::new(rows, [Constraint::Length(14), Constraint::Min(20)])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{} · {}", finding.entity_name, finding.metric)),
        )
        .style(Style::default().fg(severity_color(finding.severity)))
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn delta_label(finding: &ValidationFinding) -> String {
    match finding.percent_delta {
        Some(percent) => format!("{percent:+.1}%"),
        None => format!("{:+.2} from zero", finding.absolute_delta),
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Notice => Color::Cyan,
        Severity::Warning => Color::Yellow,
        Severity::Critical => Color::Red,
    }
}
