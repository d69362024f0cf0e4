use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState, Wrap},
    Frame,
};
use crate::app::{App, FilterDialog, Mode};
use crate::filter::TypeChoice;
use crate::mdns::DiscoveryService;
use crate::tree::VisibleRow;

pub fn draw<D: DiscoveryService>(frame: &mut Frame, app: &App<D>) {
    let area = frame.area();
    let status_height = 1;
    let tree_height = u16::try_from(app.target_height)
        .unwrap_or(u16::MAX)
        .min(area.height.saturating_sub(status_height));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(tree_height),
            Constraint::Min(0),
            Constraint::Length(status_height),
        ])
        .split(area);

    render_tree(frame, app, chunks[0]);
    render_status(frame, app, chunks[2]);

    match &app.mode {
        Mode::Browse => {}
        Mode::AddType { input } => render_add_type(frame, input, area),
        Mode::Filter(dialog) => render_filter(frame, dialog, area),
    }

    if let Some(warning) = app.warnings.front() {
        render_warning(frame, warning, area);
    }
}

fn tree_row(row: &VisibleRow) -> Row<'static> {
    let marker = match (row.has_children, row.expanded) {
        (false, _) => "  ",
        (true, false) => "▸ ",
        (true, true) => "▾ ",
    };
    let indent = "  ".repeat(row.depth);
    Row::new(vec![
        Cell::from(format!("{}{}{}", indent, marker, row.row.label)),
        Cell::from(row.row.value.clone()),
    ])
}

fn render_tree<D: DiscoveryService>(frame: &mut Frame, app: &App<D>, area: Rect) {
    let rows = app.visible_rows();
    let table = Table::new(
        rows.iter().map(tree_row),
        [Constraint::Percentage(60), Constraint::Percentage(40)],
    )
    .header(
        Row::new(vec!["Name", "Value"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title(" Services "))
    .row_highlight_style(Style::default().bg(Color::Blue).fg(Color::White));

    let mut state = TableState::default();
    if !rows.is_empty() {
        state.select(Some(app.selected));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_status<D: DiscoveryService>(frame: &mut Frame, app: &App<D>, area: Rect) {
    let types = app.session().types();
    let browsing = if types.is_empty() {
        "no types selected".to_string()
    } else {
        types.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    let line = Line::from(vec![
        Span::styled(browsing, Style::default().fg(Color::Cyan)),
        Span::raw("  r refresh  a add type  f filter  q quit"),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn choice_marker(choice: TypeChoice) -> &'static str {
    match choice {
        TypeChoice::Checked => "[x]",
        TypeChoice::Partial => "[-]",
        TypeChoice::Unchecked => "[ ]",
    }
}

fn render_filter(frame: &mut Frame, dialog: &FilterDialog, area: Rect) {
    let popup = centered_rect(60, 70, area);
    let title = if dialog.scanning {
        " Search for types "
    } else {
        " Select types "
    };

    let mut items = vec![ListItem::new(format!(
        "{} Manage all (t)",
        choice_marker(dialog.all)
    ))];
    items.extend(
        dialog
            .entries
            .iter()
            .map(|(service_type, choice)| ListItem::new(format!("{} {}", choice_marker(*choice), service_type))),
    );

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .title_bottom(" space toggle  enter ok  esc cancel "),
        )
        .highlight_style(Style::default().bg(Color::Blue).fg(Color::White));

    let mut state = ListState::default();
    if !dialog.entries.is_empty() {
        state.select(Some(dialog.cursor + 1));
    }

    frame.render_widget(Clear, popup);
    frame.render_stateful_widget(list, popup, &mut state);
}

fn render_add_type(frame: &mut Frame, input: &str, area: Rect) {
    let popup = centered_rect(60, 20, area);
    let text = Paragraph::new(format!("Type: {}_", input)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Add type "),
    );
    frame.render_widget(Clear, popup);
    frame.render_widget(text, popup);
}

fn render_warning(frame: &mut Frame, message: &str, area: Rect) {
    let popup = centered_rect(60, 25, area);
    let text = Paragraph::new(message.to_string())
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(" Warning "),
        );
    frame.render_widget(Clear, popup);
    frame.render_widget(text, popup);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
