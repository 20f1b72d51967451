//! Sensor dashboard - live terminal view of a gateway
//!
//! Follows the latest reading by polling or over the SSE stream and shows:
//! - current temperature, CO₂ and humidity, with the CO₂ alert
//! - line charts over the last 20 distinct readings
//! - the fleet map with node status and relative distances to the selection
//!
//! Keys: q/Esc quit, Up/Down select a node on the map.
//!
//! Usage:
//!   cargo run --bin sensor-dashboard -- --url http://localhost:3000 --mode stream

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::canvas::{Canvas, Points},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, List, ListItem, Paragraph},
    Frame, Terminal,
};
use sensor_gateway::domain::node::format_meters;
use sensor_gateway::domain::types::Measurements;
use sensor_gateway::infra::{Config, DashboardMode};
use sensor_gateway::io::dashboard_client::{
    run_poll_feed, run_stream_feed, DashboardClient, FeedEvent, LayoutView,
};
use sensor_gateway::services::layout::{relative_distances, RelativeDistance};
use sensor_gateway::services::reconciler::Reconciler;
use std::io;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Relative distances listed next to the map
const MAX_DISTANCE_ROWS: usize = 12;

#[derive(Parser, Debug)]
#[command(name = "sensor-dashboard")]
#[command(about = "Terminal dashboard for the sensor gateway")]
struct Args {
    /// Config file with a [dashboard] section
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway base URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// poll or stream (overrides config)
    #[arg(long, value_parser = ["poll", "stream"])]
    mode: Option<String>,
}

/// Everything the UI draws; owned by the UI loop
struct DashboardState {
    reconciler: Reconciler,
    connected: bool,
    last_update: Option<Instant>,
    layout: Option<LayoutView>,
    selected: usize,
    distances: Vec<RelativeDistance>,
    mode: &'static str,
    url: String,
}

impl DashboardState {
    fn new(mode: &'static str, url: String) -> Self {
        Self {
            reconciler: Reconciler::new(),
            connected: false,
            last_update: None,
            layout: None,
            selected: 0,
            distances: Vec::new(),
            mode,
            url,
        }
    }

    fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Observation(observed) => {
                let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
                self.reconciler.tick(observed, now);
                if observed.is_some() {
                    self.last_update = Some(Instant::now());
                }
            }
            FeedEvent::Connected(connected) => self.connected = connected,
        }
    }

    fn set_layout(&mut self, layout: LayoutView) {
        self.layout = Some(layout);
        self.selected = 0;
        self.refresh_distances();
    }

    fn select(&mut self, delta: isize) {
        let Some(layout) = &self.layout else { return };
        let len = layout.nodes.len();
        if len == 0 {
            return;
        }
        self.selected = (self.selected as isize + delta).rem_euclid(len as isize) as usize;
        self.refresh_distances();
    }

    fn selected_name(&self) -> Option<&str> {
        self.layout.as_ref()?.nodes.get(self.selected).map(|p| p.node.name.as_str())
    }

    fn refresh_distances(&mut self) {
        let Some(layout) = &self.layout else { return };
        let Some(name) = self.selected_name().map(str::to_string) else { return };
        let nodes: Vec<_> = layout.nodes.iter().map(|p| p.node.clone()).collect();
        self.distances = relative_distances(&nodes, &name).unwrap_or_default();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    let url = args.url.unwrap_or_else(|| config.dashboard_url().to_string());
    let mode = match args.mode.as_deref() {
        Some("stream") => DashboardMode::Stream,
        Some(_) => DashboardMode::Poll,
        None => config.dashboard_mode(),
    };
    let poll_interval = Duration::from_millis(config.dashboard_poll_interval_ms());
    let client = DashboardClient::new(&url)?;

    let (feed_tx, mut feed_rx) = mpsc::channel(64);
    let feed_client = client.clone();
    let feed_handle = tokio::spawn(async move {
        match mode {
            DashboardMode::Poll => run_poll_feed(feed_client, poll_interval, feed_tx).await,
            DashboardMode::Stream => run_stream_feed(feed_client, poll_interval, feed_tx).await,
        }
    });

    // The layout is fixed for the gateway's lifetime, so one successful fetch is enough
    let (layout_tx, mut layout_rx) = mpsc::channel(1);
    let layout_handle = tokio::spawn(async move {
        loop {
            if let Ok(layout) = client.fetch_layout(None).await {
                let _ = layout_tx.send(layout).await;
                return;
            }
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mode_label = match mode {
        DashboardMode::Poll => "poll",
        DashboardMode::Stream => "stream",
    };
    let mut state = DashboardState::new(mode_label, url);

    let result = run_ui(&mut terminal, &mut state, &mut feed_rx, &mut layout_rx).await;

    feed_handle.abort();
    layout_handle.abort();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut DashboardState,
    feed_rx: &mut mpsc::Receiver<FeedEvent>,
    layout_rx: &mut mpsc::Receiver<LayoutView>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tick_rate = Duration::from_millis(100);

    loop {
        while let Ok(event) = feed_rx.try_recv() {
            state.apply(event);
        }
        if let Ok(layout) = layout_rx.try_recv() {
            state.set_layout(layout);
        }

        terminal.draw(|f| draw_ui(f, state))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Up => state.select(-1),
                        KeyCode::Down => state.select(1),
                        _ => {}
                    }
                }
            }
        }
        tokio::task::yield_now().await;
    }
}

fn draw_ui(f: &mut Frame, state: &DashboardState) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),      // Header
            Constraint::Length(5),      // Value cards
            Constraint::Percentage(40), // Charts
            Constraint::Min(0),         // Map + distances
        ])
        .split(f.area());

    draw_header(f, main_chunks[0], state);
    draw_cards(f, main_chunks[1], state);
    draw_charts(f, main_chunks[2], state);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_chunks[3]);

    draw_map(f, bottom[0], state);
    draw_fleet_panel(f, bottom[1], state);
}

fn draw_header(f: &mut Frame, area: Rect, state: &DashboardState) {
    let status_color = if state.connected { Color::Green } else { Color::Red };
    let status_text = if state.connected { "CONNECTED" } else { "DISCONNECTED" };

    let last = state
        .last_update
        .map(|t| format!("{}s ago", t.elapsed().as_secs()))
        .unwrap_or_else(|| "never".to_string());

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Sensor Dashboard ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| "),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw(format!(" | {} ({}) | Last: {} ", state.url, state.mode, last)),
        Span::raw("| Up/Down select, 'q' quit"),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn value_card<'a>(title: &'a str, value: &'a str, color: Color, note: Option<&'a str>) -> Paragraph<'a> {
    let mut lines = vec![Line::from(Span::styled(
        value,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))];
    if let Some(note) = note {
        lines.push(Line::from(Span::styled(note, Style::default().fg(color))));
    }
    Paragraph::new(lines).block(
        Block::default()
            .title(format!(" {title} "))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color)),
    )
}

fn draw_cards(f: &mut Frame, area: Rect, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(34),
            Constraint::Percentage(33),
        ])
        .split(area);

    let display = state.reconciler.display();
    let idle = if display.has_data { None } else { Some("waiting for data") };
    let (co2_color, co2_note) = if display.co2_alert {
        (Color::Red, Some("High CO₂ - ventilate"))
    } else {
        (Color::Green, idle)
    };

    f.render_widget(value_card("Temperature", &display.temperature, Color::Yellow, idle), chunks[0]);
    f.render_widget(value_card("CO₂", &display.co2, co2_color, co2_note), chunks[1]);
    f.render_widget(value_card("Humidity", &display.humidity, Color::Cyan, idle), chunks[2]);
}

fn bounds(points: &[(f64, f64)]) -> [f64; 2] {
    let min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((max - min) * 0.1).max(1.0);
    [min - pad, max + pad]
}

fn draw_chart(
    f: &mut Frame,
    area: Rect,
    title: &str,
    points: &[(f64, f64)],
    x_labels: &[String],
    color: Color,
) {
    let y = bounds(points);
    let x_max = (points.len().saturating_sub(1)).max(1) as f64;
    let dataset = Dataset::default()
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(points);

    let chart = Chart::new(vec![dataset])
        .block(Block::default().title(format!(" {title} ")).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .bounds([0.0, x_max])
                .labels(x_labels.iter().map(|l| Span::raw(l.clone())).collect::<Vec<_>>())
                .style(Style::default().fg(Color::DarkGray)),
        )
        .y_axis(
            Axis::default()
                .bounds(y)
                .labels(vec![Span::raw(format!("{:.0}", y[0])), Span::raw(format!("{:.0}", y[1]))])
                .style(Style::default().fg(Color::DarkGray)),
        );
    f.render_widget(chart, area);
}

fn draw_charts(f: &mut Frame, area: Rect, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(34),
            Constraint::Percentage(33),
        ])
        .split(area);

    let buffer = state.reconciler.buffer();
    let x_labels: Vec<String> = match (buffer.iter().next(), buffer.last()) {
        (Some(first), Some(last)) => vec![first.label.clone(), last.label.clone()],
        _ => Vec::new(),
    };

    let series: [(&str, fn(&Measurements) -> f64, Color); 3] = [
        ("Temperature °C", |m| m.temperature, Color::Yellow),
        ("CO₂ ppm", |m| m.co2, Color::Green),
        ("Humidity %", |m| m.humidity, Color::Cyan),
    ];
    for (i, (title, metric, color)) in series.into_iter().enumerate() {
        let points = buffer.series(metric);
        draw_chart(f, chunks[i], title, &points, &x_labels, color);
    }
}

fn draw_map(f: &mut Frame, area: Rect, state: &DashboardState) {
    let block = Block::default()
        .title(" Fleet map ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let Some(layout) = &state.layout else {
        f.render_widget(Paragraph::new("loading layout...").block(block), area);
        return;
    };

    // Positions grow downwards; the canvas grows upwards
    let mut active = Vec::new();
    let mut inactive = Vec::new();
    for placed in &layout.nodes {
        let point = (placed.position.x, 100.0 - placed.position.y);
        if placed.node.status.is_active() {
            active.push(point);
        } else {
            inactive.push(point);
        }
    }
    let selected = layout
        .nodes
        .get(state.selected)
        .map(|p| (p.position.x, 100.0 - p.position.y, p.node.name.clone()));

    let canvas = Canvas::default()
        .block(block)
        .marker(Marker::Braille)
        .x_bounds([0.0, 100.0])
        .y_bounds([0.0, 100.0])
        .paint(move |ctx| {
            ctx.draw(&Points { coords: &active, color: Color::Green });
            ctx.draw(&Points { coords: &inactive, color: Color::Red });
            if let Some((x, y, name)) = &selected {
                ctx.draw(&Points { coords: &[(*x, *y)], color: Color::Yellow });
                ctx.print(*x, *y, Span::styled(name.clone(), Style::default().fg(Color::Yellow)));
            }
        });
    f.render_widget(canvas, area);
}

fn draw_fleet_panel(f: &mut Frame, area: Rect, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)])
        .split(area);

    let summary_lines = match &state.layout {
        Some(layout) => vec![
            Line::from(vec![
                Span::raw("Online:   "),
                Span::styled(layout.summary.active.to_string(), Style::default().fg(Color::Green)),
            ]),
            Line::from(vec![
                Span::raw("Offline:  "),
                Span::styled(layout.summary.inactive.to_string(), Style::default().fg(Color::Red)),
            ]),
            Line::from(format!("Distance: {}", format_meters(layout.summary.total_distance))),
            Line::from(format!(
                "Selected: {}",
                state.selected_name().unwrap_or("-")
            )),
        ],
        None => vec![Line::from("no layout yet")],
    };
    let summary = Paragraph::new(summary_lines).block(
        Block::default()
            .title(" Fleet ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );
    f.render_widget(summary, chunks[0]);

    let status_of = |name: &str| {
        state
            .layout
            .as_ref()
            .and_then(|l| l.nodes.iter().find(|p| p.node.name == name))
            .map(|p| p.node.status)
    };
    let items: Vec<ListItem> = state
        .distances
        .iter()
        .take(MAX_DISTANCE_ROWS)
        .map(|d| {
            let color = match status_of(&d.name) {
                Some(status) if status.is_active() => Color::Green,
                Some(_) => Color::Red,
                None => Color::White,
            };
            let label = status_of(&d.name).map(|s| s.label()).unwrap_or("-");
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<8}", d.name), Style::default().fg(color)),
                Span::raw(format!("{:>8}  {}", format_meters(d.distance), label)),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Relative distance ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(list, chunks[1]);
}
