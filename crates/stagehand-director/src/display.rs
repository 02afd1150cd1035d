//! Status rendering. Sinks only observe snapshots; they never steer the loop.

use chrono::{DateTime, Local};
use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};
use stagehand_core::layout::SlotTable;
use stagehand_core::{status_label, RankedRoomList, Room};
use stagehand_obs::SessionState;
use std::io::{self, Stdout};
use std::time::Duration;
use tracing::{debug, info, warn};

const COMPACT_WIDTH: u16 = 100;
const MONITOR_ONLY_LABEL: &str = "monitor-only";

/// Everything a sink needs to draw one cycle.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub cycle: u64,
    pub taken_at: DateTime<Local>,
    /// `None` in monitor-only mode.
    pub session: Option<SessionState>,
    pub scene_name: String,
    pub ranked: RankedRoomList,
    pub slots: Option<SlotTable>,
    pub ops_applied: usize,
    pub ops_failed: usize,
    pub last_error: Option<String>,
    pub interval: Duration,
}

impl StatusSnapshot {
    pub fn session_label(&self) -> &'static str {
        self.session
            .map(|state| state.as_str())
            .unwrap_or(MONITOR_ONLY_LABEL)
    }

    pub fn slot_of(&self, room_id: &str) -> Option<usize> {
        self.slots.as_ref()?.slot_of(room_id)
    }

    pub fn rows(&self) -> Vec<RoomRow> {
        self.ranked
            .iter()
            .enumerate()
            .map(|(index, room)| RoomRow::new(index + 1, room, self.slot_of(&room.id)))
            .collect()
    }
}

/// One table line, already formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRow {
    pub rank: usize,
    pub id: String,
    pub nickname: String,
    pub viewers: String,
    pub status: String,
    pub slot: String,
    pub detail: String,
    pub failed: bool,
}

impl RoomRow {
    fn new(rank: usize, room: &Room, slot: Option<usize>) -> Self {
        let (status, detail) = match &room.error {
            Some(err) => (err.category().to_string(), err.to_string()),
            None => (status_label(room.status_code).to_string(), room.title.clone()),
        };
        Self {
            rank,
            id: room.id.clone(),
            nickname: room.display_name().to_string(),
            viewers: room.viewers_display.clone(),
            status,
            slot: slot.map(|index| (index + 1).to_string()).unwrap_or_else(|| "-".to_string()),
            detail,
            failed: room.is_failed(),
        }
    }
}

pub trait DisplaySink {
    fn publish(&mut self, snapshot: &StatusSnapshot);

    /// Gives the terminal back; called on every exit path.
    fn restore(&mut self) {}
}

/// Headless sink: one summary line per cycle, one debug line per room.
#[derive(Debug, Default)]
pub struct LogSink;

impl DisplaySink for LogSink {
    fn publish(&mut self, snapshot: &StatusSnapshot) {
        info!(
            "cycle_summary: cycle={} session={} rooms={}/{} viewers={} applied={} failed={}",
            snapshot.cycle,
            snapshot.session_label(),
            snapshot.ranked.succeeded(),
            snapshot.ranked.len(),
            snapshot.ranked.total_viewers(),
            snapshot.ops_applied,
            snapshot.ops_failed
        );
        for row in snapshot.rows() {
            debug!(
                "room_status: rank={} id={} name={} viewers={} status={} slot={} {}",
                row.rank, row.id, row.nickname, row.viewers, row.status, row.slot, row.detail
            );
        }
    }
}

/// Colors by role on the wall monitor.
#[derive(Clone, Copy)]
struct StageTheme {
    backdrop: Color,
    panel: Color,
    rule: Color,
    heading: Color,
    body: Color,
    dim: Color,
    viewers: Color,
    on_air: Color,
    degraded: Color,
    failed: Color,
}

const STAGE: StageTheme = StageTheme {
    backdrop: Color::Rgb(20, 16, 24),
    panel: Color::Rgb(31, 25, 38),
    rule: Color::Rgb(94, 76, 108),
    heading: Color::Rgb(250, 204, 120),
    body: Color::Rgb(236, 228, 240),
    dim: Color::Rgb(152, 140, 162),
    viewers: Color::Rgb(244, 114, 182),
    on_air: Color::Rgb(132, 204, 22),
    degraded: Color::Rgb(251, 146, 60),
    failed: Color::Rgb(248, 82, 82),
};

/// Alternate-screen table. Raw mode stays off so Ctrl-C still reaches the process.
pub struct TerminalSink {
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
}

impl TerminalSink {
    pub fn enter() -> io::Result<Self> {
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self {
            terminal: Some(terminal),
        })
    }
}

impl DisplaySink for TerminalSink {
    fn publish(&mut self, snapshot: &StatusSnapshot) {
        let Some(terminal) = self.terminal.as_mut() else {
            return;
        };
        if let Err(err) = draw_snapshot(terminal, snapshot) {
            warn!("display_error: {err}");
        }
    }

    fn restore(&mut self) {
        if let Some(mut terminal) = self.terminal.take() {
            let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen, Show);
            let _ = terminal.show_cursor();
        }
    }
}

impl Drop for TerminalSink {
    fn drop(&mut self) {
        self.restore();
    }
}

fn draw_snapshot<B: Backend>(terminal: &mut Terminal<B>, snapshot: &StatusSnapshot) -> io::Result<()> {
    terminal.draw(|frame| render_snapshot(frame, snapshot))?;
    Ok(())
}

fn render_snapshot(frame: &mut Frame, snapshot: &StatusSnapshot) {
    let size = frame.size();
    let theme = STAGE;
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(size);
    frame.render_widget(render_header(snapshot, theme, size.width), layout[0]);
    frame.render_widget(render_table(snapshot, theme, size.width), layout[1]);
    frame.render_widget(render_footer(snapshot, theme, size.width), layout[2]);
}

fn titled_block(title: &'static str, theme: StageTheme, bg: Color) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.rule))
        .style(Style::default().bg(bg))
        .title(Span::styled(
            title,
            Style::default()
                .fg(theme.heading)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_header(snapshot: &StatusSnapshot, theme: StageTheme, width: u16) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let fields = vec![
        format!("Cycle: {}", snapshot.cycle),
        format!("Updated: {}", snapshot.taken_at.format("%Y-%m-%d %H:%M:%S")),
        format!("OBS: {}", snapshot.session_label()),
        format!("Scene: {}", snapshot.scene_name),
    ];
    let summary = status_line(&fields, inner_width.max(12));
    let (note, note_color) = match snapshot.last_error.as_deref() {
        Some(err) => (format!("Last Error: {err}"), theme.failed),
        None if snapshot.session.is_none() => ("Monitoring only, OBS untouched".to_string(), theme.dim),
        None => (
            format!(
                "Layout: {} applied, {} failed this cycle",
                snapshot.ops_applied, snapshot.ops_failed
            ),
            if snapshot.ops_failed > 0 { theme.degraded } else { theme.dim },
        ),
    };
    Paragraph::new(vec![
        Line::from(Span::styled(summary, Style::default().fg(theme.body))),
        Line::from(Span::styled(
            clip(&note, inner_width.max(12)),
            Style::default().fg(note_color),
        )),
    ])
    .style(Style::default().fg(theme.body).bg(theme.backdrop))
    .block(titled_block("Stagehand", theme, theme.backdrop))
}

fn render_table(snapshot: &StatusSnapshot, theme: StageTheme, width: u16) -> Table<'static> {
    let compact = width < COMPACT_WIDTH;
    let detail_width = if compact { 18 } else { 40 };
    let rows: Vec<Row> = snapshot
        .rows()
        .into_iter()
        .map(|row| {
            let status_color = if row.failed {
                theme.failed
            } else if row.status == "live" {
                theme.on_air
            } else {
                theme.dim
            };
            Row::new(vec![
                Cell::from(row.rank.to_string()),
                Cell::from(row.id),
                Cell::from(clip(&row.nickname, 16)),
                Cell::from(row.viewers).style(Style::default().fg(theme.viewers)),
                Cell::from(row.status).style(Style::default().fg(status_color)),
                Cell::from(row.slot),
                Cell::from(clip(&row.detail, detail_width)),
            ])
        })
        .collect();
    let widths = [
        Constraint::Length(4),
        Constraint::Length(14),
        Constraint::Length(16),
        Constraint::Length(9),
        Constraint::Length(18),
        Constraint::Length(4),
        Constraint::Min(10),
    ];
    let header = Row::new(vec!["#", "Room", "Host", "Viewers", "Status", "Slot", "Title"])
        .style(
            Style::default()
                .fg(theme.heading)
                .add_modifier(Modifier::BOLD),
        );
    Table::new(rows, widths)
        .header(header)
        .style(Style::default().fg(theme.body).bg(theme.panel))
        .block(titled_block("Rooms", theme, theme.panel))
}

fn render_footer(snapshot: &StatusSnapshot, theme: StageTheme, width: u16) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let fields = vec![
        format!(
            "Fetched: {}/{}",
            snapshot.ranked.succeeded(),
            snapshot.ranked.len()
        ),
        format!("Total Viewers: {}", snapshot.ranked.total_viewers()),
        format!("Interval: {}s", snapshot.interval.as_secs()),
        "Ctrl-C to exit".to_string(),
    ];
    Paragraph::new(Line::from(Span::styled(
        status_line(&fields, inner_width.max(12)),
        Style::default().fg(theme.dim),
    )))
    .style(Style::default().bg(theme.backdrop))
    .block(titled_block("Totals", theme, theme.backdrop))
}

const FIELD_SEPARATOR: &str = " · ";

/// Cuts `text` to `width` columns, marking the cut with a trailing ellipsis.
fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut clipped: String = text.chars().take(width - 1).collect();
    clipped.push('…');
    clipped
}

/// Joins as many leading fields as fit in `width`; a lone oversized field is clipped.
fn status_line(fields: &[String], width: usize) -> String {
    let mut line = String::new();
    let mut used = 0;
    for field in fields.iter().filter(|field| !field.trim().is_empty()) {
        let gap = if line.is_empty() { 0 } else { FIELD_SEPARATOR.chars().count() };
        let len = field.chars().count();
        if used + gap + len > width {
            if line.is_empty() {
                return clip(field, width);
            }
            break;
        }
        if gap > 0 {
            line.push_str(FIELD_SEPARATOR);
        }
        line.push_str(field);
        used += gap + len;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use stagehand_core::layout::{GridSpec, SlotAssignment};
    use stagehand_core::{FetchError, LiveState, RoomTarget};

    fn room(id: &str, viewers: u64) -> Room {
        Room {
            id: id.to_string(),
            url: format!("https://live.douyin.com/{id}"),
            nickname: format!("host-{id}"),
            title: format!("show {id}"),
            viewers,
            viewers_display: viewers.to_string(),
            live: LiveState::Live,
            status_code: Some(2),
            remote_room_id: None,
            error: None,
        }
    }

    fn snapshot() -> StatusSnapshot {
        let failed = Room::failed(
            &RoomTarget::from_webcast_id("3"),
            FetchError::RequestFailed("http 503".to_string()),
        );
        let ranked = RankedRoomList::from_rooms(vec![room("2", 300), failed, room("1", 500)]);
        let grid = GridSpec::default();
        let mut slots = SlotTable::empty(&grid);
        slots.set_assignment(0, Some(SlotAssignment::for_room(&room("1", 500))));
        StatusSnapshot {
            cycle: 7,
            taken_at: Local::now(),
            session: Some(SessionState::Ready),
            scene_name: grid.scene_name,
            ranked,
            slots: Some(slots),
            ops_applied: 3,
            ops_failed: 0,
            last_error: None,
            interval: Duration::from_secs(10),
        }
    }

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn rows_follow_rank_and_mark_failures() {
        let rows = snapshot().rows();
        let ids: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(rows[0].slot, "1");
        assert_eq!(rows[1].slot, "-");
        assert_eq!(rows[0].status, "live");
        assert!(rows[2].failed);
        assert_eq!(rows[2].status, "REQUEST_FAILED");
        assert_eq!(rows[2].nickname, "3");
    }

    #[test]
    fn monitor_only_snapshot_has_no_slots() {
        let mut snapshot = snapshot();
        snapshot.session = None;
        snapshot.slots = None;
        assert_eq!(snapshot.session_label(), "monitor-only");
        assert!(snapshot.rows().iter().all(|row| row.slot == "-"));
    }

    #[test]
    fn renders_table_into_buffer() {
        let mut terminal = Terminal::new(TestBackend::new(120, 16)).expect("terminal");
        terminal
            .draw(|frame| render_snapshot(frame, &snapshot()))
            .expect("draw");
        let text = buffer_text(&terminal);
        assert!(text.contains("Cycle: 7"));
        assert!(text.contains("OBS: ready"));
        assert!(text.contains("host-1"));
        assert!(text.contains("Total Viewers: 800"));
    }

    #[test]
    fn clip_and_status_line_respect_width() {
        assert_eq!(clip("abcdefgh", 6), "abcde…");
        assert_eq!(clip("abc", 6), "abc");
        assert_eq!(clip("abc", 0), "");
        let fields = vec![
            "Cycle: 1".to_string(),
            String::new(),
            "OBS: ready".to_string(),
        ];
        assert_eq!(status_line(&fields, 10), "Cycle: 1");
        assert_eq!(status_line(&fields, 40), "Cycle: 1 · OBS: ready");
        assert_eq!(status_line(&fields[2..], 6), "OBS: …");
    }
}
