//! netsplit TUI Dashboard Module
//! ==============================
//!
//! Terminal connectivity matrix for a `watch` viewer.
//! Uses Ratatui for rendering and Crossbeam for event delivery from the
//! network reader.
//!
//! Enable with the `dashboard` feature flag.

use std::io;
use std::time::Duration;

use crossbeam::channel::{Receiver, TryRecvError};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    widgets::{Paragraph, Widget},
    Frame, Terminal,
};

use crate::grid::{ConnectivityMatrix, GridLayout, CELL_WIDTH};
use crate::wire::StatusLine;

/// Glyph used for a painted cell.
pub const BLOCK: char = '█';

pub const SUCCESS_COLOR: Color = Color::Green;
pub const FAILURE_COLOR: Color = Color::Red;
pub const BACKGROUND: Color = Color::Black;

// =============================================================================
// VIEWER EVENTS (Sent from the network reader to the Dashboard)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    Connected(String),
    Status(StatusLine),
    /// The stream ended; carries the reason shown to the operator
    Disconnected(String),
    /// Leave the UI as if the operator pressed a quit key
    Quit,
}

/// Why the dashboard loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    UserQuit,
    Disconnected(String),
}

// =============================================================================
// MATRIX WIDGET
// =============================================================================

/// Paints the grid frame and every known cell into a buffer.
pub struct MatrixView<'a> {
    matrix: &'a ConnectivityMatrix,
}

impl<'a> MatrixView<'a> {
    pub fn new(matrix: &'a ConnectivityMatrix) -> Self {
        Self { matrix }
    }
}

fn put(buf: &mut Buffer, area: Rect, x: u16, y: u16, ch: char, fg: Color) {
    let (x, y) = (area.x.saturating_add(x), area.y.saturating_add(y));
    if x >= area.right() || y >= area.bottom() {
        return;
    }
    if let Some(cell) = buf.cell_mut((x, y)) {
        cell.set_char(ch).set_fg(fg).set_bg(BACKGROUND);
    }
}

impl Widget for MatrixView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        buf.set_style(area, Style::default().bg(BACKGROUND));

        for glyph in self.matrix.layout().frame() {
            put(buf, area, glyph.x, glyph.y, glyph.ch, Color::White);
        }

        for ((x, y), success) in self.matrix.painted() {
            let color = if success { SUCCESS_COLOR } else { FAILURE_COLOR };
            for dx in 0..CELL_WIDTH {
                put(buf, area, x + dx, y, BLOCK, color);
            }
        }
    }
}

// =============================================================================
// CONNECTIVITY DASHBOARD
// =============================================================================

/// TUI Dashboard showing the latest outcome for every node pair.
pub struct ConnectivityDashboard {
    rx: Receiver<ViewerEvent>,
    matrix: ConnectivityMatrix,
    peer: Option<String>,
    received: usize,
}

impl ConnectivityDashboard {
    /// Create a new dashboard with the event receiver channel.
    pub fn new(rx: Receiver<ViewerEvent>, layout: GridLayout) -> Self {
        Self {
            rx,
            matrix: ConnectivityMatrix::new(layout),
            peer: None,
            received: 0,
        }
    }

    pub fn matrix(&self) -> &ConnectivityMatrix {
        &self.matrix
    }

    /// Applies every pending event; returns an exit reason once the
    /// stream has ended.
    pub fn drain(&mut self) -> Option<ExitReason> {
        loop {
            match self.rx.try_recv() {
                Ok(ViewerEvent::Connected(peer)) => self.peer = Some(peer),
                Ok(ViewerEvent::Status(line)) => {
                    self.received += 1;
                    self.matrix.apply(&line);
                }
                Ok(ViewerEvent::Disconnected(reason)) => {
                    return Some(ExitReason::Disconnected(reason));
                }
                Ok(ViewerEvent::Quit) => return Some(ExitReason::UserQuit),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    return Some(ExitReason::Disconnected("reader stopped".to_string()));
                }
            }
        }
    }

    /// Run the TUI main loop (blocks until quit or the daemon goes away)
    pub fn run(&mut self) -> io::Result<ExitReason> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.hide_cursor()?;

        let outcome = self.event_loop(&mut terminal);

        // Restore terminal even when the loop failed
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        outcome
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> io::Result<ExitReason> {
        loop {
            if let Some(reason) = self.drain() {
                return Ok(reason);
            }

            terminal.draw(|f| self.ui(f))?;

            // Handle input (non-blocking with 50ms timeout)
            if event::poll(Duration::from_millis(50))? {
                match event::read()? {
                    Event::Key(key) if is_quit(&key) => return Ok(ExitReason::UserQuit),
                    Event::Resize(_, _) => terminal.clear()?,
                    _ => {}
                }
            }
        }
    }

    fn ui(&self, f: &mut Frame) {
        let area = f.area();
        f.render_widget(MatrixView::new(&self.matrix), area);

        let footer_y = self.matrix.layout().height().saturating_add(1);
        if footer_y < area.bottom() {
            let peer = self.peer.as_deref().unwrap_or("connecting");
            let footer = Paragraph::new(format!(
                "{peer}  |  {} results  |  q to quit",
                self.received
            ))
            .style(Style::default().fg(Color::DarkGray).bg(BACKGROUND));
            f.render_widget(footer, Rect::new(area.x, footer_y, area.width, 1));
        }
    }
}

/// `q`, Esc and Ctrl-C all quit; raw mode delivers Ctrl-C as a key.
pub fn is_quit(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================
