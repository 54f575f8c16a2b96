use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, List, ListItem, ListState, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use smartid_chip::{demo_identities, CardSession, ChipStore, CodeBook, SessionStage};
use std::io;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Diagnosis,
    Medication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Error,
}

/// What the event loop must do after a key press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    ReadCard,
    WriteChip,
}

pub struct App {
    pub session: CardSession,
    store: Box<dyn ChipStore>,
    book: Arc<CodeBook>,
    pub identity_input: String,
    pub focus: Focus,
    pub diagnosis_state: ListState,
    pub medication_state: ListState,
    pub message: Option<(MessageKind, String)>,
    /// Set while a card read/write is in progress
    pub busy: Option<&'static str>,
    /// Committed chip not yet written back to the store
    unsaved: bool,
    demo_index: usize,
}

impl App {
    pub fn new(book: Arc<CodeBook>, store: Box<dyn ChipStore>) -> Self {
        let mut diagnosis_state = ListState::default();
        diagnosis_state.select(Some(0));
        let mut medication_state = ListState::default();
        medication_state.select(Some(0));

        Self {
            session: CardSession::new(book.clone()),
            store,
            book,
            identity_input: String::new(),
            focus: Focus::Diagnosis,
            diagnosis_state,
            medication_state,
            message: None,
            busy: None,
            unsaved: false,
            demo_index: 0,
        }
    }

    fn info(&mut self, kind: MessageKind, text: impl Into<String>) {
        self.message = Some((kind, text.into()));
    }

    pub fn selected_diagnosis(&self) -> Option<&str> {
        self.diagnosis_state
            .selected()
            .and_then(|i| self.book.diagnoses().all_codes().get(i))
            .map(|e| e.code.as_str())
    }

    pub fn selected_medication(&self) -> Option<&str> {
        self.medication_state
            .selected()
            .and_then(|i| self.book.medications().all_codes().get(i))
            .map(|e| e.code.as_str())
    }

    /// Fill the identity field with the next demo patient
    pub fn cycle_demo_identity(&mut self) {
        let demos = demo_identities();
        if demos.is_empty() {
            return;
        }
        let (identity, _) = demos[self.demo_index % demos.len()];
        self.identity_input = identity.to_string();
        self.demo_index += 1;
    }

    pub fn handle_key(&mut self, code: KeyCode) -> Action {
        if code == KeyCode::Esc {
            return Action::Quit;
        }

        match self.session.stage() {
            SessionStage::NoCard => match code {
                KeyCode::Char(c) if c.is_ascii_digit() || c == '-' => {
                    self.identity_input.push(c);
                    Action::None
                }
                KeyCode::Backspace => {
                    self.identity_input.pop();
                    Action::None
                }
                KeyCode::Tab => {
                    self.cycle_demo_identity();
                    Action::None
                }
                KeyCode::Enter => Action::ReadCard,
                _ => Action::None,
            },
            SessionStage::Loaded | SessionStage::Pending => match code {
                KeyCode::Down | KeyCode::Char('j') => {
                    self.move_selection(1);
                    Action::None
                }
                KeyCode::Up | KeyCode::Char('k') => {
                    self.move_selection(-1);
                    Action::None
                }
                KeyCode::Tab | KeyCode::Left | KeyCode::Right => {
                    self.focus = match self.focus {
                        Focus::Diagnosis => Focus::Medication,
                        Focus::Medication => Focus::Diagnosis,
                    };
                    Action::None
                }
                KeyCode::Enter if self.focus == Focus::Diagnosis => {
                    self.stage_selected_diagnosis();
                    Action::None
                }
                KeyCode::Enter | KeyCode::Char('w') => Action::WriteChip,
                KeyCode::Char('n') => {
                    self.new_patient();
                    Action::None
                }
                _ => Action::None,
            },
            SessionStage::Committed => match code {
                KeyCode::Char('n') | KeyCode::Enter => {
                    self.new_patient();
                    Action::None
                }
                _ => Action::None,
            },
        }
    }

    fn move_selection(&mut self, delta: i32) {
        let (state, len) = match self.focus {
            Focus::Diagnosis => (&mut self.diagnosis_state, self.book.diagnoses().len()),
            Focus::Medication => (&mut self.medication_state, self.book.medications().len()),
        };
        if len == 0 {
            return;
        }
        let current = state.selected().unwrap_or(0) as i32;
        let next = (current + delta).rem_euclid(len as i32) as usize;
        state.select(Some(next));
    }

    pub fn stage_selected_diagnosis(&mut self) {
        let Some(code) = self.selected_diagnosis().map(str::to_string) else {
            return;
        };
        match self.session.stage_diagnosis(&code) {
            Ok(()) => {
                let name = self.book.diagnosis_label(&code).to_string();
                self.info(MessageKind::Info, format!("Diagnosis staged: {} - {}", code, name));
                self.focus = Focus::Medication;
            }
            Err(e) => self.info(MessageKind::Error, e.to_string()),
        }
    }

    /// Step 1: read the card for the typed identity
    pub fn read_card(&mut self) {
        let identity = self.identity_input.clone();
        match self.session.load(&identity, &*self.store) {
            Ok(()) => {
                if let Some(chip) = self.session.chip() {
                    let text = format!("Card read: {} ({} visits)", chip.critical().name, chip.visit_count());
                    self.info(MessageKind::Success, text);
                }
                self.focus = Focus::Diagnosis;
            }
            Err(e) => {
                let text = match demo_identities().first() {
                    Some((demo, _)) => format!("{}. Try: {}", e, demo),
                    None => e.to_string(),
                };
                self.info(MessageKind::Error, text);
            }
        }
    }

    /// Step 4: commit the visit and write the chip back
    pub fn write_chip(&mut self) {
        let Some(medication) = self.selected_medication().map(str::to_string) else {
            self.info(MessageKind::Error, "Please select a medication");
            return;
        };

        let summary = match self.session.commit_today(&medication) {
            Ok(receipt) => {
                let mut text = format!(
                    "Visit written to chip ({} bytes)",
                    receipt.record.encoded_size()
                );
                if let Some(evicted) = &receipt.evicted {
                    text.push_str(&format!(", oldest visit {} evicted", evicted.display_date()));
                }
                text
            }
            Err(e) => {
                self.info(MessageKind::Error, e.to_string());
                return;
            }
        };

        self.unsaved = true;
        self.save_chip();
        if !self.unsaved {
            self.info(MessageKind::Success, summary);
        }
    }

    fn save_chip(&mut self) {
        let Some(chip) = self.session.chip().cloned() else {
            return;
        };
        match self.store.persist(&chip) {
            Ok(()) => self.unsaved = false,
            Err(e) => self.info(MessageKind::Error, format!("Chip write failed: {:#}", e)),
        }
    }

    /// Reset for new patient
    pub fn new_patient(&mut self) {
        if self.unsaved {
            self.save_chip();
            if self.unsaved {
                return;
            }
        }
        self.session.reset();
        self.identity_input.clear();
        self.focus = Focus::Diagnosis;
        self.diagnosis_state.select(Some(0));
        self.medication_state.select(Some(0));
        self.message = None;
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match app.handle_key(key.code) {
                Action::Quit => return Ok(()),
                Action::ReadCard => {
                    app.busy = Some("Reading card...");
                    terminal.draw(|f| ui(f, app))?;
                    app.read_card();
                    app.busy = None;
                }
                Action::WriteChip => {
                    app.busy = Some("Writing to chip...");
                    terminal.draw(|f| ui(f, app))?;
                    app.write_chip();
                    app.busy = None;
                }
                Action::None => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with flow stages
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.session.stage() {
        SessionStage::NoCard => render_card_reader(f, chunks[1], app),
        _ => render_patient(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let current = match app.session.stage() {
        SessionStage::NoCard => 0,
        SessionStage::Loaded => 1,
        SessionStage::Pending => 2,
        SessionStage::Committed => 3,
    };
    let steps = ["1. Read IC", "2. View Records", "3. Diagnose", "4. Write to Chip"];

    let mut spans = vec![Span::styled(
        "My Sihat: Smart ID Clinic  ",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];
    for (i, step) in steps.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" → "));
        }
        let style = if i == current {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else if i < current {
            Style::default().fg(Color::Green)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(*step, style));
    }

    let header = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));
    f.render_widget(header, area);
}

fn render_card_reader(f: &mut Frame, area: Rect, app: &App) {
    let mut lines = vec![
        Line::from(""),
        Line::from("  Place IC card on reader or enter IC number manually"),
        Line::from(""),
        Line::from(vec![
            Span::raw("  IC Number: "),
            Span::styled(
                format!("{}▏", app.identity_input),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(Span::styled("  Demo patients (Tab to fill):", Style::default().fg(Color::DarkGray))),
    ];
    for (identity, name) in demo_identities() {
        lines.push(Line::from(format!("    {}  {}", identity, name)));
    }

    let reader = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Step 1: IC Card Reader Interface "),
    );
    f.render_widget(reader, area);
}

fn render_patient(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[0]);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(top[0]);

    render_patient_info(f, left[0], app);
    render_storage_gauge(f, left[1], app);
    render_history(f, top[1], app);

    if app.session.stage() == SessionStage::Committed {
        render_commit_summary(f, rows[1], app);
    } else {
        render_consultation(f, rows[1], app);
    }
}

fn render_patient_info(f: &mut Frame, area: Rect, app: &App) {
    let Some(chip) = app.session.chip() else {
        return;
    };
    let critical = chip.critical();

    let mut lines = vec![
        Line::from(Span::styled(
            critical.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(format!("IC: {}", critical.identity)),
        Line::from(vec![
            Span::raw("Blood Type: "),
            Span::styled(critical.blood_type.clone(), Style::default().fg(Color::Red)),
        ]),
        Line::from(""),
    ];

    if critical.allergies.is_empty() {
        lines.push(Line::from(Span::styled(
            "No known allergies",
            Style::default().fg(Color::Green),
        )));
    } else {
        lines.push(Line::from(Span::styled(
            format!("⚠ Allergies: {}", critical.allergies.join(", ")),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    }

    lines.push(Line::from("Chronic Conditions:"));
    if critical.chronic_conditions.is_empty() {
        lines.push(Line::from(Span::styled("  None", Style::default().fg(Color::DarkGray))));
    }
    for code in &critical.chronic_conditions {
        lines.push(Line::from(format!(
            "  {} - {}",
            code,
            app.book.diagnosis_label(code)
        )));
    }

    let info = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(" Patient Information "));
    f.render_widget(info, area);
}

fn render_storage_gauge(f: &mut Frame, area: Rect, app: &App) {
    let usage = app.session.usage();
    let color = if usage.is_over_budget() { Color::Red } else { Color::Green };

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Chip Storage "))
        .gauge_style(Style::default().fg(color))
        .ratio(usage.ratio())
        .label(format!(
            "{:.1}% ({} B free)",
            usage.percent_used, usage.available_bytes
        ));
    f.render_widget(gauge, area);
}

fn render_history(f: &mut Frame, area: Rect, app: &App) {
    let Some(chip) = app.session.chip() else {
        return;
    };

    let header_cells = ["Date", "Diagnosis", "Medication", "Size"].iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = chip.history().reverse_chronological().map(|visit| {
        Row::new(vec![
            Cell::from(visit.display_date()),
            Cell::from(format!(
                "{} {}",
                visit.diagnosis_code(),
                app.book.diagnosis_label(visit.diagnosis_code())
            )),
            Cell::from(format!(
                "{} {}",
                visit.medication_code(),
                app.book.medication_label(visit.medication_code())
            )),
            Cell::from(format!("{}B", visit.encoded_size())),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Percentage(40),
            Constraint::Percentage(35),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(format!(
        " Step 2: Medical History ({}/{}) ",
        chip.visit_count(),
        chip.layout().max_visit_count()
    )));
    f.render_widget(table, area);
}

fn render_consultation(f: &mut Frame, area: Rect, app: &mut App) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let staged = app.session.staged_diagnosis().map(str::to_string);
    let diagnosis_items: Vec<ListItem> = app
        .book
        .diagnoses()
        .all_codes()
        .iter()
        .map(|entry| {
            let marker = if staged.as_deref() == Some(entry.code.as_str()) { "✓ " } else { "  " };
            ListItem::new(format!("{}{} - {}", marker, entry.code, entry.name))
        })
        .collect();
    let medication_items: Vec<ListItem> = app
        .book
        .medications()
        .all_codes()
        .iter()
        .map(|entry| ListItem::new(format!("{} - {}", entry.code, entry.name)))
        .collect();

    let border = |focused: bool| {
        if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::White)
        }
    };
    let highlight = Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD);

    let diagnoses = List::new(diagnosis_items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border(app.focus == Focus::Diagnosis))
                .title(" Step 3: Diagnosis (ICD-10) "),
        )
        .highlight_style(highlight)
        .highlight_symbol("→ ");
    let medications = List::new(medication_items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border(app.focus == Focus::Medication))
                .title(" Medication (ATC) "),
        )
        .highlight_style(highlight)
        .highlight_symbol("→ ");

    f.render_stateful_widget(diagnoses, columns[0], &mut app.diagnosis_state);
    f.render_stateful_widget(medications, columns[1], &mut app.medication_state);
}

fn render_commit_summary(f: &mut Frame, area: Rect, app: &App) {
    let mut lines = vec![Line::from("")];
    if let Some(receipt) = app.session.last_commit() {
        let record = &receipt.record;
        lines.push(Line::from(Span::styled(
            "  ✓ Successfully written to IC chip",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(""));
        lines.push(Line::from(format!(
            "  {}  {} - {}",
            record.display_date(),
            record.diagnosis_code(),
            app.book.diagnosis_label(record.diagnosis_code())
        )));
        lines.push(Line::from(format!(
            "            {} - {}",
            record.medication_code(),
            app.book.medication_label(record.medication_code())
        )));
        lines.push(Line::from(format!("  Encoded size: {} bytes", record.encoded_size())));
        if let Some(evicted) = &receipt.evicted {
            lines.push(Line::from(Span::styled(
                format!("  History full: visit of {} evicted", evicted.display_date()),
                Style::default().fg(Color::Yellow),
            )));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from("  Press n for the next patient"));

    let summary = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Step 4: Write to Chip "));
    f.render_widget(summary, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![Span::styled(
        format!(" {} ", app.session.stage()),
        Style::default().fg(Color::Cyan),
    )];

    if let Some(busy) = app.busy {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(busy, Style::default().fg(Color::Yellow)));
    } else if let Some((kind, text)) = &app.message {
        let color = match kind {
            MessageKind::Info => Color::White,
            MessageKind::Success => Color::Green,
            MessageKind::Error => Color::Red,
        };
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(text.clone(), Style::default().fg(color)));
    }

    let hints: &[(&str, &str)] = match app.session.stage() {
        SessionStage::NoCard => &[("Enter", "Read"), ("Tab", "Demo IC"), ("Esc", "Quit")],
        SessionStage::Loaded | SessionStage::Pending => &[
            ("↑/↓", "Select"),
            ("Tab", "Switch list"),
            ("Enter", "Stage/Write"),
            ("n", "New patient"),
            ("Esc", "Quit"),
        ],
        SessionStage::Committed => &[("n", "New patient"), ("Esc", "Quit")],
    };
    for (key, label) in hints {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
        spans.push(Span::raw(format!(" {}", label)));
    }

    let status_bar = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );
    f.render_widget(status_bar, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartid_chip::{ChipLayout, IdentityLookup, PatientDirectory, VisitCodec};

    fn app() -> App {
        let book = CodeBook::standard();
        let directory =
            PatientDirectory::demo(&VisitCodec::new(book.clone()), ChipLayout::default()).unwrap();
        App::new(book, Box::new(directory))
    }

    fn type_identity(app: &mut App, identity: &str) {
        for c in identity.chars() {
            app.handle_key(KeyCode::Char(c));
        }
    }

    #[test]
    fn test_read_unknown_card_stays_on_reader() {
        let mut app = app();
        type_identity(&mut app, "000000-00-0000");
        assert_eq!(app.handle_key(KeyCode::Enter), Action::ReadCard);
        app.read_card();

        assert_eq!(app.session.stage(), SessionStage::NoCard);
        match &app.message {
            Some((MessageKind::Error, text)) => assert!(text.contains("920815-01-5234")),
            other => panic!("expected an error message, got {:?}", other),
        }
    }

    #[test]
    fn test_visit_flow_persists_chip() {
        let mut app = app();
        app.cycle_demo_identity();
        assert_eq!(app.identity_input, "920815-01-5234");
        app.read_card();
        assert_eq!(app.session.stage(), SessionStage::Loaded);

        // Writing before staging a diagnosis is rejected
        app.focus = Focus::Medication;
        assert_eq!(app.handle_key(KeyCode::Enter), Action::WriteChip);
        app.write_chip();
        assert_eq!(app.session.stage(), SessionStage::Loaded);
        assert!(matches!(app.message, Some((MessageKind::Error, _))));

        app.focus = Focus::Diagnosis;
        app.handle_key(KeyCode::Down); // E11
        app.handle_key(KeyCode::Enter);
        assert_eq!(app.session.staged_diagnosis(), Some("E11"));
        assert_eq!(app.focus, Focus::Medication);

        app.handle_key(KeyCode::Down); // A10BA02
        app.write_chip();
        assert_eq!(app.session.stage(), SessionStage::Committed);
        assert!(matches!(app.message, Some((MessageKind::Success, _))));

        app.handle_key(KeyCode::Char('n'));
        assert_eq!(app.session.stage(), SessionStage::NoCard);
        assert!(app.identity_input.is_empty());

        let chip = app.store.lookup("920815-01-5234").unwrap().unwrap();
        assert_eq!(chip.visit_count(), 4);
        let newest = chip.history().newest().unwrap();
        assert_eq!(newest.diagnosis_code(), "E11");
        assert_eq!(newest.medication_code(), "A10BA02");
    }

    #[test]
    fn test_selection_wraps() {
        let mut app = app();
        app.cycle_demo_identity();
        app.read_card();

        app.handle_key(KeyCode::Up);
        assert_eq!(app.selected_diagnosis(), Some("J00"));
        app.handle_key(KeyCode::Down);
        assert_eq!(app.selected_diagnosis(), Some("R50"));
    }
}
