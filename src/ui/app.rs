use super::{events, AppEvent, EventHandler, KeyBindings, TerminalManager};
use crate::audio::{load_track, tags, PlayerEvent, SegmentPlayer};
use crate::config::Config;
use crate::library::{self, Bucket, SortStats};
use crate::relocate::{MoveOutcome, Relocator};
use anyhow::{Context, Result};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Clear, Gauge, Paragraph},
    Frame,
};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

/// Outcome of a background move, reported back to the UI loop.
enum MoveReport {
    Filed {
        file_name: String,
        bucket: String,
        outcome: MoveOutcome,
    },
    Undone {
        file_name: String,
        restored: PathBuf,
        outcome: MoveOutcome,
    },
    NothingToUndo,
}

/// The sorting interface: owns the song queue, wires key events to the
/// player and the relocator, and renders the terminal UI.
pub struct App {
    config: Config,
    terminal: TerminalManager,
    events: EventHandler,
    player: SegmentPlayer,
    relocator: Arc<Mutex<Relocator>>,
    buckets: Vec<Bucket>,

    queue: VecDeque<PathBuf>,
    current: Option<PathBuf>,
    stats: SortStats,

    now_playing: String,
    status: String,
    instructions: Vec<String>,
    show_instructions: bool,
    loading: bool,
    should_quit: bool,

    report_tx: mpsc::UnboundedSender<MoveReport>,
    report_rx: mpsc::UnboundedReceiver<MoveReport>,
    player_events: mpsc::UnboundedReceiver<PlayerEvent>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let mut player = SegmentPlayer::new(config.player_config())?;
        let (player_tx, player_events) = mpsc::unbounded_channel();
        player.set_event_sender(player_tx);

        let buckets = config.resolved_buckets();
        for bucket in &buckets {
            fs::create_dir_all(&bucket.dir)
                .with_context(|| format!("could not create bucket folder {}", bucket.dir.display()))?;
        }

        let queue = library::scan_source(&config.source_directory, config.randomize_order)?;
        let stats = SortStats::gather(&config.source_directory, &buckets);
        let instructions = instruction_lines(&config, &buckets);

        let (report_tx, report_rx) = mpsc::unbounded_channel();

        // Terminal goes last so earlier failures still print normally.
        let terminal = TerminalManager::new()?;

        Ok(Self {
            config,
            terminal,
            events: EventHandler::new(),
            player,
            relocator: Arc::new(Mutex::new(Relocator::new())),
            buckets,
            queue,
            current: None,
            stats,
            now_playing: "-".to_string(),
            status: "[ SYSTEM ] Press F1 for controls".to_string(),
            instructions,
            show_instructions: false,
            loading: false,
            should_quit: false,
            report_tx,
            report_rx,
            player_events,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let bindings = KeyBindings::from_config(&self.config)?;
        tokio::spawn(events::listen(
            bindings,
            self.player.hold_flag(),
            self.terminal.key_release_supported(),
            self.events.sender(),
        ));

        self.advance_queue();

        while !self.should_quit {
            self.draw()?;

            tokio::select! {
                Some(event) = self.events.next_event() => self.handle_event(event),
                Some(report) = self.report_rx.recv() => self.handle_report(report),
                Some(player_event) = self.player_events.recv() => self.handle_player_event(player_event),
            }
        }

        self.player.stop();
        info!("sorting session over: {} of {} songs filed", self.stats.sorted(), self.stats.total());
        Ok(())
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Quit => self.should_quit = true,
            AppEvent::Tick => {}
            AppEvent::FileTo(index) => self.file_current(index),
            AppEvent::Skip => {
                if let Some(path) = &self.current {
                    self.status = format!("[ SYSTEM ] Skipped {}", display_name(path));
                    self.advance_queue();
                } else {
                    self.status = "[ SYSTEM ] Nothing to skip".to_string();
                }
            }
            AppEvent::Undo => self.spawn_undo(),
            AppEvent::ToggleFullPlay => {
                let enabled = !self.player.full_play();
                self.player.set_full_play(enabled);
                self.status = if enabled {
                    "[ SYSTEM ] Full-track playback from the next part boundary".to_string()
                } else {
                    "[ SYSTEM ] Back to part preview".to_string()
                };
            }
            AppEvent::SectionLonger => self.adjust_section(1.0),
            AppEvent::SectionShorter => self.adjust_section(-1.0),
            AppEvent::ToggleInstructions => self.show_instructions = !self.show_instructions,
        }
    }

    fn adjust_section(&mut self, delta: f32) {
        let seconds = (self.player.section_seconds() + delta).clamp(1.0, 30.0);
        self.player.set_section_seconds(seconds);
        self.status = format!("[ SYSTEM ] Section playback time: {seconds:.0}s (next part)");
    }

    /// Files the current song into bucket `index`: kicks off the (retried)
    /// move in the background and advances to the next song right away.
    fn file_current(&mut self, index: usize) {
        let Some(bucket) = self.buckets.get(index).cloned() else {
            return;
        };
        let Some(path) = self.current.clone() else {
            self.status = "[ SYSTEM ] Nothing to file".to_string();
            return;
        };

        let file_name = display_name(&path);
        let destination = bucket.dir.join(&file_name);
        self.status = format!("[ SYSTEM ] {file_name} -> {}", bucket.label);

        let relocator = Arc::clone(&self.relocator);
        let report_tx = self.report_tx.clone();
        tokio::spawn(async move {
            let outcome = relocator.lock().await.relocate(path, destination).await;
            let _ = report_tx.send(MoveReport::Filed {
                file_name,
                bucket: bucket.label,
                outcome,
            });
        });

        self.advance_queue();
    }

    fn spawn_undo(&mut self) {
        let relocator = Arc::clone(&self.relocator);
        let report_tx = self.report_tx.clone();
        tokio::spawn(async move {
            let mut relocator = relocator.lock().await;
            let Some(record) = relocator.last_move().cloned() else {
                let _ = report_tx.send(MoveReport::NothingToUndo);
                return;
            };
            if let Some(outcome) = relocator.undo().await {
                let _ = report_tx.send(MoveReport::Undone {
                    file_name: display_name(&record.source),
                    restored: record.source,
                    outcome,
                });
            }
        });
    }

    fn handle_report(&mut self, report: MoveReport) {
        match report {
            MoveReport::Filed {
                file_name,
                bucket,
                outcome,
            } => match outcome {
                MoveOutcome::Moved { .. } => {
                    self.status = format!("[ SYSTEM ] {file_name} filed into {bucket}");
                }
                MoveOutcome::Failed { attempts } => {
                    self.status = format!(
                        "[ ERROR ] Could not move {file_name} after {attempts} attempts - it stays in the source folder"
                    );
                }
            },
            MoveReport::Undone {
                file_name,
                restored,
                outcome,
            } => match outcome {
                MoveOutcome::Moved { .. } => {
                    self.status = format!("[ SYSTEM ] Undo: {file_name} back in the queue");
                    self.queue.push_front(restored);
                    if self.current.is_none() {
                        self.advance_queue();
                    }
                }
                MoveOutcome::Failed { attempts } => {
                    self.status =
                        format!("[ ERROR ] Undo of {file_name} failed after {attempts} attempts");
                }
            },
            MoveReport::NothingToUndo => {
                self.status = "[ SYSTEM ] Nothing to undo".to_string();
            }
        }

        self.stats = SortStats::gather(&self.config.source_directory, &self.buckets);
    }

    fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::TrackStarted => self.loading = false,
            PlayerEvent::LoadFailed(reason) => {
                self.loading = false;
                self.status = format!("[ ERROR ] Could not load {}: {reason}", self.now_playing);
            }
        }
    }

    /// Stops whatever is playing (releasing its buffer) and starts the next
    /// queued song decoding + previewing.
    fn advance_queue(&mut self) {
        self.player.stop();

        match self.queue.pop_front() {
            Some(path) => {
                self.now_playing = tags::display_line(&path);
                self.loading = true;
                self.player.play(load_track(path.clone()));
                self.current = Some(path);
            }
            None => {
                self.current = None;
                self.now_playing = "-".to_string();
                self.status = "[ SYSTEM ] Finished! Source folder is sorted.".to_string();
            }
        }
    }

    fn draw(&mut self) -> Result<()> {
        // Copy what the renderer needs; the closure cannot borrow self.
        let now_playing = self.now_playing.clone();
        let status = self.status.clone();
        let stats = self.stats.clone();
        let section_seconds = self.player.section_seconds();
        let parts = self.config.playback.parts;
        let holding = self.player.is_holding();
        let full_play = self.player.full_play();
        let loading = self.loading;
        let show_instructions = self.show_instructions;
        let instructions = self.instructions.clone();

        self.terminal.draw(|f| {
            render_ui(
                f,
                &now_playing,
                &status,
                &stats,
                section_seconds,
                parts,
                holding,
                full_play,
                loading,
            );
            if show_instructions {
                render_instructions(f, &instructions);
            }
        })
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn instruction_lines(config: &Config, buckets: &[Bucket]) -> Vec<String> {
    let mut lines = Vec::new();
    for (settings, bucket) in config.buckets.iter().zip(buckets) {
        lines.push(format!("{:>9}  file into {}", settings.key, bucket.label));
    }
    lines.push(format!("{:>9}  skip without moving", config.keys.skip));
    lines.push(format!("{:>9}  toggle full-track playback", config.keys.full_play));
    lines.push(format!("{:>9}  hold the current part while pressed", config.keys.hold));
    lines.push(format!("{:>9}  undo the last move", config.keys.undo));
    lines.push(format!("{:>9}  section length", "+ / -"));
    lines.push(format!("{:>9}  toggle this help", "F1"));
    lines.push(format!("{:>9}  quit", "q / Esc"));
    lines
}

#[allow(clippy::too_many_arguments)]
fn render_ui(
    f: &mut Frame,
    now_playing: &str,
    status: &str,
    stats: &SortStats,
    section_seconds: f32,
    parts: u32,
    holding: bool,
    full_play: bool,
    loading: bool,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Main content
            Constraint::Length(3), // Playback line
        ])
        .split(f.area());

    let title = Paragraph::new("songsift - listen a little, sort a lot")
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(chunks[1]);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Now playing
            Constraint::Length(3), // Status
            Constraint::Length(3), // Progress
            Constraint::Min(0),
        ])
        .split(main[0]);

    let playing = Paragraph::new(now_playing)
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title("Now Playing"));
    f.render_widget(playing, left[0]);

    let status_style = if status.starts_with("[ ERROR ]") {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };
    let status_widget = Paragraph::new(status)
        .style(status_style)
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status_widget, left[1]);

    let progress = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(stats.fraction_complete().clamp(0.0, 1.0))
        .label(format!(
            "{}/{} ({:.0}%)",
            stats.sorted(),
            stats.total(),
            stats.fraction_complete() * 100.0
        ));
    f.render_widget(progress, left[2]);

    let mut stat_lines = vec![Line::from(format!("Remain: {}", stats.remaining))];
    for (label, count) in &stats.per_bucket {
        stat_lines.push(Line::from(format!("{label}: {count}")));
    }
    stat_lines.push(Line::from(format!("Total: {}", stats.total())));
    let stats_widget = Paragraph::new(stat_lines)
        .block(Block::default().borders(Borders::ALL).title("Stats"));
    f.render_widget(stats_widget, main[1]);

    let footer = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Percentage(30),
            Constraint::Percentage(30),
        ])
        .split(chunks[2]);

    let section_info = Paragraph::new(format!("Section: {section_seconds:.0}s  Parts: {parts}"))
        .block(Block::default().borders(Borders::ALL).title("Preview"));
    f.render_widget(section_info, footer[0]);

    let (mode_text, mode_color) = if loading {
        ("Loading...", Color::DarkGray)
    } else if holding {
        ("HOLDING", Color::Yellow)
    } else if full_play {
        ("FULL TRACK", Color::Magenta)
    } else {
        ("Part preview", Color::Green)
    };
    let mode = Paragraph::new(mode_text)
        .style(Style::default().fg(mode_color).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Mode"));
    f.render_widget(mode, footer[1]);

    let hint = Paragraph::new("F1 controls")
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(hint, footer[2]);
}

fn render_instructions(f: &mut Frame, instructions: &[String]) {
    let area = centered_rect(50, 60, f.area());
    let lines: Vec<Line> = instructions.iter().map(|l| Line::from(l.as_str())).collect();

    f.render_widget(Clear, area);
    let popup = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Controls"));
    f.render_widget(popup, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
