#![cfg(feature = "tui")]

use crate::conversation::{Conversation, Phase, TurnKind};
use crate::personality::{self, Personality};
use crate::provider::{Delta, Speaker, StreamError};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use tokio::sync::mpsc;

#[derive(Debug)]
enum StreamMsg {
    Delta(Delta),
    Done,
    Error(StreamError),
}

struct Ui {
    chat: Conversation,
    personalities: Vec<Personality>,
    input: String,
    status: String,
    active_stream: Option<mpsc::UnboundedReceiver<StreamMsg>>,
}

pub async fn run_tui(chat: Conversation, personalities: Vec<Personality>) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut ui = Ui {
        chat,
        personalities,
        input: String::new(),
        status: "Enter to send. Commands: /quit, /clear, /persona <id>, /personas. Esc cancels a stream."
            .to_string(),
        active_stream: None,
    };

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &ui) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if handle_key(key, &mut ui) {
                        break Ok(());
                    }
                }
            }
            Some(msg) = async {
                match &mut ui.active_stream {
                    Some(rx) => rx.recv().await,
                    None => None,
                }
            } => {
                match msg {
                    StreamMsg::Delta(d) => ui.chat.apply(&d),
                    StreamMsg::Done => {
                        ui.active_stream = None;
                        ui.chat.complete();
                    }
                    StreamMsg::Error(e) => {
                        ui.active_stream = None;
                        ui.input = ui.chat.fail(&e);
                    }
                }
            }
        }
    };

    ui.chat.cancel();
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

/// Returns true when the UI should exit.
fn handle_key(key: KeyEvent, ui: &mut Ui) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc => {
            if !ui.chat.is_busy() {
                return true;
            }
            ui.chat.cancel();
            ui.active_stream = None;
            ui.status = "stream cancelled".to_string();
        }
        KeyCode::Char(c) => ui.input.push(c),
        KeyCode::Backspace => {
            ui.input.pop();
        }
        KeyCode::Enter => return submit_input(ui),
        _ => {}
    }

    false
}

fn submit_input(ui: &mut Ui) -> bool {
    let msg = ui.input.trim().to_string();
    if msg.is_empty() {
        return false;
    }

    if msg == "/quit" {
        return true;
    }
    if msg == "/clear" {
        ui.input.clear();
        ui.active_stream = None;
        ui.chat.reset();
        return false;
    }
    if msg == "/personas" {
        ui.input.clear();
        ui.status = ui
            .personalities
            .iter()
            .map(|p| format!("{} ({})", p.id, p.label()))
            .collect::<Vec<_>>()
            .join(", ");
        return false;
    }
    if let Some(rest) = msg.strip_prefix("/persona ") {
        ui.input.clear();
        match personality::find(&ui.personalities, rest.trim()) {
            Some(p) => {
                ui.active_stream = None;
                ui.status = format!("personality set to: {}", p.label());
                ui.chat.set_personality(p.clone());
            }
            None => ui.status = format!("unknown personality: {}", rest.trim()),
        }
        return false;
    }

    let Some(submission) = ui.chat.begin(&msg) else {
        ui.status = "(streaming in progress; wait for completion)".to_string();
        return false;
    };
    ui.input.clear();

    let (tx, rx) = mpsc::unbounded_channel::<StreamMsg>();
    ui.active_stream = Some(rx);

    tokio::spawn(async move {
        use tokio_stream::StreamExt;

        let mut stream = match submission.start().await {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.send(StreamMsg::Error(e));
                return;
            }
        };
        while let Some(item) = stream.next().await {
            let msg = match item {
                Ok(d) => StreamMsg::Delta(d),
                Err(e) => {
                    let _ = tx.send(StreamMsg::Error(e));
                    return;
                }
            };
            if tx.send(msg).is_err() {
                return;
            }
        }
        let _ = tx.send(StreamMsg::Done);
    });

    false
}

fn draw(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, ui: &Ui) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let provider = ui.chat.provider_name();
        let mut text = Text::default();
        for t in ui.chat.turns() {
            let (role, style) = match (t.speaker, t.kind) {
                (_, TurnKind::Error) => ("error", Style::default().add_modifier(Modifier::BOLD)),
                (Speaker::User, _) => ("you", Style::default().add_modifier(Modifier::BOLD)),
                (Speaker::Assistant, _) => (provider, Style::default()),
            };
            text.lines.push(Line::styled(format!("{role}: "), style));
            if !t.reasoning.is_empty() {
                let dim = Style::default().add_modifier(Modifier::DIM | Modifier::ITALIC);
                text.lines.push(Line::styled("thinking:", dim));
                for l in t.reasoning.lines() {
                    text.lines.push(Line::styled(l.to_string(), dim));
                }
            }
            text.lines.extend(Text::from(t.content.clone()).lines);
            text.lines.push(Line::from(""));
        }
        if ui.chat.phase() == Phase::AwaitingFirstDelta {
            text.lines.push(Line::styled(
                format!("{provider} is thinking..."),
                Style::default().add_modifier(Modifier::DIM),
            ));
        }

        // Keep the newest lines in view.
        let height = chunks[0].height.saturating_sub(2) as usize;
        let scroll = text.lines.len().saturating_sub(height).min(u16::MAX as usize) as u16;

        let title = format!("{provider} — {}", ui.chat.personality().label());
        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));

        let input_w = Paragraph::new(ui.input.clone())
            .block(Block::default().borders(Borders::ALL).title(ui.status.clone()));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + ui.input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
