//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    style::{Color, Modifier, Style},
};

use super::app::{DebuggerApp, MEMORY_ROW};
use crate::cpu::{ComputerStatus, Register, FRAME_BUFFER_START, MEMORY_SIZE};

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: code, registers, status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(10),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, console, help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(8),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_console(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));
    let debug_info = app.cpu.debug_info();

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let has_bp = app.has_breakpoint(*addr);
            let bp = if has_bp { "●" } else { " " };
            let line = debug_info
                .and_then(|info| info.assembly_line(*addr))
                .map(|l| format!("  ; line {}", l))
                .unwrap_or_default();
            let text = format!("{} {}{:04x}: {:<20}{}", bp, prefix, addr, instr, line);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if has_bp {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let values = app.register_values();

    // Four registers per line
    let mut content: Vec<Line> = values
        .chunks(4)
        .map(|row| {
            let spans: Vec<Span> = row
                .iter()
                .flat_map(|(reg, value)| {
                    let style = match reg {
                        Register::Pc => Style::default().fg(Color::Yellow),
                        Register::Sp | Register::Fp => Style::default().fg(Color::Cyan),
                        _ if *value != 0 => Style::default().fg(Color::White),
                        _ => Style::default().fg(Color::DarkGray),
                    };
                    [
                        Span::raw(format!("{:>5}: ", reg.name())),
                        Span::styled(format!("{:<7}", value), style),
                    ]
                })
                .collect();
            Line::from(spans)
        })
        .collect();

    let status = app.cpu.status();
    let status_style = match status {
        ComputerStatus::Executing | ComputerStatus::Ready => Style::default().fg(Color::Green),
        ComputerStatus::Waiting | ComputerStatus::Breakpoint => Style::default().fg(Color::Yellow),
        ComputerStatus::Finished | ComputerStatus::PermanentError => Style::default().fg(Color::Red),
    };
    content.push(Line::from(vec![
        Span::raw("Cycles: "),
        Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
        Span::raw("   Test: "),
        Span::raw(if app.cpu.regs.is_flag_test_set() { "1" } else { "0" }),
        Span::raw("   Status: "),
        Span::styled(format!("{:?}", status), status_style),
    ]));

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let rows = MEMORY_SIZE / MEMORY_ROW;
    let start = app.mem_scroll.min(rows);
    let end = (start + visible_rows).min(rows);
    let pc = app.cpu.regs.pc() as usize;
    let sp = app.cpu.regs.get(Register::Sp) as u16 as usize;

    let items: Vec<ListItem> = (start..end)
        .map(|row| {
            let base = row * MEMORY_ROW;
            let bytes = app.cpu.mem.dump(base, MEMORY_ROW);
            let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            let text = format!("{:04x}: {}", base, hex.join(" "));

            let style = if (base..base + MEMORY_ROW).contains(&pc) {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if (base..base + MEMORY_ROW).contains(&sp) {
                Style::default().fg(Color::Cyan)
            } else if base >= FRAME_BUFFER_START {
                Style::default().fg(Color::Magenta)
            } else if bytes.iter().any(|&b| b != 0) {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

fn draw_console(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let mut text = app.cpu.console().output().to_string();
    if app.is_waiting() {
        text.push_str(&app.input);
        text.push('_');
    }
    // Keep the tail that fits
    let visible = (area.height as usize).saturating_sub(2);
    let lines: Vec<&str> = text.lines().collect();
    let tail = lines[lines.len().saturating_sub(visible)..].join("\n");

    let console = Paragraph::new(tail)
        .wrap(Wrap { trim: false })
        .block(Block::default()
            .title(" Console ")
            .borders(Borders::ALL));

    frame.render_widget(console, area);
}

fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint  x: Reset"),
        Line::from("↑↓ PgUp PgDn: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
