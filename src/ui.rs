use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::app::{App, InputMode, CAPABILITIES, EXAMPLE_PROMPTS};
use crate::message::{group_messages, Message, MessageGroup, MessageKind};
use crate::operator::Vote;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut current_text = String::new();

    while let Some((_, c)) = chars.next() {
        if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
            // Consume the second *
            chars.next();

            // Push any accumulated plain text
            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some((_, c)) = chars.next() {
                if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
                    chars.next(); // consume second *
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, input bar, footer
    let [header_area, body_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    if app.messages.is_empty() && !app.input_disabled() {
        render_intro(frame, body_area);
    } else {
        render_chat(app, frame, body_area);
    }

    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" DataChat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!(" {} ", app.dataset),
            Style::default().fg(Color::White),
        ),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_intro(frame: &mut Frame, area: Rect) {
    let mut lines: Vec<Line> = vec![
        Line::default(),
        Line::from(Span::styled(
            "DataChat",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            "Ask questions about your dataset in plain language",
            Style::default().fg(Color::Gray),
        )),
        Line::default(),
        Line::from(Span::styled(
            "Examples (press the number to try one)",
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ];

    for (i, example) in EXAMPLE_PROMPTS.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!("  {}. ", i + 1), Style::default().fg(Color::Cyan)),
            Span::raw(*example),
        ]));
    }

    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "Capabilities",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    for capability in CAPABILITIES {
        lines.push(Line::from(vec![
            Span::styled("  • ", Style::default().fg(Color::Yellow)),
            Span::raw(capability),
        ]));
    }

    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "DataChat is in beta and may not understand certain queries.",
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    )));

    let intro = Paragraph::new(Text::from(lines))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::DarkGray)))
        .wrap(Wrap { trim: true });
    frame.render_widget(intro, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let groups = group_messages(&app.messages, app.receiving, app.waiting);
    let mut lines: Vec<Line> = Vec::new();

    for group in &groups {
        render_group(app, group, &mut lines);
    }

    // Pin the viewport to the newest content unless the user scrolled away.
    if app.stick_to_bottom {
        let total = wrapped_line_count(&lines, app.chat_width);
        app.chat_scroll = total.saturating_sub(app.chat_height);
    } else {
        let total = wrapped_line_count(&lines, app.chat_width);
        let max_scroll = total.saturating_sub(app.chat_height);
        if app.chat_scroll >= max_scroll {
            app.chat_scroll = max_scroll;
            app.stick_to_bottom = true;
        }
    }

    let chat = Paragraph::new(Text::from(lines))
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_group(app: &App, group: &MessageGroup, lines: &mut Vec<Line<'static>>) {
    // The grouping pass carries the session flags on the final incoming
    // group (synthetic or real); either flag means "show loading".
    let pending = group.receiving || group.waiting;

    // One banner per group, the avatar analogue.
    if !group.messages.is_empty() || group.last {
        match group.kind {
            MessageKind::Outgoing => lines.push(Line::from(Span::styled(
                "You:",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ))),
            MessageKind::Incoming => lines.push(Line::from(Span::styled(
                "DataChat:",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ))),
        }
    }

    for (idx, message) in group.messages.iter().enumerate() {
        let is_newest = group.last && idx == group.messages.len() - 1;
        render_message(app, message, is_newest, lines);
        lines.push(Line::default());
    }

    if group.last && group.kind == MessageKind::Incoming {
        if pending {
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
            lines.push(Line::default());
        } else if app.typewriter.as_ref().map_or(true, |tw| tw.is_done()) {
            // Offer the vote once the answer has fully revealed.
            render_vote_line(app, lines);
        }
    }
}

fn render_message(
    app: &App,
    message: &Message,
    is_newest: bool,
    lines: &mut Vec<Line<'static>>,
) {
    if let Some(outputs) = &message.outputs {
        // The host's schema-driven renderer is not available in a terminal;
        // show the structured payload as formatted JSON instead.
        let rendered =
            serde_json::to_string_pretty(outputs).unwrap_or_else(|_| outputs.to_string());
        for line in rendered.lines() {
            lines.push(Line::from(Span::styled(
                line.to_string(),
                Style::default().fg(Color::Gray),
            )));
        }
        return;
    }

    let Some(content) = message.content.as_deref() else {
        return;
    };

    match message.kind {
        MessageKind::Outgoing => {
            for line in content.lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
        MessageKind::Incoming => {
            // The newest incoming message reveals incrementally.
            let visible = match (&app.typewriter, is_newest) {
                (Some(tw), true) => tw.visible(),
                _ => content,
            };
            for line in visible.lines() {
                lines.push(parse_markdown_line(line));
            }
        }
    }
}

fn render_vote_line(app: &App, lines: &mut Vec<Line<'static>>) {
    let Some(query_id) = app.vote_target() else {
        return;
    };

    let line = match app.votes.get(query_id) {
        Some(Vote::Upvote) => Line::from(Span::styled(
            "▲ upvoted",
            Style::default().fg(Color::DarkGray),
        )),
        Some(Vote::Downvote) => Line::from(Span::styled(
            "▼ downvoted",
            Style::default().fg(Color::DarkGray),
        )),
        None => Line::from(vec![
            Span::styled("Was this helpful? ", Style::default().fg(Color::DarkGray)),
            Span::styled(" u ", Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::styled(" yes ", Style::default().fg(Color::DarkGray)),
            Span::styled(" d ", Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::styled(" no ", Style::default().fg(Color::DarkGray)),
        ]),
    };
    lines.push(line);
    lines.push(Line::default());
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let disabled = app.input_disabled();
    let editing = app.input_mode == InputMode::Editing;

    let border_color = if disabled {
        Color::DarkGray
    } else if editing {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let title = if disabled {
        " Waiting for response... "
    } else {
        " Message (Enter to send) "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let text_style = if disabled {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Cyan)
    };

    let input = Paragraph::new(visible_text)
        .style(text_style)
        .block(input_block);

    frame.render_widget(input, area);

    // Show cursor when editing
    if editing && !disabled {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.input_mode {
        InputMode::Normal => " CHAT ",
        InputMode::Editing => " INPUT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut hints: Vec<Span> = Vec::new();

    match app.input_mode {
        InputMode::Editing => {
            if !app.input_disabled() {
                hints.extend(vec![
                    Span::styled(" Enter ", key_style),
                    Span::styled(" send ", label_style),
                ]);
            }
            if app.in_flight() {
                hints.extend(vec![
                    Span::styled(" Esc ", key_style),
                    Span::styled(" stop ", label_style),
                ]);
            } else {
                hints.extend(vec![
                    Span::styled(" Esc ", key_style),
                    Span::styled(" browse ", label_style),
                ]);
            }
        }
        InputMode::Normal => {
            hints.extend(vec![
                Span::styled(" i ", key_style),
                Span::styled(" type ", label_style),
                Span::styled(" j/k ", key_style),
                Span::styled(" scroll ", label_style),
            ]);
            if app.in_flight() {
                hints.extend(vec![
                    Span::styled(" s ", key_style),
                    Span::styled(" stop ", label_style),
                ]);
            }
            if app.can_start_over() {
                hints.extend(vec![
                    Span::styled(" r ", key_style),
                    Span::styled(" start over ", label_style),
                ]);
            }
            if app
                .vote_target()
                .is_some_and(|q| !app.votes.contains_key(q))
                && !app.input_disabled()
            {
                hints.extend(vec![
                    Span::styled(" u/d ", key_style),
                    Span::styled(" vote ", label_style),
                ]);
            }
            hints.extend(vec![
                Span::styled(" q ", key_style),
                Span::styled(" quit ", label_style),
            ]);
        }
    }

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

/// Estimate the rendered height of `lines` at the given wrap width.
/// Uses character counts, the same heuristic the scroll pin relies on.
fn wrapped_line_count(lines: &[Line], width: u16) -> u16 {
    let wrap_width = if width > 0 { width as usize } else { 50 };

    let mut total: u16 = 0;
    for line in lines {
        let char_count: usize = line.spans.iter().map(|s| s.content.chars().count()).sum();
        if char_count == 0 {
            total += 1; // Empty line still takes one line
        } else {
            total += ((char_count.saturating_sub(1) / wrap_width) + 1) as u16;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markdown_bold() {
        let line = parse_markdown_line("found **12** samples");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "12");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_parse_markdown_unclosed_bold_is_literal() {
        let line = parse_markdown_line("a **b");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect::<String>();
        assert_eq!(text, "a **b");
    }

    #[test]
    fn test_wrapped_line_count() {
        let lines = vec![
            Line::from("12345678901234567890"), // 20 chars
            Line::default(),
        ];
        assert_eq!(wrapped_line_count(&lines, 10), 3);
        assert_eq!(wrapped_line_count(&lines, 20), 2);
    }
}
