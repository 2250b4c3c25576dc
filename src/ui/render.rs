//! 界面渲染
//!
//! 标题栏显示发现/连接/接收状态；左侧为设备列表与组信息，右侧为消息记录，
//! 下方为诊断日志与输入框。有恢复选择时在中央叠加弹窗。

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::core::{LogLevel, RecoveryPrompt, SenderRole, SessionSnapshot};
use crate::ui::app::App;
use crate::ui::event::Focus;

fn status_line(snapshot: &SessionSnapshot) -> String {
    let mut parts = Vec::new();
    if !snapshot.initialized {
        parts.push("Initializing".to_string());
    }
    if snapshot.discovering {
        parts.push("Discovering".to_string());
    }
    if snapshot.connecting {
        parts.push("Connecting…".to_string());
    }
    if snapshot.is_connected() {
        let role = if snapshot.is_group_owner() {
            "Group Owner"
        } else {
            "Client"
        };
        parts.push(format!("Connected ({role})"));
    } else if !snapshot.connecting {
        parts.push("Not connected".to_string());
    }
    if snapshot.receiving_messages {
        parts.push("Listening".to_string());
    }
    if snapshot.fetching_messages {
        parts.push("Fetching".to_string());
    }
    parts.join(" │ ")
}

fn sender_label(role: SenderRole) -> &'static str {
    match role {
        SenderRole::GroupOwner => "Owner ",
        SenderRole::Client => "Client",
        SenderRole::Unknown => "Peer  ",
    }
}

/// 绘制一帧
pub fn draw(f: &mut Frame, app: &mut App, snapshot: &SessionSnapshot) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(f.area());

    let title = Paragraph::new(status_line(snapshot)).block(
        Block::default()
            .title(" PeerLink ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow)),
    );
    f.render_widget(title, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[1]);
    draw_devices(f, app, snapshot, columns[0]);
    draw_messages(f, snapshot, columns[1]);
    draw_logs(f, snapshot, rows[2]);
    draw_input(f, app, snapshot, rows[3]);

    if let Some(prompt) = &app.prompt {
        draw_prompt(f, prompt);
    }
}

fn draw_devices(f: &mut Frame, app: &App, snapshot: &SessionSnapshot, area: Rect) {
    let devices = snapshot.visible_devices(app.filter_devices);
    let selected = snapshot.selected_device.as_ref().map(|d| d.address.as_str());
    let items: Vec<ListItem> = devices
        .iter()
        .map(|d| {
            let marker = if Some(d.address.as_str()) == selected { "● " } else { "  " };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(Color::Green)),
                Span::raw(d.label()),
                Span::styled(format!("  {}", d.address), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let mut title = format!(" Devices ({}) ", devices.len());
    if let Some(group) = &snapshot.group_info {
        title = format!(" Devices ({}) │ {} ", devices.len(), group.network_name);
    }
    let border = if app.focus == Focus::Devices {
        Color::Cyan
    } else {
        Color::Gray
    };
    let list = List::new(items)
        .block(
            Block::default()
                .title(title)
                .title_bottom(Line::from(Span::styled(
                    " Enter 选择 │ c 连接 │ x 断开 ",
                    Style::default().fg(Color::DarkGray),
                )))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = ListState::default();
    if !devices.is_empty() {
        state.select(Some(app.device_index.min(devices.len() - 1)));
    }
    f.render_stateful_widget(list, area, &mut state);
}

fn draw_messages(f: &mut Frame, snapshot: &SessionSnapshot, area: Rect) {
    let lines: Vec<Line> = snapshot
        .messages
        .iter()
        .map(|m| {
            let (prefix, color) = if m.is_sent {
                ("You   ".to_string(), Color::Cyan)
            } else {
                (sender_label(m.sender).to_string(), Color::Green)
            };
            Line::from(vec![
                Span::styled(
                    format!("{} ", m.timestamp.format("%H:%M:%S")),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::raw(" "),
                Span::raw(m.text.clone()),
            ])
        })
        .collect();

    let height = area.height.saturating_sub(2) as usize;
    let scroll = lines.len().saturating_sub(height);
    let this_device = snapshot
        .this_device
        .as_ref()
        .map(|d| format!(" Messages │ me: {} ", d.label()))
        .unwrap_or_else(|| " Messages ".to_string());
    let paragraph = Paragraph::new(Text::from(lines))
        .block(Block::default().title(this_device).borders(Borders::ALL))
        .wrap(Wrap { trim: false })
        .scroll((scroll as u16, 0));
    f.render_widget(paragraph, area);
}

fn draw_logs(f: &mut Frame, snapshot: &SessionSnapshot, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let skip = snapshot.logs.len().saturating_sub(height);
    let lines: Vec<Line> = snapshot
        .logs
        .iter()
        .skip(skip)
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Debug => Color::DarkGray,
                LogLevel::Info => Color::Gray,
                LogLevel::Warning => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(entry.to_string(), Style::default().fg(color)))
        })
        .collect();
    let paragraph = Paragraph::new(Text::from(lines))
        .block(Block::default().title(" Log ").borders(Borders::ALL));
    f.render_widget(paragraph, area);
}

fn draw_input(f: &mut Frame, app: &mut App, snapshot: &SessionSnapshot, area: Rect) {
    let enabled = App::can_send(snapshot);
    let title = match app.active_toast() {
        Some(toast) => format!(" {toast} "),
        None if snapshot.sending_message => " Sending… ".to_string(),
        None if snapshot.is_group_owner() => " Group owner: receiving only ".to_string(),
        None if !snapshot.is_connected() => " Connect to a device to send ".to_string(),
        None => " Message ".to_string(),
    };
    let border = match (app.focus, enabled) {
        (Focus::Input, true) => Color::Cyan,
        (_, false) => Color::DarkGray,
        _ => Color::Blue,
    };
    let hint = " Tab 切换 │ Ctrl+D 发现 │ Ctrl+G 建组 │ Ctrl+F 监听 │ Ctrl+L 清日志 │ Ctrl+Q 退出 ";
    let input = Paragraph::new(app.input.as_str())
        .block(
            Block::default()
                .title(title)
                .title_bottom(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        )
        .style(if enabled {
            Style::default()
        } else {
            Style::default().fg(Color::DarkGray)
        });
    f.render_widget(input, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn draw_prompt(f: &mut Frame, prompt: &RecoveryPrompt) {
    let mut lines = vec![Line::from(prompt.message.clone()), Line::from("")];
    for (i, choice) in prompt.choices.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!("[{}] ", i + 1), Style::default().fg(Color::Yellow)),
            Span::raw(choice.label()),
        ]));
    }
    let area = centered(f.area(), 60, prompt.choices.len() as u16 + 6);
    let paragraph = Paragraph::new(Text::from(lines))
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .title(format!(" {} ", prompt.title))
                .title_bottom(" 数字键选择 │ Esc 关闭 ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red)),
        );
    f.render_widget(Clear, area);
    f.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::ConnectionInfo;

    #[test]
    fn test_status_line() {
        let mut snap = SessionSnapshot {
            initialized: true,
            discovering: true,
            ..Default::default()
        };
        assert_eq!(status_line(&snap), "Discovering │ Not connected");
        snap.discovering = false;
        snap.connection_info = Some(ConnectionInfo::formed(true, "192.168.49.1"));
        snap.receiving_messages = true;
        assert_eq!(status_line(&snap), "Connected (Group Owner) │ Listening");
    }

    #[test]
    fn test_centered_clamps_to_area() {
        let area = Rect::new(0, 0, 40, 10);
        let r = centered(area, 60, 20);
        assert_eq!(r, area);
    }
}
