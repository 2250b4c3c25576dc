//! 事件处理
//!
//! 轮询 crossterm 键盘事件，并按当前焦点与是否有恢复选择弹窗映射为 Action。
//! 全局快捷键：Ctrl+Q 退出、Ctrl+D 开关发现、Ctrl+F 重新监听、Ctrl+L 清空日志、Ctrl+G 创建组。

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// 键盘焦点：设备列表或消息输入框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Devices,
    Input,
}

/// 按键映射结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    ToggleDiscovery,
    FetchMessages,
    ClearLog,
    CreateGroup,
    Connect,
    Disconnect,
    FocusNext,
    MoveUp,
    MoveDown,
    /// 选中高亮的设备
    Select,
    Input(char),
    Backspace,
    Submit,
    /// 选择弹窗中的第 n 个选项（从 0 开始）
    Choose(usize),
    Dismiss,
    Ignore,
}

/// 把一次按键映射为 Action
pub fn map_key(key: KeyEvent, focus: Focus, prompt_open: bool) -> Action {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('q') | KeyCode::Char('c') => Action::Quit,
            KeyCode::Char('d') => Action::ToggleDiscovery,
            KeyCode::Char('f') => Action::FetchMessages,
            KeyCode::Char('l') => Action::ClearLog,
            KeyCode::Char('g') => Action::CreateGroup,
            _ => Action::Ignore,
        };
    }

    if prompt_open {
        return match key.code {
            KeyCode::Char(c @ '1'..='9') => Action::Choose(c as usize - '1' as usize),
            KeyCode::Esc => Action::Dismiss,
            _ => Action::Ignore,
        };
    }

    match (focus, key.code) {
        (_, KeyCode::Tab) | (_, KeyCode::BackTab) => Action::FocusNext,
        (Focus::Devices, KeyCode::Up) => Action::MoveUp,
        (Focus::Devices, KeyCode::Down) => Action::MoveDown,
        (Focus::Devices, KeyCode::Enter) => Action::Select,
        (Focus::Devices, KeyCode::Char('c')) => Action::Connect,
        (Focus::Devices, KeyCode::Char('x')) => Action::Disconnect,
        (Focus::Input, KeyCode::Enter) => Action::Submit,
        (Focus::Input, KeyCode::Backspace) => Action::Backspace,
        (Focus::Input, KeyCode::Char(c)) => Action::Input(c),
        _ => Action::Ignore,
    }
}

/// 键盘轮询器
pub struct EventHandler {
    tick: Duration,
}

impl EventHandler {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    /// 等待至多一个 tick；只返回按下事件
    pub fn poll(&self) -> anyhow::Result<Option<KeyEvent>> {
        if event::poll(self.tick)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
